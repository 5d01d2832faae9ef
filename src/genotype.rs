use crate::features::PipelineClassifier;
use crate::gene::{Chromosome, Gene};
use crate::pa::{Hyperparameter, HyperparameterValue, PaParams};
use crate::param::Param;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Expressed configuration of a genotype: active feature groups and hyperparameter overrides
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Phenotype {
    pub groups: BTreeSet<String>,
    pub hyperparameters: Vec<HyperparameterValue>,
}

impl Phenotype {
    /// `base` with the expressed hyperparameters applied in gene order
    pub fn params(&self, base: &PaParams) -> PaParams {
        let mut params = base.clone();
        for value in &self.hyperparameters {
            value.apply(&mut params);
        }
        params
    }

    /// Untrained classifier this phenotype describes
    pub fn build(&self, base: &PaParams) -> PipelineClassifier {
        PipelineClassifier::new(self.groups.clone(), self.params(base))
    }

    /// Identity of the configuration: two phenotypes with the same effective
    /// hyperparameters and groups share a hash
    pub fn compute_hash(&self, base: &PaParams) -> u64 {
        let params = self.params(base);
        let mut hasher = DefaultHasher::new();
        self.groups.hash(&mut hasher);
        for hyperparameter in Hyperparameter::ALL {
            hyperparameter.get(&params).to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl fmt::Display for Phenotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<&str> = self.groups.iter().map(|g| g.as_str()).collect();
        let hyperparameters: Vec<String> = self.hyperparameters.iter().map(|h| h.to_string()).collect();
        write!(f, "groups [{}] | hyperparameters [{}]", groups.join(", "), hyperparameters.join(", "))
    }
}

/// Feature and hyperparameter chromosomes plus the score of their current expression
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genotype {
    pub features: Chromosome<String>,
    pub hyperparameters: Chromosome<HyperparameterValue>,
    pub fit: f64,
    /// Per-fold macro-F1 mean and standard deviation, for reporting
    pub fold_mean: f64,
    pub fold_std: f64,
    /// Generation at which this genotype was created
    pub epoch: usize,
    pub hash: u64,
    pub evaluated: bool,
    phenotype: Phenotype,
}

impl Genotype {
    pub fn new(features: Chromosome<String>, hyperparameters: Chromosome<HyperparameterValue>) -> Genotype {
        let mut genotype = Genotype {
            features,
            hyperparameters,
            fit: 0.0,
            fold_mean: 0.0,
            fold_std: 0.0,
            epoch: 0,
            hash: 0,
            evaluated: false,
            phenotype: Phenotype::default(),
        };
        genotype.refresh();
        genotype
    }

    /// Seed genotype described by the `ga` section, not yet expressed
    pub fn from_param(param: &Param) -> Result<Genotype, String> {
        let mut features = Vec::new();
        for gene in &param.ga.feature_genes {
            features.push(Gene::new(gene.options.clone(), gene.p)?);
        }

        let mut hyperparameters = Vec::new();
        for gene in &param.ga.hyperparameter_genes {
            let hyperparameter = Hyperparameter::from_name(&gene.name)?;
            let mut options = Vec::new();
            for value in &gene.values {
                hyperparameter.validate(*value)?;
                options.push(HyperparameterValue::new(hyperparameter, *value));
            }
            hyperparameters.push(Gene::new(options, gene.p)?);
        }

        Ok(Genotype::new(Chromosome::new(features), Chromosome::new(hyperparameters)))
    }

    /// Re-express every gene and drop the previous score
    pub fn express(&mut self, rng: &mut ChaCha8Rng) {
        self.features.express(rng);
        self.hyperparameters.express(rng);
        self.refresh();
    }

    /// Rebuild the cached phenotype from the genes' current expression
    pub fn refresh(&mut self) {
        self.phenotype = Phenotype {
            groups: self.features.values().into_iter().cloned().collect(),
            hyperparameters: self.hyperparameters.values().into_iter().copied().collect(),
        };
        self.evaluated = false;
        self.fit = 0.0;
        self.fold_mean = 0.0;
        self.fold_std = 0.0;
    }

    pub fn phenotype(&self) -> &Phenotype {
        &self.phenotype
    }

    pub fn compute_hash(&mut self, base: &PaParams) {
        self.hash = self.phenotype.compute_hash(base);
    }

    pub fn display(&self) -> String {
        format!("fit {:.4} (folds {:.4} ± {:.4}) | age {} | {}", self.fit, self.fold_mean, self.fold_std, self.epoch, self.phenotype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    impl Genotype {
        pub fn test() -> Genotype {
            Genotype::from_param(&Param::test()).unwrap()
        }
    }

    #[test]
    fn test_from_param_builds_genes() {
        let genotype = Genotype::test();
        assert_eq!(genotype.features.len(), 2);
        assert_eq!(genotype.hyperparameters.len(), 1);
        assert_eq!(genotype.hyperparameters.genes[0].options[2], HyperparameterValue::new(Hyperparameter::aggressiveness, 1.0));
        assert!(genotype.phenotype().groups.is_empty());
    }

    #[test]
    fn test_from_param_rejects_unknown_hyperparameter() {
        let mut param = Param::test();
        param.ga.hyperparameter_genes[0].name = "dropout".to_string();
        assert!(Genotype::from_param(&param).is_err());
    }

    #[test]
    fn test_expression_fills_phenotype() {
        let mut param = Param::test();
        for gene in param.ga.feature_genes.iter_mut() {
            gene.p = 1.0;
        }
        param.ga.hyperparameter_genes[0].p = 1.0;
        let mut genotype = Genotype::from_param(&param).unwrap();
        genotype.express(&mut ChaCha8Rng::seed_from_u64(42));

        let phenotype = genotype.phenotype();
        assert_eq!(phenotype.groups.len(), 2);
        assert!(phenotype.groups.contains("dep"));
        assert_eq!(phenotype.hyperparameters.len(), 1);
        let params = phenotype.params(&param.pa_params());
        assert_eq!(params.aggressiveness, phenotype.hyperparameters[0].value);
        assert_eq!(phenotype.build(&param.pa_params()).groups, phenotype.groups);
    }

    #[test]
    fn test_hash_identifies_effective_configuration() {
        let base = PaParams::default();
        let a = Phenotype {
            groups: ["dep".to_string()].into_iter().collect(),
            hyperparameters: vec![],
        };
        // overriding with the default value does not change the configuration
        let b = Phenotype {
            groups: a.groups.clone(),
            hyperparameters: vec![HyperparameterValue::new(Hyperparameter::aggressiveness, base.aggressiveness)],
        };
        let c = Phenotype {
            groups: a.groups.clone(),
            hyperparameters: vec![HyperparameterValue::new(Hyperparameter::aggressiveness, 0.01)],
        };
        assert_eq!(a.compute_hash(&base), b.compute_hash(&base));
        assert_ne!(a.compute_hash(&base), c.compute_hash(&base));
    }

    #[test]
    fn test_refresh_resets_score() {
        let mut genotype = Genotype::test();
        genotype.fit = 0.8;
        genotype.evaluated = true;
        genotype.express(&mut ChaCha8Rng::seed_from_u64(1));
        assert!(!genotype.evaluated);
        assert_eq!(genotype.fit, 0.0);
    }
}
