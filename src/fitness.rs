use crate::cv::{stratify_key, CV};
use crate::data::Example;
use crate::evaluation::{fold_macro_average, Evaluation};
use crate::genotype::Phenotype;
use crate::pa::PaParams;
use crate::param::Param;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Score of one phenotype
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessResult {
    /// Macro-F1 over the pooled fold predictions
    pub fit: f64,
    /// Mean and standard deviation of the folds' own macro-F1
    pub fold_mean: f64,
    pub fold_std: f64,
    pub evaluations: Vec<Evaluation>,
}

impl FitnessResult {
    pub fn from_evaluations(evaluations: Vec<Evaluation>) -> FitnessResult {
        let fit = Evaluation::merged(&evaluations).macro_f1();
        let (fold_mean, fold_std) = fold_macro_average(&evaluations);
        FitnessResult { fit, fold_mean, fold_std, evaluations }
    }
}

/// Maps an expressed configuration to a scalar to maximize
pub trait FitnessFunction: Sync {
    fn evaluate(&self, phenotype: &Phenotype) -> FitnessResult;

    /// Parameters the phenotype's overrides apply to
    fn base_params(&self) -> &PaParams;
}

/// Cross-validation fitness on folds fixed once for the whole run, so that every
/// genotype is compared on the same partitions
pub struct CvFitness<'a> {
    examples: &'a [Example],
    pub cv: CV,
    base: PaParams,
    validation_ratio: f64,
}

impl<'a> CvFitness<'a> {
    pub fn new(examples: &'a [Example], param: &Param, rng: &mut ChaCha8Rng) -> Result<CvFitness<'a>, String> {
        let key = stratify_key(&param.cv.stratify_by);
        let key_ref = key.as_ref().map(|f| f as &dyn Fn(&Example) -> String);
        let cv = CV::new(examples, param.cv.folds, param.cv.train_ratio, key_ref, rng)?;
        Ok(CvFitness {
            examples,
            cv,
            base: param.pa_params(),
            validation_ratio: param.cv.validation_pct / 100.0,
        })
    }
}

impl FitnessFunction for CvFitness<'_> {
    fn evaluate(&self, phenotype: &Phenotype) -> FitnessResult {
        let evaluations = self.cv.cross_validate(self.examples, || phenotype.build(&self.base), self.validation_ratio);
        FitnessResult::from_evaluations(evaluations)
    }

    fn base_params(&self) -> &PaParams {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Feature;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    pub fn examples() -> Vec<Example> {
        (0..60)
            .map(|i| {
                let target = i % 3;
                Example::new(
                    &format!("lemma{}/{}", i % 2, i),
                    target,
                    vec![
                        Feature::new("dep", &format!("cue{}", target), 1.0),
                        Feature::new("noise", &format!("n{}", i % 7), 1.0),
                    ],
                )
            })
            .collect()
    }

    fn phenotype(groups: &[&str]) -> Phenotype {
        Phenotype {
            groups: groups.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>(),
            hyperparameters: vec![],
        }
    }

    #[test]
    fn test_informative_groups_score_higher() {
        let data = examples();
        let param = Param::test();
        let fitness = CvFitness::new(&data, &param, &mut ChaCha8Rng::seed_from_u64(42)).unwrap();

        let good = fitness.evaluate(&phenotype(&["dep"]));
        let bad = fitness.evaluate(&phenotype(&["noise"]));
        assert_eq!(good.evaluations.len(), param.cv.folds);
        assert!((good.fit - 1.0).abs() < 1e-12);
        assert!(good.fit > bad.fit);
    }

    #[test]
    fn test_fitness_is_deterministic() {
        let data = examples();
        let param = Param::test();
        let fitness = CvFitness::new(&data, &param, &mut ChaCha8Rng::seed_from_u64(42)).unwrap();
        let p = phenotype(&["dep", "noise"]);
        assert_eq!(fitness.evaluate(&p), fitness.evaluate(&p));
    }

    #[test]
    fn test_fit_is_pooled_macro_f1() {
        let data = examples();
        let param = Param::test();
        let fitness = CvFitness::new(&data, &param, &mut ChaCha8Rng::seed_from_u64(42)).unwrap();
        let result = fitness.evaluate(&phenotype(&["noise"]));
        assert_eq!(result.fit, Evaluation::merged(&result.evaluations).macro_f1());
        assert_eq!((result.fold_mean, result.fold_std), fold_macro_average(&result.evaluations));
    }

    #[test]
    fn test_invalid_cv_is_reported() {
        let data = examples();
        let mut param = Param::test();
        param.cv.folds = 100;
        assert!(CvFitness::new(&data, &param, &mut ChaCha8Rng::seed_from_u64(42)).is_err());
    }
}
