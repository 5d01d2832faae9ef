use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A probabilistically activated slot choosing one option out of a closed set.
/// The generator is lent by the caller so that a whole population shares one seeded stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gene<T> {
    pub options: Vec<T>,
    /// Activation probability
    pub p: f64,
    /// Index of the currently expressed option, None when inactive
    pub expressed: Option<usize>,
}

impl<T: Clone> Gene<T> {
    pub fn new(options: Vec<T>, p: f64) -> Result<Gene<T>, String> {
        if options.is_empty() {
            return Err("A gene needs at least one option".to_string());
        }
        if !(0.0..=1.0).contains(&p) {
            return Err(format!("Gene activation probability must be in [0, 1] (got {})", p));
        }
        Ok(Gene { options, p, expressed: None })
    }

    /// Biased coin of probability `p`, then a uniform pick among the options on success
    pub fn express(&mut self, rng: &mut ChaCha8Rng) -> Option<&T> {
        self.expressed = if rng.gen_bool(self.p) {
            Some(rng.gen_range(0..self.options.len()))
        } else {
            None
        };
        self.value()
    }

    pub fn value(&self) -> Option<&T> {
        self.expressed.map(|i| &self.options[i])
    }

    pub fn is_active(&self) -> bool {
        self.expressed.is_some()
    }
}

/// Ordered genes of one kind; positions line up across genotypes for crossover
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chromosome<T> {
    pub genes: Vec<Gene<T>>,
}

impl<T: Clone> Chromosome<T> {
    pub fn new(genes: Vec<Gene<T>>) -> Chromosome<T> {
        Chromosome { genes }
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn express(&mut self, rng: &mut ChaCha8Rng) {
        for gene in self.genes.iter_mut() {
            gene.express(rng);
        }
    }

    /// Values of the active genes, in gene order
    pub fn values(&self) -> Vec<&T> {
        self.genes.iter().filter_map(|g| g.value()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_invalid_genes_are_rejected() {
        assert!(Gene::<u8>::new(vec![], 0.5).is_err());
        assert!(Gene::new(vec![1], 1.5).is_err());
        assert!(Gene::new(vec![1], -0.1).is_err());
        assert!(Gene::new(vec![1], 1.0).is_ok());
    }

    #[test]
    fn test_expression_frequencies() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut gene = Gene::new(vec!["a", "b", "c", "d"], 0.3).unwrap();
        let draws = 40_000;
        let mut active = 0;
        let mut per_option = [0usize; 4];
        for _ in 0..draws {
            if gene.express(&mut rng).is_some() {
                active += 1;
                per_option[gene.expressed.unwrap()] += 1;
            }
        }
        let rate = active as f64 / draws as f64;
        assert!((rate - 0.3).abs() < 0.015, "activation rate {}", rate);
        for count in per_option {
            let freq = count as f64 / active as f64;
            assert!((freq - 0.25).abs() < 0.02, "option frequency {}", freq);
        }
    }

    #[test]
    fn test_extreme_probabilities() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut never = Gene::new(vec![1, 2], 0.0).unwrap();
        let mut always = Gene::new(vec![1, 2], 1.0).unwrap();
        for _ in 0..100 {
            assert!(never.express(&mut rng).is_none());
            assert!(always.express(&mut rng).is_some());
        }
    }

    #[test]
    fn test_chromosome_values_follow_gene_order() {
        let mut chromosome = Chromosome::new(vec![
            Gene::new(vec!["x"], 1.0).unwrap(),
            Gene::new(vec!["y"], 0.0).unwrap(),
            Gene::new(vec!["z"], 1.0).unwrap(),
        ]);
        chromosome.express(&mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(chromosome.values(), vec![&"x", &"z"]);
        assert_eq!(chromosome.len(), 3);
    }
}
