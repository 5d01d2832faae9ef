use crate::fitness::{FitnessFunction, FitnessResult};
use crate::genotype::{Genotype, Phenotype};
use crate::pa::PaParams;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Fitness results already computed in this run, keyed by phenotype hash
pub type FitnessCache = HashMap<u64, FitnessResult>;

#[derive(Clone, Serialize, Deserialize)]
pub struct Population {
    pub genotypes: Vec<Genotype>,
}

impl Population {
    pub fn new() -> Population {
        Population { genotypes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.genotypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genotypes.is_empty()
    }

    pub fn add(&mut self, population: Population) {
        self.genotypes.extend(population.genotypes);
    }

    pub fn compute_hash(&mut self, base: &PaParams) {
        for genotype in &mut self.genotypes {
            genotype.compute_hash(base);
        }
    }

    /// Best fit first; equal fits keep their order
    pub fn sort(mut self) -> Self {
        self.genotypes.sort_by(|i, j| j.fit.partial_cmp(&i.fit).unwrap_or(Ordering::Equal));
        self
    }

    /// First `pct`% of the (sorted) population, at least one genotype
    pub fn select_first_pct(&self, pct: f64) -> (Population, usize) {
        let n = ((self.genotypes.len() as f64 * pct / 100.0) as usize).max(1).min(self.genotypes.len());

        (
            Population { genotypes: self.genotypes.iter().take(n).cloned().collect() },
            n,
        )
    }

    pub fn best(&self) -> Option<&Genotype> {
        self.genotypes.first()
    }

    /// Scores every unevaluated genotype. Distinct phenotypes missing from `cache`
    /// are evaluated in parallel; the others reuse the cached result.
    ///
    /// # Returns
    ///
    /// The number of fitness evaluations actually run.
    pub fn fit(&mut self, fitness: &dyn FitnessFunction, cache: &mut FitnessCache) -> usize {
        self.compute_hash(fitness.base_params());

        let mut pending: BTreeMap<u64, Phenotype> = BTreeMap::new();
        for genotype in self.genotypes.iter().filter(|g| !g.evaluated) {
            if !cache.contains_key(&genotype.hash) {
                pending.entry(genotype.hash).or_insert_with(|| genotype.phenotype().clone());
            }
        }

        let results: Vec<(u64, FitnessResult)> = pending
            .into_par_iter()
            .map(|(hash, phenotype)| {
                let mut result = fitness.evaluate(&phenotype);
                result.evaluations.clear();
                debug!("Evaluated {} -> {:.4}", phenotype, result.fit);
                (hash, result)
            })
            .collect();
        let evaluated = results.len();
        cache.extend(results);

        for genotype in self.genotypes.iter_mut().filter(|g| !g.evaluated) {
            if let Some(result) = cache.get(&genotype.hash) {
                genotype.fit = result.fit;
                genotype.fold_mean = result.fold_mean;
                genotype.fold_std = result.fold_std;
                genotype.evaluated = true;
            }
        }

        evaluated
    }
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("genotypes", &self.genotypes)
            .finish()
    }
}
