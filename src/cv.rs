use crate::classifier::{evaluate, Classifier, Labeled};
use crate::evaluation::Evaluation;
use crate::param::StratifyBy;
use crate::data::Example;
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

/// One (train, test) partition of instance indices. Train indices are kept in a
/// seeded random order: the validation hold-out is taken from their tail.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// k-fold partition of an instance list. Test sets are disjoint and cover every instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CV {
    pub folds: Vec<Fold>,
}

impl CV {
    /// Builds `k` folds over `instances`.
    ///
    /// # Arguments
    /// * `k` - number of folds, `2 <= k < instances.len()`
    /// * `train_ratio` - share of each fold's train part kept, in (0, 1]
    /// * `stratify` - key grouping instances into strata; each stratum is spread evenly over the folds
    /// * `rng` - seeded generator driving the shuffles and the down-sampling
    pub fn new<I>(instances: &[I], k: usize, train_ratio: f64, stratify: Option<&dyn Fn(&I) -> String>,
        rng: &mut ChaCha8Rng) -> Result<CV, String> {
        let n = instances.len();
        if k < 2 || k >= n {
            return Err(format!("Cross-validation needs 2 <= k < n (k={}, n={})", k, n));
        }
        if !(train_ratio > 0.0 && train_ratio <= 1.0) {
            return Err(format!("Train ratio must be in (0, 1] (got {})", train_ratio));
        }

        let mut strata: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, instance) in instances.iter().enumerate() {
            let key = stratify.map_or_else(String::new, |f| f(instance));
            strata.entry(key).or_default().push(i);
        }

        // deal strata round-robin with a cursor shared across strata
        let mut tests: Vec<Vec<usize>> = vec![Vec::new(); k];
        let mut cursor = 0;
        for (_, mut members) in strata {
            members.shuffle(rng);
            for i in members {
                tests[cursor % k].push(i);
                cursor += 1;
            }
        }

        let mut folds = Vec::with_capacity(k);
        for f in 0..k {
            let mut train: Vec<usize> = tests.iter()
                .enumerate()
                .filter(|(j, _)| *j != f)
                .flat_map(|(_, t)| t.iter().copied())
                .collect();
            train.shuffle(rng);
            if train_ratio < 1.0 {
                let keep = ((train.len() as f64 * train_ratio).round() as usize).max(1);
                train.truncate(keep);
            }
            let mut test = tests[f].clone();
            test.sort_unstable();
            folds.push(Fold { train, test });
        }

        Ok(CV { folds })
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    /// Ids of each fold's test instances, in fold order
    pub fn get_ids<I: Labeled>(&self, instances: &[I]) -> Vec<Vec<String>> {
        self.folds.iter()
            .map(|fold| fold.test.iter().map(|&i| instances[i].id().to_string()).collect())
            .collect()
    }

    /// Trains a fresh classifier from `factory` on every fold and evaluates it on the fold's test part.
    ///
    /// # Arguments
    /// * `validation_ratio` - share of the fold's train part held out for early stopping (0 for none)
    ///
    /// # Returns
    /// One `Evaluation` per fold, in fold order. A fold whose classifier panics yields an empty Evaluation.
    pub fn cross_validate<I, C, F>(&self, instances: &[I], factory: F, validation_ratio: f64) -> Vec<Evaluation>
    where I: Labeled + Sync, C: Classifier<I>, F: Fn() -> C + Sync {
        self.folds.par_iter()
            .enumerate()
            .map(|(i, fold)| {
                debug!("Completing fold #{}...", i + 1);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_fold(instances, fold, &factory, validation_ratio)
                }));
                match outcome {
                    Ok(evaluation) => {
                        debug!("Fold #{} completed | accuracy {:.3} | macro-F1 {:.3}", i + 1, evaluation.accuracy(), evaluation.macro_f1());
                        evaluation
                    },
                    Err(_) => {
                        warn!("Fold #{} failed: its classifier panicked, fold scored as empty", i + 1);
                        Evaluation::new()
                    }
                }
            })
            .collect()
    }
}

fn run_fold<I, C, F>(instances: &[I], fold: &Fold, factory: &F, validation_ratio: f64) -> Evaluation
where I: Labeled, C: Classifier<I>, F: Fn() -> C {
    let n_valid = (fold.train.len() as f64 * validation_ratio).round() as usize;
    let split = if n_valid > 0 && n_valid < fold.train.len() { fold.train.len() - n_valid } else { fold.train.len() };

    let train: Vec<&I> = fold.train[..split].iter().map(|&i| &instances[i]).collect();
    let valid: Vec<&I> = fold.train[split..].iter().map(|&i| &instances[i]).collect();

    let mut classifier = factory();
    classifier.train(&train, &valid);

    evaluate(&classifier, fold.test.iter().map(|&i| &instances[i]))
}

fn label_key(e: &Example) -> String {
    e.target.to_string()
}

fn id_prefix_key(e: &Example) -> String {
    e.id_prefix().to_string()
}

/// Stratification key function for examples
pub fn stratify_key(by: &StratifyBy) -> Option<fn(&Example) -> String> {
    match by {
        StratifyBy::none => None,
        StratifyBy::label => Some(label_key as fn(&Example) -> String),
        StratifyBy::id_prefix => Some(id_prefix_key as fn(&Example) -> String),
    }
}
