pub mod data;
pub mod utils;
pub mod classifier;
pub mod evaluation;
pub mod pa;
pub mod features;
pub mod cv;
pub mod gene;
pub mod genotype;
pub mod fitness;
pub mod population;
pub mod param;
pub mod ga;
pub mod experiment;

use crate::classifier::{evaluate, Classifier};
use crate::cv::{stratify_key, CV};
use crate::data::{Example, ExampleSet};
use crate::evaluation::Evaluation;
use crate::experiment::Experiment;
use crate::features::PipelineClassifier;
use crate::fitness::{CvFitness, FitnessFunction};
use crate::ga::ga;
use crate::genotype::{Genotype, Phenotype};
use crate::param::{Algorithm, Param};
use crate::population::Population;
use chrono::Local;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Outcome of the training stage, before the final model is fitted
struct Training {
    cv_folds_ids: Vec<Vec<String>>,
    fold_evaluations: Vec<Evaluation>,
    generations: Vec<Population>,
    best_genotype: Option<Genotype>,
    phenotype: Phenotype,
}

/// Loads the data, runs cross-validation or the genetic algorithm, fits the final
/// model on the whole training set and evaluates it on the test set when one is given.
pub fn run(param: &Param, running: Arc<AtomicBool>) -> Result<Experiment, Box<dyn Error>> {
    let start = std::time::Instant::now();
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

    let train = ExampleSet::load(&param.data.train)?;
    cinfo!(param.general.display_colorful, "\x1b[2;97m{:?}\x1b[0m", train);
    if train.is_empty() {
        return Err(format!("No example in {}", param.data.train).into());
    }

    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(param.general.thread_number)
        .build()?;

    let training = thread_pool.install(|| match param.general.algo {
        Algorithm::cv => run_cv(&train, param),
        Algorithm::ga => run_ga(&train.examples, param, running),
    })?;

    cinfo!(param.general.display_colorful, "\x1b[1;93mFitting final model: {}\x1b[0m", training.phenotype);
    let mut model = thread_pool.install(|| fit_final_model(&train.examples, &training.phenotype, param));
    model.set_label_index(train.labels.clone());
    if !param.general.save_model.is_empty() {
        model.save_file(&param.general.save_model)?;
        info!("Model saved to {}", param.general.save_model);
    }

    let test_evaluation = if !param.data.test.is_empty() {
        debug!("Loading test data...");
        let test = ExampleSet::load_with_labels(&param.data.test, &train.labels)?;
        Some(evaluate(&model, &test.examples))
    } else {
        None
    };

    let version = match option_env!("WSDGA_GIT_SHA") {
        Some(sha) => format!("{}#{}", env!("CARGO_PKG_VERSION"), sha),
        None => env!("CARGO_PKG_VERSION").to_string(),
    };
    let id_base = param.general.save_exp.split('.').next().unwrap_or("");

    Ok(Experiment {
        id: format!("{}_{:?}_{}", id_base, param.general.algo, timestamp),
        version,
        timestamp,
        execution_time: start.elapsed().as_secs_f64(),
        parameters: param.clone(),
        labels: train.labels.clone(),
        cv_folds_ids: training.cv_folds_ids,
        fold_evaluations: training.fold_evaluations,
        generations: training.generations,
        best_genotype: training.best_genotype,
        test_evaluation,
    })
}

/// Cross-validates the classifier configured by the `classifier` section, on every feature group
fn run_cv(train: &ExampleSet, param: &Param) -> Result<Training, String> {
    let mut rng = ChaCha8Rng::seed_from_u64(param.general.seed);
    let key = stratify_key(&param.cv.stratify_by);
    let key_ref = key.as_ref().map(|f| f as &dyn Fn(&Example) -> String);
    let cv = CV::new(&train.examples, param.cv.folds, param.cv.train_ratio, key_ref, &mut rng)?;

    let phenotype = Phenotype { groups: train.feature_groups(), hyperparameters: vec![] };
    let base = param.pa_params();
    let fold_evaluations = cv.cross_validate(&train.examples, || phenotype.build(&base), param.cv.validation_pct / 100.0);

    for (i, evaluation) in fold_evaluations.iter().enumerate() {
        info!(
            "\x1b[1;93mFold #{} completed | accuracy {:.3} | macro-F1 {:.3}\x1b[0m",
            i + 1, evaluation.accuracy(), evaluation.macro_f1()
        );
    }

    Ok(Training {
        cv_folds_ids: cv.get_ids(&train.examples),
        fold_evaluations,
        generations: vec![],
        best_genotype: None,
        phenotype,
    })
}

/// Runs the genetic algorithm and re-scores its best genotype on the same folds for the report
fn run_ga(examples: &[Example], param: &Param, running: Arc<AtomicBool>) -> Result<Training, String> {
    let generations = ga(examples, param, running)?;
    let best_genotype = generations
        .last()
        .and_then(|pop| pop.best())
        .cloned()
        .ok_or("Genetic algorithm produced no genotype")?;
    cinfo!(param.general.display_colorful, "\x1b[1;92mBest genotype\x1b[0m: {}", best_genotype.display());

    // same seed, same folds as during the evolution
    let mut rng = ChaCha8Rng::seed_from_u64(param.general.seed);
    let fitness = CvFitness::new(examples, param, &mut rng)?;
    let result = fitness.evaluate(best_genotype.phenotype());

    Ok(Training {
        cv_folds_ids: fitness.cv.get_ids(examples),
        fold_evaluations: result.evaluations,
        phenotype: best_genotype.phenotype().clone(),
        best_genotype: Some(best_genotype),
        generations,
    })
}

/// Trains the phenotype's classifier on all examples, holding out a random `cv.validation_pct`
/// share for early stopping
fn fit_final_model(examples: &[Example], phenotype: &Phenotype, param: &Param) -> PipelineClassifier {
    let mut model = phenotype.build(&param.pa_params());
    let mut refs: Vec<&Example> = examples.iter().collect();
    // instance files are often sorted by label
    refs.shuffle(&mut ChaCha8Rng::seed_from_u64(param.general.seed));
    let n_valid = (refs.len() as f64 * param.cv.validation_pct / 100.0).round() as usize;
    let split = refs.len() - n_valid.min(refs.len().saturating_sub(1));
    model.train(&refs[..split], &refs[split..]);
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Feature;

    /// 45 examples of label 0, 45 of label 1, then 10 of label 2
    fn label_sorted_examples() -> Vec<Example> {
        (0..100)
            .map(|i| {
                let target = if i < 45 { 0 } else if i < 90 { 1 } else { 2 };
                Example::new(
                    &format!("draw/{}", i),
                    target,
                    vec![
                        Feature::new("dep", &format!("obj_{}", target), 1.0),
                        Feature::new("bow", &format!("w{}", i % 7), 1.0),
                    ],
                )
            })
            .collect()
    }

    #[test]
    fn test_final_model_trains_on_every_label_of_sorted_file() {
        let examples = label_sorted_examples();
        let mut param = Param::default();
        param.general.seed = 42;
        param.cv.validation_pct = 10.0;
        let phenotype = Phenotype { groups: ["dep".to_string()].into_iter().collect(), hyperparameters: vec![] };

        let model = fit_final_model(&examples, &phenotype, &param);
        assert_eq!(model.model().labels(), &[0, 1, 2]);
        assert!(examples[90..].iter().all(|e| model.classify(e) == Some(2)));
    }
}
