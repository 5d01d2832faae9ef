use crate::pa::{Hyperparameter, PaParams};
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[allow(non_camel_case_types)]
pub enum Algorithm {
    cv,
    ga,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[allow(non_camel_case_types)]
pub enum StratifyBy {
    none,
    label,
    id_prefix,
}

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default)]
    pub cv: CV,
    #[serde(default)]
    pub ga: GA,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "seed_default")]
    pub seed: u64,
    #[serde(default = "algorithm_default")]
    pub algo: Algorithm,
    #[serde(default = "one_default")]
    pub thread_number: usize,
    #[serde(default = "empty_string")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "true_default")]
    pub display_colorful: bool,
    #[serde(default = "false_default")]
    pub keep_trace: bool,
    #[serde(default = "empty_string")]
    pub save_exp: String,
    #[serde(default = "empty_string")]
    pub save_model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Data {
    /// Training instance file (TSV)
    #[serde(default = "empty_string")]
    pub train: String,
    /// Optional held-out instance file evaluated with the final model
    #[serde(default = "empty_string")]
    pub test: String,
}

/// Base hyperparameters of the PA-I learner; genes override them per genotype
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Classifier {
    #[serde(default = "epochs_default")]
    pub epochs: usize,
    #[serde(default = "patience_default")]
    pub patience: usize,
    #[serde(default = "aggressiveness_default")]
    pub aggressiveness: f64,
    #[serde(default = "true_default")]
    pub averaging: bool,
    #[serde(default = "true_default")]
    pub shuffle: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CV {
    #[serde(default = "folds_default")]
    pub folds: usize,
    #[serde(default = "train_ratio_default")]
    pub train_ratio: f64,
    /// Percentage of each fold's train part held out for early stopping
    #[serde(default = "zero_default")]
    pub validation_pct: f64,
    #[serde(default = "stratify_default")]
    pub stratify_by: StratifyBy,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FeatureGene {
    /// Mutually exclusive feature groups
    pub options: Vec<String>,
    #[serde(default = "half_default")]
    pub p: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HyperparameterGene {
    pub name: String,
    pub values: Vec<f64>,
    #[serde(default = "half_default")]
    pub p: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GA {
    #[serde(default = "population_size_default")]
    pub population_size: usize,
    #[serde(default = "min_generations_default")]
    pub min_generations: usize,
    #[serde(default = "max_generations_default")]
    pub max_generations: usize,
    #[serde(default = "max_age_best_genotype_default")]
    pub max_age_best_genotype: usize,
    #[serde(default = "select_elite_pct_default")]
    pub select_elite_pct: f64,
    #[serde(default = "tournament_size_default")]
    pub tournament_size: usize,
    /// Per-gene probability (in %) of a forced re-expression in each child
    #[serde(default = "mutation_pct_default")]
    pub mutation_pct: f64,
    #[serde(default)]
    pub feature_genes: Vec<FeatureGene>,
    #[serde(default)]
    pub hyperparameter_genes: Vec<HyperparameterGene>,
}

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Data {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for CV {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for GA {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }

    /// PA-I parameters built from the classifier section, seeded from the general seed
    pub fn pa_params(&self) -> PaParams {
        PaParams {
            epochs: self.classifier.epochs,
            patience: self.classifier.patience,
            aggressiveness: self.classifier.aggressiveness,
            averaging: self.classifier.averaging,
            shuffle: self.classifier.shuffle,
            seed: self.general.seed,
        }
    }
}

pub fn get(param_file: String) -> Result<Param, Box<dyn Error>> {
    let param_file_reader = File::open(param_file)?;
    let param_reader = BufReader::new(param_file_reader);

    let mut config: Param = serde_yaml::from_reader(param_reader)?;

    validate(&mut config)?;

    Ok(config)
}

pub fn validate(param: &mut Param) -> Result<(), String> {
    if !param.general.log_base.is_empty() {
        param.general.display_colorful = false;
    }

    if param.general.thread_number == 0 {
        return Err("general.thread_number must be at least 1".to_string());
    }

    if param.classifier.epochs == 0 {
        return Err("classifier.epochs must be at least 1".to_string());
    }
    if !(param.classifier.aggressiveness > 0.0) {
        return Err(format!("classifier.aggressiveness must be positive (got {})", param.classifier.aggressiveness));
    }
    if param.classifier.patience == 0 {
        warn!("classifier.patience=0: early stopping disabled, every epoch will run");
    }

    if param.cv.folds < 2 {
        return Err(format!("cv.folds must be at least 2 (got {})", param.cv.folds));
    }
    if !(param.cv.train_ratio > 0.0 && param.cv.train_ratio <= 1.0) {
        return Err(format!("cv.train_ratio must be in (0, 1] (got {})", param.cv.train_ratio));
    }
    if !(0.0..100.0).contains(&param.cv.validation_pct) {
        return Err(format!("cv.validation_pct must be in [0, 100) (got {})", param.cv.validation_pct));
    }

    if param.general.algo == Algorithm::ga {
        validate_ga(param)?;
    }

    Ok(())
}

fn validate_ga(param: &mut Param) -> Result<(), String> {
    let ga = &mut param.ga;

    if ga.population_size < 2 {
        return Err(format!("ga.population_size must be at least 2 (got {})", ga.population_size));
    }
    if !(ga.select_elite_pct > 0.0 && ga.select_elite_pct <= 100.0) {
        return Err(format!("ga.select_elite_pct must be in (0, 100] (got {})", ga.select_elite_pct));
    }
    if !(0.0..=100.0).contains(&ga.mutation_pct) {
        return Err(format!("ga.mutation_pct must be in [0, 100] (got {})", ga.mutation_pct));
    }
    if ga.tournament_size == 0 {
        return Err("ga.tournament_size must be at least 1".to_string());
    }
    if ga.tournament_size > ga.population_size {
        warn!("ga.tournament_size ({}) exceeds the population size: set to {}", ga.tournament_size, ga.population_size);
        ga.tournament_size = ga.population_size;
    }
    if ga.max_generations < ga.min_generations {
        warn!("ga.max_generations ({}) is lower than ga.min_generations ({}): the latter is ignored",
            ga.max_generations, ga.min_generations);
    }

    if ga.feature_genes.is_empty() {
        return Err("ga.feature_genes must list at least one gene".to_string());
    }
    for (i, gene) in ga.feature_genes.iter().enumerate() {
        if gene.options.is_empty() {
            return Err(format!("ga.feature_genes[{}] has no option", i));
        }
        if !(0.0..=1.0).contains(&gene.p) {
            return Err(format!("ga.feature_genes[{}].p must be in [0, 1] (got {})", i, gene.p));
        }
    }
    for gene in &ga.hyperparameter_genes {
        let hyperparameter = Hyperparameter::from_name(&gene.name)?;
        if gene.values.is_empty() {
            return Err(format!("ga.hyperparameter_genes '{}' has no value", gene.name));
        }
        for value in &gene.values {
            hyperparameter.validate(*value)?;
        }
        if !(0.0..=1.0).contains(&gene.p) {
            return Err(format!("ga.hyperparameter_genes '{}' p must be in [0, 1] (got {})", gene.name, gene.p));
        }
    }

    Ok(())
}

fn seed_default() -> u64 {
    4815162342
}
fn algorithm_default() -> Algorithm {
    Algorithm::ga
}
fn one_default() -> usize {
    1
}
fn empty_string() -> String {
    "".to_string()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn true_default() -> bool {
    true
}
fn false_default() -> bool {
    false
}
fn zero_default() -> f64 {
    0.0
}
fn half_default() -> f64 {
    0.5
}
fn epochs_default() -> usize {
    PaParams::default().epochs
}
fn patience_default() -> usize {
    PaParams::default().patience
}
fn aggressiveness_default() -> f64 {
    PaParams::default().aggressiveness
}
fn folds_default() -> usize {
    5
}
fn train_ratio_default() -> f64 {
    1.0
}
fn stratify_default() -> StratifyBy {
    StratifyBy::label
}
fn population_size_default() -> usize {
    20
}
fn min_generations_default() -> usize {
    5
}
fn max_generations_default() -> usize {
    30
}
fn max_age_best_genotype_default() -> usize {
    5
}
fn select_elite_pct_default() -> f64 {
    10.0
}
fn tournament_size_default() -> usize {
    3
}
fn mutation_pct_default() -> f64 {
    10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Param {
        pub fn test() -> Param {
            let mut param = Param::default();
            param.ga.feature_genes = vec![
                FeatureGene { options: vec!["dep".to_string()], p: 0.5 },
                FeatureGene { options: vec!["bow".to_string(), "bigram".to_string()], p: 0.5 },
            ];
            param.ga.hyperparameter_genes = vec![
                HyperparameterGene { name: "aggressiveness".to_string(), values: vec![0.01, 0.1, 1.0], p: 0.8 },
            ];
            param
        }
    }

    #[test]
    fn test_defaults() {
        let param = Param::default();
        assert_eq!(param.general.algo, Algorithm::ga);
        assert_eq!(param.general.thread_number, 1);
        assert_eq!(param.classifier.epochs, 50);
        assert_eq!(param.classifier.patience, 5);
        assert_eq!(param.classifier.aggressiveness, 1.0);
        assert!(param.classifier.averaging && param.classifier.shuffle);
        assert_eq!(param.cv.folds, 5);
        assert_eq!(param.cv.train_ratio, 1.0);
        assert_eq!(param.cv.stratify_by, StratifyBy::label);
        assert_eq!(param.ga.population_size, 20);
        assert!(param.ga.feature_genes.is_empty());
    }

    #[test]
    fn test_yaml_sections_override_defaults() {
        let yaml = "
general:
  algo: cv
  seed: 7
cv:
  folds: 10
  stratify_by: id_prefix
ga:
  feature_genes:
    - options: [dep, bow]
      p: 0.9
  hyperparameter_genes:
    - name: epochs
      values: [10, 20]
";
        let param: Param = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(param.general.algo, Algorithm::cv);
        assert_eq!(param.general.seed, 7);
        assert_eq!(param.general.log_level, "info");
        assert_eq!(param.cv.folds, 10);
        assert_eq!(param.cv.stratify_by, StratifyBy::id_prefix);
        assert_eq!(param.ga.feature_genes[0].p, 0.9);
        assert_eq!(param.ga.hyperparameter_genes[0].p, 0.5);
        assert_eq!(param.pa_params().seed, 7);
    }

    #[test]
    fn test_validate_accepts_test_param() {
        let mut param = Param::test();
        assert!(validate(&mut param).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut param = Param::test();
        param.cv.folds = 1;
        assert!(validate(&mut param).is_err());

        let mut param = Param::test();
        param.cv.train_ratio = 0.0;
        assert!(validate(&mut param).is_err());

        let mut param = Param::test();
        param.ga.hyperparameter_genes[0].name = "momentum".to_string();
        assert!(validate(&mut param).unwrap_err().contains("momentum"));

        let mut param = Param::test();
        param.ga.hyperparameter_genes[0].values.push(-2.0);
        assert!(validate(&mut param).is_err());

        let mut param = Param::test();
        param.ga.feature_genes[1].options.clear();
        assert!(validate(&mut param).is_err());

        let mut param = Param::test();
        param.ga.select_elite_pct = 0.0;
        assert!(validate(&mut param).is_err());
    }

    #[test]
    fn test_validate_adjusts_soft_issues() {
        let mut param = Param::test();
        param.general.log_base = "run".to_string();
        param.ga.tournament_size = 100;
        assert!(validate(&mut param).is_ok());
        assert!(!param.general.display_colorful);
        assert_eq!(param.ga.tournament_size, param.ga.population_size);
    }

    #[test]
    fn test_ga_checks_skipped_in_cv_mode() {
        let mut param = Param::default();
        param.general.algo = Algorithm::cv;
        assert!(validate(&mut param).is_ok());
    }
}
