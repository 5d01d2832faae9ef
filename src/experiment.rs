use crate::data::LabelIndex;
use crate::evaluation::{fold_macro_average, Evaluation};
use crate::genotype::Genotype;
use crate::param::Param;
use crate::population::Population;
use log::warn;
use serde::{Deserialize, Serialize};

/// Record of one run: what was asked, what was measured and what was found
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Experiment {
    pub id: String,
    pub version: String,
    pub timestamp: String,
    pub execution_time: f64,
    pub parameters: Param,
    pub labels: LabelIndex,

    /// Test ids of each cross-validation fold
    pub cv_folds_ids: Vec<Vec<String>>,
    /// Evaluation of each fold, for the configured classifier (cv) or the best genotype (ga)
    pub fold_evaluations: Vec<Evaluation>,
    /// GA generations (every generation with `general.keep_trace`, else the last one)
    pub generations: Vec<Population>,
    pub best_genotype: Option<Genotype>,
    /// Evaluation of the final model on `data.test`
    pub test_evaluation: Option<Evaluation>,
}

impl Experiment {
    pub fn display_results(&self) -> String {
        let mut text = String::new();
        text.push_str(&format!("\n=============== Experiment {} ===============\n\n", self.id));
        text.push_str(&format!("wsdga version: v{}\n", self.version));
        text.push_str(&format!("Timestamp: {}\n", self.timestamp));
        text.push_str(&format!("Algorithm: {:?}\n", self.parameters.general.algo));
        text.push_str(&format!("Execution time: {:.2}s\n", self.execution_time));
        text.push_str(&format!("Parameters: \x1b[2;97m{:?}\x1b[0m\n", &self.parameters));
        text.push_str("Experiment results:\n\n");

        if let Some(best) = &self.best_genotype {
            text.push_str(&format!("\x1b[1;92mBest genotype\x1b[0m: {}\n", best.display()));
            text.push_str(&format!("{} generations\n\n", self.generations.len()));
        }

        if !self.fold_evaluations.is_empty() {
            let merged = Evaluation::merged(&self.fold_evaluations);
            let (mean, std) = fold_macro_average(&self.fold_evaluations);
            for (i, evaluation) in self.fold_evaluations.iter().enumerate() {
                text.push_str(&format!(
                    "Fold #{} | {} instances | accuracy {:.3} | macro-F1 {:.3}\n",
                    i + 1, evaluation.len(), evaluation.accuracy(), evaluation.macro_f1()
                ));
            }
            text.push_str(&format!("Per-fold macro-F1: {:.3} ± {:.3}\n", mean, std));
            text.push_str(&format!("\x1b[1;93mPooled cross-validation\x1b[0m\n{}\n\n", merged.summary(Some(&self.labels))));
        }

        if let Some(test) = &self.test_evaluation {
            text.push_str(&format!("\x1b[1;93mTest set\x1b[0m\n{}\n", test.summary(Some(&self.labels))));
        }

        text
    }

    /// Saves the experiment; the format follows the extension (`.json`, `.bin`/`.bincode`)
    pub fn save_auto<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "json" => self.save_json(path),
            "bin" | "bincode" => self.save_bincode(path),
            _ => {
                warn!("Unknown format. Saving experiment in bincode.");
                self.save_bincode(path.with_extension("bin"))
            }
        }
    }

    /// Saves to JSON (human readable, but may have slight inaccuracies for decimal values)
    fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Saves as Bincode (compact, exact)
    fn save_bincode<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let bytes = bincode::serialize(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_auto<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let mut experiment = match ext.as_str() {
            "json" => Self::load_json(path),
            "bin" | "bincode" => Self::load_bincode(path),
            _ => Self::load_with_fallback(path),
        }?;
        experiment.labels.rebuild();
        Ok(experiment)
    }

    fn load_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let experiment: Experiment = serde_json::from_str(&content)?;
        Ok(experiment)
    }

    fn load_bincode<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let bytes = std::fs::read(path)?;
        let experiment: Experiment = bincode::deserialize(&bytes)?;
        Ok(experiment)
    }

    fn load_with_fallback<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();

        if let Ok(experiment) = Self::load_bincode(path) {
            return Ok(experiment);
        }

        if let Ok(experiment) = Self::load_json(path) {
            return Ok(experiment);
        }

        Err("Unable to load the experiment".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::strip_ansi;

    impl Experiment {
        pub fn test() -> Experiment {
            let population = Population::test().sort();
            Experiment {
                id: "test_experiment".to_string(),
                version: "0.1.0".to_string(),
                timestamp: "2026-01-01_00-00-00".to_string(),
                execution_time: 1.5,
                parameters: Param::test(),
                labels: LabelIndex::from_labels(vec!["run.01", "run.02"]),
                cv_folds_ids: vec![vec!["a".to_string()], vec!["b".to_string()]],
                fold_evaluations: vec![Evaluation::test(), Evaluation::test()],
                best_genotype: population.best().cloned(),
                generations: vec![population],
                test_evaluation: Some(Evaluation::test()),
            }
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("wsdga_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_save_load_json_and_bincode() {
        let experiment = Experiment::test();
        for name in ["exp.json", "exp.bin"] {
            let path = temp_path(name);
            experiment.save_auto(&path).unwrap();
            let loaded = Experiment::load_auto(&path).unwrap();
            std::fs::remove_file(&path).unwrap();

            assert_eq!(loaded.id, experiment.id);
            assert_eq!(loaded.parameters, experiment.parameters);
            assert_eq!(loaded.labels, experiment.labels);
            assert_eq!(loaded.labels.index("run.02"), Some(1));
            assert_eq!(loaded.fold_evaluations, experiment.fold_evaluations);
            assert_eq!(loaded.cv_folds_ids, experiment.cv_folds_ids);
            assert_eq!(loaded.generations[0].len(), experiment.generations[0].len());
            assert_eq!(loaded.best_genotype.unwrap().phenotype(), experiment.best_genotype.as_ref().unwrap().phenotype());
        }
    }

    #[test]
    fn test_unknown_extension_falls_back_to_bincode() {
        let experiment = Experiment::test();
        let path = temp_path("exp.data");
        experiment.save_auto(&path).unwrap();
        let written = path.with_extension("bin");
        assert!(written.exists());
        let loaded = Experiment::load_auto(&written).unwrap();
        std::fs::remove_file(&written).unwrap();
        assert_eq!(loaded.fold_evaluations.len(), 2);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        assert!(Experiment::load_auto(temp_path("missing.json")).is_err());
    }

    #[test]
    fn test_display_results() {
        let text = strip_ansi(&Experiment::test().display_results());
        assert!(text.contains("Experiment test_experiment"));
        assert!(text.contains("Best genotype"));
        assert!(text.contains("Fold #2"));
        assert!(text.contains("Test set"));
        assert!(text.contains("run.01"));
    }
}
