use crate::classifier::{evaluate, Classifier};
use crate::data::SparseInstance;
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io::{Read, Write};

/// Below this number of labels, per-class scoring stays on the calling thread
const PARALLEL_SCORING_MIN_LABELS: usize = 32;

//-----------------------------------------------------------------------------
// Hyperparameters
//-----------------------------------------------------------------------------

/// Training hyperparameters of the Passive-Aggressive learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaParams {
    pub epochs: usize,
    /// Epochs without improvement before stopping; 0 disables early stopping
    pub patience: usize,
    /// PA-I clipping constant C
    pub aggressiveness: f64,
    pub averaging: bool,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for PaParams {
    fn default() -> Self {
        PaParams {
            epochs: 50,
            patience: 5,
            aggressiveness: 1.0,
            averaging: true,
            shuffle: true,
            seed: 42,
        }
    }
}

/// Catalog of the tunable hyperparameters, each with a name, a description, a default
/// and a setter on `PaParams`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum Hyperparameter {
    epochs,
    patience,
    aggressiveness,
    averaging,
    shuffle,
}

impl Hyperparameter {
    pub const ALL: [Hyperparameter; 5] = [
        Hyperparameter::epochs,
        Hyperparameter::patience,
        Hyperparameter::aggressiveness,
        Hyperparameter::averaging,
        Hyperparameter::shuffle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Hyperparameter::epochs => "epochs",
            Hyperparameter::patience => "patience",
            Hyperparameter::aggressiveness => "aggressiveness",
            Hyperparameter::averaging => "averaging",
            Hyperparameter::shuffle => "shuffle",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Hyperparameter::epochs => "maximum number of passes over the training data",
            Hyperparameter::patience => "epochs without improvement before early stopping (0 disables)",
            Hyperparameter::aggressiveness => "PA-I clipping constant C bounding each update",
            Hyperparameter::averaging => "return the averaged weights instead of the best snapshot (0/1)",
            Hyperparameter::shuffle => "shuffle training instances at each epoch (0/1)",
        }
    }

    pub fn from_name(name: &str) -> Result<Hyperparameter, String> {
        Hyperparameter::ALL
            .iter()
            .find(|h| h.name() == name)
            .copied()
            .ok_or_else(|| {
                format!(
                    "Unknown hyperparameter '{}'. Available: {}",
                    name,
                    Hyperparameter::ALL.iter().map(|h| h.name()).collect::<Vec<_>>().join(", ")
                )
            })
    }

    /// Default value, read from the default parameters
    pub fn default_value(&self) -> f64 {
        self.get(&PaParams::default())
    }

    pub fn get(&self, params: &PaParams) -> f64 {
        match self {
            Hyperparameter::epochs => params.epochs as f64,
            Hyperparameter::patience => params.patience as f64,
            Hyperparameter::aggressiveness => params.aggressiveness,
            Hyperparameter::averaging => bool_value(params.averaging),
            Hyperparameter::shuffle => bool_value(params.shuffle),
        }
    }

    pub fn validate(&self, value: f64) -> Result<(), String> {
        let ok = match self {
            Hyperparameter::epochs => value >= 1.0 && value.fract() == 0.0,
            Hyperparameter::patience => value >= 0.0 && value.fract() == 0.0,
            Hyperparameter::aggressiveness => value > 0.0 && value.is_finite(),
            Hyperparameter::averaging | Hyperparameter::shuffle => value == 0.0 || value == 1.0,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("Invalid value {} for hyperparameter {} ({})", value, self.name(), self.description()))
        }
    }

    /// Sets the hyperparameter; `value` must pass `validate` first
    pub fn apply(&self, params: &mut PaParams, value: f64) {
        debug_assert!(self.validate(value).is_ok(), "{} applied without validation", self.name());
        match self {
            Hyperparameter::epochs => params.epochs = value.round().max(1.0) as usize,
            Hyperparameter::patience => params.patience = value.round().max(0.0) as usize,
            Hyperparameter::aggressiveness => params.aggressiveness = value,
            Hyperparameter::averaging => params.averaging = value != 0.0,
            Hyperparameter::shuffle => params.shuffle = value != 0.0,
        }
    }
}

fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// One resolved hyperparameter assignment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterValue {
    pub parameter: Hyperparameter,
    pub value: f64,
}

impl HyperparameterValue {
    pub fn new(parameter: Hyperparameter, value: f64) -> HyperparameterValue {
        HyperparameterValue { parameter, value }
    }

    pub fn apply(&self, params: &mut PaParams) {
        self.parameter.apply(params, self.value)
    }
}

impl fmt::Display for HyperparameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.parameter.name(), self.value)
    }
}

//-----------------------------------------------------------------------------
// Passive-Aggressive (PA-I) multi-class learner
//-----------------------------------------------------------------------------

/// Multi-class PA-I learner holding one dense weight vector per observed label.
///
/// The label set and the feature width are frozen by the first `train` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveAggressive {
    pub params: PaParams,
    labels: Vec<usize>,
    weights: Vec<Vec<f64>>,
    width: usize,
    pub best_epoch: usize,
    pub epochs_run: usize,
}

impl PassiveAggressive {
    pub fn new(params: PaParams) -> PassiveAggressive {
        PassiveAggressive {
            params,
            labels: Vec::new(),
            weights: Vec::new(),
            width: 0,
            best_epoch: 0,
            epochs_run: 0,
        }
    }

    /// Observed labels, ascending
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn weights(&self, label: usize) -> Option<&[f64]> {
        self.position(label).map(|p| self.weights[p].as_slice())
    }

    pub fn is_initialized(&self) -> bool {
        !self.labels.is_empty()
    }

    fn position(&self, label: usize) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    /// Allocate label set and width from the first training data
    fn initialize(&mut self, train: &[&SparseInstance]) {
        let mut labels: Vec<usize> = train.iter().map(|x| x.target).collect();
        labels.sort_unstable();
        labels.dedup();
        self.width = train
            .iter()
            .filter_map(|x| x.vector.max_index())
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        self.weights = vec![vec![0.0; self.width]; labels.len()];
        self.labels = labels;
        debug!("PA initialized with {} labels and {} features", self.labels.len(), self.width);
    }

    /// Score of every label position, in label order
    fn scores(&self, x: &SparseInstance) -> Vec<f64> {
        if self.weights.len() >= PARALLEL_SCORING_MIN_LABELS {
            self.weights.par_iter().map(|w| x.vector.dot(w)).collect()
        } else {
            self.weights.iter().map(|w| x.vector.dot(w)).collect()
        }
    }

    /// Position with the highest score; ties go to the lowest label index
    fn argmax(scores: &[f64], exclude: Option<usize>) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (p, &s) in scores.iter().enumerate() {
            if Some(p) == exclude {
                continue;
            }
            match best {
                Some((_, b)) if s <= b => {}
                _ => best = Some((p, s)),
            }
        }
        best
    }

    /// Saves the model (hyperparameters, labels and weights) to any byte sink
    pub fn save<W: Write>(&self, sink: W) -> Result<(), Box<dyn Error>> {
        bincode::serialize_into(sink, self)?;
        Ok(())
    }

    /// Loads a model written by `save`; an inconsistent model is an error
    pub fn load<R: Read>(source: R) -> Result<PassiveAggressive, Box<dyn Error>> {
        let model: PassiveAggressive = bincode::deserialize_from(source)?;
        model.check()?;
        Ok(model)
    }

    pub(crate) fn check(&self) -> Result<(), String> {
        if self.labels.len() != self.weights.len() {
            return Err(format!("Model has {} labels but {} weight vectors", self.labels.len(), self.weights.len()));
        }
        if self.labels.windows(2).any(|w| w[0] >= w[1]) {
            return Err("Model labels are not strictly ascending".to_string());
        }
        if let Some(w) = self.weights.iter().find(|w| w.len() != self.width) {
            return Err(format!("Model weight vector has width {} instead of {}", w.len(), self.width));
        }
        Ok(())
    }
}

impl Classifier<SparseInstance> for PassiveAggressive {
    fn train(&mut self, train: &[&SparseInstance], valid: &[&SparseInstance]) {
        if train.is_empty() {
            warn!("No training instance: PA model left untrained");
            return;
        }
        if !self.is_initialized() {
            self.initialize(train);
        }
        if self.labels.len() < 2 {
            warn!("Only one class in training data ({:?}): nothing to discriminate", self.labels);
            return;
        }

        let usable: Vec<(&SparseInstance, usize)> = train
            .iter()
            .filter_map(|x| self.position(x.target).map(|p| (*x, p)))
            .collect();
        if usable.len() < train.len() {
            warn!("{} training instances with labels unknown to the model were skipped", train.len() - usable.len());
        }
        if usable.is_empty() {
            return;
        }

        let params = self.params.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut order: Vec<usize> = (0..usable.len()).collect();
        let mut cached: Vec<Vec<f64>> = if params.averaging {
            vec![vec![0.0; self.width]; self.labels.len()]
        } else {
            Vec::new()
        };
        let mut count: f64 = 1.0;

        let mut best_weights = self.weights.clone();
        let mut best_score: Option<f64> = None;
        let mut no_improvement = 0;
        self.epochs_run = 0;

        for epoch in 1..=params.epochs {
            if params.shuffle {
                order.shuffle(&mut rng);
            }

            let mut errors = 0;
            for &k in &order {
                let (x, y) = usable[k];
                let scores = self.scores(x);
                let correct = scores[y];
                let (y2, incorrect) = match Self::argmax(&scores, Some(y)) {
                    Some(best) => best,
                    None => continue,
                };
                if incorrect > correct || (incorrect == correct && y2 < y) {
                    errors += 1;
                }

                let loss = (1.0 - correct + incorrect).max(0.0);
                if loss > 0.0 {
                    let norm = x.vector.squared_l2();
                    if norm > 0.0 {
                        let tau = params.aggressiveness.min(loss / (2.0 * norm));
                        x.vector.add_scaled_to(&mut self.weights[y], tau);
                        x.vector.add_scaled_to(&mut self.weights[y2], -tau);
                        if params.averaging {
                            x.vector.add_scaled_to(&mut cached[y], count * tau);
                            x.vector.add_scaled_to(&mut cached[y2], -count * tau);
                        }
                    }
                }
                count += 1.0;
            }
            self.epochs_run = epoch;

            // higher is better for both criteria
            let score = if valid.is_empty() {
                -(errors as f64)
            } else {
                evaluate(&*self, valid.iter().copied()).macro_f1()
            };
            debug!("PA epoch {} | training errors {} | criterion {:.4}", epoch, errors, score);

            if best_score.map_or(true, |b| score > b) {
                best_score = Some(score);
                best_weights = self.weights.clone();
                self.best_epoch = epoch;
                no_improvement = 0;
            } else {
                no_improvement += 1;
            }

            if params.patience > 0 && no_improvement >= params.patience {
                debug!("PA early stop at epoch {} (best epoch {})", epoch, self.best_epoch);
                break;
            }
        }

        if params.averaging && count > 1.0 {
            for (w, u) in self.weights.iter_mut().zip(cached.iter()) {
                for (wi, ui) in w.iter_mut().zip(u.iter()) {
                    *wi = (*wi * count - ui) / (count - 1.0);
                }
            }
        } else {
            self.weights = best_weights;
        }
    }

    fn classify(&self, instance: &SparseInstance) -> Option<usize> {
        if self.labels.is_empty() {
            return None;
        }
        Self::argmax(&self.scores(instance), None).map(|(p, _)| self.labels[p])
    }

    fn score(&self, instance: &SparseInstance) -> HashMap<usize, f64> {
        self.labels.iter().copied().zip(self.scores(instance)).collect()
    }

    fn name(&self) -> &str {
        "passive-aggressive"
    }
}
