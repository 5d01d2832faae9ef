use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt;
use statrs::statistics::Statistics;
use crate::data::LabelIndex;

/// Per-label confusion counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub tp: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl LabelCounts {
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        f1(self.precision(), self.recall())
    }

    /// Number of gold occurrences of the label
    pub fn support(&self) -> usize {
        self.tp + self.fn_
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 { 0.0 } else { 2.0 * precision * recall / (precision + recall) }
}

/// Accumulated (predicted, gold) pairs. A missing prediction is a miss for the gold label.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pairs: Vec<(Option<usize>, usize)>,
}

impl Evaluation {
    pub fn new() -> Evaluation {
        Evaluation { pairs: Vec::new() }
    }

    pub fn add(&mut self, predicted: Option<usize>, gold: usize) {
        self.pairs.push((predicted, gold));
    }

    /// Pool another evaluation's pairs into this one
    pub fn merge(&mut self, other: &Evaluation) {
        self.pairs.extend_from_slice(&other.pairs);
    }

    /// Pool a list of evaluations (e.g. one per fold) into a single one
    pub fn merged(evaluations: &[Evaluation]) -> Evaluation {
        let mut merged = Evaluation::new();
        for e in evaluations {
            merged.merge(e);
        }
        merged
    }

    pub fn pairs(&self) -> &[(Option<usize>, usize)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn correct(&self) -> usize {
        self.pairs.iter().filter(|(p, g)| *p == Some(*g)).count()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.pairs.len())
    }

    /// Confusion counts for every label seen as gold or prediction
    pub fn label_counts(&self) -> BTreeMap<usize, LabelCounts> {
        let mut counts: BTreeMap<usize, LabelCounts> = BTreeMap::new();
        for &(predicted, gold) in &self.pairs {
            match predicted {
                Some(p) if p == gold => counts.entry(gold).or_default().tp += 1,
                Some(p) => {
                    counts.entry(p).or_default().fp += 1;
                    counts.entry(gold).or_default().fn_ += 1;
                },
                None => counts.entry(gold).or_default().fn_ += 1,
            }
        }
        counts
    }

    /// Unweighted mean of per-label F1 over the pooled pairs
    pub fn macro_f1(&self) -> f64 {
        let counts = self.label_counts();
        if counts.is_empty() {
            return 0.0;
        }
        counts.values().map(|c| c.f1()).sum::<f64>() / counts.len() as f64
    }

    /// F1 of the summed tp/fp/fn over all labels
    pub fn micro_f1(&self) -> f64 {
        let total = self.label_counts().values().fold(LabelCounts::default(), |acc, c| LabelCounts {
            tp: acc.tp + c.tp,
            fp: acc.fp + c.fp,
            fn_: acc.fn_ + c.fn_,
        });
        total.f1()
    }

    /// Count of the most frequent gold label over the total: the majority-class baseline
    pub fn majority_baseline(&self) -> f64 {
        let mut gold: BTreeMap<usize, usize> = BTreeMap::new();
        for &(_, g) in &self.pairs {
            *gold.entry(g).or_insert(0) += 1;
        }
        ratio(gold.values().copied().max().unwrap_or(0), self.pairs.len())
    }

    /// Human-readable per-label table
    pub fn summary(&self, labels: Option<&LabelIndex>) -> String {
        let mut str = format!("{:<24} {:>6} {:>6} {:>6} {:>8} {:>8} {:>8}\n", "label", "gold", "tp", "fp", "P", "R", "F1");
        for (label, c) in self.label_counts() {
            let name = labels
                .and_then(|l| l.label(label))
                .map(String::from)
                .unwrap_or_else(|| label.to_string());
            str = format!("{}{:<24} {:>6} {:>6} {:>6} {:>8.3} {:>8.3} {:>8.3}\n",
                str, name, c.support(), c.tp, c.fp, c.precision(), c.recall(), c.f1());
        }
        format!("{}{} instances | accuracy {:.3} | macro-F1 {:.3} | micro-F1 {:.3} | baseline {:.3}",
            str, self.len(), self.accuracy(), self.macro_f1(), self.micro_f1(), self.majority_baseline())
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary(None))
    }
}

/// Mean and standard deviation of each fold's own macro-F1.
/// Not the same quantity as `Evaluation::merged(folds).macro_f1()`, which pools pairs first.
pub fn fold_macro_average(evaluations: &[Evaluation]) -> (f64, f64) {
    let scores: Vec<f64> = evaluations.iter().filter(|e| !e.is_empty()).map(|e| e.macro_f1()).collect();
    match scores.len() {
        0 => (0.0, 0.0),
        1 => (scores[0], 0.0),
        _ => (scores.iter().mean(), scores.iter().std_dev()),
    }
}
