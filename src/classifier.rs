use std::collections::HashMap;
use crate::data::{Example, SparseInstance};
use crate::evaluation::Evaluation;

/// Anything carrying a gold label index
pub trait Labeled {
    fn target(&self) -> usize;
    fn id(&self) -> &str;
}

impl Labeled for SparseInstance {
    fn target(&self) -> usize {
        self.target
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Labeled for Example {
    fn target(&self) -> usize {
        self.target
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Contract shared by every trainable model the cross-validation harness and the
/// genetic algorithm drive. Instances are borrowed: folds are index views over one
/// read-only corpus.
pub trait Classifier<I>: Send {
    /// Train on `train`, using `valid` (possibly empty) for early stopping.
    /// Degenerate inputs (no instance, a single class) must log and return, never panic.
    fn train(&mut self, train: &[&I], valid: &[&I]);

    /// Best label, or None when the model cannot discriminate (never trained)
    fn classify(&self, instance: &I) -> Option<usize>;

    /// Score of every known label
    fn score(&self, instance: &I) -> HashMap<usize, f64>;

    fn name(&self) -> &str { "classifier" }
}

/// Classifies every instance and collects the (predicted, gold) pairs
pub fn evaluate<'a, I, C>(classifier: &C, instances: impl IntoIterator<Item = &'a I>) -> Evaluation
where I: Labeled + 'a, C: Classifier<I> + ?Sized {
    let mut evaluation = Evaluation::new();
    for instance in instances {
        evaluation.add(classifier.classify(instance), instance.target());
    }
    evaluation
}
