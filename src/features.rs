use crate::classifier::Classifier;
use crate::data::{Example, LabelIndex, SparseInstance, SparseVector};
use crate::pa::{PaParams, PassiveAggressive};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::io::{Read, Write};

/// Frozen mapping from `group:name` feature keys to dense column indices.
/// Built once from training examples; unseen features are dropped afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVocabulary {
    groups: BTreeSet<String>,
    index: BTreeMap<String, usize>,
}

impl FeatureVocabulary {
    /// Indices follow first appearance in `examples`, restricted to `groups`
    pub fn build(examples: &[&Example], groups: &BTreeSet<String>) -> FeatureVocabulary {
        let mut index: BTreeMap<String, usize> = BTreeMap::new();
        for example in examples {
            for feature in example.features.iter().filter(|f| groups.contains(&f.group)) {
                let next = index.len();
                index.entry(feature.key()).or_insert(next);
            }
        }
        FeatureVocabulary { groups: groups.clone(), index }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn vectorize(&self, example: &Example) -> SparseInstance {
        let pairs: Vec<(usize, f64)> = example
            .features
            .iter()
            .filter(|f| self.groups.contains(&f.group))
            .filter_map(|f| self.get(&f.key()).map(|i| (i, f.value)))
            .collect();
        SparseInstance::new(&example.id, example.target, SparseVector::from_pairs(pairs))
    }
}

/// Feature selection by group followed by a PA-I model: the classifier a phenotype expresses.
///
/// A saved pipeline carries the label names of its training corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineClassifier {
    pub groups: BTreeSet<String>,
    vocabulary: Option<FeatureVocabulary>,
    model: PassiveAggressive,
    label_index: LabelIndex,
}

impl PipelineClassifier {
    pub fn new(groups: BTreeSet<String>, params: PaParams) -> PipelineClassifier {
        PipelineClassifier {
            groups,
            vocabulary: None,
            model: PassiveAggressive::new(params),
            label_index: LabelIndex::new(),
        }
    }

    pub fn label_index(&self) -> &LabelIndex {
        &self.label_index
    }

    pub fn set_label_index(&mut self, labels: LabelIndex) {
        self.label_index = labels;
    }

    /// Name of the predicted label; `None` without prediction or label names
    pub fn classify_label(&self, example: &Example) -> Option<&str> {
        self.classify(example).and_then(|i| self.label_index.label(i))
    }

    pub fn vocabulary(&self) -> Option<&FeatureVocabulary> {
        self.vocabulary.as_ref()
    }

    pub fn model(&self) -> &PassiveAggressive {
        &self.model
    }

    pub fn save<W: Write>(&self, sink: W) -> Result<(), Box<dyn Error>> {
        bincode::serialize_into(sink, self)?;
        Ok(())
    }

    pub fn load<R: Read>(source: R) -> Result<PipelineClassifier, Box<dyn Error>> {
        let mut classifier: PipelineClassifier = bincode::deserialize_from(source)?;
        classifier.check()?;
        classifier.label_index.rebuild();
        Ok(classifier)
    }

    fn check(&self) -> Result<(), String> {
        self.model.check()?;
        if let Some(vocabulary) = &self.vocabulary {
            if self.model.is_initialized() && vocabulary.len() > self.model.width() {
                return Err(format!(
                    "Vocabulary of {} features exceeds model width {}", vocabulary.len(), self.model.width()
                ));
            }
        }
        if !self.label_index.is_empty() {
            if let Some(label) = self.model.labels().iter().find(|&&l| l >= self.label_index.len()) {
                return Err(format!("Model label {} has no name among {} labels", label, self.label_index.len()));
            }
        }
        Ok(())
    }

    pub fn save_file(&self, path: &str) -> Result<(), Box<dyn Error>> {
        let file = std::fs::File::create(path)?;
        self.save(std::io::BufWriter::new(file))
    }

    pub fn load_file(path: &str) -> Result<PipelineClassifier, Box<dyn Error>> {
        let file = std::fs::File::open(path)?;
        PipelineClassifier::load(std::io::BufReader::new(file))
    }
}

impl Classifier<Example> for PipelineClassifier {
    fn train(&mut self, train: &[&Example], valid: &[&Example]) {
        if self.vocabulary.is_none() {
            let vocabulary = FeatureVocabulary::build(train, &self.groups);
            if vocabulary.is_empty() {
                warn!("No feature from groups {:?} in training data", self.groups);
            }
            debug!("Vocabulary of {} features over {} groups", vocabulary.len(), self.groups.len());
            self.vocabulary = Some(vocabulary);
        }
        if let Some(vocabulary) = &self.vocabulary {
            let train: Vec<SparseInstance> = train.iter().map(|e| vocabulary.vectorize(e)).collect();
            let valid: Vec<SparseInstance> = valid.iter().map(|e| vocabulary.vectorize(e)).collect();
            let train_refs: Vec<&SparseInstance> = train.iter().collect();
            let valid_refs: Vec<&SparseInstance> = valid.iter().collect();
            self.model.train(&train_refs, &valid_refs);
        }
    }

    fn classify(&self, instance: &Example) -> Option<usize> {
        self.vocabulary.as_ref().and_then(|v| self.model.classify(&v.vectorize(instance)))
    }

    fn score(&self, instance: &Example) -> HashMap<usize, f64> {
        match &self.vocabulary {
            Some(v) => self.model.score(&v.vectorize(instance)),
            None => HashMap::new(),
        }
    }

    fn name(&self) -> &str {
        "pipeline"
    }
}
