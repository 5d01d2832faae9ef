use serde::{Serialize, Deserialize};
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt;
use log::{info, warn};

/// Sparse feature vector: ascending unique indices with their aligned values
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct SparseVector {
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl SparseVector {
    pub fn empty() -> SparseVector {
        SparseVector { indices: Vec::new(), data: Vec::new() }
    }

    /// Build a vector from already-ordered arrays
    ///
    /// # Arguments
    ///
    /// * `indices` - strictly ascending feature indices
    /// * `data` - values aligned with `indices`
    ///
    /// # Errors
    ///
    /// Returns an error if lengths differ or if indices are not strictly ascending.
    pub fn new(indices: Vec<usize>, data: Vec<f64>) -> Result<SparseVector, String> {
        if indices.len() != data.len() {
            return Err(format!("Sparse vector has {} indices but {} values", indices.len(), data.len()));
        }
        if indices.windows(2).any(|w| w[0] >= w[1]) {
            return Err("Sparse vector indices must be strictly ascending".to_string());
        }
        Ok(SparseVector { indices, data })
    }

    /// Build a vector from unordered (index, value) pairs, summing duplicated indices
    pub fn from_pairs(mut pairs: Vec<(usize, f64)>) -> SparseVector {
        pairs.sort_by_key(|(i, _)| *i);
        let mut indices: Vec<usize> = Vec::with_capacity(pairs.len());
        let mut data: Vec<f64> = Vec::with_capacity(pairs.len());
        for (i, v) in pairs {
            if indices.last() == Some(&i) {
                if let Some(last) = data.last_mut() { *last += v; }
            } else {
                indices.push(i);
                data.push(v);
            }
        }
        SparseVector { indices, data }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.data.iter().copied())
    }

    /// Euclidean norm of the values
    pub fn l2(&self) -> f64 {
        self.squared_l2().sqrt()
    }

    pub fn squared_l2(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    pub fn max_index(&self) -> Option<usize> {
        self.indices.last().copied()
    }

    /// Dot product against a dense vector; indices beyond its width are ignored
    pub fn dot(&self, dense: &[f64]) -> f64 {
        self.iter()
            .filter(|(i, _)| *i < dense.len())
            .map(|(i, v)| dense[i] * v)
            .sum()
    }

    /// dense += scale * self, ignoring indices beyond the dense width
    pub fn add_scaled_to(&self, dense: &mut [f64], scale: f64) {
        for (i, v) in self.iter() {
            if i < dense.len() {
                dense[i] += scale * v;
            }
        }
    }
}

/// A labelled sparse vector ready for the classifier
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseInstance {
    pub id: String,
    pub target: usize,
    pub vector: SparseVector,
}

impl SparseInstance {
    pub fn new(id: &str, target: usize, vector: SparseVector) -> SparseInstance {
        SparseInstance { id: id.to_string(), target, vector }
    }
}

/// One extracted feature, tagged by the feature-function group that produced it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub group: String,
    pub name: String,
    pub value: f64,
}

impl Feature {
    pub fn new(group: &str, name: &str, value: f64) -> Feature {
        Feature { group: group.to_string(), name: name.to_string(), value }
    }

    /// Parse `group:name` or `group:name=value`
    pub fn parse(field: &str) -> Result<Feature, String> {
        let (group, rest) = field.split_once(':')
            .ok_or_else(|| format!("Feature '{}' has no group prefix (expected group:name)", field))?;
        if group.is_empty() {
            return Err(format!("Feature '{}' has an empty group", field));
        }
        let (name, value) = match rest.rsplit_once('=') {
            Some((name, value)) => {
                let value: f64 = value.parse()
                    .map_err(|_| format!("Feature '{}' has an invalid value '{}'", field, value))?;
                (name, value)
            },
            None => (rest, 1.0),
        };
        Ok(Feature::new(group, name, value))
    }

    /// `group:name`, the vocabulary key of the feature
    pub fn key(&self) -> String {
        format!("{}:{}", self.group, self.name)
    }
}

/// A labelled word instance with all of its candidate features
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    pub target: usize,
    pub features: Vec<Feature>,
}

impl Example {
    pub fn new(id: &str, target: usize, features: Vec<Feature>) -> Example {
        Example { id: id.to_string(), target, features }
    }

    /// Part of the id before the first '/', used to stratify folds per lemma
    pub fn id_prefix(&self) -> &str {
        self.id.split('/').next().unwrap_or(&self.id)
    }
}

/// Bidirectional label <-> dense index mapping
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct LabelIndex {
    labels: Vec<String>,
    #[serde(skip)]
    indices: HashMap<String, usize>,
}

impl LabelIndex {
    pub fn new() -> LabelIndex {
        LabelIndex { labels: Vec::new(), indices: HashMap::new() }
    }

    /// Index labels in sorted order so that a given label set always maps the same way
    pub fn from_labels<'a, I: IntoIterator<Item = &'a str>>(labels: I) -> LabelIndex {
        let sorted: BTreeSet<&str> = labels.into_iter().collect();
        let labels: Vec<String> = sorted.into_iter().map(String::from).collect();
        let indices = labels.iter().enumerate().map(|(i, l)| (l.clone(), i)).collect();
        LabelIndex { labels, indices }
    }

    pub fn index(&self, label: &str) -> Option<usize> {
        if self.indices.len() == self.labels.len() {
            self.indices.get(label).copied()
        } else {
            // deserialized instance, lookup table not rebuilt yet
            self.labels.iter().position(|l| l == label)
        }
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Rebuild the lookup table after deserialization
    pub fn rebuild(&mut self) {
        self.indices = self.labels.iter().enumerate().map(|(i, l)| (l.clone(), i)).collect();
    }
}

impl PartialEq for LabelIndex {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

/// A labelled corpus: examples plus the label mapping they were indexed with
#[derive(Clone, Serialize, Deserialize)]
pub struct ExampleSet {
    pub examples: Vec<Example>,
    pub labels: LabelIndex,
}

impl ExampleSet {
    pub fn new() -> ExampleSet {
        ExampleSet { examples: Vec::new(), labels: LabelIndex::new() }
    }

    /// Load examples from a tab-separated file: `id<TAB>label<TAB>group:name[=value]...`
    ///
    /// Labels are indexed from the labels observed in the file.
    pub fn load(path: &str) -> Result<ExampleSet, Box<dyn Error>> {
        let rows = read_rows(path)?;
        let labels = LabelIndex::from_labels(rows.iter().map(|(_, l, _)| l.as_str()));
        let set = ExampleSet::from_rows(rows, labels, path)?;
        info!("{} examples and {} labels loaded from {}", set.examples.len(), set.labels.len(), path);
        Ok(set)
    }

    /// Load examples with an existing label mapping (test files); unknown labels are skipped
    pub fn load_with_labels(path: &str, labels: &LabelIndex) -> Result<ExampleSet, Box<dyn Error>> {
        let rows = read_rows(path)?;
        let set = ExampleSet::from_rows(rows, labels.clone(), path)?;
        info!("{} examples loaded from {}", set.examples.len(), path);
        Ok(set)
    }

    fn from_rows(rows: Vec<(String, String, Vec<Feature>)>, labels: LabelIndex, path: &str) -> Result<ExampleSet, Box<dyn Error>> {
        let mut examples = Vec::with_capacity(rows.len());
        for (id, label, features) in rows {
            match labels.index(&label) {
                Some(target) => examples.push(Example { id, target, features }),
                None => warn!("{}: example {} has unknown label '{}', skipped", path, id, label),
            }
        }
        Ok(ExampleSet { examples, labels })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Names of all feature groups present in the set
    pub fn feature_groups(&self) -> BTreeSet<String> {
        self.examples.iter()
            .flat_map(|e| e.features.iter().map(|f| f.group.clone()))
            .collect()
    }

    /// Number of examples per label index
    pub fn class_counts(&self) -> HashMap<usize, usize> {
        let mut counts = HashMap::new();
        for e in &self.examples {
            *counts.entry(e.target).or_insert(0) += 1;
        }
        counts
    }
}

fn read_rows(path: &str) -> Result<Vec<(String, String, Vec<Feature>)>, Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .quoting(false)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let mut fields = record.iter();
        let id = match fields.next() {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => continue,
        };
        let label = fields.next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| format!("{}: record {} ({}) has no label", path, line + 1, id))?;
        let features = fields
            .filter(|f| !f.trim().is_empty())
            .map(|f| Feature::parse(f.trim()))
            .collect::<Result<Vec<Feature>, String>>()
            .map_err(|e| format!("{}: record {} ({}): {}", path, line + 1, id, e))?;
        rows.push((id, label, features));
    }
    Ok(rows)
}

impl fmt::Display for ExampleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Examples: {}   Labels: {}   Feature groups: {}",
            self.examples.len(), self.labels.len(), self.feature_groups().len())?;
        let counts = self.class_counts();
        for (i, label) in self.labels.labels().iter().enumerate().take(20) {
            writeln!(f, "{:<20} {}", label, counts.get(&i).unwrap_or(&0))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExampleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sparse_vector_lengths_and_norm() {
        let v = SparseVector::new(vec![0, 3, 7], vec![3.0, -4.0, 12.0]).unwrap();
        assert_eq!(v.indices().len(), v.data().len());
        assert!((v.l2() - 13.0).abs() < 1e-12);
        assert_eq!(v.max_index(), Some(7));
    }

    #[test]
    fn test_sparse_vector_rejects_mismatch_and_disorder() {
        assert!(SparseVector::new(vec![0, 1], vec![1.0]).is_err());
        assert!(SparseVector::new(vec![2, 1], vec![1.0, 1.0]).is_err());
        assert!(SparseVector::new(vec![1, 1], vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn test_sparse_vector_from_pairs_sorts_and_sums() {
        let v = SparseVector::from_pairs(vec![(5, 1.0), (2, 2.0), (5, 0.5)]);
        assert_eq!(v.indices(), &[2, 5]);
        assert_eq!(v.data(), &[2.0, 1.5]);
        let expected = (2.0f64 * 2.0 + 1.5 * 1.5).sqrt();
        assert!((v.l2() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_sparse_vector_dot_ignores_out_of_range() {
        let v = SparseVector::from_pairs(vec![(0, 1.0), (1, 2.0), (10, 5.0)]);
        assert_eq!(v.dot(&[1.0, 1.0, 1.0]), 3.0);
        let mut w = vec![0.0; 2];
        v.add_scaled_to(&mut w, 2.0);
        assert_eq!(w, vec![2.0, 4.0]);
    }

    #[test]
    fn test_feature_parse() {
        assert_eq!(Feature::parse("lemma:run").unwrap(), Feature::new("lemma", "run", 1.0));
        assert_eq!(Feature::parse("win2:the=0.5").unwrap(), Feature::new("win2", "the", 0.5));
        assert_eq!(Feature::parse("dep:a:b").unwrap(), Feature::new("dep", "a:b", 1.0));
        assert!(Feature::parse("nogroup").is_err());
        assert!(Feature::parse(":x").is_err());
        assert!(Feature::parse("g:x=abc").is_err());
    }

    #[test]
    fn test_label_index_is_sorted_and_stable() {
        let a = LabelIndex::from_labels(vec!["run.02", "run.01", "run.02", "run.03"]);
        let b = LabelIndex::from_labels(vec!["run.03", "run.01", "run.02"]);
        assert_eq!(a, b);
        assert_eq!(a.index("run.01"), Some(0));
        assert_eq!(a.label(2), Some("run.03"));
        assert_eq!(a.index("walk.01"), None);
    }

    #[test]
    fn test_label_index_survives_serialization() {
        let a = LabelIndex::from_labels(vec!["b", "a"]);
        let bytes = bincode::serialize(&a).unwrap();
        let mut b: LabelIndex = bincode::deserialize(&bytes).unwrap();
        assert_eq!(b.index("b"), Some(1));
        b.rebuild();
        assert_eq!(b.index("a"), Some(0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_examples() {
        let path = std::env::temp_dir().join("wsdga_test_load_examples.tsv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# comment line").unwrap();
        writeln!(file, "run/1\trun.01\tlemma:run\twin1:fast=2.0").unwrap();
        writeln!(file, "run/2\trun.02\tlemma:run\tdep:nsubj").unwrap();
        writeln!(file, "walk/1\twalk.01").unwrap();
        drop(file);

        let set = ExampleSet::load(path.to_str().unwrap()).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.labels.labels(), &["run.01", "run.02", "walk.01"]);
        assert_eq!(set.examples[0].features[1], Feature::new("win1", "fast", 2.0));
        assert_eq!(set.examples[1].target, 1);
        assert!(set.examples[2].features.is_empty());
        assert_eq!(set.examples[2].id_prefix(), "walk");
        assert_eq!(set.feature_groups().len(), 3);

        let only_run = LabelIndex::from_labels(vec!["run.01", "run.02"]);
        let test = ExampleSet::load_with_labels(path.to_str().unwrap(), &only_run).unwrap();
        assert_eq!(test.len(), 2);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_rejects_malformed_feature() {
        let path = std::env::temp_dir().join("wsdga_test_load_malformed.tsv");
        std::fs::write(&path, "x/1\tlabel\tbroken\n").unwrap();
        assert!(ExampleSet::load(path.to_str().unwrap()).is_err());
        let _ = std::fs::remove_file(path);
    }
}
