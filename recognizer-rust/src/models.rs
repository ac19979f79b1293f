use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mono audio samples plus the rate they were captured at
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSignal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSignal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// Perceptual hash of a spectrogram, compared character by character
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named spectral descriptors, min-max normalised into [0, 1]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(BTreeMap<String, f64>);

impl FeatureVector {
    pub fn from_map(values: BTreeMap<String, f64>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// song name -> file name -> fingerprint
pub type FingerprintTable = BTreeMap<String, BTreeMap<String, Fingerprint>>;

/// song name -> file name -> features
pub type FeatureTable = BTreeMap<String, BTreeMap<String, FeatureVector>>;

/// One analysed corpus file
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub song: String,
    pub file: String,
    pub features: FeatureVector,
    pub fingerprint: Fingerprint,
}

/// A corpus file scored against a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub song: String,
    pub similarity: f64,
    /// File name with its audio extension removed
    pub label: String,
}

impl MatchResult {
    /// Score rendered as a percentage, e.g. `87.50%`
    pub fn percentage(&self) -> String {
        format!("{:.2}%", self.similarity * 100.0)
    }
}
