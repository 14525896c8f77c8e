use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque student identifier. The descriptor store owns it; the core only
/// ever uses it as an immutable key.
pub type StudentId = i64;

/// Length in bytes of one binary keypoint descriptor (ORB/BRIEF style).
pub const BINARY_FEATURE_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor is empty")]
    Empty,
    #[error("expected {expected}-dim descriptor, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Dense face descriptor (128-d for dlib-style encoders, size² for pixel patches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A set of binary keypoint descriptors extracted from one face image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFeatures {
    pub features: Vec<[u8; BINARY_FEATURE_LEN]>,
}

impl BinaryFeatures {
    pub fn new(features: Vec<[u8; BINARY_FEATURE_LEN]>) -> Self {
        Self { features }
    }
}

fn hamming(a: &[u8; BINARY_FEATURE_LEN], b: &[u8; BINARY_FEATURE_LEN]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Which direction of a score means "more similar".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Distances: smaller is closer, match iff `score < threshold`.
    LowerIsBetter,
    /// Similarities and match counts: larger is closer, match iff `score > threshold`.
    HigherIsBetter,
}

impl Polarity {
    /// True if `score` strictly beats `best`. Ties keep the earlier candidate.
    pub fn improves(self, score: f32, best: f32) -> bool {
        match self {
            Polarity::LowerIsBetter => score < best,
            Polarity::HigherIsBetter => score > best,
        }
    }

    /// Threshold test. Exclusive in both directions; NaN never passes.
    pub fn passes(self, score: f32, threshold: f32) -> bool {
        match self {
            Polarity::LowerIsBetter => score < threshold,
            Polarity::HigherIsBetter => score > threshold,
        }
    }
}

/// Distance (or similarity) function over descriptors of type `D`.
///
/// Thresholds are metric-specific: a value tuned for [`Euclidean`] means
/// nothing for [`HammingMatchCount`].
pub trait Metric<D>: Send + Sync {
    fn polarity(&self) -> Polarity;

    fn score(&self, probe: &D, candidate: &D) -> f32;

    /// Reject descriptors this metric cannot compare.
    fn validate(&self, descriptor: &D) -> Result<(), DescriptorError>;
}

fn check_dim(expected: usize, embedding: &Embedding) -> Result<(), DescriptorError> {
    if embedding.is_empty() {
        return Err(DescriptorError::Empty);
    }
    if embedding.len() != expected {
        return Err(DescriptorError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// L2 distance between fixed-dimension embeddings.
#[derive(Debug, Clone, Copy)]
pub struct Euclidean {
    pub dim: usize,
}

impl Metric<Embedding> for Euclidean {
    fn polarity(&self) -> Polarity {
        Polarity::LowerIsBetter
    }

    fn score(&self, probe: &Embedding, candidate: &Embedding) -> f32 {
        probe.euclidean_distance(candidate)
    }

    fn validate(&self, descriptor: &Embedding) -> Result<(), DescriptorError> {
        check_dim(self.dim, descriptor)
    }
}

/// Cosine similarity between fixed-dimension embeddings. On mean-centred
/// pixel patches this is the normalised cross-correlation.
#[derive(Debug, Clone, Copy)]
pub struct CosineSimilarity {
    pub dim: usize,
}

impl Metric<Embedding> for CosineSimilarity {
    fn polarity(&self) -> Polarity {
        Polarity::HigherIsBetter
    }

    fn score(&self, probe: &Embedding, candidate: &Embedding) -> f32 {
        probe.similarity(candidate)
    }

    fn validate(&self, descriptor: &Embedding) -> Result<(), DescriptorError> {
        check_dim(self.dim, descriptor)
    }
}

/// Count of probe keypoints that have a candidate keypoint within
/// `max_distance` bits.
#[derive(Debug, Clone, Copy)]
pub struct HammingMatchCount {
    pub max_distance: u32,
}

impl Metric<BinaryFeatures> for HammingMatchCount {
    fn polarity(&self) -> Polarity {
        Polarity::HigherIsBetter
    }

    fn score(&self, probe: &BinaryFeatures, candidate: &BinaryFeatures) -> f32 {
        probe
            .features
            .iter()
            .filter(|p| {
                candidate
                    .features
                    .iter()
                    .map(|c| hamming(p, c))
                    .min()
                    .is_some_and(|d| d <= self.max_distance)
            })
            .count() as f32
    }

    fn validate(&self, descriptor: &BinaryFeatures) -> Result<(), DescriptorError> {
        if descriptor.features.is_empty() {
            return Err(DescriptorError::Empty);
        }
        Ok(())
    }
}
