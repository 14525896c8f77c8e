//! Face descriptor extraction.
//!
//! Extraction proper belongs to a vision library; the core only needs the
//! [`FaceExtractor`] seam. [`PatchExtractor`] is the pixel-patch variant:
//! the supplied image is taken to be the face crop, downsampled to a small
//! greyscale patch and normalised so that cosine similarity between two
//! patches is their normalised cross-correlation.

use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::GrayImage;
use thiserror::Error;

// --- Named constants ---
const DEFAULT_PATCH_SIZE: u32 = 32;
/// Grey-level standard deviation below which a patch is treated as blank.
const DEFAULT_MIN_CONTRAST: f32 = 8.0;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("extraction failed: {0}")]
    Failed(String),
}

/// What the extractor found in a capture.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<D> {
    Face(D),
    NoFaceFound,
    AmbiguousFaces,
}

/// Turns raw image bytes into a descriptor.
pub trait FaceExtractor<D>: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Extraction<D>, ExtractError>;
}

/// Raw pixel-patch extractor.
#[derive(Debug, Clone)]
pub struct PatchExtractor {
    size: u32,
    min_contrast: f32,
}

impl PatchExtractor {
    pub fn new(size: u32, min_contrast: f32) -> Self {
        Self { size, min_contrast }
    }

    /// Length of the descriptors this extractor produces.
    pub fn dimension(&self) -> usize {
        (self.size as usize) * (self.size as usize)
    }

    fn patch_from_gray(&self, gray: &GrayImage) -> Extraction<Embedding> {
        if gray.width() == 0 || gray.height() == 0 || self.size == 0 {
            return Extraction::NoFaceFound;
        }

        let patch = imageops::resize(gray, self.size, self.size, FilterType::Triangle);
        let pixels: Vec<f32> = patch.pixels().map(|p| f32::from(p.0[0])).collect();

        let n = pixels.len() as f32;
        let mean = pixels.iter().sum::<f32>() / n;
        let variance = pixels.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        let std_dev = variance.sqrt();

        if std_dev < self.min_contrast {
            tracing::debug!(std_dev, "patch below contrast floor");
            return Extraction::NoFaceFound;
        }

        // Mean-centre, then L2-normalise.
        let norm = std_dev * n.sqrt();
        let values = pixels.iter().map(|x| (x - mean) / norm).collect();
        Extraction::Face(Embedding::new(values))
    }
}

impl Default for PatchExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_PATCH_SIZE, DEFAULT_MIN_CONTRAST)
    }
}

impl FaceExtractor<Embedding> for PatchExtractor {
    fn extract(&self, image: &[u8]) -> Result<Extraction<Embedding>, ExtractError> {
        let decoded = image::load_from_memory(image)?;
        Ok(self.patch_from_gray(&decoded.to_luma8()))
    }
}
