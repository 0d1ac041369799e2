use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fraction of each image extent covered by the default centered region.
const DEFAULT_REGION_COVERAGE: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding has no components")]
    Empty,
    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },
}

/// Decoded pixel data, interleaved by channel, row-major.
///
/// Never mutated after construction; every transform returns a new `Image`.
/// The buffer is not checked here: malformed images are rejected by the
/// stage that consumes them (see [`crate::normalizer`]).
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

impl Image {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Self {
        Self {
            data,
            width,
            height,
            channels,
        }
    }

    /// Take the pixels of an image decoded by the `image` crate.
    ///
    /// High bit-depth and float images are narrowed to 8 bits per channel;
    /// the channel count (gray, gray+alpha, RGB, RGBA) is preserved.
    pub fn from_dynamic(img: &DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        match img.color().channel_count() {
            1 => Self::new(img.to_luma8().into_raw(), width, height, 1),
            2 => Self::new(img.to_luma_alpha8().into_raw(), width, height, 2),
            4 => Self::new(img.to_rgba8().into_raw(), width, height, 4),
            _ => Self::new(img.to_rgb8().into_raw(), width, height, 3),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Buffer length implied by the declared dimensions, `None` if it
    /// overflows `usize`.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels as usize)
    }
}

/// Rectangular region of interest in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centered box covering 60% of each image extent.
    ///
    /// Substituted when the face-region provider has nothing for the image.
    pub fn centered(image_width: u32, image_height: u32) -> Self {
        let width = image_width as f32 * DEFAULT_REGION_COVERAGE;
        let height = image_height as f32 * DEFAULT_REGION_COVERAGE;
        Self {
            x: (image_width as f32 - width) / 2.0,
            y: (image_height as f32 - height) / 2.0,
            width,
            height,
        }
    }
}

/// Where an embedding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvenance {
    /// Computed from image pixels by the feature extractor.
    Genuine,
    /// Placeholder from the fallback generator. Carries no biometric signal.
    Fallback,
}

/// Fixed-length face embedding with every component finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EmbeddingRepr")]
pub struct Embedding {
    values: Vec<f32>,
    provenance: EmbeddingProvenance,
}

#[derive(Deserialize)]
struct EmbeddingRepr {
    values: Vec<f32>,
    provenance: EmbeddingProvenance,
}

impl TryFrom<EmbeddingRepr> for Embedding {
    type Error = EmbeddingError;

    fn try_from(repr: EmbeddingRepr) -> Result<Self, Self::Error> {
        Embedding::new(repr.values, repr.provenance)
    }
}

impl Embedding {
    /// Build an embedding from raw values, rejecting empty or non-finite input.
    pub fn new(values: Vec<f32>, provenance: EmbeddingProvenance) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        Ok(Self { values, provenance })
    }

    /// Internal constructor for producers that guarantee finite output.
    pub(crate) fn from_trusted(values: Vec<f32>, provenance: EmbeddingProvenance) -> Self {
        debug_assert!(values.iter().all(|v| v.is_finite()));
        Self { values, provenance }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn provenance(&self) -> EmbeddingProvenance {
        self.provenance
    }

    pub fn is_fallback(&self) -> bool {
        self.provenance == EmbeddingProvenance::Fallback
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1]. See [`crate::matcher::cosine_similarity`].
    pub fn similarity(&self, other: &Embedding) -> f32 {
        crate::matcher::cosine_similarity(&self.values, &other.values)
    }

    /// Euclidean distance; `None` when the lengths differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }
}

/// A stored embedding paired with the identifier of whoever it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub candidate_id: String,
    pub embedding: Embedding,
}

impl EmbeddingRecord {
    pub fn new(candidate_id: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            embedding,
        }
    }
}

/// Outcome of matching one query embedding against a candidate set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Best-scoring candidate, `None` only for an empty candidate set.
    pub candidate_id: Option<String>,
    /// Score of the best candidate in the matcher's convention.
    pub similarity: f32,
    pub is_match: bool,
    /// The query or the winning candidate is fallback-sourced.
    pub degraded: bool,
}

impl MatchResult {
    pub fn empty() -> Self {
        Self {
            candidate_id: None,
            similarity: 0.0,
            is_match: false,
            degraded: false,
        }
    }
}
