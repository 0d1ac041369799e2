//! Region → normalize → extract, with graceful degradation.
//!
//! Failures in the region path retry on the whole image; if that fails too
//! the fallback generator fills in. [`EmbeddingPipeline::embed`] therefore
//! always yields an embedding of the configured width, and its provenance
//! says whether it is genuine.

use crate::extractor::{ExtractorError, FeatureExtractor, DEFAULT_OUTPUT_SIZE};
use crate::fallback::generate_fallback;
use crate::normalizer::{self, ResizeError, DEFAULT_TARGET_SIZE};
use crate::region::{self, RegionError, DEFAULT_MARGIN_RATIO};
use crate::types::{Embedding, Image, Region};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("target size must be positive")]
    ZeroTargetSize,
    #[error("margin ratio {0} outside [0, 1)")]
    InvalidMargin(f32),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
}

/// A failed extraction attempt. Recovered inside [`EmbeddingPipeline::embed`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("region: {0}")]
    Region(#[from] RegionError),
    #[error("resize: {0}")]
    Resize(#[from] ResizeError),
    #[error("extract: {0}")]
    Extractor(#[from] ExtractorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Side of the square the image is resized to.
    pub target_size: u32,
    /// Embedding width: 128 or 512.
    pub output_size: usize,
    /// Margin added around the face region on every side.
    pub margin_ratio: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            output_size: DEFAULT_OUTPUT_SIZE,
            margin_ratio: DEFAULT_MARGIN_RATIO,
        }
    }
}

/// Which step produced the embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPath {
    Region,
    WholeImage,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub embedding: Embedding,
    pub path: ExtractionPath,
}

/// Embedding pipeline with a configuration validated at construction.
///
/// Holds no mutable state; share it freely across threads.
#[derive(Debug, Clone)]
pub struct EmbeddingPipeline {
    config: PipelineConfig,
    extractor: FeatureExtractor,
}

impl EmbeddingPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        if config.target_size == 0 {
            return Err(ConfigError::ZeroTargetSize);
        }
        if !(0.0..1.0).contains(&config.margin_ratio) {
            return Err(ConfigError::InvalidMargin(config.margin_ratio));
        }
        let pixels = config.target_size as usize * config.target_size as usize;
        let extractor = FeatureExtractor::new(config.output_size, pixels)?;

        tracing::debug!(
            target_size = config.target_size,
            output_size = config.output_size,
            margin_ratio = config.margin_ratio,
            "embedding pipeline configured"
        );

        Ok(Self { config, extractor })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Produce an embedding for `image`, never failing.
    ///
    /// `region` of `None` means the face-region provider found nothing;
    /// the centered default region is used instead. `fallback_seed` is only
    /// consulted when both extraction attempts fail.
    pub fn embed(&self, image: &Image, region: Option<Region>, fallback_seed: u64) -> Embedding {
        self.run(image, region, fallback_seed).embedding
    }

    /// Like [`embed`](Self::embed), also reporting which step succeeded.
    pub fn run(&self, image: &Image, region: Option<Region>, fallback_seed: u64) -> Extraction {
        let region = region.unwrap_or_else(|| Region::centered(image.width(), image.height()));

        let err = match self.extract_region(image, &region) {
            Ok(embedding) => {
                return Extraction {
                    embedding,
                    path: ExtractionPath::Region,
                }
            }
            Err(e) => e,
        };
        tracing::warn!(error = %err, ?region, "region extraction failed; retrying on whole image");

        let err = match self.extract_whole(image) {
            Ok(embedding) => {
                return Extraction {
                    embedding,
                    path: ExtractionPath::WholeImage,
                }
            }
            Err(e) => e,
        };
        tracing::warn!(error = %err, "whole-image extraction failed");

        tracing::info!(
            seed = fallback_seed,
            output_size = self.config.output_size,
            "substituting fallback embedding"
        );
        Extraction {
            embedding: generate_fallback(self.config.output_size, fallback_seed),
            path: ExtractionPath::Fallback,
        }
    }

    /// Crop to `region` (with margin), normalize and extract.
    pub fn extract_region(&self, image: &Image, region: &Region) -> Result<Embedding, ExtractionError> {
        let face = region::crop(image, region, self.config.margin_ratio)?;
        self.extract_whole(&face)
    }

    /// Normalize and extract the unmodified image.
    pub fn extract_whole(&self, image: &Image) -> Result<Embedding, ExtractionError> {
        let pixels = normalizer::normalize(image, self.config.target_size)?;
        Ok(self.extractor.extract(&pixels)?)
    }
}
