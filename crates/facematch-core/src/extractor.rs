//! Block-statistics feature extractor.
//!
//! The normalized pixel buffer is split into `output_size` contiguous
//! blocks. Each block contributes one component, chosen by its index
//! modulo 4:
//!
//! | `i % 4` | descriptor | mapping                         |
//! |---------|------------|---------------------------------|
//! | 0       | brightness | `(mean − 127.5) / 127.5`        |
//! | 1       | contrast   | `tanh(variance / 10000)`        |
//! | 2       | range      | `(max − min − 127.5) / 127.5`   |
//! | 3       | texture    | `tanh(gradient / count / 255)`  |
//!
//! Interleaving keeps every descriptor spread evenly along the vector, so
//! a truncated or subsampled embedding still sees all four. The finished
//! vector is L2-normalized.

use crate::types::{Embedding, EmbeddingProvenance};
use thiserror::Error;

/// Default embedding width. 512 is the other supported deployment width.
pub const DEFAULT_OUTPUT_SIZE: usize = 128;

const PIXEL_MIDPOINT: f32 = 127.5;
const VARIANCE_SCALE: f32 = 10_000.0;
const GRADIENT_SCALE: f32 = 255.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractorError {
    #[error("cannot split {pixels} pixels into {output_size} non-empty blocks")]
    EmptyBlock { output_size: usize, pixels: usize },
}

/// Raw statistics of one block, gathered in a single pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockStats {
    pub mean: f32,
    pub variance: f32,
    pub min: u8,
    pub max: u8,
    /// Sum of |p[j] − p[j+1]| over adjacent pixels inside the block.
    pub gradient: f32,
    pub count: usize,
}

impl BlockStats {
    /// Compute statistics for a non-empty block.
    pub fn compute(block: &[u8]) -> Self {
        let mut sum = 0u64;
        let mut sum_sq = 0u64;
        let mut min = u8::MAX;
        let mut max = u8::MIN;
        let mut gradient = 0u64;
        let mut prev: Option<u8> = None;

        for &p in block {
            sum += p as u64;
            sum_sq += (p as u64) * (p as u64);
            min = min.min(p);
            max = max.max(p);
            if let Some(q) = prev {
                gradient += q.abs_diff(p) as u64;
            }
            prev = Some(p);
        }

        let n = block.len().max(1) as f64;
        let mean = sum as f64 / n;
        // Population variance; clamp rounding noise below zero.
        let variance = (sum_sq as f64 / n - mean * mean).max(0.0);

        Self {
            mean: mean as f32,
            variance: variance as f32,
            min,
            max,
            gradient: gradient as f32,
            count: block.len(),
        }
    }

    /// The descriptor assigned to embedding slot `slot`.
    pub fn feature(&self, slot: usize) -> f32 {
        match slot % 4 {
            0 => (self.mean - PIXEL_MIDPOINT) / PIXEL_MIDPOINT,
            1 => (self.variance / VARIANCE_SCALE).tanh(),
            2 => ((self.max - self.min) as f32 - PIXEL_MIDPOINT) / PIXEL_MIDPOINT,
            _ => (self.gradient / self.count.max(1) as f32 / GRADIENT_SCALE).tanh(),
        }
    }
}

/// Turns a normalized intensity buffer into a fixed-length embedding.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    output_size: usize,
}

impl FeatureExtractor {
    /// Build an extractor for buffers of `pixel_count` intensities.
    ///
    /// Rejects configurations that would leave a block empty, so a
    /// validated extractor never fails on a buffer of that size.
    pub fn new(output_size: usize, pixel_count: usize) -> Result<Self, ExtractorError> {
        if output_size == 0 || output_size > pixel_count {
            return Err(ExtractorError::EmptyBlock {
                output_size,
                pixels: pixel_count,
            });
        }
        Ok(Self { output_size })
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Extract an L2-normalized embedding of exactly `output_size` components.
    pub fn extract(&self, pixels: &[u8]) -> Result<Embedding, ExtractorError> {
        let raw = extract_features(pixels, self.output_size)?;
        Ok(Embedding::from_trusted(l2_normalize(raw), EmbeddingProvenance::Genuine))
    }
}

/// Compute the raw (un-normalized) feature vector.
///
/// The last block absorbs any remainder when `pixels.len()` is not a
/// multiple of `output_size`.
pub fn extract_features(pixels: &[u8], output_size: usize) -> Result<Vec<f32>, ExtractorError> {
    if output_size == 0 || output_size > pixels.len() {
        return Err(ExtractorError::EmptyBlock {
            output_size,
            pixels: pixels.len(),
        });
    }

    let block_len = pixels.len() / output_size;
    let features = (0..output_size)
        .map(|i| {
            let start = i * block_len;
            let end = if i + 1 == output_size { pixels.len() } else { start + block_len };
            BlockStats::compute(&pixels[start..end]).feature(i)
        })
        .collect();

    Ok(features)
}

/// Divide by the Euclidean norm. A zero vector is returned unchanged.
pub fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|x| x / norm).collect()
    } else {
        values
    }
}
