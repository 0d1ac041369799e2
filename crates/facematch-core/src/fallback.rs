//! Deterministic placeholder embeddings.
//!
//! Produced only when no real embedding can be extracted. The output is
//! tagged [`EmbeddingProvenance::Fallback`] so matchers and stores can
//! tell it apart from a genuine one.

use crate::types::{Embedding, EmbeddingProvenance};

const SINE_SCALE: f64 = 10_000.0;
/// Seeds are reduced modulo this so `seed + i` stays exact in an f64.
const SEED_PERIOD: u64 = 1 << 32;

/// Generate `output_size` values in [-1, 1] from `seed`.
///
/// `value[i] = frac(sin(seed + i) × 10000) × 2 − 1`. Same seed, same vector.
/// Callers derive the seed (clock, counter) at their own boundary.
/// `output_size` must be positive; a validated pipeline guarantees it.
pub fn generate_fallback(output_size: usize, seed: u64) -> Embedding {
    debug_assert!(output_size > 0, "fallback embedding must not be empty");
    let base = (seed % SEED_PERIOD) as f64;
    let values = (0..output_size)
        .map(|i| {
            let x = ((base + i as f64).sin() * SINE_SCALE).fract();
            // fract keeps the sign; shift negatives into [0, 1).
            let frac = if x < 0.0 { x + 1.0 } else { x };
            (frac * 2.0 - 1.0) as f32
        })
        .collect();

    Embedding::from_trusted(values, EmbeddingProvenance::Fallback)
}
