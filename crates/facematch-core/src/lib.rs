//! facematch-core — Face embedding extraction and similarity matching.
//!
//! Turns a face region into a fixed-length vector of block statistics and
//! finds the closest stored vector by cosine similarity. Pure, synchronous
//! and free of shared mutable state.

pub mod extractor;
pub mod fallback;
pub mod matcher;
pub mod normalizer;
pub mod pipeline;
pub mod region;
pub mod types;

pub use extractor::FeatureExtractor;
pub use fallback::generate_fallback;
pub use matcher::{
    cosine_similarity, FallbackHandling, MatchPolicy, Matcher, SimilarityConvention,
    SimilarityMatcher,
};
pub use pipeline::{EmbeddingPipeline, Extraction, ExtractionPath, PipelineConfig};
pub use types::{Embedding, EmbeddingProvenance, EmbeddingRecord, Image, MatchResult, Region};
