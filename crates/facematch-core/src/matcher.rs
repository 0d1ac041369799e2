//! Cosine similarity and best-match search over a candidate set.

use crate::types::{Embedding, EmbeddingRecord, MatchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("query embedding has {actual} components, matcher expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("threshold {threshold} is not valid for the {convention} convention")]
    InvalidThreshold {
        convention: SimilarityConvention,
        threshold: f32,
    },
    #[error("matcher dimension must be positive")]
    ZeroDimension,
    #[error("unknown {kind}: {value}")]
    UnknownSetting { kind: &'static str, value: String },
}

/// Cosine of the angle between `a` and `b`, in [-1, 1].
///
/// Returns 0 when the lengths differ, either slice is empty, or either
/// vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        (dot / denom).clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// How a cosine similarity is reported and thresholded.
///
/// A deployment picks exactly one; scores from different conventions are
/// not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityConvention {
    /// Raw cosine in [-1, 1]; match when `score >= threshold`.
    Cosine,
    /// Cosine remapped to [0, 1] via `(cos + 1) / 2`; match when `score >= threshold`.
    UnitInterval,
    /// Raw cosine reported; match when the distance `1 − cos` is below the threshold.
    Distance,
}

impl SimilarityConvention {
    /// Threshold used when none is configured.
    pub fn default_threshold(self) -> f32 {
        match self {
            Self::Cosine => 0.8,
            Self::UnitInterval => 0.9,
            Self::Distance => 0.4,
        }
    }

    /// Map a raw cosine into this convention's score space.
    pub fn score(self, cosine: f32) -> f32 {
        match self {
            Self::UnitInterval => (cosine + 1.0) / 2.0,
            Self::Cosine | Self::Distance => cosine,
        }
    }

    /// Whether `score` (already in this convention) clears `threshold`.
    pub fn accepts(self, score: f32, threshold: f32) -> bool {
        match self {
            Self::Cosine | Self::UnitInterval => score >= threshold,
            Self::Distance => 1.0 - score < threshold,
        }
    }

    fn threshold_is_valid(self, threshold: f32) -> bool {
        match self {
            Self::Cosine => (-1.0..=1.0).contains(&threshold),
            Self::UnitInterval => (0.0..=1.0).contains(&threshold),
            Self::Distance => (0.0..=2.0).contains(&threshold),
        }
    }
}

impl fmt::Display for SimilarityConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cosine => "cosine",
            Self::UnitInterval => "unit_interval",
            Self::Distance => "distance",
        })
    }
}

impl FromStr for SimilarityConvention {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "unit_interval" | "unit" => Ok(Self::UnitInterval),
            "distance" => Ok(Self::Distance),
            other => Err(MatchError::UnknownSetting {
                kind: "similarity convention",
                value: other.to_string(),
            }),
        }
    }
}

/// What to do when a fallback-sourced embedding takes part in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackHandling {
    /// Never report a match involving a fallback embedding.
    #[default]
    Refuse,
    /// Decide normally but mark the result as degraded.
    Flag,
}

impl FromStr for FallbackHandling {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refuse" => Ok(Self::Refuse),
            "flag" => Ok(Self::Flag),
            other => Err(MatchError::UnknownSetting {
                kind: "fallback handling",
                value: other.to_string(),
            }),
        }
    }
}

/// Convention, threshold and fallback handling for one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub convention: SimilarityConvention,
    pub threshold: f32,
    pub fallback: FallbackHandling,
}

impl MatchPolicy {
    pub fn new(convention: SimilarityConvention, threshold: f32) -> Result<Self, MatchError> {
        if !threshold.is_finite() || !convention.threshold_is_valid(threshold) {
            return Err(MatchError::InvalidThreshold {
                convention,
                threshold,
            });
        }
        Ok(Self {
            convention,
            threshold,
            fallback: FallbackHandling::default(),
        })
    }

    pub fn with_fallback(mut self, fallback: FallbackHandling) -> Self {
        self.fallback = fallback;
        self
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            convention: SimilarityConvention::Cosine,
            threshold: SimilarityConvention::Cosine.default_threshold(),
            fallback: FallbackHandling::Refuse,
        }
    }
}

/// A candidate and its score, as returned by [`SimilarityMatcher::rank`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub candidate_id: String,
    pub similarity: f32,
}

/// Strategy for comparing a query embedding against stored candidates.
pub trait Matcher {
    fn best_match(
        &self,
        query: &Embedding,
        candidates: &[EmbeddingRecord],
    ) -> Result<MatchResult, MatchError>;
}

/// Cosine matcher bound to one embedding width and one [`MatchPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatcher {
    policy: MatchPolicy,
    dimension: usize,
}

impl SimilarityMatcher {
    pub fn new(policy: MatchPolicy, dimension: usize) -> Result<Self, MatchError> {
        if dimension == 0 {
            return Err(MatchError::ZeroDimension);
        }
        // Re-validate: the policy fields are public.
        MatchPolicy::new(policy.convention, policy.threshold)?;
        Ok(Self { policy, dimension })
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Similarity of two embeddings in this matcher's convention.
    pub fn score(&self, a: &Embedding, b: &Embedding) -> f32 {
        self.policy.convention.score(a.similarity(b))
    }

    /// Whether a score in this matcher's convention counts as a match.
    pub fn is_match(&self, score: f32) -> bool {
        self.policy.convention.accepts(score, self.policy.threshold)
    }

    /// Every comparable candidate with its score, best first. Ties keep
    /// input order. Candidates of another width are left out.
    pub fn rank(
        &self,
        query: &Embedding,
        candidates: &[EmbeddingRecord],
    ) -> Result<Vec<RankedCandidate>, MatchError> {
        self.check_query(query)?;
        let mut ranked: Vec<RankedCandidate> = candidates
            .iter()
            .filter(|c| c.embedding.len() == self.dimension)
            .map(|c| RankedCandidate {
                candidate_id: c.candidate_id.clone(),
                similarity: self.score(query, &c.embedding),
            })
            .collect();
        // sort_by is stable, so equal scores stay in first-seen order.
        ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        Ok(ranked)
    }

    fn check_query(&self, query: &Embedding) -> Result<(), MatchError> {
        if query.len() != self.dimension {
            return Err(MatchError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        Ok(())
    }
}

impl Matcher for SimilarityMatcher {
    fn best_match(
        &self,
        query: &Embedding,
        candidates: &[EmbeddingRecord],
    ) -> Result<MatchResult, MatchError> {
        self.check_query(query)?;

        let mut best_score = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        // Scan every candidate once with no early exit. Strict `>` keeps
        // the first of several equal maxima.
        for (i, candidate) in candidates.iter().enumerate() {
            if candidate.embedding.len() != self.dimension {
                tracing::debug!(
                    candidate = %candidate.candidate_id,
                    len = candidate.embedding.len(),
                    expected = self.dimension,
                    "candidate width differs from matcher; skipped"
                );
                continue;
            }
            let score = self.score(query, &candidate.embedding);
            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }

        let Some(idx) = best_idx else {
            return Ok(MatchResult::empty());
        };
        let winner = &candidates[idx];

        let degraded = query.is_fallback() || winner.embedding.is_fallback();
        let clears = self.is_match(best_score);
        let is_match = match self.policy.fallback {
            FallbackHandling::Refuse if degraded => {
                if clears {
                    tracing::warn!(
                        candidate = %winner.candidate_id,
                        similarity = best_score,
                        "match refused: fallback embedding involved"
                    );
                }
                false
            }
            _ => clears,
        };

        Ok(MatchResult {
            candidate_id: Some(winner.candidate_id.clone()),
            similarity: best_score,
            is_match,
            degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmbeddingProvenance;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec(), EmbeddingProvenance::Genuine).unwrap()
    }

    fn fallback_emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec(), EmbeddingProvenance::Fallback).unwrap()
    }

    fn record(id: &str, values: &[f32]) -> EmbeddingRecord {
        EmbeddingRecord::new(id, emb(values))
    }

    fn matcher(convention: SimilarityConvention, threshold: f32, dim: usize) -> SimilarityMatcher {
        SimilarityMatcher::new(MatchPolicy::new(convention, threshold).unwrap(), dim).unwrap()
    }

    #[test]
    fn test_cosine_similarity_identical() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = [0.3, -1.2, 4.5, 0.01];
        let b = [2.0, 0.7, -0.4, 9.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_cosine_similarity_ignores_magnitude() {
        assert!((cosine_similarity(&[1.0, 1.0], &[50.0, 50.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_interval_remap() {
        let c = SimilarityConvention::UnitInterval;
        assert_eq!(c.score(1.0), 1.0);
        assert_eq!(c.score(-1.0), 0.0);
        assert_eq!(c.score(0.0), 0.5);
    }

    #[test]
    fn test_distance_convention_accepts_below_threshold() {
        let c = SimilarityConvention::Distance;
        assert!(c.accepts(0.7, 0.4)); // distance 0.3
        assert!(!c.accepts(0.5, 0.4)); // distance 0.5
    }

    #[test]
    fn test_best_match_scans_all_candidates() {
        // Best match is the last entry.
        let gallery = vec![
            record("decoy1", &[0.0, 1.0, 0.0]),
            record("decoy2", &[0.0, 0.0, 1.0]),
            record("match", &[1.0, 0.0, 0.0]),
        ];
        let result = matcher(SimilarityConvention::Cosine, 0.8, 3)
            .best_match(&emb(&[1.0, 0.0, 0.0]), &gallery)
            .unwrap();
        assert!(result.is_match);
        assert_eq!(result.candidate_id.as_deref(), Some("match"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
        assert!(!result.degraded);
    }

    #[test]
    fn test_best_match_below_threshold() {
        let gallery = vec![record("other", &[0.0, 1.0, 0.0])];
        let result = matcher(SimilarityConvention::Cosine, 0.8, 3)
            .best_match(&emb(&[1.0, 0.0, 0.0]), &gallery)
            .unwrap();
        assert!(!result.is_match);
        // The best candidate is still reported.
        assert_eq!(result.candidate_id.as_deref(), Some("other"));
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_best_match_empty_candidates() {
        let result = matcher(SimilarityConvention::Cosine, 0.8, 2)
            .best_match(&emb(&[1.0, 0.0]), &[])
            .unwrap();
        assert!(!result.is_match);
        assert!(result.candidate_id.is_none());
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_best_match_tie_keeps_first_seen() {
        let gallery = vec![
            record("first", &[1.0, 0.0]),
            record("second", &[2.0, 0.0]),
            record("third", &[1.0, 0.0]),
        ];
        let result = matcher(SimilarityConvention::Cosine, 0.8, 2)
            .best_match(&emb(&[1.0, 0.0]), &gallery)
            .unwrap();
        assert_eq!(result.candidate_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_best_match_rejects_wrong_query_width() {
        let err = matcher(SimilarityConvention::Cosine, 0.8, 4)
            .best_match(&emb(&[1.0, 0.0]), &[])
            .unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { expected: 4, actual: 2 });
    }

    #[test]
    fn test_wrong_width_candidate_never_wins() {
        let gallery = vec![
            record("real", &[-0.2, 1.0]),
            record("wrong_width", &[1.0, 0.0, 0.0]),
        ];
        let m = matcher(SimilarityConvention::UnitInterval, 0.45, 2);
        let result = m.best_match(&emb(&[1.0, 0.0]), &gallery).unwrap();
        assert_eq!(result.candidate_id.as_deref(), Some("real"));
        assert!(result.similarity < 0.45);
        assert!(!result.is_match);

        let ranked = m.rank(&emb(&[1.0, 0.0]), &gallery).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].candidate_id, "real");
    }

    #[test]
    fn test_only_wrong_width_candidates_is_empty_result() {
        let gallery = vec![record("wrong_width", &[1.0, 0.0, 0.0])];
        let result = matcher(SimilarityConvention::UnitInterval, 0.45, 2)
            .best_match(&emb(&[1.0, 0.0]), &gallery)
            .unwrap();
        assert_eq!(result, MatchResult::empty());
    }

    #[test]
    fn test_best_match_unit_interval() {
        let gallery = vec![record("a", &[0.0, 1.0]), record("b", &[1.0, 0.1])];
        let result = matcher(SimilarityConvention::UnitInterval, 0.9, 2)
            .best_match(&emb(&[1.0, 0.0]), &gallery)
            .unwrap();
        assert_eq!(result.candidate_id.as_deref(), Some("b"));
        assert!(result.similarity > 0.99 && result.similarity <= 1.0);
        assert!(result.is_match);
    }

    #[test]
    fn test_best_match_distance() {
        let gallery = vec![record("near", &[1.0, 0.5])];
        // cos ≈ 0.894 → distance ≈ 0.106
        let m = matcher(SimilarityConvention::Distance, 0.4, 2);
        assert!(m.best_match(&emb(&[1.0, 0.0]), &gallery).unwrap().is_match);
        let strict = matcher(SimilarityConvention::Distance, 0.1, 2);
        assert!(!strict.best_match(&emb(&[1.0, 0.0]), &gallery).unwrap().is_match);
    }

    #[test]
    fn test_fallback_query_refused() {
        let gallery = vec![record("same", &[1.0, 0.0])];
        let result = matcher(SimilarityConvention::Cosine, 0.8, 2)
            .best_match(&fallback_emb(&[1.0, 0.0]), &gallery)
            .unwrap();
        assert!(result.degraded);
        assert!(!result.is_match);
        assert_eq!(result.candidate_id.as_deref(), Some("same"));
    }

    #[test]
    fn test_fallback_candidate_flagged() {
        let policy = MatchPolicy::new(SimilarityConvention::Cosine, 0.8)
            .unwrap()
            .with_fallback(FallbackHandling::Flag);
        let m = SimilarityMatcher::new(policy, 2).unwrap();
        let gallery = vec![EmbeddingRecord::new("stored", fallback_emb(&[1.0, 0.0]))];
        let result = m.best_match(&emb(&[1.0, 0.0]), &gallery).unwrap();
        assert!(result.degraded);
        assert!(result.is_match);
    }

    #[test]
    fn test_rank_orders_best_first() {
        let gallery = vec![
            record("low", &[0.0, 1.0]),
            record("high", &[1.0, 0.0]),
            record("mid", &[1.0, 1.0]),
        ];
        let ranked = matcher(SimilarityConvention::Cosine, 0.8, 2)
            .rank(&emb(&[1.0, 0.0]), &gallery)
            .unwrap();
        let ids: Vec<&str> = ranked.iter().map(|r| r.candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_policy_validation() {
        assert!(MatchPolicy::new(SimilarityConvention::Cosine, f32::NAN).is_err());
        assert!(MatchPolicy::new(SimilarityConvention::UnitInterval, 1.5).is_err());
        assert!(MatchPolicy::new(SimilarityConvention::UnitInterval, -0.1).is_err());
        assert!(MatchPolicy::new(SimilarityConvention::Cosine, -0.5).is_ok());
        assert!(SimilarityMatcher::new(MatchPolicy::default(), 0).is_err());

        let forged = MatchPolicy {
            convention: SimilarityConvention::UnitInterval,
            threshold: 3.0,
            fallback: FallbackHandling::Flag,
        };
        assert!(SimilarityMatcher::new(forged, 8).is_err());
    }

    #[test]
    fn test_convention_parsing() {
        assert_eq!("cosine".parse::<SimilarityConvention>().unwrap(), SimilarityConvention::Cosine);
        assert_eq!(
            " Unit_Interval ".parse::<SimilarityConvention>().unwrap(),
            SimilarityConvention::UnitInterval
        );
        assert!("euclid".parse::<SimilarityConvention>().is_err());
        assert_eq!("flag".parse::<FallbackHandling>().unwrap(), FallbackHandling::Flag);
    }
}
