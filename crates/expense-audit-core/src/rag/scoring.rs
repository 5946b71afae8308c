//! Confidence scoring for semantic analyses
//!
//! Scorers are pluggable so the heuristic can change without touching the
//! RAG service or the orchestrator.

use crate::vector::VectorSearchResult;

/// Words that indicate the model reached a verdict
pub const DECISION_KEYWORDS: &[&str] = &[
    "approved",
    "approve",
    "rejected",
    "reject",
    "needs_review",
    "compliant",
    "non-compliant",
    "批准",
    "拒绝",
    "通过",
];

/// What a scorer can see about an answer
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub content: &'a str,
    pub documents: &'a [VectorSearchResult],
}

pub trait ConfidenceScorer: Send + Sync {
    /// Confidence in [0, 1]
    fn score(&self, input: &ScoringInput<'_>) -> f64;
}

/// Constant confidence, used for free-form queries
#[derive(Debug, Clone, Copy)]
pub struct FixedConfidence(pub f64);

impl ConfidenceScorer for FixedConfidence {
    fn score(&self, _input: &ScoringInput<'_>) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Additive heuristic for audit verdicts
///
/// Base 0.50, plus 0.20 when mean retrieval score exceeds 0.8 (or 0.10 above
/// 0.6), plus 0.10 for three or more references (or 0.05 for at least one),
/// plus 0.10 for answers over 100 characters, plus 0.05 when a decision
/// keyword appears. Capped at 1.0. Summed in hundredths so thresholds such
/// as 0.6 compare exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveConfidence;

impl ConfidenceScorer for AdditiveConfidence {
    fn score(&self, input: &ScoringInput<'_>) -> f64 {
        let mut hundredths: u32 = 50;

        if !input.documents.is_empty() {
            let mean = input.documents.iter().map(|d| d.score).sum::<f64>() / input.documents.len() as f64;
            if mean > 0.8 {
                hundredths += 20;
            } else if mean > 0.6 {
                hundredths += 10;
            }
        }

        match input.documents.len() {
            0 => {}
            1 | 2 => hundredths += 5,
            _ => hundredths += 10,
        }

        if input.content.chars().count() > 100 {
            hundredths += 10;
        }

        let lower = input.content.to_lowercase();
        if DECISION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            hundredths += 5;
        }

        (hundredths.min(100) as f64) / 100.0
    }
}
