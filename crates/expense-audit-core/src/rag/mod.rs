//! Retrieval-augmented policy judgment
//!
//! Every call follows the same skeleton: embed, retrieve, compose, judge,
//! validate, score. [`RagService::query`] answers free-form policy questions;
//! [`RagService::audit_reimbursement`] judges a claim against retrieved
//! policy text.

pub mod embedding;
pub mod judgment;
pub mod keywords;
pub mod prompt;
pub mod scoring;

pub use embedding::{embedder_from_config, Embedder, HashingEmbedder, HttpEmbeddingClient};
pub use judgment::{ChatMessage, ChatModel, HttpChatClient, Judgment, JudgmentClient};
pub use prompt::PromptComposer;
pub use scoring::{AdditiveConfidence, ConfidenceScorer, FixedConfidence, ScoringInput};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::ClaimFields;
use crate::vector::{VectorSearchResult, VectorStore, VectorStoreError};

/// Errors raised by the RAG pipeline
#[derive(Error, Debug)]
pub enum RagError {
    /// Embedding generation failed
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// Vector store failed
    #[error("Retrieval failed: {0}")]
    Vector(#[from] VectorStoreError),

    /// The chat endpoint failed
    #[error("Judgment failed: {0}")]
    Judgment(String),

    /// The model answered with something unusable
    #[error("Response validation failed: {0}")]
    ResponseValidation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("RAG configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Verdict extracted from an audit answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    NeedsReview,
}

impl Decision {
    pub fn parse(text: &str) -> Option<Decision> {
        let normalized = text.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "approved" | "approve" | "pass" | "passed" | "compliant" => Some(Decision::Approved),
            "rejected" | "reject" | "fail" | "failed" | "non_compliant" => Some(Decision::Rejected),
            "needs_review" | "review" | "manual_review" | "uncertain" => Some(Decision::NeedsReview),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
            Decision::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved chunk the answer was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Label used in the prompt, e.g. "Document 2"
    pub label: String,
    pub chunk_id: String,
    pub document_id: String,
    pub category: String,
    pub score: f64,
    pub excerpt: String,
}

/// Outcome of one semantic analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub query: String,
    pub conclusion: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub confidence: f64,
    pub references: Vec<Reference>,
    /// References the answer cites by label
    pub supporting_references: usize,
    pub model: String,
    pub tokens_used: u32,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    decision: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parse the `{decision, conclusion, reasoning}` object out of an answer
///
/// Tolerates code fences and prose around the object.
fn parse_verdict(content: &str) -> Option<Verdict> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

const EXCERPT_CHARS: usize = 200;

fn references(documents: &[VectorSearchResult]) -> Vec<Reference> {
    documents
        .iter()
        .enumerate()
        .map(|(i, d)| Reference {
            label: format!("Document {}", i + 1),
            chunk_id: d.chunk_id.clone(),
            document_id: d.document_id.clone(),
            category: d.category.clone(),
            score: d.score,
            excerpt: d.content.chars().take(EXCERPT_CHARS).collect(),
        })
        .collect()
}

fn count_cited(content: &str, refs: &[Reference]) -> usize {
    refs.iter()
        .filter(|r| content.contains(&format!("[{}]", r.label)))
        .count()
}

/// Embed, retrieve, compose, judge, validate, score
pub struct RagService {
    embedder: Arc<dyn Embedder>,
    store: VectorStore,
    judgment: JudgmentClient,
    composer: PromptComposer,
    audit_scorer: Arc<dyn ConfidenceScorer>,
    query_scorer: Arc<dyn ConfidenceScorer>,
    default_top_k: usize,
}

impl RagService {
    pub fn new(embedder: Arc<dyn Embedder>, store: VectorStore, judgment: JudgmentClient) -> Self {
        Self {
            embedder,
            store,
            judgment,
            composer: PromptComposer::new(),
            audit_scorer: Arc::new(AdditiveConfidence),
            query_scorer: Arc::new(FixedConfidence(0.8)),
            default_top_k: crate::vector::DEFAULT_TOP_K,
        }
    }

    pub fn with_audit_scorer(mut self, scorer: Arc<dyn ConfidenceScorer>) -> Self {
        self.audit_scorer = scorer;
        self
    }

    pub fn with_query_scorer(mut self, scorer: Arc<dyn ConfidenceScorer>) -> Self {
        self.query_scorer = scorer;
        self
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k.max(1);
        self
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    fn top_k(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_top_k
        } else {
            requested
        }
    }

    /// Answer a free-form policy question
    pub async fn query(&self, question: &str, top_k: usize) -> Result<AnalysisResult> {
        let top_k = self.top_k(top_k);
        let vector = self.embedder.embed(question).await?;
        let documents = self.store.search(&vector, top_k).await?;
        debug!(retrieved = documents.len(), top_k, "Retrieved policy context for query");

        let messages = self.composer.compose_query(question, &documents);
        let judgment = self.judgment.judge(messages).await?;
        let confidence = self.query_scorer.score(&ScoringInput {
            content: &judgment.content,
            documents: &documents,
        });

        let refs = references(&documents);
        Ok(AnalysisResult {
            query: question.to_string(),
            supporting_references: count_cited(&judgment.content, &refs),
            conclusion: judgment.content,
            reasoning: String::new(),
            decision: None,
            confidence,
            references: refs,
            model: judgment.model,
            tokens_used: judgment.total_tokens,
        })
    }

    /// Judge a claim against retrieved policy text
    pub async fn audit_reimbursement(&self, claim: &ClaimFields, top_k: usize) -> Result<AnalysisResult> {
        let top_k = self.top_k(top_k);
        let query = keywords::audit_query(claim);
        let terms = keywords::extract_keywords(claim);

        let vector = self.embedder.embed(&query).await?;
        let documents = self.store.hybrid_search(&vector, &terms, top_k).await?;
        debug!(
            claim_id = %claim.claim_id,
            keywords = ?terms,
            retrieved = documents.len(),
            "Retrieved policy context for audit"
        );

        let messages = self.composer.compose_audit(claim, &documents)?;
        let judgment = self.judgment.judge(messages).await?;
        let confidence = self.audit_scorer.score(&ScoringInput {
            content: &judgment.content,
            documents: &documents,
        });

        let (decision, conclusion, reasoning) = match parse_verdict(&judgment.content) {
            Some(verdict) => (
                verdict.decision.as_deref().and_then(Decision::parse),
                verdict.conclusion.unwrap_or_else(|| judgment.content.clone()),
                verdict.reasoning.unwrap_or_default(),
            ),
            None => (None, judgment.content.clone(), String::new()),
        };

        let refs = references(&documents);
        info!(
            claim_id = %claim.claim_id,
            decision = decision.map(|d| d.as_str()).unwrap_or("unparsed"),
            confidence,
            references = refs.len(),
            "Semantic analysis complete"
        );

        Ok(AnalysisResult {
            query,
            supporting_references: count_cited(&judgment.content, &refs),
            conclusion,
            reasoning,
            decision,
            confidence,
            references: refs,
            model: judgment.model,
            tokens_used: judgment.total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_parsing() {
        assert_eq!(Decision::parse("Approved"), Some(Decision::Approved));
        assert_eq!(Decision::parse("needs review"), Some(Decision::NeedsReview));
        assert_eq!(Decision::parse("non-compliant"), Some(Decision::Rejected));
        assert_eq!(Decision::parse("maybe"), None);
    }

    #[test]
    fn test_verdict_inside_code_fence() {
        let content = "Here is my verdict:\n```json\n{\"decision\": \"rejected\", \"conclusion\": \"Over the hotel cap\", \"reasoning\": \"[Document 1] caps hotels at 500\"}\n```";
        let verdict = parse_verdict(content).unwrap();
        assert_eq!(verdict.decision.as_deref(), Some("rejected"));
        assert_eq!(verdict.conclusion.as_deref(), Some("Over the hotel cap"));
        assert!(parse_verdict("no json here").is_none());
        assert!(parse_verdict("} backwards {").is_none());
    }

    #[test]
    fn test_cited_references_are_counted() {
        let docs: Vec<VectorSearchResult> = (0..3)
            .map(|i| VectorSearchResult {
                chunk_id: format!("c{}", i),
                document_id: "d".to_string(),
                content: "x".repeat(300),
                category: "travel".to_string(),
                score: 0.5,
                metadata: Default::default(),
            })
            .collect();
        let refs = references(&docs);
        assert_eq!(refs[2].label, "Document 3");
        assert_eq!(refs[0].excerpt.len(), EXCERPT_CHARS);
        assert_eq!(count_cited("See [Document 1] and [Document 3].", &refs), 2);
    }
}
