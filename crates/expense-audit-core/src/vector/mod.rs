//! Fixed-dimension chunk storage and similarity search
//!
//! [`VectorStore`] is the facade the rest of the engine uses. It enforces the
//! system-wide dimension, bounds each backend call with a timeout, and
//! retries transient failures a fixed number of times. Ranking logic that
//! combines result sets (hybrid search) lives here too, so every backend gets
//! it for free. Backends only implement [`VectorBackend`].

pub mod ivf;
pub mod memory;

pub use memory::InMemoryVectorBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::VectorConfig;
use crate::telemetry::AuditMetricsRegistry;

/// Fallback result count when a caller asks for zero
pub const DEFAULT_TOP_K: usize = 5;

/// Score assigned to keyword-only matches
pub const KEYWORD_MATCH_SCORE: f64 = 0.5;

/// An embedded slice of a policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub category: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// One ranked hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub category: String,
    /// Similarity in [0, 1]
    pub score: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl VectorSearchResult {
    pub fn from_chunk(chunk: &DocumentChunk, score: f64) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            content: chunk.content.clone(),
            category: chunk.category.clone(),
            score,
            metadata: chunk.metadata.clone(),
        }
    }
}

/// Vector store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorStoreError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Vector backend error: {0}")]
    Backend(String),

    #[error("Vector store operation timed out after {0}ms")]
    Timeout(u64),
}

impl VectorStoreError {
    /// Only backend failures and timeouts are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, VectorStoreError::Backend(_) | VectorStoreError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, VectorStoreError>;

/// Storage backend for chunks
///
/// Inputs reaching a backend have already been dimension-checked.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Insert or replace chunks by id
    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<()>;

    /// Remove every chunk of a document, returning how many were removed
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// Nearest chunks by similarity, optionally restricted to one category
    async fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        category: Option<&str>,
    ) -> Result<Vec<VectorSearchResult>>;

    /// Chunks whose content contains any keyword, case-insensitively
    async fn keyword(&self, keywords: &[String], top_k: usize) -> Result<Vec<VectorSearchResult>>;

    async fn get(&self, chunk_id: &str) -> Result<Option<DocumentChunk>>;

    async fn count(&self) -> Result<usize>;

    /// Build an approximate index; returns the number of lists built
    async fn build_index(&self, lists: usize, probes: usize) -> Result<usize>;
}

/// Dimension-checked, retrying facade over a [`VectorBackend`]
#[derive(Clone)]
pub struct VectorStore {
    backend: Arc<dyn VectorBackend>,
    config: VectorConfig,
    metrics: Option<Arc<AuditMetricsRegistry>>,
}

impl VectorStore {
    pub fn new(backend: Arc<dyn VectorBackend>, config: VectorConfig) -> Self {
        Self {
            backend,
            config,
            metrics: None,
        }
    }

    /// In-memory store with the given dimension and default settings
    pub fn in_memory(dimension: usize) -> Self {
        let config = VectorConfig {
            dimension,
            ..VectorConfig::default()
        };
        Self::new(Arc::new(InMemoryVectorBackend::new()), config)
    }

    pub fn with_metrics(mut self, metrics: Arc<AuditMetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn effective_top_k(&self, top_k: usize) -> usize {
        if top_k == 0 {
            if self.config.default_top_k == 0 {
                DEFAULT_TOP_K
            } else {
                self.config.default_top_k
            }
        } else {
            top_k
        }
    }

    /// Run `op` under the per-attempt timeout, retrying transient errors
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.timeout();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(
                    operation,
                    attempt,
                    delay_ms = self.config.retry_delay_ms,
                    "Retrying vector store operation"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.audit().record_vector_retry(operation);
                }
                sleep(self.config.retry_delay()).await;
            }

            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(VectorStoreError::Timeout(self.config.timeout_ms)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(operation, attempt, error = %e, backend = self.backend.name(), "Vector store operation failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| VectorStoreError::Backend(format!("{} failed", operation))))
    }

    /// Insert or replace one chunk
    pub async fn insert(&self, chunk: DocumentChunk) -> Result<()> {
        self.insert_batch(vec![chunk]).await
    }

    /// Insert chunks after validating every one; nothing is written on error
    pub async fn insert_batch(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        for chunk in &chunks {
            self.check_dimension(&chunk.embedding)?;
            if chunk.id.is_empty() {
                return Err(VectorStoreError::InvalidArgument("chunk id is empty".to_string()));
            }
        }
        let chunks = &chunks;
        self.with_retry("insert", || self.backend.upsert(chunks)).await
    }

    /// Pure similarity search
    pub async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorSearchResult>> {
        self.check_dimension(query)?;
        let k = self.effective_top_k(top_k);
        self.with_retry("search", || self.backend.nearest(query, k, None)).await
    }

    /// Similarity search restricted to one category
    pub async fn category_search(
        &self,
        query: &[f32],
        category: &str,
        top_k: usize,
    ) -> Result<Vec<VectorSearchResult>> {
        self.check_dimension(query)?;
        if category.trim().is_empty() {
            return Err(VectorStoreError::InvalidArgument("category is empty".to_string()));
        }
        let k = self.effective_top_k(top_k);
        self.with_retry("category_search", || self.backend.nearest(query, k, Some(category)))
            .await
    }

    /// Substring search; every hit scores [`KEYWORD_MATCH_SCORE`]
    pub async fn keyword_search(&self, keywords: &[String], top_k: usize) -> Result<Vec<VectorSearchResult>> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(VectorStoreError::EmptyInput("no keywords given".to_string()));
        }
        let k = self.effective_top_k(top_k);
        let keywords = &keywords;
        self.with_retry("keyword_search", || self.backend.keyword(keywords, k)).await
    }

    /// Union of vector and keyword hits
    ///
    /// Both sides are fetched at twice `top_k`. Chunks found by both average
    /// their scores. With no keywords this is exactly [`VectorStore::search`].
    pub async fn hybrid_search(
        &self,
        query: &[f32],
        keywords: &[String],
        top_k: usize,
    ) -> Result<Vec<VectorSearchResult>> {
        self.check_dimension(query)?;
        let k = self.effective_top_k(top_k);

        if keywords.iter().all(|kw| kw.trim().is_empty()) {
            let mut hits = self.search(query, k).await?;
            hits.truncate(k);
            return Ok(hits);
        }

        let vector_hits = self.search(query, k * 2).await?;
        let keyword_hits = self.keyword_search(keywords, k * 2).await?;
        Ok(merge_hybrid(vector_hits, keyword_hits, k))
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        if document_id.is_empty() {
            return Err(VectorStoreError::InvalidArgument("document id is empty".to_string()));
        }
        self.with_retry("delete_document", || self.backend.delete_document(document_id))
            .await
    }

    pub async fn get(&self, chunk_id: &str) -> Result<Option<DocumentChunk>> {
        self.with_retry("get", || self.backend.get(chunk_id)).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.with_retry("count", || self.backend.count()).await
    }

    /// Build the approximate index; `lists == 0` uses the configured count
    pub async fn build_index(&self, lists: usize) -> Result<usize> {
        let lists = if lists == 0 { self.config.index_lists } else { lists };
        let probes = self.config.index_probes.min(lists).max(1);
        self.with_retry("build_index", || self.backend.build_index(lists, probes))
            .await
    }
}

/// Union by chunk id, averaging overlaps, stable descending sort
fn merge_hybrid(
    vector_hits: Vec<VectorSearchResult>,
    keyword_hits: Vec<VectorSearchResult>,
    top_k: usize,
) -> Vec<VectorSearchResult> {
    let mut merged: Vec<VectorSearchResult> = Vec::with_capacity(vector_hits.len() + keyword_hits.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in vector_hits {
        index.insert(hit.chunk_id.clone(), merged.len());
        merged.push(hit);
    }
    for hit in keyword_hits {
        match index.get(&hit.chunk_id) {
            Some(&i) => merged[i].score = (merged[i].score + hit.score) / 2.0,
            None => {
                index.insert(hit.chunk_id.clone(), merged.len());
                merged.push(hit);
            }
        }
    }

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);
    merged
}

/// Cosine similarity mapped into [0, 1] by clamping negatives to zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}
