//! Policy document indexing
//!
//! Documents are split into overlapping character windows, embedded in one
//! batch and written to the vector store. Re-indexing a document replaces its
//! chunks; removing it cascades to every chunk.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RagConfig;
use crate::rag::{Embedder, RagError};
use crate::vector::{DocumentChunk, VectorStore, VectorStoreError};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Document {0} has no content")]
    EmptyDocument(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] RagError),

    #[error("Embedder returned {actual} vectors for {expected} chunks")]
    EmbeddingCount { expected: usize, actual: usize },

    #[error("Vector store error: {0}")]
    Store(#[from] VectorStoreError),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// A natural-language policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: String,
    pub title: String,
    pub category: String,
    pub content: String,
}

/// Outcome of indexing one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub document_id: String,
    pub chunks: usize,
    /// Chunks removed from a previous indexing of the same document
    pub replaced: usize,
}

/// Split `text` into windows of at most `size` characters sharing `overlap`
/// characters with their predecessor
///
/// Windows end at whitespace when one exists in their back half.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let overlap = overlap.min(size - 1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            let floor = start + size / 2;
            if let Some(cut) = (floor.max(start + 1)..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = cut;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Chunks, embeds and stores policy documents
pub struct DocumentIndexer {
    embedder: Arc<dyn Embedder>,
    store: VectorStore,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, store: VectorStore, config: &RagConfig) -> Self {
        Self {
            embedder,
            store,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Index `document`, replacing any chunks from a previous run
    ///
    /// Embeddings are computed and checked against the store dimension
    /// before anything is deleted, so a failing or mismatched embedder
    /// leaves the old chunks searchable.
    pub async fn index(&self, document: &PolicyDocument) -> Result<IndexReport> {
        let pieces = chunk_text(&document.content, self.chunk_size, self.chunk_overlap);
        if pieces.is_empty() {
            return Err(IndexError::EmptyDocument(document.id.clone()));
        }

        let embeddings = self.embedder.embed_batch(&pieces).await?;
        if embeddings.len() != pieces.len() {
            return Err(IndexError::EmbeddingCount {
                expected: pieces.len(),
                actual: embeddings.len(),
            });
        }
        let dimension = self.store.dimension();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(VectorStoreError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            }
            .into());
        }

        let now = Utc::now();
        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (content, embedding))| {
                let mut metadata = BTreeMap::new();
                metadata.insert("title".to_string(), document.title.clone());
                metadata.insert("chunk_index".to_string(), index.to_string());
                metadata.insert("content_hash".to_string(), content_hash(&content));
                DocumentChunk {
                    id: format!("{}#{:04}", document.id, index),
                    document_id: document.id.clone(),
                    content,
                    embedding,
                    category: document.category.clone(),
                    metadata,
                    created_at: now,
                }
            })
            .collect();

        let replaced = self.store.delete_document(&document.id).await?;
        let count = chunks.len();
        self.store.insert_batch(chunks).await?;

        info!(
            document_id = %document.id,
            category = %document.category,
            chunks = count,
            replaced,
            "Indexed policy document"
        );

        Ok(IndexReport {
            document_id: document.id.clone(),
            chunks: count,
            replaced,
        })
    }

    /// Index several documents, stopping at the first failure
    pub async fn index_all(&self, documents: &[PolicyDocument]) -> Result<Vec<IndexReport>> {
        let mut reports = Vec::with_capacity(documents.len());
        for document in documents {
            reports.push(self.index(document).await?);
        }
        Ok(reports)
    }

    /// Remove a document and all of its chunks
    pub async fn remove(&self, document_id: &str) -> Result<usize> {
        let removed = self.store.delete_document(document_id).await?;
        debug!(document_id, removed, "Removed policy document");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::HashingEmbedder;
    use async_trait::async_trait;

    const DIM: usize = 64;

    fn indexer(chunk_size: usize, overlap: usize) -> DocumentIndexer {
        let config = RagConfig {
            chunk_size,
            chunk_overlap: overlap,
            ..RagConfig::default()
        };
        DocumentIndexer::new(Arc::new(HashingEmbedder::new(DIM)), VectorStore::in_memory(DIM), &config)
    }

    fn doc(id: &str, content: &str) -> PolicyDocument {
        PolicyDocument {
            id: id.to_string(),
            title: format!("{} policy", id),
            category: "travel".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_chunk_text_overlaps_and_prefers_whitespace() {
        let chunks = chunk_text("alpha beta gamma delta epsilon", 12, 4);
        assert_eq!(chunks[0], "alpha beta");
        assert!(chunks.len() >= 3);
        assert!(chunks.last().unwrap().ends_with("epsilon"));
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 12);
        }
    }

    #[test]
    fn test_chunk_text_handles_cjk_and_degenerate_sizes() {
        let chunks = chunk_text("差旅住宿标准每晚不超过五百元", 5, 1);
        assert_eq!(chunks[0], "差旅住宿标");
        assert_eq!(chunks[1].chars().next(), Some('标'));

        assert_eq!(chunk_text("abc", 0, 5), vec!["a", "b", "c"]);
        assert!(chunk_text("   ", 10, 2).is_empty());
    }

    #[tokio::test]
    async fn test_index_writes_chunks_with_metadata() {
        let indexer = indexer(40, 5);
        let report = indexer
            .index(&doc("hotel", "Hotel stays are capped at 500 per night. Receipts are required for every stay."))
            .await
            .unwrap();

        assert_eq!(report.replaced, 0);
        assert!(report.chunks >= 2);
        assert_eq!(indexer.store().count().await.unwrap(), report.chunks);

        let first = indexer.store().get("hotel#0000").await.unwrap().unwrap();
        assert_eq!(first.metadata["title"], "hotel policy");
        assert_eq!(first.metadata["chunk_index"], "0");
        assert_eq!(first.metadata["content_hash"], content_hash(&first.content));
        assert_eq!(first.embedding.len(), DIM);
    }

    #[tokio::test]
    async fn test_reindex_replaces_and_remove_cascades() {
        let indexer = indexer(20, 0);
        let long = doc("meal", "Meals are reimbursed up to 100 per person per day.");
        let first = indexer.index(&long).await.unwrap();
        indexer.index(&doc("other", "Unrelated office supplies.")).await.unwrap();

        let second = indexer.index(&doc("meal", "Meals up to 80.")).await.unwrap();
        assert_eq!(second.replaced, first.chunks);
        assert_eq!(second.chunks, 1);

        assert_eq!(indexer.remove("meal").await.unwrap(), 1);
        assert!(indexer.store().get("meal#0000").await.unwrap().is_none());
        assert!(indexer.store().get("other#0000").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let err = indexer(100, 10).index(&doc("blank", " \n ")).await.unwrap_err();
        assert!(matches!(err, IndexError::EmptyDocument(id) if id == "blank"));
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model(&self) -> &str {
            "failing"
        }

        async fn embed_batch(&self, _texts: &[String]) -> crate::rag::Result<Vec<Vec<f32>>> {
            Err(RagError::Retrieval("embedding endpoint down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_embedding_keeps_previous_chunks() {
        let store = VectorStore::in_memory(DIM);
        let config = RagConfig::default();
        let good = DocumentIndexer::new(Arc::new(HashingEmbedder::new(DIM)), store.clone(), &config);
        good.index(&doc("hotel", "Hotels capped at 500.")).await.unwrap();

        let bad = DocumentIndexer::new(Arc::new(FailingEmbedder), store.clone(), &config);
        let err = bad.index(&doc("hotel", "Hotels capped at 600.")).await.unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_keeps_previous_chunks() {
        let store = VectorStore::in_memory(16);
        let config = RagConfig::default();
        let good = DocumentIndexer::new(Arc::new(HashingEmbedder::new(16)), store.clone(), &config);
        good.index(&doc("hotel", "Hotels capped at 500.")).await.unwrap();

        let narrow = DocumentIndexer::new(Arc::new(HashingEmbedder::new(8)), store.clone(), &config);
        let err = narrow.index(&doc("hotel", "Hotels capped at 600.")).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::Store(VectorStoreError::DimensionMismatch { expected: 16, actual: 8 })
        ));

        assert_eq!(store.count().await.unwrap(), 1);
        let kept = store.get("hotel#0000").await.unwrap().unwrap();
        assert_eq!(kept.content, "Hotels capped at 500.");
        assert_eq!(kept.embedding.len(), 16);
    }
}
