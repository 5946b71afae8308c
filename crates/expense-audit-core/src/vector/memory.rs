//! In-process vector backend

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::ivf::IvfIndex;
use super::{
    cosine_similarity, DocumentChunk, Result, VectorBackend, VectorSearchResult,
    KEYWORD_MATCH_SCORE,
};

#[derive(Default)]
struct State {
    /// Insertion order breaks score ties
    chunks: Vec<DocumentChunk>,
    index: Option<IvfIndex>,
    /// Set by any mutation after an index build
    stale: bool,
}

/// Chunks held in memory with exact or IVF-accelerated cosine search
#[derive(Default)]
pub struct InMemoryVectorBackend {
    state: RwLock<State>,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an up-to-date approximate index is in use
    pub async fn index_ready(&self) -> bool {
        let state = self.state.read().await;
        state.index.is_some() && !state.stale
    }
}

fn rank(
    chunks: &[DocumentChunk],
    positions: impl Iterator<Item = usize>,
    query: &[f32],
    top_k: usize,
) -> Vec<VectorSearchResult> {
    let mut scored: Vec<(usize, f64)> = positions
        .map(|i| (i, cosine_similarity(query, &chunks[i].embedding)))
        .collect();
    // Stable, so equal scores stay in insertion order
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(top_k)
        .map(|(i, score)| VectorSearchResult::from_chunk(&chunks[i], score))
        .collect()
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut state = self.state.write().await;
        for chunk in chunks {
            match state.chunks.iter().position(|c| c.id == chunk.id) {
                Some(i) => state.chunks[i] = chunk.clone(),
                None => state.chunks.push(chunk.clone()),
            }
        }
        state.stale = true;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        state.chunks.retain(|c| c.document_id != document_id);
        let removed = before - state.chunks.len();
        if removed > 0 {
            state.stale = true;
        }
        Ok(removed)
    }

    async fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        category: Option<&str>,
    ) -> Result<Vec<VectorSearchResult>> {
        let state = self.state.read().await;
        let chunks = &state.chunks;

        if let Some(category) = category {
            let positions = (0..chunks.len()).filter(|&i| chunks[i].category == category);
            return Ok(rank(chunks, positions, query, top_k));
        }

        if let (Some(index), false) = (&state.index, state.stale) {
            let candidates = index.candidates(query);
            if candidates.len() >= top_k {
                return Ok(rank(chunks, candidates.into_iter(), query, top_k));
            }
            debug!(candidates = candidates.len(), top_k, "Index probe too small, scanning");
        }

        Ok(rank(chunks, 0..chunks.len(), query, top_k))
    }

    async fn keyword(&self, keywords: &[String], top_k: usize) -> Result<Vec<VectorSearchResult>> {
        let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let state = self.state.read().await;
        Ok(state
            .chunks
            .iter()
            .filter(|c| {
                let content = c.content.to_lowercase();
                needles.iter().any(|n| content.contains(n.as_str()))
            })
            .take(top_k)
            .map(|c| VectorSearchResult::from_chunk(c, KEYWORD_MATCH_SCORE))
            .collect())
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<DocumentChunk>> {
        Ok(self
            .state
            .read()
            .await
            .chunks
            .iter()
            .find(|c| c.id == chunk_id)
            .cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().await.chunks.len())
    }

    async fn build_index(&self, lists: usize, probes: usize) -> Result<usize> {
        let mut state = self.state.write().await;
        if state.chunks.is_empty() {
            state.index = None;
            state.stale = false;
            return Ok(0);
        }
        let index = {
            let vectors: Vec<&[f32]> = state.chunks.iter().map(|c| c.embedding.as_slice()).collect();
            IvfIndex::build(&vectors, lists, probes)
        };
        let built = index.lists();
        state.index = Some(index);
        state.stale = false;
        debug!(lists = built, probes, chunks = state.chunks.len(), "Built IVF index");
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn chunk(id: &str, doc: &str, category: &str, embedding: Vec<f32>, content: &str) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            content: content.to_string(),
            embedding,
            category: category.to_string(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    async fn seeded() -> InMemoryVectorBackend {
        let backend = InMemoryVectorBackend::new();
        backend
            .upsert(&[
                chunk("a", "d1", "travel", vec![1.0, 0.0, 0.0], "Hotel nights are capped"),
                chunk("b", "d1", "travel", vec![0.7, 0.7, 0.0], "Flights must be economy"),
                chunk("c", "d2", "meal", vec![0.0, 1.0, 0.0], "Meals need receipts"),
            ])
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_search_returns_all_when_fewer_than_k() {
        let backend = seeded().await;
        let hits = backend.nearest(&[1.0, 0.1, 0.0], 5, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let backend = InMemoryVectorBackend::new();
        backend
            .upsert(&[
                chunk("x", "d", "c", vec![1.0, 0.0], "one"),
                chunk("y", "d", "c", vec![1.0, 0.0], "two"),
            ])
            .await
            .unwrap();
        let hits = backend.nearest(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].chunk_id, "x");
        assert_eq!(hits[1].chunk_id, "y");
    }

    #[tokio::test]
    async fn test_category_filter_applies_before_ranking() {
        let backend = seeded().await;
        let hits = backend.nearest(&[1.0, 0.0, 0.0], 5, Some("meal")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c");
    }

    #[tokio::test]
    async fn test_keyword_search_is_case_insensitive() {
        let backend = seeded().await;
        let hits = backend.keyword(&["HOTEL".to_string(), "receipts".to_string()], 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(hits.iter().all(|h| h.score == KEYWORD_MATCH_SCORE));
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_cascades() {
        let backend = seeded().await;
        backend
            .upsert(&[chunk("a", "d1", "travel", vec![0.0, 0.0, 1.0], "Hotel nights revised")])
            .await
            .unwrap();
        assert_eq!(backend.count().await.unwrap(), 3);
        assert_eq!(backend.get("a").await.unwrap().unwrap().content, "Hotel nights revised");

        assert_eq!(backend.delete_document("d1").await.unwrap(), 2);
        assert_eq!(backend.count().await.unwrap(), 1);
        assert!(backend.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_index_goes_stale_on_mutation() {
        let backend = seeded().await;
        assert_eq!(backend.build_index(2, 1).await.unwrap(), 2);
        assert!(backend.index_ready().await);

        let hits = backend.nearest(&[1.0, 0.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits[0].chunk_id, "a");

        backend
            .upsert(&[chunk("d", "d3", "office", vec![0.0, 0.0, 1.0], "Stationery")])
            .await
            .unwrap();
        assert!(!backend.index_ready().await);

        let hits = backend.nearest(&[0.0, 0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].chunk_id, "d");
    }
}
