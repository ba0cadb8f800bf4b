//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the persistence seam under the vector
//! index: the app crate provides a SQLite implementation and this crate
//! provides [`memory::InMemoryStore`], which also serves as the fallback
//! when persistence is unavailable.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert`](VectorStore::insert) | Append chunks with their vectors |
//! | [`nearest`](VectorStore::nearest) | Top-k cosine search with a metadata filter |
//! | [`counts`](VectorStore::counts) | Document/chunk counts and last-indexed time |
//! | [`purge`](VectorStore::purge) | Delete one document's chunks, or everything |
//! | [`set_last_indexed`](VectorStore::set_last_indexed) | Stamp a completed pass |
//!
//! Implementations never deduplicate: inserting the same document twice
//! stores its chunks twice.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, MetadataFilter, ScoredChunk};

/// A chunk paired with its embedding, as written to a store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Aggregate counts read from a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StoreCounts {
    pub document_count: usize,
    pub chunk_count: usize,
    pub last_indexed: Option<DateTime<Utc>>,
    /// Length of the stored vectors, `None` while the store is empty.
    pub vector_dims: Option<usize>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// False for stores whose contents vanish with the process.
    fn is_persistent(&self) -> bool;

    /// Human-readable storage location, if any.
    fn location(&self) -> Option<String> {
        None
    }

    /// Append entries. Insertion order is preserved for tie-breaking.
    async fn insert(&self, entries: &[IndexedChunk]) -> Result<()>;

    /// The `k` entries most similar to `query` that match `filter`,
    /// best first; equal scores keep insertion order.
    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>>;

    async fn counts(&self) -> Result<StoreCounts>;

    /// Delete the chunks of `source`, or all chunks when `None`.
    /// Returns the number of chunks removed.
    async fn purge(&self, source: Option<&str>) -> Result<u64>;

    async fn set_last_indexed(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Score candidates given in insertion order and keep the best `k`.
///
/// Candidates whose vector length differs from `query` are skipped. The
/// sort is stable, so candidates with equal scores stay in the order they
/// were supplied.
pub fn rank<I>(query: &[f32], candidates: I, k: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = (Chunk, Vec<f32>)>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .filter(|(_, vector)| vector.len() == query.len())
        .map(|(chunk, vector)| ScoredChunk {
            score: cosine_similarity(query, &vector),
            chunk,
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.into(),
            text: id.into(),
            index: 0,
            start: 0,
            hash: String::new(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn rank_orders_by_score_then_insertion() {
        let q = vec![1.0, 0.0];
        let hits = rank(
            &q,
            vec![
                (chunk("far"), vec![0.0, 1.0]),
                (chunk("tie-a"), vec![1.0, 1.0]),
                (chunk("near"), vec![1.0, 0.0]),
                (chunk("tie-b"), vec![1.0, 1.0]),
            ],
            3,
        );
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "tie-a", "tie-b"]);
    }

    #[test]
    fn rank_skips_vectors_of_another_length() {
        let hits = rank(
            &[1.0, 0.0],
            vec![
                (chunk("short"), vec![1.0]),
                (chunk("match"), vec![0.0, 1.0]),
                (chunk("long"), vec![1.0, 0.0, 0.0]),
            ],
            5,
        );
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["match"]);
    }

    #[test]
    fn rank_with_zero_k_is_empty() {
        assert!(rank(&[1.0], vec![(chunk("a"), vec![1.0])], 0).is_empty());
    }
}
