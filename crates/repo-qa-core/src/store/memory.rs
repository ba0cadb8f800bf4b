//! In-memory [`VectorStore`] for tests and as the non-persistent fallback.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`; search is
//! brute-force cosine similarity over every stored vector.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{MetadataFilter, ScoredChunk};

use super::{rank, IndexedChunk, StoreCounts, VectorStore};

#[derive(Default)]
struct Inner {
    entries: Vec<IndexedChunk>,
    last_indexed: Option<DateTime<Utc>>,
}

/// Process-local vector store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn insert(&self, entries: &[IndexedChunk]) -> Result<()> {
        self.write()?.entries.extend_from_slice(entries);
        Ok(())
    }

    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let inner = self.read()?;
        let candidates = inner
            .entries
            .iter()
            .filter(|e| filter.matches(&e.chunk.metadata))
            .map(|e| (e.chunk.clone(), e.vector.clone()));
        Ok(rank(query, candidates, k))
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let inner = self.read()?;
        let sources: HashSet<&str> = inner
            .entries
            .iter()
            .map(|e| e.chunk.metadata.source.as_str())
            .collect();
        Ok(StoreCounts {
            document_count: sources.len(),
            chunk_count: inner.entries.len(),
            last_indexed: inner.last_indexed,
            vector_dims: inner.entries.first().map(|e| e.vector.len()),
        })
    }

    async fn purge(&self, source: Option<&str>) -> Result<u64> {
        let mut inner = self.write()?;
        let before = inner.entries.len();
        match source {
            Some(path) => inner.entries.retain(|e| e.chunk.metadata.source != path),
            None => inner.entries.clear(),
        }
        Ok((before - inner.entries.len()) as u64)
    }

    async fn set_last_indexed(&self, at: DateTime<Utc>) -> Result<()> {
        self.write()?.last_indexed = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata};

    fn entry(source: &str, text: &str, vector: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                id: format!("{source}:{text}"),
                text: text.into(),
                index: 0,
                start: 0,
                hash: String::new(),
                metadata: ChunkMetadata {
                    source: source.into(),
                    file_type: "md".into(),
                    ..ChunkMetadata::default()
                },
            },
            vector,
        }
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = InMemoryStore::new();
        let hits = store.nearest(&[1.0, 0.0], 5, &MetadataFilter::new()).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn counts_duplicates_and_purges() {
        let store = InMemoryStore::new();
        let batch = vec![entry("a.md", "x", vec![1.0, 0.0]), entry("b.md", "y", vec![0.0, 1.0])];
        store.insert(&batch).await.unwrap();
        store.insert(&batch).await.unwrap();
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.chunk_count, 4);
        assert_eq!(counts.document_count, 2);
        assert_eq!(counts.vector_dims, Some(2));

        assert_eq!(store.purge(Some("a.md")).await.unwrap(), 2);
        assert_eq!(store.counts().await.unwrap().document_count, 1);
        assert_eq!(store.purge(None).await.unwrap(), 2);
        assert_eq!(store.counts().await.unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn nearest_applies_filter() {
        let store = InMemoryStore::new();
        store
            .insert(&[entry("a.md", "x", vec![1.0, 0.0]), entry("b.rs", "y", vec![1.0, 0.1])])
            .await
            .unwrap();
        let filter = MetadataFilter::new().eq("source", "b.rs");
        let hits = store.nearest(&[1.0, 0.0], 5, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.metadata.source, "b.rs");
    }

    #[tokio::test]
    async fn last_indexed_roundtrip() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.set_last_indexed(now).await.unwrap();
        assert_eq!(store.counts().await.unwrap().last_indexed, Some(now));
        assert!(!store.is_persistent());
    }
}
