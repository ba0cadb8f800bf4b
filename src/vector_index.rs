//! Vector index: embedding plus storage, with graceful degradation.
//!
//! [`VectorIndex`] owns the corpus. It embeds text through the configured
//! [`EmbeddingProvider`] and keeps chunks in a [`VectorStore`], normally
//! the SQLite store. Failure policy:
//!
//! | Operation | On failure |
//! |-----------|------------|
//! | [`open`](VectorIndex::open) | use the in-memory store |
//! | [`upsert`](VectorIndex::upsert) | return `Storage`, switch to the in-memory store |
//! | [`search`](VectorIndex::search) | log, return no hits |
//! | [`stats`](VectorIndex::stats) | return zeroed stats carrying the error |
//!
//! Aggregate counts are cached and refreshed after every write, so
//! [`stats`](VectorIndex::stats) never touches storage.
//!
//! The vector length is fixed by the first stored chunk. An index whose
//! stored vectors do not match the embedder reports the mismatch in its
//! stats, rejects writes and returns no hits until it is purged.

use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use repo_qa_core::embedding::EmbeddingProvider;
use repo_qa_core::models::{Chunk, CorpusStats, MetadataFilter, ScoredChunk};
use repo_qa_core::store::memory::InMemoryStore;
use repo_qa_core::store::{IndexedChunk, VectorStore};
use repo_qa_core::{PipelineError, PipelineResult};

use crate::sqlite_store::SqliteStore;

pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    store: RwLock<Arc<dyn VectorStore>>,
    stats: RwLock<CorpusStats>,
}

impl VectorIndex {
    /// Open the persistent index at `db_path`, or fall back to memory.
    pub async fn open(db_path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let store: Arc<dyn VectorStore> = match SqliteStore::open(db_path).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(
                    path = %db_path.display(),
                    error = %e,
                    "vector store unavailable, using in-memory index"
                );
                Arc::new(InMemoryStore::new())
            }
        };
        Self::with_store(store, embedder).await
    }

    /// Wrap an already-open store.
    pub async fn with_store(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let index = Self {
            embedder,
            store: RwLock::new(store),
            stats: RwLock::new(CorpusStats::default()),
        };
        index.refresh_stats().await;
        index
    }

    /// A non-persistent index, for tests and one-shot runs.
    pub async fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), embedder).await
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    fn current_store(&self) -> Arc<dyn VectorStore> {
        self.store
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_persistent(&self) -> bool {
        self.current_store().is_persistent()
    }

    fn fall_back_to_memory(&self) {
        let mut store = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if store.is_persistent() {
            warn!("switching vector index to in-memory store for the rest of this process");
            *store = Arc::new(InMemoryStore::new());
        }
    }

    /// Embed chunks, pairing each with its vector.
    pub async fn embed_chunks(&self, chunks: Vec<Chunk>) -> PipelineResult<Vec<IndexedChunk>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| PipelineError::Embedding(e.to_string()))?;
        if vectors.len() != chunks.len() {
            return Err(PipelineError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect())
    }

    /// Append entries. Existing chunks of the same document are kept.
    ///
    /// A failing persistent store is replaced by an in-memory one before
    /// the error is returned, so a retry lands on the fallback.
    pub async fn upsert(&self, entries: &[IndexedChunk]) -> PipelineResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let expected = self
            .stats()
            .vector_dims
            .unwrap_or_else(|| self.embedder.dims());
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
            return Err(PipelineError::Embedding(format!(
                "vector for {} has {} dimensions, index holds {}",
                bad.chunk.metadata.source,
                bad.vector.len(),
                expected
            )));
        }
        let store = self.current_store();
        if let Err(e) = store.insert(entries).await {
            error!(error = %e, "vector store write failed");
            self.fall_back_to_memory();
            self.refresh_stats().await;
            return Err(PipelineError::Storage(e.to_string()));
        }
        self.refresh_stats().await;
        Ok(())
    }

    /// The `k` chunks nearest to `query` that match `filter`.
    ///
    /// Never fails: an embedding or storage error yields no hits.
    pub async fn search(&self, query: &str, k: usize, filter: &MetadataFilter) -> Vec<ScoredChunk> {
        match self.try_search(query, k, filter).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "search degraded to empty result");
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> PipelineResult<Vec<ScoredChunk>> {
        let stats = self.stats();
        // Zeroed counts only mean empty when they were read successfully.
        if k == 0 || (stats.chunk_count == 0 && stats.error.is_none()) {
            return Ok(Vec::new());
        }
        if let Some(stored) = stats.vector_dims {
            if stored != self.embedder.dims() {
                return Err(PipelineError::Retrieval(self.dims_mismatch(stored)));
            }
        }
        let vector = self
            .embedder
            .embed_one(query)
            .await
            .map_err(|e| PipelineError::Embedding(e.to_string()))?;
        let hits = self
            .current_store()
            .nearest(&vector, k, filter)
            .await
            .map_err(|e| PipelineError::Retrieval(e.to_string()))?;
        debug!(k, results = hits.len(), "search complete");
        Ok(hits)
    }

    /// Delete one document's chunks, or the whole corpus.
    pub async fn purge(&self, source: Option<&str>) -> PipelineResult<u64> {
        let removed = self
            .current_store()
            .purge(source)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        self.refresh_stats().await;
        Ok(removed)
    }

    /// Stamp the corpus as built at `at`.
    pub async fn mark_indexed(&self, at: DateTime<Utc>) -> PipelineResult<()> {
        self.current_store()
            .set_last_indexed(at)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        self.refresh_stats().await;
        Ok(())
    }

    /// Cached aggregate counts.
    pub fn stats(&self) -> CorpusStats {
        match self.stats.read() {
            Ok(stats) => stats.clone(),
            Err(_) => CorpusStats::unavailable("stats cache lock poisoned"),
        }
    }

    fn dims_mismatch(&self, stored: usize) -> String {
        format!(
            "index holds {stored}-dimensional vectors but {} produces {}; rebuild with a forced re-index",
            self.embedder.model_name(),
            self.embedder.dims()
        )
    }

    /// Re-read counts from the store into the cache.
    pub async fn refresh_stats(&self) {
        let store = self.current_store();
        let fresh = match store.counts().await {
            Ok(counts) => {
                let error = counts
                    .vector_dims
                    .filter(|&stored| stored != self.embedder.dims())
                    .map(|stored| self.dims_mismatch(stored));
                if let Some(message) = &error {
                    error!(%message, "vector dimension mismatch");
                }
                CorpusStats {
                    document_count: counts.document_count,
                    chunk_count: counts.chunk_count,
                    last_indexed: counts.last_indexed,
                    persistent: store.is_persistent(),
                    location: store.location(),
                    vector_dims: counts.vector_dims,
                    error,
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read corpus counts");
                CorpusStats {
                    persistent: store.is_persistent(),
                    location: store.location(),
                    ..CorpusStats::unavailable(e.to_string())
                }
            }
        };
        *self
            .stats
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
    }
}
