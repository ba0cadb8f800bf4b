//! Repository indexer: chunk, embed, and store a whole file set.
//!
//! One pass walks the [`FileSet`] in path order. For each file it splits the
//! content with the [`Chunker`], embeds the chunks, and upserts them into
//! the [`VectorIndex`]. A file that fails is logged and skipped; the pass
//! always completes and the shortfall shows up as `processed_files <
//! total_files` in the returned [`IndexStats`].
//!
//! Only one pass may run at a time. The guard is an atomic flag owned by
//! the indexer and held through an [`IndexingPermit`], so callers that
//! schedule work in the background can claim the slot up front and report
//! "already running" synchronously.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use repo_qa_core::chunk::Chunker;
use repo_qa_core::models::{
    ChunkMetadata, CorpusStats, FileSet, IndexStats, MetadataFilter, ScoredChunk, SourceDocument,
};
use repo_qa_core::{PipelineError, PipelineResult};

use crate::vector_index::VectorIndex;

const PROGRESS_EVERY: usize = 10;

/// Exclusive right to run one indexing pass. Released on drop.
#[derive(Debug)]
pub struct IndexingPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for IndexingPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct RepositoryIndexer {
    index: Arc<VectorIndex>,
    chunker: Chunker,
    in_progress: Arc<AtomicBool>,
}

impl RepositoryIndexer {
    pub fn new(index: Arc<VectorIndex>, chunker: Chunker) -> Self {
        Self {
            index,
            chunker,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn index_handle(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn is_indexing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Claim the indexing slot.
    ///
    /// Fails with [`PipelineError::IndexingInProgress`] while another
    /// permit is alive.
    pub fn begin(&self) -> PipelineResult<IndexingPermit> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PipelineError::IndexingInProgress)?;
        Ok(IndexingPermit {
            flag: Arc::clone(&self.in_progress),
        })
    }

    /// Index `files`, adding to whatever the corpus already holds.
    pub async fn index(&self, files: &FileSet) -> PipelineResult<IndexStats> {
        let permit = self.begin()?;
        Ok(self.run(permit, files, false).await)
    }

    /// Purge the corpus, then index `files`, under one permit.
    pub async fn rebuild(&self, files: &FileSet) -> PipelineResult<IndexStats> {
        let permit = self.begin()?;
        Ok(self.run(permit, files, true).await)
    }

    /// Run a pass with a permit obtained from [`begin`](Self::begin).
    pub async fn run(&self, permit: IndexingPermit, files: &FileSet, purge_first: bool) -> IndexStats {
        let started = Instant::now();
        let total_files = files.len();

        if purge_first {
            match self.index.purge(None).await {
                Ok(removed) => info!(removed, "purged corpus before re-index"),
                Err(e) => warn!(error = %e, "purge failed, re-index will add duplicates"),
            }
        }

        info!(total_files, "indexing started");
        let mut processed_files = 0usize;
        let mut total_chunks = 0usize;

        for (i, doc) in files.iter().enumerate() {
            match self.index_file(doc).await {
                Ok(n) => {
                    processed_files += 1;
                    total_chunks += n;
                }
                Err(e) => {
                    let failure = PipelineError::PartialIndex {
                        path: doc.path.clone(),
                        reason: e.to_string(),
                    };
                    warn!(path = %doc.path, error = %failure, "skipping file");
                }
            }
            if (i + 1) % PROGRESS_EVERY == 0 {
                info!(done = i + 1, total_files, total_chunks, "indexing progress");
            }
        }

        if let Err(e) = self.index.mark_indexed(Utc::now()).await {
            warn!(error = %e, "failed to record last-indexed time");
        }
        drop(permit);

        let stats = IndexStats::new(total_files, processed_files, total_chunks, started.elapsed());
        info!(
            total_files,
            processed_files,
            total_chunks,
            duration_secs = stats.duration_seconds,
            "indexing finished"
        );
        stats
    }

    async fn index_file(&self, doc: &SourceDocument) -> PipelineResult<usize> {
        if doc.content.contains('\0') {
            return Err(PipelineError::InvalidDocument {
                path: doc.path.clone(),
                reason: "content contains NUL bytes".to_string(),
            });
        }

        let chunks = self
            .chunker
            .split(&doc.content, &ChunkMetadata::for_document(doc));
        if chunks.is_empty() {
            return Ok(0);
        }
        let entries = self.index.embed_chunks(chunks).await?;

        match self.index.upsert(&entries).await {
            Ok(()) => {}
            Err(PipelineError::Storage(reason)) => {
                warn!(path = %doc.path, %reason, "retrying file on fallback store");
                self.index.upsert(&entries).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(entries.len())
    }

    /// Read path for the query workflow and the API layer.
    pub async fn search(&self, query: &str, k: usize, filter: &MetadataFilter) -> Vec<ScoredChunk> {
        self.index.search(query, k, filter).await
    }

    pub fn stats(&self) -> CorpusStats {
        self.index.stats()
    }
}
