//! Application wiring shared by the CLI and the HTTP server.
//!
//! [`QaService::build`] turns a [`Config`] into a ready pipeline: embedding
//! provider, vector index (SQLite with in-memory fallback), chunker,
//! indexer, scope classifier, answer synthesizer, and query workflow. It
//! also tracks the outcome of the most recent indexing pass so status
//! endpoints can report it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use repo_qa_core::chunk::Chunker;
use repo_qa_core::models::{FileSet, IndexStats};
use repo_qa_core::PipelineResult;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::indexer::RepositoryIndexer;
use crate::llm::{create_scope_classifier, create_synthesizer};
use crate::repository::acquire_repository;
use crate::vector_index::VectorIndex;
use crate::workflow::QueryWorkflow;

/// Outcome of the most recent indexing pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStatus {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: Option<IndexStats>,
    pub error: Option<String>,
}

/// What a request to index resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStart {
    Started,
    AlreadyIndexed,
}

#[derive(Clone)]
pub struct QaService {
    pub config: Arc<Config>,
    pub indexer: Arc<RepositoryIndexer>,
    pub workflow: Arc<QueryWorkflow>,
    status: Arc<Mutex<IndexStatus>>,
}

impl QaService {
    pub async fn build(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = VectorIndex::open(&config.db.path, embedder).await;
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)
            .context("invalid chunking settings")?;
        let indexer = Arc::new(RepositoryIndexer::new(Arc::new(index), chunker));

        let workflow = QueryWorkflow::new(
            Arc::clone(&indexer),
            create_scope_classifier(&config)?,
            create_synthesizer(&config)?,
        )
        .with_top_k(config.retrieval.top_k)
        .with_timeout(config.retrieval.query_timeout_secs.map(Duration::from_secs));

        Ok(Self::from_parts(config, indexer, Arc::new(workflow)))
    }

    /// Assemble a service from already-built components.
    pub fn from_parts(
        config: Config,
        indexer: Arc<RepositoryIndexer>,
        workflow: Arc<QueryWorkflow>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            indexer,
            workflow,
            status: Arc::new(Mutex::new(IndexStatus::default())),
        }
    }

    pub fn index_status(&self) -> IndexStatus {
        match self.status.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_status(&self, f: impl FnOnce(&mut IndexStatus)) {
        match self.status.lock() {
            Ok(mut s) => f(&mut s),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// True once an indexing pass has completed or stored chunks exist.
    pub fn is_indexed(&self) -> bool {
        let stats = self.indexer.stats();
        stats.chunk_count > 0 || stats.last_indexed.is_some()
    }

    /// Fetch the repository and index it, waiting for the pass to finish.
    pub async fn index_now(&self, force: bool) -> Result<IndexStats> {
        let permit = self.indexer.begin()?;
        self.update_status(|s| {
            s.started_at = Some(Utc::now());
            s.error = None;
        });
        let files = match self.fetch_files().await {
            Ok(files) => files,
            Err(e) => {
                self.update_status(|s| {
                    s.finished_at = Some(Utc::now());
                    s.error = Some(format!("{e:#}"));
                });
                return Err(e);
            }
        };
        let stats = self.indexer.run(permit, &files, force).await;
        self.update_status(|s| {
            s.finished_at = Some(Utc::now());
            s.stats = Some(stats.clone());
        });
        Ok(stats)
    }

    /// Claim the indexing slot and run the pass on a background task.
    ///
    /// Without `force`, an already populated corpus is left alone.
    pub fn start_indexing(&self, force: bool) -> PipelineResult<IndexStart> {
        let permit = self.indexer.begin()?;
        if !force && self.indexer.stats().chunk_count > 0 {
            return Ok(IndexStart::AlreadyIndexed);
        }

        self.update_status(|s| {
            s.started_at = Some(Utc::now());
            s.finished_at = None;
            s.error = None;
        });

        let service = self.clone();
        tokio::spawn(async move {
            match service.fetch_files().await {
                Ok(files) => {
                    let stats = service.indexer.run(permit, &files, force).await;
                    service.update_status(|s| {
                        s.finished_at = Some(Utc::now());
                        s.stats = Some(stats);
                    });
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %format!("{e:#}"), "background indexing failed");
                    service.update_status(|s| {
                        s.finished_at = Some(Utc::now());
                        s.error = Some(format!("{e:#}"));
                    });
                }
            }
        });
        info!(force, "background indexing scheduled");
        Ok(IndexStart::Started)
    }

    async fn fetch_files(&self) -> Result<FileSet> {
        let repo = self.config.repository.clone();
        tokio::task::spawn_blocking(move || acquire_repository(&repo))
            .await
            .map_err(|e| anyhow::anyhow!("repository task failed: {e}"))?
    }
}
