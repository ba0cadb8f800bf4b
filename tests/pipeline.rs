//! End-to-end tests of the indexing and query pipeline, using the offline
//! capability stubs and test doubles for failing providers and stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::TempDir;

use repo_qa::chunk::Chunker;
use repo_qa::embedding::HashEmbedder;
use repo_qa::indexer::RepositoryIndexer;
use repo_qa::llm::{KeywordScopeClassifier, TemplateSynthesizer};
use repo_qa::models::{FileSet, MetadataFilter, ScoredChunk, SourceDocument};
use repo_qa::timing::{ANSWER_GENERATION, CONTEXT_RETRIEVAL, OUT_OF_SCOPE_HANDLING, SCOPE_CHECK, TOTAL};
use repo_qa::vector_index::VectorIndex;
use repo_qa::workflow::{Outcome, QueryWorkflow};
use repo_qa::PipelineError;
use repo_qa_core::embedding::EmbeddingProvider;
use repo_qa_core::store::memory::InMemoryStore;
use repo_qa_core::store::{IndexedChunk, StoreCounts, VectorStore};

const SQL_SENTENCE: &str = "SELECT statements are generated from natural language.";
const README_URL: &str = "https://github.com/acme/widget/blob/main/README.md";

/// Hash embedder that can be switched into a failing state.
struct FlakyEmbedder {
    inner: HashEmbedder,
    failing: AtomicBool,
}

impl FlakyEmbedder {
    fn new() -> Self {
        Self {
            inner: HashEmbedder::new(64),
            failing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("embedding service unavailable");
        }
        self.inner.embed(texts).await
    }
}

/// A "persistent" store whose writes always fail.
struct BrokenStore;

#[async_trait]
impl VectorStore for BrokenStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn insert(&self, _: &[IndexedChunk]) -> Result<()> {
        bail!("disk I/O error")
    }

    async fn nearest(&self, _: &[f32], _: usize, _: &MetadataFilter) -> Result<Vec<ScoredChunk>> {
        bail!("disk I/O error")
    }

    async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts::default())
    }

    async fn purge(&self, _: Option<&str>) -> Result<u64> {
        Ok(0)
    }

    async fn set_last_indexed(&self, _: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

fn readme() -> SourceDocument {
    SourceDocument::new("README.md", SQL_SENTENCE, README_URL)
}

fn files(docs: Vec<SourceDocument>) -> FileSet {
    docs.into_iter().collect()
}

async fn memory_indexer(embedder: Arc<dyn EmbeddingProvider>) -> Arc<RepositoryIndexer> {
    let index = VectorIndex::in_memory(embedder).await;
    Arc::new(RepositoryIndexer::new(
        Arc::new(index),
        Chunker::new(1000, 200).unwrap(),
    ))
}

fn workflow(indexer: Arc<RepositoryIndexer>) -> QueryWorkflow {
    QueryWorkflow::new(
        indexer,
        Arc::new(KeywordScopeClassifier::new()),
        Arc::new(TemplateSynthesizer::new("widget")),
    )
}

#[tokio::test]
async fn in_scope_question_is_answered_from_indexed_file() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(128))).await;
    indexer.index(&files(vec![readme()])).await.unwrap();

    let result = workflow(indexer).run_query("How does it generate SQL?", &[]).await;

    assert_eq!(result.outcome, Outcome::Answered);
    assert!(!result.is_out_of_scope);
    assert!(result.error.is_none());
    assert!(!result.context.is_empty());
    assert!(result.context[0].chunk.text.contains(SQL_SENTENCE));
    assert!(result.answer.contains(README_URL));
    for label in [SCOPE_CHECK, CONTEXT_RETRIEVAL, ANSWER_GENERATION, TOTAL] {
        assert!(result.processing_time.contains(label), "missing {label}");
    }
}

#[tokio::test]
async fn out_of_scope_question_skips_retrieval_and_synthesis() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(128))).await;
    indexer.index(&files(vec![readme()])).await.unwrap();

    let result = workflow(indexer)
        .run_query("What is the capital of France?", &[])
        .await;

    assert_eq!(result.outcome, Outcome::OutOfScope);
    assert!(result.is_out_of_scope);
    assert!(result.context.is_empty());
    assert!(result.processing_time.contains(OUT_OF_SCOPE_HANDLING));
    assert!(result.processing_time.contains(TOTAL));
    assert!(!result.processing_time.contains(CONTEXT_RETRIEVAL));
    assert!(!result.processing_time.contains(ANSWER_GENERATION));
}

#[tokio::test]
async fn embedding_failure_at_query_time_degrades_to_empty_context() {
    let embedder = Arc::new(FlakyEmbedder::new());
    let indexer = memory_indexer(embedder.clone()).await;
    indexer.index(&files(vec![readme()])).await.unwrap();
    embedder.failing.store(true, Ordering::SeqCst);

    let hits = indexer
        .search("How does it generate SQL?", 5, &MetadataFilter::new())
        .await;
    assert!(hits.is_empty());

    let result = workflow(indexer).run_query("How does it generate SQL?", &[]).await;
    assert_eq!(result.outcome, Outcome::Answered);
    assert!(result.context.is_empty());
    assert!(!result.answer.is_empty());
    assert!(result.error.is_none());
}

#[tokio::test]
async fn unreadable_file_is_skipped_and_counted() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(64))).await;
    let docs = (1..=10)
        .map(|i| {
            let content = if i == 5 {
                "\0\u{1}\u{2}binary".to_string()
            } else {
                format!("file number {i} describes part of the widget")
            };
            SourceDocument::new(format!("f{i:02}.md"), content, format!("u{i}"))
        })
        .collect();

    let stats = indexer.index(&files(docs)).await.unwrap();

    assert_eq!(stats.total_files, 10);
    assert_eq!(stats.processed_files, 9);
    assert_eq!(stats.failed_files(), 1);
    assert_eq!(stats.total_chunks, 9);
    assert!(!indexer.is_indexing());
}

#[tokio::test]
async fn search_is_repeatable_and_empty_index_returns_nothing() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(64))).await;
    let filter = MetadataFilter::new();
    assert!(indexer.search("anything", 5, &filter).await.is_empty());

    indexer
        .index(&files(vec![
            readme(),
            SourceDocument::new("docs/setup.md", "Install with cargo and run the server.", "u2"),
        ]))
        .await
        .unwrap();

    let first = indexer.search("how do I install it", 2, &filter).await;
    let second = indexer.search("how do I install it", 2, &filter).await;
    assert_eq!(first, second);
    assert!(first.len() <= 2);
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(indexer.search("anything", 0, &filter).await.is_empty());
}

#[tokio::test]
async fn metadata_filter_restricts_results() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(64))).await;
    indexer
        .index(&files(vec![
            readme(),
            SourceDocument::new("src/sql.rs", "fn generate_sql() -> String", "u2"),
        ]))
        .await
        .unwrap();

    let filter = MetadataFilter::new().eq("file_type", json!("rs"));
    let hits = indexer.search("generate sql", 5, &filter).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.metadata.source, "src/sql.rs");
}

#[tokio::test]
async fn indexing_twice_duplicates_unless_rebuilt() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(64))).await;
    let set = files(vec![readme()]);

    indexer.index(&set).await.unwrap();
    indexer.index(&set).await.unwrap();
    let stats = indexer.stats();
    assert_eq!(stats.chunk_count, 2);
    assert_eq!(stats.document_count, 1);

    indexer.rebuild(&set).await.unwrap();
    assert_eq!(indexer.stats().chunk_count, 1);
}

#[tokio::test]
async fn second_pass_is_rejected_while_one_holds_the_permit() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(64))).await;
    let permit = indexer.begin().unwrap();

    let err = indexer.index(&files(vec![readme()])).await.unwrap_err();
    assert!(matches!(err, PipelineError::IndexingInProgress));

    let stats = indexer.run(permit, &files(vec![readme()]), false).await;
    assert_eq!(stats.processed_files, 1);
    assert!(!indexer.is_indexing());
    assert!(indexer.begin().is_ok());
}

#[tokio::test]
async fn failing_store_falls_back_to_memory() {
    let index = VectorIndex::with_store(Arc::new(BrokenStore), Arc::new(HashEmbedder::new(64))).await;
    assert!(index.is_persistent());
    let indexer = RepositoryIndexer::new(Arc::new(index), Chunker::new(1000, 200).unwrap());

    let stats = indexer.index(&files(vec![readme()])).await.unwrap();

    assert_eq!(stats.processed_files, 1);
    assert!(!indexer.index_handle().is_persistent());
    let corpus = indexer.stats();
    assert!(!corpus.persistent);
    assert_eq!(corpus.chunk_count, 1);
    let hits = indexer
        .search("generate SQL", 5, &MetadataFilter::new())
        .await;
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn sqlite_corpus_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("data/rqa.sqlite");

    {
        let index = VectorIndex::open(&db, Arc::new(HashEmbedder::new(64))).await;
        assert!(index.is_persistent());
        let indexer = RepositoryIndexer::new(Arc::new(index), Chunker::new(1000, 200).unwrap());
        indexer.index(&files(vec![readme()])).await.unwrap();
    }

    let index = VectorIndex::open(&db, Arc::new(HashEmbedder::new(64))).await;
    let stats = index.stats();
    assert!(stats.persistent);
    assert_eq!(stats.chunk_count, 1);
    assert_eq!(stats.document_count, 1);
    assert!(stats.last_indexed.is_some());

    let hits = index
        .search("How does it generate SQL?", 3, &MetadataFilter::new())
        .await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.metadata.locator, README_URL);
}

#[tokio::test]
async fn malformed_history_is_recovered() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(64))).await;
    indexer.index(&files(vec![readme()])).await.unwrap();

    let history = vec![
        json!({"role": "user", "content": "What does this repo do?"}),
        json!({"question": "Is SQL supported?", "answer": "Yes."}),
        json!("a bare string turn"),
        json!(42),
        json!({"unrelated": true}),
    ];
    let result = workflow(indexer)
        .run_query("How does it generate SQL?", &history)
        .await;

    assert_eq!(result.outcome, Outcome::Answered);
    let contents: Vec<&str> = result
        .chat_history
        .iter()
        .map(|t| t.content.as_str())
        .collect();
    assert_eq!(
        contents,
        vec!["What does this repo do?", "Is SQL supported?", "Yes.", "a bare string turn"]
    );
}

#[tokio::test]
async fn query_result_serializes_with_stage_seconds() {
    let indexer = memory_indexer(Arc::new(HashEmbedder::new(64))).await;
    indexer.index(&files(vec![readme()])).await.unwrap();

    let result = workflow(indexer).run_query("How does it generate SQL?", &[]).await;
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["outcome"], "answered");
    assert_eq!(value["is_out_of_scope"], false);
    assert!(value["processing_time"]["total"].is_f64());
    assert!(value["context"].as_array().is_some_and(|c| !c.is_empty()));
}

#[tokio::test]
async fn in_memory_store_is_usable_directly_as_fallback() {
    let index = VectorIndex::with_store(
        Arc::new(InMemoryStore::new()),
        Arc::new(HashEmbedder::new(32)),
    )
    .await;
    assert!(!index.is_persistent());
    assert_eq!(index.stats().chunk_count, 0);
}
