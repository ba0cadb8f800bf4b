//! Per-query workflow: scope check, then retrieval and synthesis or an
//! out-of-scope reply.
//!
//! ```text
//! START → SCOPE_CHECK ─ in scope ──→ RETRIEVE → SYNTHESIZE ─→ DONE
//!                     └ out of scope → OUT_OF_SCOPE_RESPOND ─┘
//!         any stage panics or misses the deadline → ERROR
//! ```
//!
//! Capability failures degrade instead of failing the query:
//!
//! | Stage | On error |
//! |-------|----------|
//! | scope check | treat as in scope |
//! | retrieval | continue with empty context |
//! | synthesis | apology that quotes the query |
//! | out-of-scope reply | canned decline |
//!
//! A panic or a missed deadline moves to `ERROR`, which still returns a
//! complete [`QueryResult`] with the timings gathered so far plus `total`.
//! Each run owns its result; the only shared state is the read path
//! into the vector index.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use repo_qa_core::history::{normalize_history, ChatTurn};
use repo_qa_core::models::{ContextPassage, MetadataFilter, ScoredChunk};
use repo_qa_core::timing::{
    StageTimings, ANSWER_GENERATION, CONTEXT_RETRIEVAL, OUT_OF_SCOPE_HANDLING, SCOPE_CHECK, TOTAL,
};
use repo_qa_core::PipelineError;

use crate::indexer::RepositoryIndexer;
use crate::llm::{
    out_of_scope_fallback, synthesis_apology, AnswerSynthesizer, ScopeClassifier,
    WORKFLOW_APOLOGY,
};

/// Terminal state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Answered,
    OutOfScope,
    Failed,
}

/// Everything one query produced. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub chat_history: Vec<ChatTurn>,
    pub context: Vec<ScoredChunk>,
    pub is_out_of_scope: bool,
    pub answer: String,
    pub processing_time: StageTimings,
    pub error: Option<String>,
    pub outcome: Outcome,
}

/// Why a stage did not produce a value at all.
enum StageFailure {
    Panicked(String),
    TimedOut,
}

impl StageFailure {
    fn describe(&self, stage: &str) -> String {
        match self {
            StageFailure::Panicked(msg) => format!("stage {stage} panicked: {msg}"),
            StageFailure::TimedOut => format!("stage {stage} exceeded the query deadline"),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one stage, timing it and containing panics and the deadline.
async fn run_stage<T, F>(
    deadline: Option<Instant>,
    fut: F,
) -> (Duration, Result<T, StageFailure>)
where
    F: Future<Output = T>,
{
    let started = Instant::now();
    let guarded = AssertUnwindSafe(fut).catch_unwind();
    let outcome = match deadline {
        Some(at) => match tokio::time::timeout_at(at, guarded).await {
            Ok(r) => r.map_err(|p| StageFailure::Panicked(panic_message(p))),
            Err(_) => Err(StageFailure::TimedOut),
        },
        None => guarded
            .await
            .map_err(|p| StageFailure::Panicked(panic_message(p))),
    };
    (started.elapsed(), outcome)
}

pub struct QueryWorkflow {
    indexer: Arc<RepositoryIndexer>,
    classifier: Arc<dyn ScopeClassifier>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    top_k: usize,
    timeout: Option<Duration>,
}

impl QueryWorkflow {
    pub fn new(
        indexer: Arc<RepositoryIndexer>,
        classifier: Arc<dyn ScopeClassifier>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
    ) -> Self {
        Self {
            indexer,
            classifier,
            synthesizer,
            top_k: 5,
            timeout: None,
        }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    /// Bound the whole run. A stage still running at the deadline fails the query.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn indexer(&self) -> &Arc<RepositoryIndexer> {
        &self.indexer
    }

    /// Entry point for loosely shaped history, as received over the API.
    pub async fn run_query(&self, query: &str, raw_history: &[Value]) -> QueryResult {
        self.run(query, normalize_history(raw_history)).await
    }

    pub async fn run(&self, query: &str, history: Vec<ChatTurn>) -> QueryResult {
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);

        // SCOPE_CHECK
        let (elapsed, outcome) = run_stage(deadline, self.classifier.classify(query)).await;
        let is_out_of_scope = match outcome {
            Ok(Ok(flag)) => flag,
            Ok(Err(e)) => {
                let err = PipelineError::Classification(e.to_string());
                warn!(error = %err, "assuming query is in scope");
                false
            }
            Err(f) => {
                let reason = f.describe(SCOPE_CHECK);
                return self.failed(query, history, StageTimings::new(), started, reason);
            }
        };
        let timings = StageTimings::new().record(SCOPE_CHECK, elapsed);

        if is_out_of_scope {
            // OUT_OF_SCOPE_RESPOND
            let (elapsed, outcome) =
                run_stage(deadline, self.synthesizer.answer_out_of_scope(query)).await;
            let answer = match outcome {
                Ok(Ok(answer)) => answer,
                Ok(Err(e)) => {
                    let err = PipelineError::Synthesis(e.to_string());
                    warn!(error = %err, "using canned out-of-scope reply");
                    out_of_scope_fallback(query)
                }
                Err(f) => {
                    let reason = f.describe(OUT_OF_SCOPE_HANDLING);
                    return self.failed(query, history, timings, started, reason);
                }
            };
            let timings = timings.record(OUT_OF_SCOPE_HANDLING, elapsed);
            return self.finish(query, history, Vec::new(), true, answer, timings, started);
        }

        // RETRIEVE
        let filter = MetadataFilter::new();
        let (elapsed, outcome) =
            run_stage(deadline, self.indexer.search(query, self.top_k, &filter)).await;
        let context = match outcome {
            Ok(hits) => hits,
            Err(f) => {
                let reason = f.describe(CONTEXT_RETRIEVAL);
                return self.failed(query, history, timings, started, reason);
            }
        };
        let timings = timings.record(CONTEXT_RETRIEVAL, elapsed);

        // SYNTHESIZE
        let passages: Vec<ContextPassage> = context.iter().map(ContextPassage::from).collect();
        let (elapsed, outcome) = run_stage(
            deadline,
            self.synthesizer.answer(query, &passages, &history),
        )
        .await;
        let answer = match outcome {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                let err = PipelineError::Synthesis(e.to_string());
                warn!(error = %err, "returning apology");
                synthesis_apology(query)
            }
            Err(f) => {
                let reason = f.describe(ANSWER_GENERATION);
                return self.failed(query, history, timings, started, reason);
            }
        };
        let timings = timings.record(ANSWER_GENERATION, elapsed);

        self.finish(query, history, context, false, answer, timings, started)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        query: &str,
        history: Vec<ChatTurn>,
        context: Vec<ScoredChunk>,
        is_out_of_scope: bool,
        answer: String,
        timings: StageTimings,
        started: Instant,
    ) -> QueryResult {
        let timings = timings.record(TOTAL, started.elapsed());
        info!(
            out_of_scope = is_out_of_scope,
            context = context.len(),
            total_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );
        QueryResult {
            query: query.to_string(),
            chat_history: history,
            context,
            is_out_of_scope,
            answer,
            processing_time: timings,
            error: None,
            outcome: if is_out_of_scope {
                Outcome::OutOfScope
            } else {
                Outcome::Answered
            },
        }
    }

    fn failed(
        &self,
        query: &str,
        history: Vec<ChatTurn>,
        timings: StageTimings,
        started: Instant,
        reason: String,
    ) -> QueryResult {
        let error = format!("Error running workflow: {reason}");
        warn!(%error, "query failed");
        QueryResult {
            query: query.to_string(),
            chat_history: history,
            context: Vec::new(),
            is_out_of_scope: false,
            answer: WORKFLOW_APOLOGY.to_string(),
            processing_time: timings.record(TOTAL, started.elapsed()),
            error: Some(error),
            outcome: Outcome::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::llm::{KeywordScopeClassifier, TemplateSynthesizer};
    use crate::vector_index::VectorIndex;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use repo_qa_core::chunk::Chunker;

    struct Panicking;

    #[async_trait]
    impl AnswerSynthesizer for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        async fn answer(&self, _: &str, _: &[ContextPassage], _: &[ChatTurn]) -> Result<String> {
            panic!("synthesizer blew up")
        }
        async fn answer_out_of_scope(&self, _: &str) -> Result<String> {
            bail!("unavailable")
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ScopeClassifier for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }
        async fn classify(&self, _: &str) -> Result<bool> {
            bail!("connection refused")
        }
    }

    struct Refusing;

    #[async_trait]
    impl AnswerSynthesizer for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }
        async fn answer(&self, _: &str, _: &[ContextPassage], _: &[ChatTurn]) -> Result<String> {
            bail!("rate limited")
        }
        async fn answer_out_of_scope(&self, _: &str) -> Result<String> {
            Ok("not about this repository".into())
        }
    }

    struct Slow;

    #[async_trait]
    impl ScopeClassifier for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        async fn classify(&self, _: &str) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(false)
        }
    }

    async fn indexer() -> Arc<RepositoryIndexer> {
        let index = VectorIndex::in_memory(Arc::new(HashEmbedder::new(64))).await;
        Arc::new(RepositoryIndexer::new(Arc::new(index), Chunker::new(100, 20).unwrap()))
    }

    #[tokio::test]
    async fn panic_in_synthesis_becomes_error_state() {
        let wf = QueryWorkflow::new(
            indexer().await,
            Arc::new(KeywordScopeClassifier::new()),
            Arc::new(Panicking),
        );
        let result = wf.run("How is the config loaded?", Vec::new()).await;
        assert_eq!(result.outcome, Outcome::Failed);
        assert!(!result.is_out_of_scope);
        assert_eq!(result.answer, WORKFLOW_APOLOGY);
        assert!(result.error.as_deref().unwrap().contains("synthesizer blew up"));
        assert!(result.processing_time.contains(SCOPE_CHECK));
        assert!(result.processing_time.contains(CONTEXT_RETRIEVAL));
        assert!(!result.processing_time.contains(ANSWER_GENERATION));
        assert!(result.processing_time.contains(TOTAL));
    }

    #[tokio::test]
    async fn out_of_scope_failure_uses_canned_reply() {
        let wf = QueryWorkflow::new(
            indexer().await,
            Arc::new(KeywordScopeClassifier::new()),
            Arc::new(Panicking),
        );
        let result = wf.run("What is the weather in Oslo?", Vec::new()).await;
        assert_eq!(result.outcome, Outcome::OutOfScope);
        assert_eq!(result.answer, out_of_scope_fallback("What is the weather in Oslo?"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn classifier_failure_assumes_in_scope() {
        let wf = QueryWorkflow::new(
            indexer().await,
            Arc::new(Unreachable),
            Arc::new(TemplateSynthesizer::new("widget")),
        );
        // Would be declined by the keyword classifier.
        let result = wf.run("What is the capital of France?", Vec::new()).await;
        assert_eq!(result.outcome, Outcome::Answered);
        assert!(!result.is_out_of_scope);
        assert!(result.error.is_none());
        assert!(result.processing_time.contains(SCOPE_CHECK));
        assert!(result.processing_time.contains(CONTEXT_RETRIEVAL));
        assert!(result.processing_time.contains(ANSWER_GENERATION));
    }

    #[tokio::test]
    async fn synthesis_failure_returns_apology() {
        let wf = QueryWorkflow::new(
            indexer().await,
            Arc::new(KeywordScopeClassifier::new()),
            Arc::new(Refusing),
        );
        let query = "How is the config loaded?";
        let result = wf.run(query, Vec::new()).await;
        assert_eq!(result.outcome, Outcome::Answered);
        assert_eq!(result.answer, synthesis_apology(query));
        assert!(result.answer.contains(query));
        assert!(result.error.is_none());
        assert!(result.processing_time.contains(ANSWER_GENERATION));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_moves_to_error_state() {
        let wf = QueryWorkflow::new(
            indexer().await,
            Arc::new(Slow),
            Arc::new(TemplateSynthesizer::new("widget")),
        )
        .with_timeout(Some(Duration::from_millis(100)));
        let result = wf.run("anything", Vec::new()).await;
        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.error.as_deref().unwrap().contains("deadline"));
        assert_eq!(result.processing_time.labels().collect::<Vec<_>>(), vec![TOTAL]);
    }
}
