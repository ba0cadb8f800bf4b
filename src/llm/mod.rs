//! Language-model capabilities used by the query workflow.
//!
//! Two traits, each with a deterministic stub and a live adapter:
//!
//! | Trait | Stub | Live |
//! |-------|------|------|
//! | [`ScopeClassifier`] | [`KeywordScopeClassifier`] | [`ChatModel`] |
//! | [`AnswerSynthesizer`] | [`TemplateSynthesizer`] | [`ChatModel`] |
//!
//! [`create_scope_classifier`] and [`create_synthesizer`] choose the
//! variant from `[llm].provider` once, when the service is wired.

pub mod openai;
pub mod stub;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use repo_qa_core::history::ChatTurn;
use repo_qa_core::models::ContextPassage;

use crate::config::Config;

pub use openai::ChatModel;
pub use stub::{KeywordScopeClassifier, TemplateSynthesizer};

/// Decides whether a query is about the indexed repository.
#[async_trait]
pub trait ScopeClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// `true` when the query is out of scope.
    async fn classify(&self, query: &str) -> Result<bool>;
}

/// Produces the natural-language answer for a query.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Answer `query` grounded in `context`, continuing `history`.
    async fn answer(
        &self,
        query: &str,
        context: &[ContextPassage],
        history: &[ChatTurn],
    ) -> Result<String>;

    /// Politely decline a query that is not about the repository.
    async fn answer_out_of_scope(&self, query: &str) -> Result<String>;
}

/// Reply used when answer generation fails.
pub fn synthesis_apology(query: &str) -> String {
    format!(
        "I encountered an error while processing your query about '{query}'. \
         This might be due to an issue with the language model connection. \
         Please try again later or rephrase your question."
    )
}

/// Reply used when the out-of-scope response cannot be generated.
pub fn out_of_scope_fallback(query: &str) -> String {
    format!(
        "I apologize, but your question about '{query}' appears to be outside the scope \
         of this repository. I can only answer questions about its code, functionality \
         and usage."
    )
}

/// Reply used when the workflow itself fails.
pub const WORKFLOW_APOLOGY: &str = "I apologize, but I encountered an error while processing \
     your query. Please try again later.";

/// | `[llm].provider` | Classifier |
/// |------------------|------------|
/// | `"stub"` | [`KeywordScopeClassifier`] |
/// | `"openai"` | [`ChatModel`] |
pub fn create_scope_classifier(config: &Config) -> Result<Arc<dyn ScopeClassifier>> {
    match config.llm.provider.as_str() {
        "stub" => Ok(Arc::new(KeywordScopeClassifier::for_repository(
            &config.repository,
        ))),
        "openai" => Ok(Arc::new(ChatModel::new(&config.llm, &config.repository)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// | `[llm].provider` | Synthesizer |
/// |------------------|-------------|
/// | `"stub"` | [`TemplateSynthesizer`] |
/// | `"openai"` | [`ChatModel`] |
pub fn create_synthesizer(config: &Config) -> Result<Arc<dyn AnswerSynthesizer>> {
    match config.llm.provider.as_str() {
        "stub" => Ok(Arc::new(TemplateSynthesizer::new(
            config.repository.display_name(),
        ))),
        "openai" => Ok(Arc::new(ChatModel::new(&config.llm, &config.repository)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
