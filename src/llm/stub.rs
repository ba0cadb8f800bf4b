//! Deterministic, offline capability stubs.

use anyhow::Result;
use async_trait::async_trait;

use repo_qa_core::history::ChatTurn;
use repo_qa_core::models::ContextPassage;

use super::{AnswerSynthesizer, ScopeClassifier};
use crate::config::RepositoryConfig;

/// Phrases that mark a query as unrelated to software.
const OUT_OF_SCOPE_PHRASES: &[&str] = &[
    "capital of",
    "recipe",
    "weather",
    "stock price",
    "president",
    "king",
    "queen",
    "actor",
    "movie",
    "film",
    "song",
    "music",
    "sports",
    "football",
    "birthday",
    "married",
    "spouse",
    "population",
    "horoscope",
];

/// Phrases that mark a query as about a code repository.
const IN_SCOPE_PHRASES: &[&str] = &[
    "code",
    "function",
    "module",
    "crate",
    "class",
    "method",
    "api",
    "config",
    "configuration",
    "install",
    "build",
    "test",
    "repository",
    "repo",
    "github",
    "sql",
    "database",
    "query",
    "embedding",
    "model",
    "error",
    "implementation",
    "implement",
    "documentation",
];

/// Lowercase alphanumeric words joined by single spaces, padded with one
/// space on each side so phrases match on word boundaries.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

/// Keyword scope classifier.
///
/// Out-of-scope phrases win over in-scope ones. A query matching neither
/// is in scope unless the classifier is [`strict`](Self::strict).
pub struct KeywordScopeClassifier {
    out_of_scope: Vec<String>,
    in_scope: Vec<String>,
    unmatched_out_of_scope: bool,
}

impl KeywordScopeClassifier {
    pub fn new() -> Self {
        Self {
            out_of_scope: OUT_OF_SCOPE_PHRASES.iter().map(|p| normalize(p)).collect(),
            in_scope: IN_SCOPE_PHRASES.iter().map(|p| normalize(p)).collect(),
            unmatched_out_of_scope: false,
        }
    }

    /// Reject queries that match no in-scope phrase.
    pub fn strict(mut self) -> Self {
        self.unmatched_out_of_scope = true;
        self
    }

    /// Default phrases plus the repository's name and owner.
    pub fn for_repository(repo: &RepositoryConfig) -> Self {
        let (owner, name) = repo.owner_and_name();
        let extra = [repo.name.clone(), owner, name];
        extra
            .into_iter()
            .flatten()
            .fold(Self::new(), |c, term| c.with_in_scope_term(&term))
    }

    pub fn with_in_scope_term(mut self, term: &str) -> Self {
        let term = normalize(term);
        if term.trim().is_empty() {
            return self;
        }
        self.in_scope.push(term);
        self
    }

    pub fn is_out_of_scope(&self, query: &str) -> bool {
        let q = normalize(query);
        if self.out_of_scope.iter().any(|p| q.contains(p.as_str())) {
            return true;
        }
        if self.in_scope.iter().any(|p| q.contains(p.as_str())) {
            return false;
        }
        self.unmatched_out_of_scope
    }
}

impl Default for KeywordScopeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScopeClassifier for KeywordScopeClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, query: &str) -> Result<bool> {
        Ok(self.is_out_of_scope(query))
    }
}

const EXCERPT_CHARS: usize = 200;

/// Template answer synthesizer that lists the retrieved passages.
pub struct TemplateSynthesizer {
    repo_name: String,
}

impl TemplateSynthesizer {
    pub fn new(repo_name: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
        }
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}

#[async_trait]
impl AnswerSynthesizer for TemplateSynthesizer {
    fn name(&self) -> &str {
        "template"
    }

    async fn answer(
        &self,
        query: &str,
        context: &[ContextPassage],
        history: &[ChatTurn],
    ) -> Result<String> {
        if context.is_empty() {
            return Ok(format!(
                "I could not find anything in {} that answers \"{}\". \
                 Try rephrasing the question, or re-index the repository if it changed.",
                self.repo_name, query
            ));
        }

        let mut out = String::new();
        if !history.is_empty() {
            out.push_str("Following up on our conversation. ");
        }
        out.push_str(&format!(
            "Based on {}, these files are the most relevant to \"{}\":\n",
            self.repo_name, query
        ));
        for (i, passage) in context.iter().enumerate() {
            out.push_str(&format!(
                "\n{}. {} ({})\n   {}\n",
                i + 1,
                passage.source,
                passage.locator,
                excerpt(&passage.text)
            ));
        }
        Ok(out)
    }

    async fn answer_out_of_scope(&self, query: &str) -> Result<String> {
        Ok(format!(
            "I apologize, but your question about '{}' appears to be outside the scope of {}. \
             I'm designed to answer questions about its code, functionality, and implementation. \
             Would you like to ask something about {} instead?",
            query, self.repo_name, self.repo_name
        ))
    }
}
