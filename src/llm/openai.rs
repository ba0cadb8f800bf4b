//! OpenAI-compatible chat-completions adapter.
//!
//! One [`ChatModel`] serves as both scope classifier and answer
//! synthesizer. Requests go to `{base_url}/chat/completions` with the key
//! from the environment variable named by `llm.api_key_env`, and use the
//! same retry policy as the embedding client.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use repo_qa_core::history::{ChatTurn, Role};
use repo_qa_core::models::ContextPassage;

use super::{AnswerSynthesizer, ScopeClassifier};
use crate::config::{LlmConfig, RepositoryConfig};

pub struct ChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    subject: String,
    description: Option<String>,
}

impl ChatModel {
    pub fn new(llm: &LlmConfig, repo: &RepositoryConfig) -> Result<Self> {
        let api_key = std::env::var(&llm.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", llm.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()?;
        let subject = match &repo.url {
            Some(url) => format!("the {} repository ({})", repo.display_name(), url),
            None => format!("the {} repository", repo.display_name()),
        };
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", llm.base_url.trim_end_matches('/')),
            api_key,
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            max_retries: llm.max_retries,
            subject,
            description: repo.description.clone(),
        })
    }

    fn about(&self) -> String {
        match &self.description {
            Some(d) => format!("{}: {}", self.subject, d),
            None => self.subject.clone(),
        }
    }

    fn answer_prompt(&self) -> String {
        format!(
            "You are an assistant that answers questions about {}.\n\
             Answer from the repository content provided to you.\n\n\
             Guidelines:\n\
             1. Base your answer only on the provided context.\n\
             2. If the context is not enough to answer, say so. Do not make things up.\n\
             3. Link the relevant file URLs when you reference code or documentation.\n\
             4. Explain technical concepts clearly for a reader new to this codebase.",
            self.about()
        )
    }

    fn classify_prompt(&self) -> String {
        format!(
            "You decide whether a question is related to {}.\n\n\
             - If it is about the project, its code, usage, or implementation, reply IN_SCOPE.\n\
             - If it is about general programming topics the repository could inform, reply IN_SCOPE.\n\
             - If it is unrelated to the project and to software development, reply OUT_OF_SCOPE.\n\
             - When unsure, reply IN_SCOPE.\n\n\
             Reply with only IN_SCOPE or OUT_OF_SCOPE.",
            self.about()
        )
    }

    fn out_of_scope_prompt(&self) -> String {
        format!(
            "You are an assistant that answers questions about {}. The user's question \
             is unrelated to it. Politely explain that the question is outside the \
             repository's scope, that you answer questions about its code, functionality \
             and implementation, and suggest a related question instead. Be concise.",
            self.subject
        )
    }

    /// Send `messages` and return the first choice's content.
    pub async fn complete(&self, messages: &[Value]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying chat request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_chat_response(&json);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "chat request failed, will retry");
                        last_err = Some(anyhow!("Chat API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Chat API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "chat request failed, will retry");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Chat request failed after retries")))
    }
}

fn parse_chat_response(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn format_context(context: &[ContextPassage]) -> String {
    context
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "Document {}:\nSource: {}\nURL: {}\nContent:\n{}\n",
                i + 1,
                p.source,
                p.locator,
                p.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt, context, prior turns, then the question last.
fn answer_messages(
    system: &str,
    query: &str,
    context: &[ContextPassage],
    history: &[ChatTurn],
) -> Vec<Value> {
    let mut messages = vec![
        json!({"role": "system", "content": system}),
        json!({
            "role": "user",
            "content": format!("Context information is below:\n\n{}", format_context(context)),
        }),
    ];
    messages.extend(
        history
            .iter()
            .map(|t| json!({"role": role_name(t.role), "content": t.content})),
    );
    messages.push(json!({
        "role": "user",
        "content": format!(
            "Given the context information and not prior knowledge, answer the question: {query}"
        ),
    }));
    messages
}

#[async_trait]
impl ScopeClassifier for ChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, query: &str) -> Result<bool> {
        let reply = self
            .complete(&[
                json!({"role": "system", "content": self.classify_prompt()}),
                json!({"role": "user", "content": query}),
            ])
            .await?;
        Ok(reply.to_uppercase().contains("OUT_OF_SCOPE"))
    }
}

#[async_trait]
impl AnswerSynthesizer for ChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn answer(
        &self,
        query: &str,
        context: &[ContextPassage],
        history: &[ChatTurn],
    ) -> Result<String> {
        let messages = answer_messages(&self.answer_prompt(), query, context, history);
        self.complete(&messages).await
    }

    async fn answer_out_of_scope(&self, query: &str) -> Result<String> {
        self.complete(&[
            json!({"role": "system", "content": self.out_of_scope_prompt()}),
            json!({"role": "user", "content": format!("Out-of-scope query: {query}")}),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_goes_before_the_question() {
        let ctx = vec![ContextPassage {
            text: "fn main() {}".into(),
            source: "src/main.rs".into(),
            locator: "https://x/src/main.rs".into(),
            score: 1.0,
        }];
        let history = vec![ChatTurn::user("earlier"), ChatTurn::assistant("reply")];
        let messages = answer_messages("sys", "what now?", &ctx, &history);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[1]["content"].as_str().unwrap().contains("https://x/src/main.rs"));
        assert_eq!(messages[2]["content"], "earlier");
        assert_eq!(messages[3]["role"], "assistant");
        assert!(messages[4]["content"].as_str().unwrap().ends_with("what now?"));
    }

    #[test]
    fn parses_first_choice() {
        let json = json!({"choices": [{"message": {"role": "assistant", "content": "IN_SCOPE"}}]});
        assert_eq!(parse_chat_response(&json).unwrap(), "IN_SCOPE");
        assert!(parse_chat_response(&json!({"choices": []})).is_err());
    }
}
