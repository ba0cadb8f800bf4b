//! Conversation history normalisation.
//!
//! Callers send history as loosely shaped JSON. Well-formed turns are
//! `{"role": "...", "content": "..."}`; other shapes are recovered from
//! alias keys instead of being dropped:
//!
//! | Keys | Role |
//! |------|------|
//! | `user`, `query`, `question`, `human` | user |
//! | `assistant`, `response`, `answer`, `ai` | assistant |
//!
//! An object carrying both a user-like and an assistant-like key yields
//! two turns, user first. A bare string is a user turn.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" | "bot" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

const USER_KEYS: [&str; 4] = ["user", "query", "question", "human"];
const ASSISTANT_KEYS: [&str; 4] = ["assistant", "response", "answer", "ai"];
const CONTENT_KEYS: [&str; 3] = ["content", "text", "message"];

/// Normalise raw history entries into ordered [`ChatTurn`]s.
///
/// Entries that cannot be recovered are logged and skipped.
pub fn normalize_history(raw: &[Value]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(raw.len());
    for (position, entry) in raw.iter().enumerate() {
        let recovered = match entry {
            Value::String(s) if !s.trim().is_empty() => vec![ChatTurn::user(s.clone())],
            Value::Object(map) => recover_object(map),
            _ => Vec::new(),
        };
        if recovered.is_empty() {
            warn!(position, entry = %entry, "dropping unrecognised chat history entry");
        }
        turns.extend(recovered);
    }
    turns
}

fn recover_object(map: &Map<String, Value>) -> Vec<ChatTurn> {
    let content = first_text(map, &CONTENT_KEYS);

    if let (Some(role), Some(content)) = (map.get("role").and_then(Value::as_str), &content) {
        if let Some(role) = Role::parse(role) {
            return vec![ChatTurn {
                role,
                content: content.clone(),
            }];
        }
    }

    let mut turns = Vec::new();
    if let Some(text) = first_text(map, &USER_KEYS) {
        turns.push(ChatTurn::user(text));
    }
    if let Some(text) = first_text(map, &ASSISTANT_KEYS) {
        turns.push(ChatTurn::assistant(text));
    }

    // Content with a missing or unknown role.
    if turns.is_empty() {
        if let Some(content) = content {
            turns.push(ChatTurn::user(content));
        }
    }
    turns
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}
