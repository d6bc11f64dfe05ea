use research_domain::error::Result;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completed chat response. `thinking` carries any `<think>...</think>`
/// span the model emitted, already stripped out of `content`.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub thinking: Option<String>,
}

/// The single interface the research core needs from an LLM backend: one
/// call, no partial-token streaming. Fails loud — callers never receive a
/// silently-empty response on error or timeout.
#[async_trait::async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        enable_thinking: bool,
        json_mode: bool,
    ) -> Result<ChatCompletion>;
}

/// Strips a leading `<think>...</think>` span from model output, returning
/// the remaining content and the thought text if present.
pub fn strip_thinking(raw: &str) -> (String, Option<String>) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";
    if let Some(start) = raw.find(OPEN) {
        if let Some(end) = raw[start..].find(CLOSE) {
            let end = start + end;
            let thought = raw[start + OPEN.len()..end].trim().to_string();
            let rest = format!(
                "{}{}",
                &raw[..start],
                &raw[end + CLOSE.len()..]
            );
            return (rest.trim().to_string(), Some(thought));
        }
    }
    (raw.to_string(), None)
}

pub(crate) fn role_str(role: Role) -> &'static str {
    role.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_block() {
        let (content, thought) = strip_thinking("<think>reasoning here</think>the answer");
        assert_eq!(content, "the answer");
        assert_eq!(thought.as_deref(), Some("reasoning here"));
    }

    #[test]
    fn passes_through_without_think_block() {
        let (content, thought) = strip_thinking("just the answer");
        assert_eq!(content, "just the answer");
        assert!(thought.is_none());
    }

    #[test]
    fn handles_unclosed_think_block() {
        let (content, thought) = strip_thinking("<think>never closes");
        assert_eq!(content, "<think>never closes");
        assert!(thought.is_none());
    }
}
