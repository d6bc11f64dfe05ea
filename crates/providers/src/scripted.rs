//! A deterministic, in-memory [`LlmTransport`] for tests: returns canned
//! responses in order, one per call, so graph/agent tests don't depend on a
//! live model.

use crate::traits::{strip_thinking, ChatCompletion, ChatMessage, LlmTransport};
use research_domain::error::{Error, Result};
use std::sync::Mutex;

pub struct ScriptedTransport {
    responses: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// `responses` are consumed front-to-back, one per `complete()` call.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait::async_trait]
impl LlmTransport for ScriptedTransport {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        enable_thinking: bool,
        _json_mode: bool,
    ) -> Result<ChatCompletion> {
        let mut responses = self.responses.lock().expect("scripted transport lock");
        if responses.is_empty() {
            return Err(Error::Llm {
                model: "scripted".into(),
                message: "no more scripted responses".into(),
            });
        }
        let raw = responses.remove(0);
        let (content, thinking) = strip_thinking(&raw);
        Ok(ChatCompletion {
            content,
            thinking: if enable_thinking { thinking } else { None },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_responses_in_order() {
        let t = ScriptedTransport::new(vec!["first".into(), "second".into()]);
        let a = t.complete(&[], false, false).await.unwrap();
        let b = t.complete(&[], false, false).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
    }

    #[tokio::test]
    async fn errors_when_exhausted() {
        let t = ScriptedTransport::new(vec![]);
        assert!(t.complete(&[], false, false).await.is_err());
    }
}
