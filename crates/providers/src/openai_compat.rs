//! OpenAI-compatible chat completions adapter.
//!
//! Works with OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any other
//! endpoint that follows the OpenAI chat completions contract. Non-streaming
//! only: the research core never needs partial tokens, just the finished
//! message (see the graph engine's node-level event model).

use crate::traits::{role_str, strip_thinking, ChatCompletion, ChatMessage, LlmTransport};
use research_domain::error::{Error, Result};
use serde_json::Value;

pub struct OpenAiCompatTransport {
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatTransport {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
        timeout_secs: u64,
        api_key: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            temperature,
            max_tokens,
            api_key,
            client,
        }
    }

    fn build_body(&self, messages: &[ChatMessage], json_mode: bool) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": role_str(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmTransport for OpenAiCompatTransport {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        enable_thinking: bool,
        json_mode: bool,
    ) -> Result<ChatCompletion> {
        let body = self.build_body(messages, json_mode);

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "llm transport request");

        let resp = req.send().await.map_err(|e| Error::Llm {
            model: self.model.clone(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Llm {
            model: self.model.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(Error::Llm {
                model: self.model.clone(),
                message: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        let parsed: Value = serde_json::from_str(&text)?;
        let raw_content = parsed
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Llm {
                model: self.model.clone(),
                message: "response had no message content".into(),
            })?;

        if enable_thinking {
            let (content, thinking) = strip_thinking(raw_content);
            Ok(ChatCompletion { content, thinking })
        } else {
            let (content, _) = strip_thinking(raw_content);
            Ok(ChatCompletion {
                content,
                thinking: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_body_includes_json_mode() {
        let t = OpenAiCompatTransport::new("http://x", "m", 0.5, 100, 30, None);
        let body = t.build_body(&[ChatMessage::user("hi")], true);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["model"], "m");
    }

    #[test]
    fn build_body_omits_response_format_by_default() {
        let t = OpenAiCompatTransport::new("http://x", "m", 0.5, 100, 30, None);
        let body = t.build_body(&[ChatMessage::user("hi")], false);
        assert!(body.get("response_format").is_none());
    }
}
