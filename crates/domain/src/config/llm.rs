use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the single LLM endpoint the research core calls.
///
/// The research core treats the LLM transport as an external collaborator
/// reached through one interface (`chat_completion`); this config only
/// carries what's needed to stand up the OpenAI-compatible adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_endpoint")]
    pub endpoint: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: d_endpoint(),
            model: d_model(),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            request_timeout_secs: d_timeout_secs(),
            api_key: None,
        }
    }
}

fn d_endpoint() -> String {
    "http://localhost:11434/v1/chat/completions".into()
}
fn d_model() -> String {
    "llama3.1".into()
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    4096
}
fn d_timeout_secs() -> u64 {
    120
}
