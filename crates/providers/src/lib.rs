pub mod openai_compat;
pub mod scripted;
pub mod traits;

pub use openai_compat::OpenAiCompatTransport;
pub use scripted::ScriptedTransport;
pub use traits::{ChatCompletion, ChatMessage, LlmTransport, Role};
