mod llm;
mod persistence;
mod research;
mod server;

pub use llm::*;
pub use persistence::*;
pub use research::*;
pub use server::*;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub research: ResearchConfig,
}

impl Config {
    /// Load from a TOML file, falling back to all-defaults when the file
    /// does not exist. Read once at process start.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load_or_default("/nonexistent/path/research.toml").unwrap();
        assert_eq!(cfg.server.port, 3210);
        assert_eq!(cfg.research.max_research_time_minutes, 15);
    }

    #[test]
    fn loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 8080

            [research]
            max_research_time_minutes = 30
            "#,
        )
        .unwrap();
        let cfg = Config::load_or_default(&path).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.research.max_research_time_minutes, 30);
    }
}
