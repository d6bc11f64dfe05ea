use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Research runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Upper bound on a single graph run's wall-clock time. Never honored
    /// below 60 seconds regardless of what's configured here.
    #[serde(default = "d_max_research_time_minutes")]
    pub max_research_time_minutes: u64,
    /// Sessions kept in the in-memory cache after a restart.
    #[serde(default = "d_recovery_limit")]
    pub recovery_session_limit: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_research_time_minutes: d_max_research_time_minutes(),
            recovery_session_limit: d_recovery_limit(),
        }
    }
}

impl ResearchConfig {
    /// Timeout in seconds for one graph run, floored at 60s per the
    /// engine's run contract.
    pub fn timeout_secs(&self) -> u64 {
        (self.max_research_time_minutes * 60).max(60)
    }
}

fn d_max_research_time_minutes() -> u64 {
    15
}
fn d_recovery_limit() -> usize {
    200
}
