use std::sync::Arc;

use research_domain::config::Config;

use crate::runtime::SessionManager;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
}
