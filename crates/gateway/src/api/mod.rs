pub mod sessions;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Builds the full HTTP surface: start/stream/stop/status/list/delete for
/// research sessions, plus report and document retrieval.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/research/start", post(sessions::start))
        .route("/api/research/:id/events", get(sessions::stream_events))
        .route("/api/research/:id/stop", post(sessions::stop))
        .route("/api/research/:id/status", get(sessions::status))
        .route("/api/research/sessions", get(sessions::list_sessions))
        .route("/api/research/sessions/:id", delete(sessions::delete_session))
        .route("/api/research/sessions/:id/report", get(sessions::get_report))
        .route("/api/research/sessions/:id/documents", get(sessions::list_documents))
        .route("/api/research/sessions/:id/documents/:doc_id", get(sessions::get_document))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
