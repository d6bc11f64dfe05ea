//! Research session API endpoints.
//!
//! - `POST   /api/research/start`
//! - `GET    /api/research/:id/events` (SSE)
//! - `POST   /api/research/:id/stop`
//! - `GET    /api/research/:id/status`
//! - `GET    /api/research/sessions`
//! - `DELETE /api/research/sessions/:id`
//! - `GET    /api/research/sessions/:id/report`
//! - `GET    /api/research/sessions/:id/documents`
//! - `GET    /api/research/sessions/:id/documents/:doc_id`

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;

use research_domain::error::Error;
use research_domain::model::ResearchOptions;

use crate::runtime::{DeleteOutcome, StopOutcome};
use crate::state::AppState;

fn error_response(err: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        Error::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/research/start
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub query: String,
    #[serde(default)]
    pub options: Option<ResearchOptions>,
}

pub async fn start(State(state): State<AppState>, Json(req): Json<StartRequest>) -> impl IntoResponse {
    let options = req.options.unwrap_or_default();
    match state.sessions.start(req.query, options).await {
        Ok(session) => {
            let id = &session.session_id;
            Json(serde_json::json!({
                "status": "started",
                "session_id": id,
                "query": session.query,
                "options": session.options,
                "stream_url": format!("/api/research/{id}/events"),
                "stop_url": format!("/api/research/{id}/stop"),
                "status_url": format!("/api/research/{id}/status"),
            }))
            .into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/research/:id/events (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stream_events(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let stream = state.sessions.clone().stream_events(id).map(|event| {
        let event_type = event.event_type.as_str();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, std::convert::Infallible>(SseEvent::default().event(event_type).data(data))
    });

    let stream: std::pin::Pin<Box<dyn Stream<Item = _> + Send>> = Box::pin(stream);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/research/:id/stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.stop(&id).await {
        StopOutcome::Stopped => Json(serde_json::json!({
            "status": "stopped",
            "session_id": id,
            "message": "session stopped",
        })),
        StopOutcome::NotFoundOrCompleted => Json(serde_json::json!({
            "status": "not_found_or_completed",
            "session_id": id,
            "message": "no running session with that id",
        })),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/research/:id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.get_session(&id).await {
        Ok(Some(session)) => {
            let progress = serde_json::json!({
                "iteration": session.state.iteration,
                "plan_count": session.state.plan.len(),
                "sources_count": session.state.sources.len(),
                "findings_count": session.state.findings.len(),
            });
            let mut body = serde_json::json!({
                "session_id": session.session_id,
                "query": session.query,
                "status": session.status.as_str(),
                "created_at": session.created_at,
                "updated_at": session.updated_at,
                "is_stopped": session.is_stopped,
                "events_count": session.events_count,
                "progress": progress,
            });
            if let Some(report) = &session.final_report {
                body["result"] = serde_json::json!({
                    "title": report.title,
                    "word_count": report.word_count,
                });
            }
            Json(body).into_response()
        }
        Ok(None) => error_response(Error::NotFound(id)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/research/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

fn default_list_limit() -> u32 {
    30
}

pub async fn list_sessions(State(state): State<AppState>, Query(q): Query<ListQuery>) -> impl IntoResponse {
    let limit = q.limit.min(30);
    match state.sessions.list_sessions(limit).await {
        Ok(sessions) => {
            let items: Vec<serde_json::Value> = sessions
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "session_id": s.session_id,
                        "query": s.query,
                        "status": s.status.as_str(),
                        "created_at": s.created_at,
                        "updated_at": s.updated_at,
                        "events_count": s.events_count,
                        "has_report": s.final_report.is_some(),
                    })
                })
                .collect();
            Json(serde_json::json!({ "sessions": items })).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /api/research/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.delete(&id).await {
        Ok(DeleteOutcome::Deleted) => Json(serde_json::json!({ "status": "deleted", "session_id": id })).into_response(),
        Ok(DeleteOutcome::NotFound) => {
            (StatusCode::NOT_FOUND, Json(serde_json::json!({ "status": "not_found", "session_id": id }))).into_response()
        }
        Ok(DeleteOutcome::Running) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "status": "running", "session_id": id, "message": "stop the session before deleting it" })),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/research/sessions/:id/report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_report(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.get_session(&id).await {
        Ok(Some(session)) => match session.final_report {
            Some(report) => Json(serde_json::json!({ "report": report })).into_response(),
            None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no report for this session" }))).into_response(),
        },
        Ok(None) => error_response(Error::NotFound(id)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/research/sessions/:id/documents[/:doc_id]
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_documents(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.list_documents(&id).await {
        Ok(docs) => Json(serde_json::json!({ "documents": docs })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn get_document(State(state): State<AppState>, Path((_id, doc_id)): Path<(String, String)>) -> impl IntoResponse {
    match state.sessions.get_document(&doc_id).await {
        Ok(Some(doc)) => Json(serde_json::json!({ "document": doc })).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "document not found" }))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}
