//! Session Manager — the lifecycle and concurrency authority for research
//! sessions. Bridges the graph engine's cancellation/event/checkpoint
//! hooks to persistence, tracks which sessions have a live executor, and
//! answers the start/stop/delete/list/stream surface the gateway exposes.

pub mod cancel;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use parking_lot::Mutex;
use research_core::graph::{CancelSignal, Checkpointer, EventSink, GraphEngine, RunContext};
use research_core::markdown::report_to_markdown;
use research_domain::config::Config;
use research_domain::error::{Error, Result};
use research_domain::model::{Event, EventType, ResearchOptions, ResearchState, Session, SessionStatus};
use research_store::PersistenceStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cancel::CancelToken;

const MIN_QUERY_LEN: usize = 3;
const MAX_QUERY_LEN: usize = 2000;
/// Cadence at which `stream_events` re-polls the persistence log for a
/// still-running session, per the Manager's stream contract.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Broadcast channel capacity for live observers; replay always falls back
/// to the durable log, so a lagged receiver never loses data.
const BROADCAST_CAPACITY: usize = 256;

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn empty_fields() -> serde_json::Map<String, serde_json::Value> {
    serde_json::Map::new()
}

pub enum StopOutcome {
    Stopped,
    NotFoundOrCompleted,
}

pub enum DeleteOutcome {
    Deleted,
    NotFound,
    Running,
}

/// Bookkeeping for one in-flight session: its cancel handle, its executor
/// task, and the broadcast channel live SSE observers subscribe to.
struct RunningEntry {
    cancel: CancelToken,
    handle: JoinHandle<()>,
    #[allow(dead_code)]
    events: broadcast::Sender<Event>,
}

pub struct SessionManager {
    store: Arc<PersistenceStore>,
    engine: Arc<GraphEngine>,
    config: Arc<Config>,
    running: Mutex<HashMap<String, RunningEntry>>,
}

impl SessionManager {
    /// Builds the manager and runs crash recovery: any session persisted
    /// as `running` is rehydrated as `stopped` — the system never
    /// auto-resumes a graph run.
    pub async fn new(store: Arc<PersistenceStore>, engine: Arc<GraphEngine>, config: Arc<Config>) -> Result<Arc<Self>> {
        let manager = Arc::new(Self {
            store,
            engine,
            config,
            running: Mutex::new(HashMap::new()),
        });
        manager.recover_crashed_sessions().await?;
        Ok(manager)
    }

    async fn recover_crashed_sessions(&self) -> Result<()> {
        let limit = self.config.research.recovery_session_limit as u32;
        let sessions = self.store.list_sessions(limit).await?;
        for session in sessions {
            if session.status != SessionStatus::Running {
                continue;
            }
            tracing::warn!(session_id = %session.session_id, "rehydrating crashed session as stopped");
            let mut state = session.state;
            state.status = SessionStatus::Stopped;
            self.store
                .upsert_session(
                    &session.session_id,
                    &session.query,
                    SessionStatus::Stopped,
                    &session.options,
                    &state,
                    &session.created_at,
                    &now_iso(),
                    true,
                )
                .await?;
        }
        Ok(())
    }

    /// Validates the query, persists an initial snapshot, and spawns the
    /// session's executor task.
    pub async fn start(self: &Arc<Self>, query: String, options: ResearchOptions) -> Result<Session> {
        let trimmed = query.trim();
        if trimmed.chars().count() < MIN_QUERY_LEN || trimmed.chars().count() > MAX_QUERY_LEN {
            return Err(Error::Invalid(format!(
                "query must be between {MIN_QUERY_LEN} and {MAX_QUERY_LEN} characters"
            )));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let options = options.clamped();
        let now = now_iso();
        let state = ResearchState::new(session_id.clone(), trimmed.to_string(), options.clone(), Vec::new(), now.clone());

        self.store
            .upsert_session(&session_id, trimmed, SessionStatus::Running, &options, &state, &now, &now, false)
            .await?;

        let (events_tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        let cancel = CancelToken::new();
        let handle = {
            let manager = self.clone();
            let session_id = session_id.clone();
            let query = trimmed.to_string();
            let options = options.clone();
            let cancel = cancel.clone();
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                manager.run_session(session_id, query, options, cancel, events_tx).await;
            })
        };

        self.running.lock().insert(
            session_id.clone(),
            RunningEntry {
                cancel,
                handle,
                events: events_tx,
            },
        );

        Ok(Session {
            session_id,
            query: trimmed.to_string(),
            options,
            status: SessionStatus::Running,
            created_at: now.clone(),
            updated_at: now,
            is_stopped: false,
            state,
            final_report: None,
            events_count: 0,
        })
    }

    async fn run_session(
        self: Arc<Self>,
        session_id: String,
        query: String,
        options: ResearchOptions,
        cancel: CancelToken,
        events_tx: broadcast::Sender<Event>,
    ) {
        let session_memory = self.load_session_memory(&session_id, &options).await;
        let timeout = Duration::from_secs(self.config.research.timeout_secs());

        let sink = Arc::new(PersistingEventSink {
            store: self.store.clone(),
            session_id: session_id.clone(),
            broadcast: events_tx,
        });
        sink.emit(EventType::ResearchStarted, "Research session started.".to_string(), empty_fields()).await;

        let checkpointer = Arc::new(StoreCheckpointer {
            store: self.store.clone(),
            session_id: session_id.clone(),
        });
        let run_context = RunContext {
            cancel: Arc::new(cancel) as Arc<dyn CancelSignal>,
            events: sink.clone() as Arc<dyn EventSink>,
            checkpointer,
        };

        let final_state = self.engine.run(query, session_id.clone(), timeout, options, session_memory, run_context).await;
        self.finish_session(&session_id, final_state, &sink).await;
        self.running.lock().remove(&session_id);
    }

    async fn load_session_memory(&self, session_id: &str, options: &ResearchOptions) -> Vec<String> {
        if !options.include_session_memory || options.session_memory_limit == 0 {
            return Vec::new();
        }
        match self.store.get_recent_completed_reports(options.session_memory_limit, session_id).await {
            Ok(reports) => reports
                .into_iter()
                .map(|(_, report)| format!("{}: {}", report.title, report.executive_summary))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load session memory, continuing without it");
                Vec::new()
            }
        }
    }

    /// Interprets the graph's terminal state and persists/emits exactly
    /// one of completed, stopped, or error.
    async fn finish_session(&self, session_id: &str, state: ResearchState, sink: &Arc<PersistingEventSink>) {
        let now = now_iso();
        match (state.status, &state.final_report) {
            (SessionStatus::Stopped, _) => {
                if let Err(e) = self
                    .store
                    .upsert_session(session_id, &state.query, SessionStatus::Stopped, &state.options, &state, &now, &now, true)
                    .await
                {
                    tracing::error!(error = %e, "failed to persist stopped snapshot");
                }
                sink.emit(EventType::ResearchStopped, "Research session stopped.".to_string(), empty_fields()).await;
            }
            (SessionStatus::Completed, Some(report)) | (SessionStatus::Running, Some(report)) => {
                let markdown = report_to_markdown(report);
                if let Err(e) = self.store.save_final_report(session_id, report, &markdown, &now).await {
                    tracing::error!(error = %e, "failed to persist final report");
                }
                let mut completed_state = state.clone();
                completed_state.status = SessionStatus::Completed;
                if let Err(e) = self
                    .store
                    .upsert_session(session_id, &state.query, SessionStatus::Completed, &state.options, &completed_state, &now, &now, false)
                    .await
                {
                    tracing::error!(error = %e, "failed to persist completed snapshot");
                }
                let mut fields = serde_json::Map::new();
                fields.insert("report".to_string(), serde_json::to_value(report).unwrap_or(serde_json::Value::Null));
                sink.emit(EventType::ResearchCompleted, "Research session completed.".to_string(), fields).await;
            }
            (_, _) => {
                let message = state.error.clone().unwrap_or_else(|| "graph finished without a final report".to_string());
                if let Err(e) = self
                    .store
                    .upsert_session(session_id, &state.query, SessionStatus::Error, &state.options, &state, &now, &now, false)
                    .await
                {
                    tracing::error!(error = %e, "failed to persist error snapshot");
                }
                sink.emit(EventType::ResearchError, message, empty_fields()).await;
            }
        }
    }

    /// Cancels a session's executor and awaits its post-run persistence.
    pub async fn stop(&self, session_id: &str) -> StopOutcome {
        let handle = {
            let mut running = self.running.lock();
            running.remove(session_id).map(|entry| {
                entry.cancel.cancel();
                entry.handle
            })
        };
        match handle {
            Some(handle) => {
                let _ = handle.await;
                StopOutcome::Stopped
            }
            None => StopOutcome::NotFoundOrCompleted,
        }
    }

    /// Refuses to delete a currently-running session; otherwise cascades
    /// the delete in persistence.
    pub async fn delete(&self, session_id: &str) -> Result<DeleteOutcome> {
        if self.running.lock().contains_key(session_id) {
            return Ok(DeleteOutcome::Running);
        }
        let deleted = self.store.delete_session(session_id).await?;
        Ok(if deleted { DeleteOutcome::Deleted } else { DeleteOutcome::NotFound })
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.running.lock().contains_key(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.store.get_session(session_id).await
    }

    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>> {
        self.store.list_sessions(limit).await
    }

    pub async fn list_documents(&self, session_id: &str) -> Result<Vec<research_domain::model::Document>> {
        self.store.list_documents(session_id).await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<research_domain::model::Document>> {
        self.store.get_document(document_id).await
    }

    /// Yields events for one observer: a synthetic `connected` event,
    /// replay of the durable log, a synthesized terminal event if none was
    /// replayed and the session has already finished, then — while still
    /// running — a ~1s poll of the log with heartbeats between ticks.
    /// Multiple concurrent observers are supported; each replays
    /// independently from the log.
    pub fn stream_events(self: Arc<Self>, session_id: String) -> impl Stream<Item = Event> {
        async_stream::stream! {
            let session = match self.store.get_session(&session_id).await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    yield plain_event(&session_id, EventType::ResearchError, "session not found".to_string());
                    yield plain_event(&session_id, EventType::Done, String::new());
                    return;
                }
                Err(e) => {
                    yield plain_event(&session_id, EventType::ResearchError, e.to_string());
                    yield plain_event(&session_id, EventType::Done, String::new());
                    return;
                }
            };

            yield plain_event(&session_id, EventType::Connected, format!("connected, status={}", session.status.as_str()));

            let mut last_index: i64 = -1;
            let mut terminal_emitted = false;
            for event in self.store.list_events(&session_id, None).await.unwrap_or_default() {
                last_index = last_index.max(event.index as i64);
                terminal_emitted = terminal_emitted || event.event_type.is_terminal();
                yield event;
            }

            if !self.is_running(&session_id) && !terminal_emitted {
                yield synthesize_terminal(&session_id, &session);
                terminal_emitted = true;
            }

            while self.is_running(&session_id) && !terminal_emitted {
                tokio::time::sleep(POLL_INTERVAL).await;
                let fresh = self.store.list_events_after(&session_id, last_index).await.unwrap_or_default();
                if fresh.is_empty() {
                    yield plain_event(&session_id, EventType::Heartbeat, String::new());
                    continue;
                }
                for event in fresh {
                    last_index = last_index.max(event.index as i64);
                    terminal_emitted = terminal_emitted || event.event_type.is_terminal();
                    yield event;
                }
            }

            if !terminal_emitted {
                // Executor finished between the last poll and this check with
                // no event observed yet; fall back to the persisted snapshot.
                if let Ok(Some(session)) = self.store.get_session(&session_id).await {
                    yield synthesize_terminal(&session_id, &session);
                }
            }

            yield plain_event(&session_id, EventType::Done, String::new());
        }
    }
}

fn plain_event(session_id: &str, event_type: EventType, message: String) -> Event {
    Event {
        event_type,
        session_id: session_id.to_string(),
        timestamp: now_iso(),
        message,
        index: 0,
        fields: empty_fields(),
    }
}

fn synthesize_terminal(session_id: &str, session: &Session) -> Event {
    let (event_type, message) = match session.status {
        SessionStatus::Completed => (EventType::ResearchCompleted, "Research session completed.".to_string()),
        SessionStatus::Stopped => (EventType::ResearchStopped, "Research session stopped.".to_string()),
        SessionStatus::Running | SessionStatus::Error => (
            EventType::ResearchError,
            session.state.error.clone().unwrap_or_else(|| "research session ended unexpectedly".to_string()),
        ),
    };
    let mut fields = empty_fields();
    if let Some(report) = &session.final_report {
        fields.insert("report".to_string(), serde_json::to_value(report).unwrap_or(serde_json::Value::Null));
    }
    let mut event = plain_event(session_id, event_type, message);
    event.fields = fields;
    event
}

/// Fans emissions out to the durable log and to live SSE observers. The
/// durable append is awaited before this returns — at-least-once
/// durability, per the Manager's event fan-out contract.
struct PersistingEventSink {
    store: Arc<PersistenceStore>,
    session_id: String,
    broadcast: broadcast::Sender<Event>,
}

#[async_trait]
impl EventSink for PersistingEventSink {
    async fn emit(&self, event_type: EventType, message: String, fields: serde_json::Map<String, serde_json::Value>) {
        let event = Event {
            event_type,
            session_id: self.session_id.clone(),
            timestamp: now_iso(),
            message,
            index: 0,
            fields,
        };
        match self.store.append_event(&self.session_id, &event).await {
            Ok(index) => {
                let mut persisted = event;
                persisted.index = index;
                let _ = self.broadcast.send(persisted);
            }
            Err(e) => {
                tracing::error!(error = %e, session_id = %self.session_id, "failed to persist event");
            }
        }
    }
}

struct StoreCheckpointer {
    store: Arc<PersistenceStore>,
    session_id: String,
}

#[async_trait]
impl Checkpointer for StoreCheckpointer {
    async fn checkpoint(&self, state: &ResearchState) -> Result<()> {
        let now = now_iso();
        self.store
            .upsert_session(&self.session_id, &state.query, state.status, &state.options, state, &now, &now, false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use research_core::search::{ScriptedFetcher, ScriptedSearch};
    use research_providers::ScriptedTransport;
    use std::collections::HashMap as StdHashMap;

    fn test_config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    fn engine(responses: Vec<String>) -> Arc<GraphEngine> {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let search = Arc::new(ScriptedSearch::new(vec![vec![]]));
        let fetcher = Arc::new(ScriptedFetcher::new(StdHashMap::new()));
        Arc::new(GraphEngine::new(transport, search, fetcher))
    }

    fn happy_path_responses() -> Vec<String> {
        vec![
            r#"{"sub_questions": ["What is quantum networking?"]}"#.to_string(),
            r#"{"search_queries": [{"query": "quantum networking"}]}"#.to_string(),
            r#"{"summary": "It is a field.", "key_facts": ["fact"], "relevance_score": 0.8}"#.to_string(),
            r#"{"has_gaps": false, "gaps": [], "recommendations": [], "confidence": 0.9}"#.to_string(),
            r#"{"title": "Report", "executive_summary": "done.", "sections": [], "confidence_assessment": "ok"}"#.to_string(),
        ]
    }

    #[tokio::test]
    async fn start_persists_initial_snapshot_and_spawns_executor() {
        let store = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), engine(happy_path_responses()), test_config()).await.unwrap();
        let session = manager.start("What is quantum networking?".to_string(), ResearchOptions::default()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(manager.is_running(&session.session_id));

        // Wait for the executor to finish.
        for _ in 0..200 {
            if !manager.is_running(&session.session_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let persisted = store.get_session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(persisted.status, SessionStatus::Completed);
        assert!(persisted.final_report.is_some());
    }

    #[tokio::test]
    async fn rejects_query_outside_length_bounds() {
        let store = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store, engine(vec![]), test_config()).await.unwrap();
        let err = manager.start("ab".to_string(), ResearchOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn stop_cancels_running_session() {
        let store = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store, engine(happy_path_responses()), test_config()).await.unwrap();
        let session = manager.start("What is quantum networking?".to_string(), ResearchOptions::default()).await.unwrap();
        let outcome = manager.stop(&session.session_id).await;
        assert!(matches!(outcome, StopOutcome::Stopped));
        assert!(!manager.is_running(&session.session_id));
    }

    #[tokio::test]
    async fn delete_refuses_running_session() {
        let store = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store, engine(happy_path_responses()), test_config()).await.unwrap();
        let session = manager.start("What is quantum networking?".to_string(), ResearchOptions::default()).await.unwrap();
        let outcome = manager.delete(&session.session_id).await.unwrap();
        assert!(matches!(outcome, DeleteOutcome::Running));
    }

    #[tokio::test]
    async fn delete_removes_completed_session() {
        let store = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store.clone(), engine(happy_path_responses()), test_config()).await.unwrap();
        let session = manager.start("What is quantum networking?".to_string(), ResearchOptions::default()).await.unwrap();
        for _ in 0..200 {
            if !manager.is_running(&session.session_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let outcome = manager.delete(&session.session_id).await.unwrap();
        assert!(matches!(outcome, DeleteOutcome::Deleted));
        assert!(store.get_session(&session.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn crash_recovery_rehydrates_running_sessions_as_stopped() {
        let store = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let state = ResearchState::new("s1".into(), "q".into(), ResearchOptions::default(), vec![], "t0".into());
        store
            .upsert_session("s1", "q", SessionStatus::Running, &state.options, &state, "t0", "t0", false)
            .await
            .unwrap();

        let manager = SessionManager::new(store.clone(), engine(vec![]), test_config()).await.unwrap();
        let recovered = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(recovered.status, SessionStatus::Stopped);
        assert!(!manager.is_running("s1"));
    }

    #[tokio::test]
    async fn stream_events_replays_then_terminates() {
        let store = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let manager = SessionManager::new(store, engine(happy_path_responses()), test_config()).await.unwrap();
        let session = manager.start("What is quantum networking?".to_string(), ResearchOptions::default()).await.unwrap();
        for _ in 0..200 {
            if !manager.is_running(&session.session_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let events: Vec<Event> = manager.stream_events(session.session_id.clone()).collect().await;
        assert_eq!(events.first().unwrap().event_type, EventType::Connected);
        assert_eq!(events.last().unwrap().event_type, EventType::Done);
        assert!(events.iter().any(|e| e.event_type == EventType::ResearchCompleted));
    }
}
