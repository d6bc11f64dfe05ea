use crate::schema::{PRAGMAS, SCHEMA};
use research_domain::error::{Error, Result};
use research_domain::model::{
    Document, DocumentType, Event, Report, ResearchOptions, ResearchState, Session, SessionStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed store for sessions, their event logs, and generated
/// documents. All access funnels through [`spawn_blocking`] over one shared
/// connection guarded by a standard mutex, so writes serialize the way a
/// single-writer embedded database expects.
///
/// [`spawn_blocking`]: tokio::task::spawn_blocking
#[derive(Clone)]
pub struct PersistenceStore {
    conn: Arc<Mutex<Connection>>,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

impl PersistenceStore {
    pub fn open(database_path: impl AsRef<Path>) -> Result<Self> {
        let path = database_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(PRAGMAS).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("persistence store mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| Error::Database(format!("blocking task panicked: {e}")))?
    }

    /// Insert or update a session snapshot. Idempotent: upserting the same
    /// session twice leaves `events_count` untouched.
    pub async fn upsert_session(
        &self,
        session_id: &str,
        query: &str,
        status: SessionStatus,
        options: &ResearchOptions,
        state: &ResearchState,
        created_at: &str,
        updated_at: &str,
        is_stopped: bool,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let query = query.to_string();
        let status_str = status.as_str().to_string();
        let options_json = serde_json::to_string(options)?;
        let state_json = serde_json::to_string(state)?;
        let created_at = created_at.to_string();
        let updated_at = updated_at.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (
                    session_id, query, status, created_at, updated_at,
                    is_stopped, options_json, state_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(session_id) DO UPDATE SET
                    query=excluded.query,
                    status=excluded.status,
                    updated_at=excluded.updated_at,
                    is_stopped=excluded.is_stopped,
                    options_json=excluded.options_json,
                    state_json=excluded.state_json;",
                params![
                    session_id,
                    query,
                    status_str,
                    created_at,
                    updated_at,
                    is_stopped as i64,
                    options_json,
                    state_json,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    /// Appends one event, allocating its index under the same mutex that
    /// serializes all writes, and bumps the owning session's `events_count`
    /// and `updated_at` atomically. Returns the allocated index; whatever
    /// `event.index` carried in is overwritten before persisting, so
    /// callers don't need to pre-compute it.
    pub async fn append_event(&self, session_id: &str, event: &Event) -> Result<u64> {
        let session_id = session_id.to_string();
        let event_type = event.event_type.as_str().to_string();
        let mut event = event.clone();
        let created_at = event.timestamp.clone();

        self.with_conn(move |conn| {
            let next_index: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(event_index), -1) + 1 FROM session_events WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            event.index = next_index as u64;
            let payload_json = serde_json::to_string(&event)?;
            conn.execute(
                "INSERT INTO session_events (session_id, event_index, event_type, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session_id, next_index, event_type, payload_json, created_at],
            )
            .map_err(db_err)?;
            conn.execute(
                "UPDATE sessions SET events_count = events_count + 1, updated_at = ?1 WHERE session_id = ?2",
                params![created_at, session_id],
            )
            .map_err(db_err)?;
            Ok(next_index as u64)
        })
        .await
    }

    /// Persists the final report as both a JSON and Markdown document and
    /// marks the session completed.
    pub async fn save_final_report(
        &self,
        session_id: &str,
        report: &Report,
        markdown: &str,
        updated_at: &str,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let report_json = serde_json::to_string(report)?;
        let markdown = markdown.to_string();
        let updated_at = updated_at.to_string();
        let title = report.title.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET status = 'completed', final_report_json = ?1, updated_at = ?2, is_stopped = 0
                 WHERE session_id = ?3",
                params![report_json, updated_at, session_id],
            )
            .map_err(db_err)?;

            let json_doc_id = Document::make_id(&session_id, DocumentType::Json);
            let md_doc_id = Document::make_id(&session_id, DocumentType::Markdown);

            conn.execute(
                "INSERT INTO session_documents (document_id, session_id, doc_type, title, content, created_at)
                 VALUES (?1, ?2, 'json', ?3, ?4, ?5)
                 ON CONFLICT(document_id) DO UPDATE SET
                    title=excluded.title, content=excluded.content, created_at=excluded.created_at",
                params![json_doc_id, session_id, title, report_json, updated_at],
            )
            .map_err(db_err)?;
            conn.execute(
                "INSERT INTO session_documents (document_id, session_id, doc_type, title, content, created_at)
                 VALUES (?1, ?2, 'markdown', ?3, ?4, ?5)
                 ON CONFLICT(document_id) DO UPDATE SET
                    title=excluded.title, content=excluded.content, created_at=excluded.created_at",
                params![md_doc_id, session_id, title, markdown, updated_at],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, query, status, created_at, updated_at, is_stopped,
                            options_json, state_json, final_report_json, events_count
                     FROM sessions ORDER BY updated_at DESC LIMIT ?1",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit], row_to_session)
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(db_err)?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT session_id, query, status, created_at, updated_at, is_stopped,
                        options_json, state_json, final_report_json, events_count
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                row_to_session,
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    /// Deletes a session and cascades to its events and documents. Returns
    /// whether a row was actually removed.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM session_documents WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(db_err)?;
            conn.execute(
                "DELETE FROM session_events WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(db_err)?;
            let changed = conn
                .execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])
                .map_err(db_err)?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn list_documents(&self, session_id: &str) -> Result<Vec<Document>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT document_id, session_id, doc_type, title, content, created_at
                     FROM session_documents WHERE session_id = ?1 ORDER BY created_at DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![session_id], row_to_document)
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(db_err)?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT document_id, session_id, doc_type, title, content, created_at
                 FROM session_documents WHERE document_id = ?1",
                params![document_id],
                row_to_document,
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    /// Persisted events for a session in chronological (index) order.
    pub async fn list_events(&self, session_id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let payloads: Vec<String> = if let Some(limit) = limit {
                let mut stmt = conn
                    .prepare(
                        "SELECT payload_json FROM session_events WHERE session_id = ?1 \
                         ORDER BY event_index ASC LIMIT ?2",
                    )
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![session_id, limit], |row| row.get::<_, String>(0))
                    .map_err(db_err)?;
                rows.collect::<std::result::Result<_, _>>().map_err(db_err)?
            } else {
                let mut stmt = conn
                    .prepare(
                        "SELECT payload_json FROM session_events WHERE session_id = ?1 \
                         ORDER BY event_index ASC",
                    )
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![session_id], |row| row.get::<_, String>(0))
                    .map_err(db_err)?;
                rows.collect::<std::result::Result<_, _>>().map_err(db_err)?
            };
            payloads
                .into_iter()
                .map(|p| serde_json::from_str(&p).map_err(Error::Json))
                .collect()
        })
        .await
    }

    /// Events beyond `after_index` (exclusive), used by the stream poller
    /// to pick up events appended since the last emitted index.
    pub async fn list_events_after(&self, session_id: &str, after_index: i64) -> Result<Vec<Event>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT payload_json FROM session_events WHERE session_id = ?1 AND event_index > ?2
                     ORDER BY event_index ASC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![session_id, after_index], |row| row.get::<_, String>(0))
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                let payload = row.map_err(db_err)?;
                out.push(serde_json::from_str(&payload)?);
            }
            Ok(out)
        })
        .await
    }

    /// Recent completed reports excluding one session, for session-memory
    /// injection into the planner.
    pub async fn get_recent_completed_reports(
        &self,
        limit: u32,
        exclude_session_id: &str,
    ) -> Result<Vec<(String, Report)>> {
        let exclude_session_id = exclude_session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, final_report_json FROM sessions
                     WHERE status = 'completed' AND session_id != ?1 AND final_report_json IS NOT NULL
                     ORDER BY updated_at DESC LIMIT ?2",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![exclude_session_id, limit], |row| {
                    let session_id: String = row.get(0)?;
                    let report_json: String = row.get(1)?;
                    Ok((session_id, report_json))
                })
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                let (session_id, report_json) = row.map_err(db_err)?;
                let report: Report = serde_json::from_str(&report_json)?;
                out.push((session_id, report));
            }
            Ok(out)
        })
        .await
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let status_str: String = row.get(2)?;
    let options_json: String = row.get(6)?;
    let state_json: String = row.get(7)?;
    let final_report_json: Option<String> = row.get(8)?;

    let status = parse_status(&status_str);
    let options: ResearchOptions = serde_json::from_str(&options_json).unwrap_or_default();
    let state: ResearchState = serde_json::from_str(&state_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let final_report = final_report_json
        .map(|j| serde_json::from_str::<Report>(&j))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Session {
        session_id: row.get(0)?,
        query: row.get(1)?,
        status,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        is_stopped: row.get::<_, i64>(5)? != 0,
        options,
        state,
        final_report,
        events_count: row.get::<_, i64>(9)? as u64,
    })
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let doc_type_str: String = row.get(2)?;
    Ok(Document {
        document_id: row.get(0)?,
        session_id: row.get(1)?,
        doc_type: if doc_type_str == "markdown" {
            DocumentType::Markdown
        } else {
            DocumentType::Json
        },
        title: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "completed" => SessionStatus::Completed,
        "stopped" => SessionStatus::Stopped,
        "error" => SessionStatus::Error,
        _ => SessionStatus::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_domain::model::EventType;

    fn sample_state(session_id: &str) -> ResearchState {
        ResearchState::new(
            session_id.to_string(),
            "what is rust".into(),
            ResearchOptions::default(),
            vec![],
            "2026-01-01T00:00:00".into(),
        )
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = PersistenceStore::open_in_memory().unwrap();
        let state = sample_state("s1");
        store
            .upsert_session(
                "s1",
                "what is rust",
                SessionStatus::Running,
                &state.options,
                &state,
                "t0",
                "t0",
                false,
            )
            .await
            .unwrap();
        store
            .upsert_session(
                "s1",
                "what is rust",
                SessionStatus::Running,
                &state.options,
                &state,
                "t0",
                "t1",
                false,
            )
            .await
            .unwrap();

        let sessions = store.list_sessions(10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].events_count, 0);
    }

    #[tokio::test]
    async fn events_get_contiguous_indices() {
        let store = PersistenceStore::open_in_memory().unwrap();
        let state = sample_state("s1");
        store
            .upsert_session("s1", "q", SessionStatus::Running, &state.options, &state, "t0", "t0", false)
            .await
            .unwrap();

        for i in 0..3 {
            let event = Event {
                event_type: EventType::Heartbeat,
                session_id: "s1".into(),
                timestamp: format!("t{i}"),
                message: "tick".into(),
                index: 0,
                fields: Default::default(),
            };
            let allocated = store.append_event("s1", &event).await.unwrap();
            assert_eq!(allocated, i);
        }

        let events = store.list_events("s1", None).await.unwrap();
        assert_eq!(events.len(), 3);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.index, i as u64);
        }

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.events_count, 3);
    }

    #[tokio::test]
    async fn delete_cascades_events_and_documents() {
        let store = PersistenceStore::open_in_memory().unwrap();
        let state = sample_state("s1");
        store
            .upsert_session("s1", "q", SessionStatus::Running, &state.options, &state, "t0", "t0", false)
            .await
            .unwrap();
        let event = Event {
            event_type: EventType::Heartbeat,
            session_id: "s1".into(),
            timestamp: "t0".into(),
            message: "tick".into(),
            index: 0,
            fields: Default::default(),
        };
        store.append_event("s1", &event).await.unwrap();

        assert!(store.delete_session("s1").await.unwrap());
        assert!(store.get_session("s1").await.unwrap().is_none());
        assert!(store.list_events("s1", None).await.unwrap().is_empty());
        assert!(!store.delete_session("s1").await.unwrap());
    }

    #[tokio::test]
    async fn recent_completed_reports_excludes_current_session() {
        let store = PersistenceStore::open_in_memory().unwrap();
        for id in ["s1", "s2"] {
            let state = sample_state(id);
            store
                .upsert_session(id, "q", SessionStatus::Running, &state.options, &state, "t0", "t0", false)
                .await
                .unwrap();
            let report = Report {
                title: format!("report for {id}"),
                executive_summary: "summary".into(),
                sections: vec![],
                sources_used: vec![],
                confidence_assessment: "high".into(),
                word_count: 10,
                error: None,
                citation_validation_warnings: vec![],
            };
            store
                .save_final_report(id, &report, "# md", "t1")
                .await
                .unwrap();
        }

        let recent = store.get_recent_completed_reports(5, "s1").await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].0, "s2");
    }
}
