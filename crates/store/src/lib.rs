//! SQLite-backed persistence for research sessions, their event logs, and
//! generated report documents.
//!
//! Three tables: `sessions`, `session_events`, `session_documents` — matching
//! exactly what the session manager needs to recover from a restart and
//! replay an event stream. All writes go through one `std::sync::Mutex`
//! around the connection, accessed via `spawn_blocking`, so they serialize
//! the way a single-writer embedded database expects.

mod schema;
mod store;

pub use store::PersistenceStore;
