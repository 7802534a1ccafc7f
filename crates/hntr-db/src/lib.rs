//! SQLite-backed storage for hntr.
//!
//! One `Database` handle is shared (cloned) by the CLI, the trigger path and
//! every worker. The connection sits behind a mutex; each operation takes the
//! lock for the duration of one statement or one short transaction and never
//! across an `.await`, so no transaction ever spans process execution.
//!
//! ## Tables
//! ```text
//! boxes              id, name, containers (JSON array)
//!   ├── records      (box_id, container, data) unique, tags (JSON array)
//!   └── automations  source/destination container + tags, command template
//!         └── automation_events   status ledger, affected_rows
//! ```

mod automations;
mod boxes;
mod events;
mod records;
mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use hntr_core::{HntrError, Result};

pub use boxes::DEFAULT_CONTAINERS;

/// Convert a rusqlite result into `HntrError::Storage`.
#[macro_export]
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| ::hntr_core::HntrError::Storage(e.to_string()))
    };
}

/// Shared SQLite handle.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = db_err!(Connection::open(path))?;
        // WAL: readers (CLI listings) don't block worker ingestion.
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=10000;
            "
        ))?;
        Self::init(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = db_err!(Connection::open_in_memory())?;
        db_err!(conn.execute_batch("PRAGMA foreign_keys=ON;"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the connection. Sibling crates (the job queue) keep their own
    /// tables in the same file and go through here.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HntrError::Storage(format!("Lock: {e}")))
    }
}

/// Current time in the fixed-width text form used by every table;
/// lexical order equals chronological order.
pub fn timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".into())
}

pub(crate) fn tags_from_json(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}
