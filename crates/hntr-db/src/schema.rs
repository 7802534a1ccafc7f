//! Schema creation. Idempotent: safe to run on every open.

use rusqlite::Connection;

use hntr_core::Result;

use crate::db_err;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS boxes (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        containers TEXT NOT NULL DEFAULT '[]',   -- JSON array, ordered
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS records (
        box_id TEXT NOT NULL,
        container TEXT NOT NULL,
        data TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '[]',         -- JSON array, sorted + unique
        created_at TEXT NOT NULL,
        PRIMARY KEY (box_id, container, data),
        FOREIGN KEY (box_id) REFERENCES boxes(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_records_listing
        ON records (box_id, container, created_at DESC);

    CREATE TABLE IF NOT EXISTS automations (
        id TEXT PRIMARY KEY,
        box_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        command TEXT NOT NULL,
        source_container TEXT NOT NULL,
        source_tags TEXT NOT NULL DEFAULT '[]',
        destination_container TEXT NOT NULL,
        destination_tags TEXT NOT NULL DEFAULT '[]',
        is_public INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY (box_id) REFERENCES boxes(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_automations_box ON automations (box_id);

    CREATE TABLE IF NOT EXISTS automation_events (
        id TEXT PRIMARY KEY,
        box_id TEXT NOT NULL,
        automation_id TEXT NOT NULL,
        data TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',  -- pending, scheduled, started, finished, timeout, error
        affected_rows INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        finished_at TEXT,
        FOREIGN KEY (box_id) REFERENCES boxes(id) ON DELETE CASCADE,
        FOREIGN KEY (automation_id) REFERENCES automations(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_events_automation
        ON automation_events (automation_id, created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_events_box ON automation_events (box_id, status);
";

pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    db_err!(conn.execute_batch(SCHEMA))?;
    Ok(())
}
