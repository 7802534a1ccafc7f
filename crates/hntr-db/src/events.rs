//! Automation event ledger.
//!
//! Status changes go through one conditional UPDATE whose WHERE clause lists
//! the states allowed to move to the target, so a late or duplicate writer
//! can never push an event backwards or out of a terminal state.

use rusqlite::{OptionalExtension, params};

use hntr_core::{AutomationEvent, EventCount, EventStatus, HntrError, Result};

use crate::{Database, db_err, parse_timestamp, timestamp};

const COLUMNS: &str =
    "id, box_id, automation_id, data, status, affected_rows, created_at, finished_at";

fn parse_status(idx: usize, raw: String) -> rusqlite::Result<EventStatus> {
    raw.parse().map_err(|e: HntrError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Like `db_err!`, but a row that doesn't fit the ledger model is a decode
/// error rather than a storage failure.
fn read_err(e: rusqlite::Error) -> HntrError {
    match e {
        bad @ rusqlite::Error::FromSqlConversionFailure(..) => HntrError::Decode(bad.to_string()),
        other => HntrError::Storage(other.to_string()),
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AutomationEvent> {
    let status = parse_status(4, row.get(4)?)?;
    let created_at: String = row.get(6)?;
    let finished_at: Option<String> = row.get(7)?;
    Ok(AutomationEvent {
        id: row.get(0)?,
        box_id: row.get(1)?,
        automation_id: row.get(2)?,
        data: row.get(3)?,
        status,
        affected_rows: row.get(5)?,
        created_at: parse_timestamp(&created_at),
        finished_at: finished_at.map(|s| parse_timestamp(&s)),
    })
}

/// `'pending', 'scheduled', ...` for the states that may precede `next`.
fn predecessor_list(next: EventStatus) -> String {
    EventStatus::predecessors(next)
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Database {
    /// Record a new `pending` event for one matched datum.
    pub fn create_event(
        &self,
        box_id: &str,
        automation_id: &str,
        data: &str,
    ) -> Result<AutomationEvent> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = timestamp();
        let conn = self.conn()?;
        db_err!(conn.execute(
            "INSERT INTO automation_events (id, box_id, automation_id, data, status, affected_rows, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![id, box_id, automation_id, data, EventStatus::Pending.as_str(), created_at],
        ))?;
        Ok(AutomationEvent {
            id,
            box_id: box_id.to_string(),
            automation_id: automation_id.to_string(),
            data: data.to_string(),
            status: EventStatus::Pending,
            affected_rows: 0,
            created_at: parse_timestamp(&created_at),
            finished_at: None,
        })
    }

    pub fn get_event(&self, id: &str) -> Result<AutomationEvent> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM automation_events WHERE id = ?1"),
            [id],
            row_to_event,
        )
        .optional()
        .map_err(read_err)?
        .ok_or_else(|| HntrError::NotFound(format!("automation event {id}")))
    }

    /// Newest events of an automation first.
    pub fn list_events(&self, automation_id: &str, limit: usize) -> Result<Vec<AutomationEvent>> {
        let conn = self.conn()?;
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {COLUMNS} FROM automation_events
             WHERE automation_id = ?1
             ORDER BY created_at DESC, id
             LIMIT ?2"
        )))?;
        let rows = db_err!(stmt.query_map(params![automation_id, limit as i64], row_to_event))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    /// Event counts per (automation, status) within a box.
    pub fn event_counts(&self, box_id: &str) -> Result<Vec<EventCount>> {
        let conn = self.conn()?;
        let mut stmt = db_err!(conn.prepare(
            "SELECT automation_id, status, COUNT(*) FROM automation_events
             WHERE box_id = ?1
             GROUP BY automation_id, status
             ORDER BY automation_id, status"
        ))?;
        let rows = db_err!(stmt.query_map([box_id], |row| {
            Ok(EventCount {
                automation_id: row.get(0)?,
                status: parse_status(1, row.get(1)?)?,
                count: row.get(2)?,
            })
        }))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    /// Move an event to `next` if its current status allows it.
    ///
    /// Returns `Ok(false)` when the guard rejected the move (the event is
    /// already at or past `next`), `NotFound` when the event doesn't exist.
    /// `affected_rows` is left unchanged when `None`.
    pub fn transition_event(
        &self,
        id: &str,
        next: EventStatus,
        affected_rows: Option<i64>,
    ) -> Result<bool> {
        let allowed = predecessor_list(next);
        if allowed.is_empty() {
            return Ok(false);
        }
        let finished_at = next.is_terminal().then(timestamp);
        let sql = format!(
            "UPDATE automation_events SET
                status = ?1,
                affected_rows = COALESCE(?2, affected_rows),
                finished_at = COALESCE(?3, finished_at)
             WHERE id = ?4 AND status IN ({allowed})"
        );

        let conn = self.conn()?;
        let changed = db_err!(conn.execute(
            &sql,
            params![next.as_str(), affected_rows, finished_at, id],
        ))?;
        if changed == 1 {
            return Ok(true);
        }
        let exists: Option<i64> = db_err!(
            conn.query_row("SELECT 1 FROM automation_events WHERE id = ?1", [id], |r| r.get(0))
                .optional()
        )?;
        match exists {
            Some(_) => Ok(false),
            None => Err(HntrError::NotFound(format!("automation event {id}"))),
        }
    }

    pub fn mark_scheduled(&self, id: &str) -> Result<bool> {
        self.transition_event(id, EventStatus::Scheduled, None)
    }

    pub fn mark_started(&self, id: &str) -> Result<bool> {
        self.transition_event(id, EventStatus::Started, None)
    }

    /// Record a terminal status with the number of rows ingested.
    pub fn mark_finished(&self, id: &str, status: EventStatus, affected_rows: i64) -> Result<bool> {
        if !status.is_terminal() {
            return Err(HntrError::Validation(format!(
                "'{status}' is not a terminal event status"
            )));
        }
        self.transition_event(id, status, Some(affected_rows))
    }

    /// Remove the terminal events of a box; in-flight events stay.
    pub fn clear_events(&self, box_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = db_err!(conn.execute(
            "DELETE FROM automation_events
             WHERE box_id = ?1 AND status IN ('finished', 'timeout', 'error')",
            [box_id],
        ))?;
        tracing::info!("🧹 Cleared {removed} finished events in box {box_id}");
        Ok(removed)
    }
}
