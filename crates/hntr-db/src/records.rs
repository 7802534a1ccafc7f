//! Record store: tag-indexed text records scoped to (box, container).
//!
//! Tags are stored as a sorted JSON array; tag filters use AND semantics
//! evaluated with `json_each`: a record matches when no filter tag is
//! missing from its tag array.

use rusqlite::{Connection, params};

use hntr_core::validate::{clean_tags, validate_tags};
use hntr_core::{
    BatchSummary, HntrError, InsertOutcome, OnConflict, Record, RecordFilter, Result,
};

use crate::{Database, db_err, parse_timestamp, tags_from_json, tags_to_json, timestamp};

const FILTER_CLAUSE: &str = "
    box_id = ?1 AND container = ?2
    AND NOT EXISTS (
        SELECT 1 FROM json_each(?3) AS f
        WHERE f.value NOT IN (SELECT value FROM json_each(records.tags))
    )
    AND (?4 IS NULL OR instr(data, ?4) > 0)
";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let tags: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(Record {
        box_id: row.get(0)?,
        container: row.get(1)?,
        data: row.get(2)?,
        tags: tags_from_json(&tags),
        created_at: parse_timestamp(&created_at),
    })
}

/// Insert one row; `tags_json` must already be normalised so the
/// update-mode comparison is exact.
fn insert_one(
    conn: &Connection,
    box_id: &str,
    container: &str,
    data: &str,
    tags_json: &str,
    on_conflict: OnConflict,
) -> Result<InsertOutcome> {
    let created = db_err!(conn.execute(
        "INSERT INTO records (box_id, container, data, tags, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (box_id, container, data) DO NOTHING",
        params![box_id, container, data, tags_json, timestamp()],
    ))?;
    if created == 1 {
        return Ok(InsertOutcome::Created);
    }
    if on_conflict == OnConflict::Skip {
        return Ok(InsertOutcome::Skipped);
    }
    let updated = db_err!(conn.execute(
        "UPDATE records SET tags = ?4
         WHERE box_id = ?1 AND container = ?2 AND data = ?3 AND tags != ?4",
        params![box_id, container, data, tags_json],
    ))?;
    Ok(if updated == 1 {
        InsertOutcome::Updated
    } else {
        InsertOutcome::Skipped
    })
}

impl Database {
    /// List records newest first; ties broken by data then tags so that
    /// pagination is reproducible.
    pub fn list_records(
        &self,
        box_id: &str,
        container: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT box_id, container, data, tags, created_at FROM records
             WHERE {FILTER_CLAUSE}
             ORDER BY created_at DESC, data, tags
             LIMIT ?5 OFFSET ?6"
        );
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let conn = self.conn()?;
        let mut stmt = db_err!(conn.prepare(&sql))?;
        let rows = db_err!(stmt.query_map(
            params![
                box_id,
                container,
                tags_to_json(&filter.tags),
                filter.text,
                limit,
                filter.offset as i64
            ],
            row_to_record,
        ))?;
        db_err!(rows.collect::<rusqlite::Result<Vec<_>>>())
    }

    /// Count records under the same filter as `list_records` (limit and
    /// offset ignored). A point-in-time snapshot.
    pub fn count_records(
        &self,
        box_id: &str,
        container: &str,
        filter: &RecordFilter,
    ) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM records WHERE {FILTER_CLAUSE}");
        let conn = self.conn()?;
        db_err!(conn.query_row(
            &sql,
            params![box_id, container, tags_to_json(&filter.tags), filter.text],
            |r| r.get(0),
        ))
    }

    /// Total records in a box, the basis of the quota.
    pub fn count_records_by_box(&self, box_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        db_err!(conn.query_row(
            "SELECT COUNT(*) FROM records WHERE box_id = ?1",
            [box_id],
            |r| r.get(0),
        ))
    }

    /// Rows a box may still admit: `records_limit - count - 1`, floored at 0.
    ///
    /// Read without a lock; concurrent ingestions may overshoot slightly.
    pub fn remaining_quota(&self, box_id: &str, records_limit: i64) -> Result<i64> {
        let count = self.count_records_by_box(box_id)?;
        Ok((records_limit - count - 1).max(0))
    }

    /// Insert a single record.
    pub fn insert_record(
        &self,
        box_id: &str,
        container: &str,
        data: &str,
        tags: &[String],
        on_conflict: OnConflict,
    ) -> Result<InsertOutcome> {
        let tags_json = tags_to_json(&clean_tags(tags.to_vec()));
        let conn = self.conn()?;
        insert_one(&conn, box_id, container, data.trim(), &tags_json, on_conflict)
    }

    /// Insert one record per non-empty (trimmed) line.
    ///
    /// Admission stops once `quota_remaining` rows have been created or
    /// updated; skipped duplicates don't consume quota. Runs in one short
    /// transaction; callers streaming process output call this once per chunk.
    pub fn batch_insert<I>(
        &self,
        box_id: &str,
        container: &str,
        lines: I,
        tags: &[String],
        quota_remaining: i64,
        on_conflict: OnConflict,
    ) -> Result<BatchSummary>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let tags_json = tags_to_json(&clean_tags(tags.to_vec()));
        let mut summary = BatchSummary::default();

        let mut conn = self.conn()?;
        let tx = db_err!(conn.transaction())?;
        for line in lines {
            let data = line.as_ref().trim();
            if data.is_empty() {
                continue;
            }
            if summary.affected() >= quota_remaining {
                summary.stopped_by_quota = true;
                break;
            }
            let outcome = insert_one(&tx, box_id, container, data, &tags_json, on_conflict)?;
            summary.record(outcome);
        }
        db_err!(tx.commit())?;

        if summary.stopped_by_quota {
            tracing::warn!(
                "⚠️ Quota reached for box {} ({} rows admitted)",
                box_id,
                summary.affected()
            );
        }
        Ok(summary)
    }

    /// Manual ingestion into a declared container of a box, bounded by the
    /// box quota derived from `records_limit`.
    pub fn add_records<I>(
        &self,
        box_id: &str,
        container: &str,
        lines: I,
        tags: &[String],
        records_limit: i64,
        on_conflict: OnConflict,
    ) -> Result<BatchSummary>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let b = self.get_box(box_id)?;
        if !b.has_container(container) {
            return Err(HntrError::NotFound(format!(
                "container '{container}' in box {box_id}"
            )));
        }
        let tags = clean_tags(tags.to_vec());
        validate_tags(&tags)?;
        let quota = self.remaining_quota(box_id, records_limit)?;
        self.batch_insert(box_id, container, lines, &tags, quota, on_conflict)
    }

    /// Replace the tags of every listed record atomically.
    pub fn update_record_tags(
        &self,
        box_id: &str,
        container: &str,
        data: &[String],
        tags: &[String],
    ) -> Result<usize> {
        let tags_json = tags_to_json(&clean_tags(tags.to_vec()));
        let mut conn = self.conn()?;
        let tx = db_err!(conn.transaction())?;
        let mut changed = 0;
        for d in data {
            changed += db_err!(tx.execute(
                "UPDATE records SET tags = ?1 WHERE box_id = ?2 AND container = ?3 AND data = ?4",
                params![tags_json, box_id, container, d],
            ))?;
        }
        db_err!(tx.commit())?;
        Ok(changed)
    }

    pub fn delete_records(&self, box_id: &str, container: &str, data: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = db_err!(conn.transaction())?;
        let mut deleted = 0;
        for d in data {
            deleted += db_err!(tx.execute(
                "DELETE FROM records WHERE box_id = ?1 AND container = ?2 AND data = ?3",
                params![box_id, container, d],
            ))?;
        }
        db_err!(tx.commit())?;
        Ok(deleted)
    }
}
