//! Durable job queue stored alongside the data.
//!
//! A dequeue leases the job by setting `locked_until`; an ack deletes it.
//! If a consumer dies before acking, the lease expires and the job becomes
//! visible again, so delivery is at-least-once.
//!
//! Each job references its event; deleting the event (directly or through
//! its automation or box) deletes the job with it.

use std::time::Duration;

use chrono::Utc;
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use hntr_core::{HntrError, Result};
use hntr_db::{Database, db_err, format_timestamp, timestamp};

use crate::job::Job;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_type TEXT NOT NULL,
        payload TEXT NOT NULL,          -- JSON {type, args}
        box_id TEXT NOT NULL,
        event_id TEXT NOT NULL,
        run_at TEXT NOT NULL,
        locked_until TEXT,              -- NULL = visible
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY (event_id) REFERENCES automation_events(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_visible ON jobs (run_at, id);
    CREATE INDEX IF NOT EXISTS idx_jobs_box ON jobs (box_id, run_at);
    CREATE INDEX IF NOT EXISTS idx_jobs_event ON jobs (event_id);
";

const VISIBLE: &str = "run_at <= ?1 AND (locked_until IS NULL OR locked_until <= ?1)";

/// A leased job as stored; the payload is decoded on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: i64,
    pub job_type: String,
    pub payload: String,
    /// Deliveries so far, this one included.
    pub attempts: i64,
}

impl QueuedJob {
    pub fn decode(&self) -> Result<Job> {
        serde_json::from_str(&self.payload)
            .map_err(|e| HntrError::Decode(format!("job {} ({}): {e}", self.id, self.job_type)))
    }
}

fn lease_until(lease: Duration) -> String {
    let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(60));
    format_timestamp(Utc::now() + lease)
}

/// Handle to the `jobs` table. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    /// Attach to the database, creating the `jobs` table if needed.
    pub fn new(db: Database) -> Result<Self> {
        {
            let conn = db.conn()?;
            db_err!(conn.execute_batch(SCHEMA))?;
        }
        Ok(Self { db })
    }

    /// Persist a job; it is durable once this returns.
    pub fn enqueue(&self, job: &Job) -> Result<i64> {
        let payload = serde_json::to_string(job)
            .map_err(|e| HntrError::Queue(format!("Encode job: {e}")))?;
        let now = timestamp();
        let conn = self.db.conn()?;
        db_err!(conn.execute(
            "INSERT INTO jobs (job_type, payload, box_id, event_id, run_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![job.job_type(), payload, job.box_id(), job.event_id(), now],
        ))?;
        let id = conn.last_insert_rowid();
        tracing::debug!(job_id = id, event_id = %job.event_id(), "📥 Job enqueued");
        Ok(id)
    }

    /// Claim the oldest visible job and hide it for `lease`.
    pub fn dequeue(&self, lease: Duration) -> Result<Option<QueuedJob>> {
        let now = timestamp();
        let until = lease_until(lease);
        let mut conn = self.db.conn()?;
        let tx = db_err!(conn.transaction_with_behavior(TransactionBehavior::Immediate))?;
        let claimed = db_err!(
            tx.query_row(
                &format!(
                    "SELECT id, job_type, payload, attempts FROM jobs
                     WHERE {VISIBLE} ORDER BY run_at, id LIMIT 1"
                ),
                [&now],
                |row| {
                    Ok(QueuedJob {
                        id: row.get(0)?,
                        job_type: row.get(1)?,
                        payload: row.get(2)?,
                        attempts: row.get(3)?,
                    })
                },
            )
            .optional()
        )?;
        let Some(mut job) = claimed else {
            return Ok(None);
        };
        db_err!(tx.execute(
            "UPDATE jobs SET locked_until = ?1, attempts = attempts + 1 WHERE id = ?2",
            params![until, job.id],
        ))?;
        db_err!(tx.commit())?;
        job.attempts += 1;
        Ok(Some(job))
    }

    /// Claim up to `limit` visible jobs of one box (pull-model agents).
    pub fn dequeue_for_box(
        &self,
        box_id: &str,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<QueuedJob>> {
        let now = timestamp();
        let until = lease_until(lease);
        let mut conn = self.db.conn()?;
        let tx = db_err!(conn.transaction_with_behavior(TransactionBehavior::Immediate))?;
        let jobs = {
            let mut stmt = db_err!(tx.prepare(&format!(
                "SELECT id, job_type, payload, attempts FROM jobs
                 WHERE {VISIBLE} AND box_id = ?2 ORDER BY run_at, id LIMIT ?3"
            )))?;
            let rows = db_err!(stmt.query_map(params![now, box_id, limit as i64], |row| {
                Ok(QueuedJob {
                    id: row.get(0)?,
                    job_type: row.get(1)?,
                    payload: row.get(2)?,
                    attempts: row.get::<_, i64>(3)? + 1,
                })
            }))?;
            db_err!(rows.collect::<rusqlite::Result<Vec<_>>>())?
        };
        for job in &jobs {
            db_err!(tx.execute(
                "UPDATE jobs SET locked_until = ?1, attempts = attempts + 1 WHERE id = ?2",
                params![until, job.id],
            ))?;
        }
        db_err!(tx.commit())?;
        Ok(jobs)
    }

    /// Acknowledge a job. Returns false if it was already gone.
    pub fn complete(&self, job_id: i64) -> Result<bool> {
        let conn = self.db.conn()?;
        let removed = db_err!(conn.execute("DELETE FROM jobs WHERE id = ?1", [job_id]))?;
        Ok(removed > 0)
    }

    /// Acknowledge every job tracking an event.
    pub fn complete_for_event(&self, event_id: &str) -> Result<usize> {
        let conn = self.db.conn()?;
        db_err!(conn.execute("DELETE FROM jobs WHERE event_id = ?1", [event_id]))
    }

    /// Jobs not yet acknowledged, leased or not.
    pub fn pending_count(&self) -> Result<i64> {
        let conn = self.db.conn()?;
        db_err!(conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hntr_core::NewAutomation;

    fn setup() -> (JobQueue, Job) {
        let (queue, job, _) = setup_with_db();
        (queue, job)
    }

    fn setup_with_db() -> (JobQueue, Job, Database) {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        let a = db
            .create_automation(
                &b.id,
                NewAutomation {
                    name: "echo".into(),
                    command: "echo {data}".into(),
                    source_container: "hostnames".into(),
                    destination_container: "urls".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let event = db.create_event(&b.id, &a.id, "example.com").unwrap();
        let queue = JobQueue::new(db.clone()).unwrap();
        (queue, Job::run_automation(&event.id, a, "example.com"), db)
    }

    #[test]
    fn test_enqueue_dequeue_complete() {
        let (queue, job) = setup();
        let id = queue.enqueue(&job).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);

        let claimed = queue.dequeue(Duration::from_secs(60)).unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.decode().unwrap(), job);

        // Leased: invisible to a second consumer.
        assert!(queue.dequeue(Duration::from_secs(60)).unwrap().is_none());

        assert!(queue.complete(id).unwrap());
        assert!(!queue.complete(id).unwrap());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let (queue, job) = setup();
        let first = queue.enqueue(&job).unwrap();
        let second = queue.enqueue(&job).unwrap();
        let lease = Duration::from_secs(60);
        assert_eq!(queue.dequeue(lease).unwrap().unwrap().id, first);
        assert_eq!(queue.dequeue(lease).unwrap().unwrap().id, second);
    }

    #[test]
    fn test_expired_lease_redelivers() {
        let (queue, job) = setup();
        queue.enqueue(&job).unwrap();
        let first = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let again = queue.dequeue(Duration::from_secs(60)).unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn test_dequeue_for_box_and_complete_for_event() {
        let (queue, job) = setup();
        queue.enqueue(&job).unwrap();
        queue.enqueue(&job).unwrap();
        let lease = Duration::from_secs(60);

        assert!(queue.dequeue_for_box("other-box", lease, 10).unwrap().is_empty());
        let claimed = queue.dequeue_for_box(job.box_id(), lease, 1).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(queue.dequeue_for_box(job.box_id(), lease, 10).unwrap().len(), 1);

        assert_eq!(queue.complete_for_event(job.event_id()).unwrap(), 2);
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_deleting_box_or_automation_removes_jobs() {
        let (queue, job, db) = setup_with_db();
        queue.enqueue(&job).unwrap();
        queue.enqueue(&job).unwrap();
        let Job::RunAutomation(args) = &job;
        db.delete_automation(&args.automation.id).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);

        let (queue, job, db) = setup_with_db();
        queue.enqueue(&job).unwrap();
        db.delete_box(job.box_id()).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert!(queue.dequeue(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_enqueue_for_missing_event_fails() {
        let (queue, job) = setup();
        let Job::RunAutomation(args) = job;
        let orphan = Job::run_automation("no-such-event", args.automation, "example.com");
        assert!(queue.enqueue(&orphan).is_err());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_malformed_payload_fails_decode() {
        let bad = QueuedJob {
            id: 7,
            job_type: "RunAutomation".into(),
            payload: "{not json".into(),
            attempts: 1,
        };
        assert!(matches!(bad.decode(), Err(HntrError::Decode(_))));
    }
}
