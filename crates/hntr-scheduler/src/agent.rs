//! Pull-model backend for external agents.
//!
//! Instead of the local worker pool, an agent running elsewhere claims jobs
//! for a box, runs the ready-made commands itself and posts the output back.
//! Both paths share the queue, the event ledger and the quota rules.

use serde::{Deserialize, Serialize};

use hntr_core::{EventStatus, HntrError, Result, SchedulerConfig};
use hntr_db::Database;

use crate::command::build_command;
use crate::executor::ingest_text;
use crate::job::Job;
use crate::queue::JobQueue;

/// A job handed to an external agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub job_id: i64,
    pub event_id: String,
    pub automation_id: String,
    pub data: String,
    /// Fully expanded command, datum already quoted.
    pub command: String,
    pub timeout_secs: u64,
}

/// What an agent reports back for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultReport {
    /// One of `finished`, `timeout`, `error`.
    pub status: EventStatus,
    /// Raw stdout; one record per non-empty line.
    #[serde(default)]
    pub output: String,
}

pub struct RemoteAgent {
    db: Database,
    queue: JobQueue,
    config: SchedulerConfig,
    records_limit: i64,
}

impl RemoteAgent {
    pub fn new(db: Database, queue: JobQueue, config: SchedulerConfig, records_limit: i64) -> Self {
        Self {
            db,
            queue,
            config,
            records_limit,
        }
    }

    /// Claim up to `limit` jobs of a box and mark their events started.
    ///
    /// Unusable jobs are acked and left out of the result.
    pub fn dequeue(&self, box_id: &str, limit: usize) -> Result<Vec<Assignment>> {
        let claimed = self
            .queue
            .dequeue_for_box(box_id, self.config.lease(), limit)?;
        let mut assignments = Vec::with_capacity(claimed.len());

        for queued in claimed {
            let Job::RunAutomation(args) = match queued.decode() {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("🗑️ Dropping undecodable job: {e}");
                    self.ack(queued.id);
                    continue;
                }
            };

            match self.db.mark_started(&args.event_id) {
                Ok(true) => {}
                Ok(false) | Err(HntrError::NotFound(_)) => {
                    self.ack(queued.id);
                    continue;
                }
                Err(e) => {
                    tracing::error!(event_id = %args.event_id, "❌ Could not mark event started: {e}");
                    continue;
                }
            }

            let command = match build_command(&args.automation.command, &args.data) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(event_id = %args.event_id, "⚠️ {e}");
                    if let Err(e) = self.db.mark_finished(&args.event_id, EventStatus::Error, 0) {
                        tracing::warn!(event_id = %args.event_id, "⚠️ Could not mark event error: {e}");
                    }
                    self.ack(queued.id);
                    continue;
                }
            };

            assignments.push(Assignment {
                job_id: queued.id,
                event_id: args.event_id,
                automation_id: args.automation.id,
                data: args.data,
                command,
                timeout_secs: self.config.job_timeout_secs,
            });
        }

        if !assignments.is_empty() {
            tracing::info!("📤 Handed {} jobs of box {} to an agent", assignments.len(), box_id);
        }
        Ok(assignments)
    }

    /// Record an agent's result: ingest its output under the box quota, set
    /// the terminal status and ack the job. Returns the rows created.
    ///
    /// A result for an event that is already terminal is acknowledged and
    /// ignored.
    pub fn submit_result(&self, box_id: &str, event_id: &str, report: ResultReport) -> Result<i64> {
        if !report.status.is_terminal() {
            return Err(HntrError::Validation(format!(
                "result status must be finished, timeout or error, got '{}'",
                report.status
            )));
        }
        let event = self.db.get_event(event_id)?;
        if event.box_id != box_id {
            return Err(HntrError::NotFound(format!(
                "automation event {event_id} in box {box_id}"
            )));
        }
        if event.status.is_terminal() {
            self.queue.complete_for_event(event_id)?;
            return Ok(0);
        }

        let automation = self.db.get_automation(&event.automation_id)?;
        let quota = self.db.remaining_quota(box_id, self.records_limit)?;
        let affected = ingest_text(
            &self.db,
            &automation,
            &report.output,
            quota,
            self.config.batch_size,
        )?;

        if !self.db.mark_finished(event_id, report.status, affected)? {
            tracing::warn!(event_id, "⚠️ Event was finished concurrently");
        }
        self.queue.complete_for_event(event_id)?;
        tracing::info!(
            event_id,
            "✅ Agent result for '{}': {} ({} rows)",
            automation.name,
            report.status,
            affected
        );
        Ok(affected)
    }

    fn ack(&self, job_id: i64) {
        if let Err(e) = self.queue.complete(job_id) {
            tracing::warn!("⚠️ Failed to ack job {job_id}: {e}");
        }
    }
}
