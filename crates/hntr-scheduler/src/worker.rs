//! Per-job handling and the worker poll loop.

use tokio::sync::watch;

use hntr_core::{EventStatus, HntrError, SchedulerConfig};
use hntr_db::Database;

use crate::executor::{ExecutionOutcome, run_automation};
use crate::job::Job;
use crate::queue::{JobQueue, QueuedJob};

/// Everything a worker needs; cloned into each worker task.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: Database,
    pub queue: JobQueue,
    pub config: SchedulerConfig,
    pub records_limit: i64,
}

/// What became of a dequeued job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobDisposition {
    /// Command ran; the event holds the outcome.
    Executed(ExecutionOutcome),
    /// Payload or referenced event unusable; job removed.
    Dropped,
    /// Event already terminal (duplicate delivery); job removed.
    AlreadyDone,
    /// Event status couldn't be recorded; job left leased for redelivery.
    Deferred,
}

/// Process one leased job end to end.
///
/// The command never runs unless the event was first moved to `started`.
/// Status-update failures after the run are logged and never retried.
pub async fn handle_job(ctx: &WorkerContext, queued: QueuedJob) -> JobDisposition {
    let job = match queued.decode() {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!("🗑️ Dropping undecodable job: {e}");
            ack(&ctx.queue, queued.id);
            return JobDisposition::Dropped;
        }
    };
    let Job::RunAutomation(args) = job;
    let event_id = args.event_id.as_str();

    match ctx.db.mark_started(event_id) {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(event_id, "⏭️ Event already finished, skipping redelivered job");
            ack(&ctx.queue, queued.id);
            return JobDisposition::AlreadyDone;
        }
        Err(HntrError::NotFound(_)) => {
            tracing::warn!(event_id, "🗑️ Event no longer exists, dropping job {}", queued.id);
            ack(&ctx.queue, queued.id);
            return JobDisposition::Dropped;
        }
        Err(e) => {
            tracing::error!(event_id, "❌ Could not mark event started: {e}");
            return JobDisposition::Deferred;
        }
    }

    tracing::info!(
        event_id,
        attempt = queued.attempts,
        "▶️ Running '{}' on {}",
        args.automation.name,
        args.data
    );
    let outcome = run_automation(
        &ctx.db,
        &ctx.config,
        ctx.records_limit,
        &args.automation,
        &args.data,
    )
    .await;

    match ctx
        .db
        .mark_finished(event_id, outcome.status, outcome.affected_rows)
    {
        Ok(true) => tracing::info!(
            event_id,
            "✅ '{}' {} ({} rows)",
            args.automation.name,
            outcome.status,
            outcome.affected_rows
        ),
        Ok(false) => tracing::warn!(event_id, "⚠️ Event was finished by another run"),
        Err(e) => tracing::error!(event_id, "❌ Could not record event outcome: {e}"),
    }
    if outcome.status == EventStatus::Error && !outcome.stderr_tail.is_empty() {
        tracing::warn!(event_id, "stderr: {}", outcome.stderr_tail.trim_end());
    }

    ack(&ctx.queue, queued.id);
    JobDisposition::Executed(outcome)
}

fn ack(queue: &JobQueue, job_id: i64) {
    if let Err(e) = queue.complete(job_id) {
        tracing::warn!("⚠️ Failed to ack job {job_id}: {e}");
    }
}

/// Poll the queue until shutdown is signalled. An in-flight job always runs
/// to completion (or its deadline) before the loop checks the signal again.
pub(crate) async fn run_worker(id: usize, ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("👷 Worker {id} started");
    let lease = ctx.config.lease();
    loop {
        if *shutdown.borrow() {
            break;
        }
        match ctx.queue.dequeue(lease) {
            Ok(Some(job)) => {
                handle_job(&ctx, job).await;
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("⚠️ Worker {id} failed to poll queue: {e}"),
        }
        tokio::select! {
            _ = tokio::time::sleep(ctx.config.poll_interval()) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("👷 Worker {id} stopped");
}
