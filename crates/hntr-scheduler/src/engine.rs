//! Scheduler: owns the worker pool lifecycle.
//! Workers poll the queue every `poll_interval` and stop cooperatively on a
//! single watch signal; an in-flight job finishes or hits its deadline first.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use hntr_core::{HntrConfig, Result, SchedulerConfig};
use hntr_db::Database;

use crate::queue::JobQueue;
use crate::trigger::{TriggerSummary, start_automation};
use crate::worker::{WorkerContext, run_worker};

/// The local execution backend.
pub struct Scheduler {
    ctx: WorkerContext,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Create a scheduler over `db`. Nothing runs until [`Scheduler::start`].
    pub fn new(db: Database, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let queue = JobQueue::new(db.clone())?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            ctx: WorkerContext {
                db,
                queue,
                config,
                records_limit: HntrConfig::default().records_limit,
            },
            shutdown_tx,
            workers: Vec::new(),
        })
    }

    /// Per-box record limit applied when ingesting output.
    pub fn with_records_limit(mut self, records_limit: i64) -> Self {
        self.ctx.records_limit = records_limit;
        self
    }

    /// Spawn the worker tasks. Calling it again while running is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.shutdown_tx.send_replace(false);
        for id in 0..self.ctx.config.workers {
            let rx = self.shutdown_tx.subscribe();
            self.workers
                .push(tokio::spawn(run_worker(id, self.ctx.clone(), rx)));
        }
        tracing::info!(
            "⏰ Scheduler started ({} workers, poll every {}ms)",
            self.ctx.config.workers,
            self.ctx.config.poll_interval_ms
        );
    }

    /// Signal every worker and wait for them to exit.
    pub async fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shutdown_tx.send_replace(true);
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("⚠️ Worker ended abnormally: {e}");
            }
        }
        tracing::info!("🛑 Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Fan out an automation onto the queue.
    pub fn trigger(&self, automation_id: &str) -> Result<TriggerSummary> {
        start_automation(&self.ctx.db, &self.ctx.queue, automation_id)
    }

    pub fn queue(&self) -> &JobQueue {
        &self.ctx.queue
    }
}
