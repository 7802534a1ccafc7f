//! # hntr Scheduler
//!
//! Durable job queue and worker pool that turn stored records into command
//! runs, and command output back into records.
//!
//! ## Design Principles
//! - No external broker: jobs live in the same SQLite file as the data
//! - At-least-once delivery via leases; the event ledger absorbs duplicates
//! - Workers poll; no push wakeups
//! - No DB transaction is ever open while a command runs
//!
//! ## Architecture
//! ```text
//! start_automation (trigger)
//!   ├── list source records matching source_tags
//!   └── per record: event(pending) → enqueue → event(scheduled)
//!
//! JobQueue (SQLite `jobs`, leased)
//!   ├── Local backend:  Scheduler → N workers poll every 1s
//!   │                     └── handle_job → mark started → run_automation
//!   │                           ├── <shell> -c "<template with quoted datum>"
//!   │                           ├── stdout → batch_insert (quota) → destination
//!   │                           └── finished | timeout | error
//!   └── Remote backend: RemoteAgent.dequeue → external runner → submit_result
//! ```

pub mod agent;
pub mod command;
pub mod engine;
pub mod executor;
pub mod job;
pub mod queue;
pub mod trigger;
pub mod worker;

pub use agent::{Assignment, RemoteAgent, ResultReport};
pub use command::build_command;
pub use engine::Scheduler;
pub use executor::{ExecutionOutcome, run_automation};
pub use job::{Job, RunAutomationArgs};
pub use queue::{JobQueue, QueuedJob};
pub use trigger::{TriggerSummary, start_automation};
pub use worker::{JobDisposition, WorkerContext, handle_job};
