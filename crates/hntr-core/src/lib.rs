//! # hntr core
//!
//! Shared vocabulary for the hntr workspace: configuration, the error type,
//! the data model (boxes, records, automations, events) and the validation
//! rules applied at the boundary before anything is stored or scheduled.

pub mod config;
pub mod error;
pub mod types;
pub mod validate;

pub use config::{ExecutionBackend, HntrConfig, SchedulerConfig};
pub use error::{HntrError, Result};
pub use types::{
    Automation, AutomationEvent, AutomationWithCount, BatchSummary, BoxRecord, EventCount,
    EventStatus, InsertOutcome, NewAutomation, OnConflict, Record, RecordFilter,
};
