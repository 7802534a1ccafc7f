//! Data model: boxes, records, automations and the event ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HntrError;
use crate::validate;

/// A namespaced scope holding one or more record containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub id: String,
    pub name: String,
    pub containers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl BoxRecord {
    pub fn has_container(&self, container: &str) -> bool {
        self.containers.iter().any(|c| c == container)
    }
}

/// A tagged unit of text data within a box/container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub box_id: String,
    pub container: String,
    pub data: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An external command run once per matching record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    pub box_id: String,
    pub name: String,
    pub description: String,
    /// Command template; `{data}` stands in for the record datum.
    pub command: String,
    pub source_container: String,
    pub source_tags: Vec<String>,
    pub destination_container: String,
    pub destination_tags: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

/// Automation as listed for a box, with the size of its current input set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationWithCount {
    #[serde(flatten)]
    pub automation: Automation,
    pub source_count: i64,
}

/// Input for creating or updating an automation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAutomation {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    pub source_container: String,
    #[serde(default)]
    pub source_tags: Vec<String>,
    pub destination_container: String,
    #[serde(default)]
    pub destination_tags: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
}

impl NewAutomation {
    /// Validate and normalise the definition (tags cleaned, names trimmed).
    pub fn validate(mut self) -> Result<Self, HntrError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() || self.name.chars().count() > validate::MAX_NAME_LEN {
            return Err(HntrError::Validation(format!(
                "automation name must be 1-{} characters",
                validate::MAX_NAME_LEN
            )));
        }
        validate::validate_command_template(&self.command)?;
        self.source_container = self.source_container.trim().to_lowercase();
        self.destination_container = self.destination_container.trim().to_lowercase();
        validate::validate_container_name(&self.source_container)?;
        validate::validate_container_name(&self.destination_container)?;
        self.source_tags = validate::clean_tags(self.source_tags);
        self.destination_tags = validate::clean_tags(self.destination_tags);
        validate::validate_tags(&self.source_tags)?;
        validate::validate_tags(&self.destination_tags)?;
        Ok(self)
    }
}

/// Lifecycle of one automation execution.
///
/// `pending → scheduled → started → {finished | timeout | error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Scheduled,
    Started,
    Finished,
    Timeout,
    Error,
}

impl EventStatus {
    pub const ALL: [EventStatus; 6] = [
        EventStatus::Pending,
        EventStatus::Scheduled,
        EventStatus::Started,
        EventStatus::Finished,
        EventStatus::Timeout,
        EventStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Scheduled => "scheduled",
            EventStatus::Started => "started",
            EventStatus::Finished => "finished",
            EventStatus::Timeout => "timeout",
            EventStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Finished | EventStatus::Timeout | EventStatus::Error
        )
    }

    /// Position in the lifecycle; all terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            EventStatus::Pending => 0,
            EventStatus::Scheduled => 1,
            EventStatus::Started => 2,
            EventStatus::Finished | EventStatus::Timeout | EventStatus::Error => 3,
        }
    }

    /// Forward-only moves. `started → started` is allowed so that a
    /// redelivered job can re-enter a run that never reached a terminal state.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            EventStatus::Started => next.rank() >= self.rank(),
            _ => next.rank() > self.rank(),
        }
    }

    /// Every state from which `next` may be entered.
    pub fn predecessors(next: EventStatus) -> Vec<EventStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = HntrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "scheduled" => Ok(EventStatus::Scheduled),
            "started" => Ok(EventStatus::Started),
            "finished" => Ok(EventStatus::Finished),
            "timeout" => Ok(EventStatus::Timeout),
            "error" => Ok(EventStatus::Error),
            other => Err(HntrError::Decode(format!("unknown event status '{other}'"))),
        }
    }
}

/// One execution attempt of an automation against one datum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationEvent {
    pub id: String,
    pub box_id: String,
    pub automation_id: String,
    pub data: String,
    pub status: EventStatus,
    pub affected_rows: i64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Number of events per (automation, status) within a box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCount {
    pub automation_id: String,
    pub status: EventStatus,
    pub count: i64,
}

/// What happened to one attempted insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertOutcome {
    Created,
    Skipped,
    Updated,
}

/// Behaviour when `(box, container, data)` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    #[default]
    Skip,
    UpdateTags,
}

/// Aggregate result of a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub created: i64,
    pub updated: i64,
    pub skipped: i64,
    /// Lines were left unattempted because the quota was reached.
    pub stopped_by_quota: bool,
}

impl BatchSummary {
    /// Rows actually created or updated.
    pub fn affected(&self) -> i64 {
        self.created + self.updated
    }

    pub fn record(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Created => self.created += 1,
            InsertOutcome::Updated => self.updated += 1,
            InsertOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Filter for listing and counting records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Records must carry all of these tags.
    pub tags: Vec<String>,
    /// Case-sensitive substring on `data`.
    pub text: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl RecordFilter {
    pub fn with_tags(tags: Vec<String>) -> Self {
        Self {
            tags,
            ..Default::default()
        }
    }

    /// Parse a search term: `tag:<name>` words become tag filters, any
    /// other word becomes the substring filter (last one wins).
    pub fn parse_term(term: &str) -> Self {
        let mut filter = Self::default();
        for word in term.split(' ').filter(|w| !w.is_empty()) {
            if let Some(tag) = word.strip_prefix("tag:") {
                if !tag.is_empty() {
                    filter.tags.push(tag.to_string());
                }
            } else {
                filter.text = Some(word.to_string());
            }
        }
        filter
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(validate::clamp_limit(limit));
        self.offset = offset;
        self
    }
}
