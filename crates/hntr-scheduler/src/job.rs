//! Job payloads carried by the queue.

use serde::{Deserialize, Serialize};

use hntr_core::Automation;

/// Work item. Serialized as `{"type": "...", "args": {...}}`; new kinds of
/// work are new variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum Job {
    RunAutomation(RunAutomationArgs),
}

/// Run one automation against one datum, tracked by one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAutomationArgs {
    pub event_id: String,
    /// Snapshot taken at trigger time; later edits don't affect queued jobs.
    pub automation: Automation,
    pub data: String,
}

impl Job {
    pub fn run_automation(event_id: &str, automation: Automation, data: &str) -> Self {
        Job::RunAutomation(RunAutomationArgs {
            event_id: event_id.to_string(),
            automation,
            data: data.to_string(),
        })
    }

    pub fn job_type(&self) -> &'static str {
        match self {
            Job::RunAutomation(_) => "RunAutomation",
        }
    }

    pub fn box_id(&self) -> &str {
        match self {
            Job::RunAutomation(args) => &args.automation.box_id,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            Job::RunAutomation(args) => &args.event_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn automation() -> Automation {
        Automation {
            id: "a1".into(),
            box_id: "b1".into(),
            name: "echo".into(),
            description: String::new(),
            command: "echo {data}".into(),
            source_container: "hostnames".into(),
            source_tags: vec![],
            destination_container: "urls".into(),
            destination_tags: vec![],
            is_public: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_wire_shape() {
        let job = Job::run_automation("e1", automation(), "example.com");
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "RunAutomation");
        assert_eq!(value["args"]["event_id"], "e1");
        assert_eq!(value["args"]["data"], "example.com");
        assert_eq!(value["args"]["automation"]["box_id"], "b1");
        assert_eq!(job.job_type(), "RunAutomation");
        assert_eq!(job.box_id(), "b1");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let raw = r#"{"type":"SendEmail","args":{"to":"x"}}"#;
        assert!(serde_json::from_str::<Job>(raw).is_err());
    }
}
