//! Fan-out of one automation over its matching source records.

use serde::{Deserialize, Serialize};

use hntr_core::{EventStatus, HntrError, RecordFilter, Result};
use hntr_db::Database;

use crate::job::Job;
use crate::queue::JobQueue;

/// Counts from one trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSummary {
    /// Source records matching the automation's filter.
    pub matched: usize,
    /// Events created and handed to the queue.
    pub scheduled: usize,
    /// Records whose event or job could not be created.
    pub failed: usize,
}

/// Create one event and one job per record in the source container whose
/// tags include every source tag.
///
/// Fails only if the automation or its box is unusable. Per-record failures
/// are logged and counted, and never stop the rest of the fan-out.
pub fn start_automation(
    db: &Database,
    queue: &JobQueue,
    automation_id: &str,
) -> Result<TriggerSummary> {
    let automation = db.get_automation(automation_id)?;
    let b = db.get_box(&automation.box_id)?;
    for container in [
        &automation.source_container,
        &automation.destination_container,
    ] {
        if !b.has_container(container) {
            return Err(HntrError::NotFound(format!(
                "container '{container}' in box {}",
                b.id
            )));
        }
    }

    let filter = RecordFilter::with_tags(automation.source_tags.clone());
    let records = db.list_records(&b.id, &automation.source_container, &filter)?;
    let mut summary = TriggerSummary {
        matched: records.len(),
        ..Default::default()
    };
    tracing::info!(
        "🚀 Starting '{}' over {} records in {}",
        automation.name,
        summary.matched,
        automation.source_container
    );

    for record in records {
        let event = match db.create_event(&b.id, &automation.id, &record.data) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("⚠️ Could not create event for '{}': {e}", record.data);
                summary.failed += 1;
                continue;
            }
        };

        let job = Job::run_automation(&event.id, automation.clone(), &record.data);
        if let Err(e) = queue.enqueue(&job) {
            tracing::warn!(event_id = %event.id, "⚠️ Could not enqueue job: {e}");
            if let Err(e) = db.mark_finished(&event.id, EventStatus::Error, 0) {
                tracing::warn!(event_id = %event.id, "⚠️ Could not mark event error: {e}");
            }
            summary.failed += 1;
            continue;
        }

        // A fast worker may already have moved it to started; that's fine.
        if let Err(e) = db.mark_scheduled(&event.id) {
            tracing::warn!(event_id = %event.id, "⚠️ Could not mark event scheduled: {e}");
        }
        summary.scheduled += 1;
    }

    tracing::info!(
        "📋 '{}': {} scheduled, {} failed",
        automation.name,
        summary.scheduled,
        summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hntr_core::{NewAutomation, OnConflict};

    fn setup() -> (Database, JobQueue, String, String) {
        let db = Database::open_in_memory().unwrap();
        let b = db.create_default_box().unwrap();
        let a = db
            .create_automation(
                &b.id,
                NewAutomation {
                    name: "resolve".into(),
                    command: "echo {data}".into(),
                    source_container: "hostnames".into(),
                    source_tags: vec!["scope".into()],
                    destination_container: "urls".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let queue = JobQueue::new(db.clone()).unwrap();
        (db, queue, b.id, a.id)
    }

    #[test]
    fn test_fan_out_matches_tag_superset() {
        let (db, queue, box_id, automation_id) = setup();
        let scope = vec!["scope".to_string()];
        db.batch_insert(&box_id, "hostnames", ["a.com", "b.com", "c.com"], &scope, 100, OnConflict::Skip)
            .unwrap();
        db.insert_record(&box_id, "hostnames", "out.com", &[], OnConflict::Skip)
            .unwrap();

        let summary = start_automation(&db, &queue, &automation_id).unwrap();
        assert_eq!(
            summary,
            TriggerSummary {
                matched: 3,
                scheduled: 3,
                failed: 0
            }
        );
        assert_eq!(queue.pending_count().unwrap(), 3);

        let events = db.list_events(&automation_id, 10).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.status == EventStatus::Scheduled));
        let mut data: Vec<_> = events.into_iter().map(|e| e.data).collect();
        data.sort();
        assert_eq!(data, vec!["a.com", "b.com", "c.com"]);
    }

    #[test]
    fn test_no_matches_schedules_nothing() {
        let (db, queue, _, automation_id) = setup();
        let summary = start_automation(&db, &queue, &automation_id).unwrap();
        assert_eq!(summary, TriggerSummary::default());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_enqueue_failure_marks_each_event_error() {
        let (db, queue, box_id, automation_id) = setup();
        let scope = vec!["scope".to_string()];
        db.batch_insert(&box_id, "hostnames", ["a.com", "b.com"], &scope, 100, OnConflict::Skip)
            .unwrap();
        db.conn().unwrap().execute_batch("DROP TABLE jobs;").unwrap();

        let summary = start_automation(&db, &queue, &automation_id).unwrap();
        assert_eq!(
            summary,
            TriggerSummary {
                matched: 2,
                scheduled: 0,
                failed: 2
            }
        );
        let events = db.list_events(&automation_id, 10).unwrap();
        assert_eq!(events.len(), 2);
        for event in events {
            assert_eq!(event.status, EventStatus::Error);
            assert_eq!(event.affected_rows, 0);
            assert!(event.finished_at.is_some());
        }
    }

    #[test]
    fn test_missing_automation() {
        let (db, queue, _, _) = setup();
        assert!(start_automation(&db, &queue, "nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_container_removed_from_box() {
        let (db, queue, box_id, automation_id) = setup();
        db.update_box(&box_id, "Unnamed Box", &["hostnames".into()])
            .unwrap();
        let err = start_automation(&db, &queue, &automation_id).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }
}
