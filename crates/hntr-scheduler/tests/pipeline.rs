//! End-to-end runs of the automation pipeline: trigger → queue → worker →
//! destination container, on a file-backed database.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use hntr_core::{Automation, EventStatus, NewAutomation, OnConflict, RecordFilter, SchedulerConfig};
use hntr_db::Database;
use hntr_scheduler::{
    JobDisposition, JobQueue, RemoteAgent, ResultReport, Scheduler, WorkerContext, handle_job,
    start_automation,
};

struct TestDb {
    dir: PathBuf,
    db: Database,
}

impl TestDb {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("hntr-pipeline-{}", uuid::Uuid::new_v4()));
        let db = Database::open(&dir.join("hntr.db")).unwrap();
        Self { dir, db }
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

fn config(timeout_secs: u64) -> SchedulerConfig {
    SchedulerConfig {
        workers: 2,
        poll_interval_ms: 50,
        job_timeout_secs: timeout_secs,
        shell: "sh".into(),
        ..Default::default()
    }
}

fn automation(db: &Database, box_id: &str, command: &str, source_tags: &[&str]) -> Automation {
    db.create_automation(
        box_id,
        NewAutomation {
            name: "test".into(),
            command: command.into(),
            source_container: "hostnames".into(),
            source_tags: source_tags.iter().map(|t| t.to_string()).collect(),
            destination_container: "events".into(),
            destination_tags: vec!["out".into()],
            ..Default::default()
        },
    )
    .unwrap()
}

fn context(db: &Database, timeout_secs: u64, records_limit: i64) -> WorkerContext {
    WorkerContext {
        db: db.clone(),
        queue: JobQueue::new(db.clone()).unwrap(),
        config: config(timeout_secs),
        records_limit,
    }
}

/// Drain the queue with the given context, one job at a time.
async fn drain(ctx: &WorkerContext) -> Vec<JobDisposition> {
    let mut done = Vec::new();
    while let Some(job) = ctx.queue.dequeue(ctx.config.lease()).unwrap() {
        done.push(handle_job(ctx, job).await);
    }
    done
}

fn destination(db: &Database, a: &Automation) -> Vec<String> {
    let mut data: Vec<String> = db
        .list_records(&a.box_id, "events", &RecordFilter::default())
        .unwrap()
        .into_iter()
        .map(|r| r.data)
        .collect();
    data.sort();
    data
}

#[tokio::test]
async fn test_fan_out_creates_one_event_per_matching_record() {
    let t = TestDb::new();
    let b = t.db.create_default_box().unwrap();
    let scope = vec!["scope".to_string()];
    t.db.batch_insert(&b.id, "hostnames", ["a.com", "b.com", "c.com"], &scope, 100, OnConflict::Skip)
        .unwrap();
    t.db.insert_record(&b.id, "hostnames", "untagged.com", &[], OnConflict::Skip)
        .unwrap();
    let a = automation(&t.db, &b.id, "echo seen-{data}", &["scope"]);

    let ctx = context(&t.db, 10, 1000);
    let summary = start_automation(&t.db, &ctx.queue, &a.id).unwrap();
    assert_eq!(summary.scheduled, 3);

    let done = drain(&ctx).await;
    assert_eq!(done.len(), 3);

    let events = t.db.list_events(&a.id, 100).unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.status == EventStatus::Finished && e.affected_rows == 1));
    assert_eq!(
        destination(&t.db, &a),
        vec!["seen-a.com", "seen-b.com", "seen-c.com"]
    );
}

#[tokio::test]
async fn test_timeout_marks_event_timeout_with_zero_rows() {
    let t = TestDb::new();
    let b = t.db.create_default_box().unwrap();
    t.db.insert_record(&b.id, "hostnames", "slow.com", &[], OnConflict::Skip)
        .unwrap();
    let a = automation(&t.db, &b.id, "sleep 120 # {data}", &[]);

    let ctx = context(&t.db, 1, 1000);
    start_automation(&t.db, &ctx.queue, &a.id).unwrap();

    let started = Instant::now();
    drain(&ctx).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    let events = t.db.list_events(&a.id, 10).unwrap();
    assert_eq!(events[0].status, EventStatus::Timeout);
    assert_eq!(events[0].affected_rows, 0);
}

#[tokio::test]
async fn test_datum_is_not_interpreted_by_the_shell() {
    let t = TestDb::new();
    let b = t.db.create_default_box().unwrap();
    let marker = t.dir.join("pwned");
    let datum = format!("foo; touch {}", marker.display());
    t.db.insert_record(&b.id, "hostnames", &datum, &[], OnConflict::Skip)
        .unwrap();
    t.db.insert_record(&b.id, "hostnames", "foo; rm -rf /", &[], OnConflict::Skip)
        .unwrap();
    let a = automation(&t.db, &b.id, "echo {data}", &[]);

    let ctx = context(&t.db, 10, 1000);
    start_automation(&t.db, &ctx.queue, &a.id).unwrap();
    drain(&ctx).await;

    assert!(!marker.exists());
    let out = destination(&t.db, &a);
    assert!(out.contains(&"foo; rm -rf /".to_string()));
    assert!(out.contains(&datum));
}

#[tokio::test]
async fn test_repeated_runs_deduplicate_output() {
    let t = TestDb::new();
    let b = t.db.create_default_box().unwrap();
    t.db.insert_record(&b.id, "hostnames", "a.com", &[], OnConflict::Skip)
        .unwrap();
    let a = automation(&t.db, &b.id, "echo same; echo {data}", &[]);
    let ctx = context(&t.db, 10, 1000);

    start_automation(&t.db, &ctx.queue, &a.id).unwrap();
    drain(&ctx).await;
    start_automation(&t.db, &ctx.queue, &a.id).unwrap();
    drain(&ctx).await;

    let mut rows: Vec<i64> = t
        .db
        .list_events(&a.id, 10)
        .unwrap()
        .into_iter()
        .map(|e| e.affected_rows)
        .collect();
    rows.sort();
    assert_eq!(rows, vec![0, 2]);
    assert_eq!(destination(&t.db, &a), vec!["a.com", "same"]);
}

#[tokio::test]
async fn test_box_quota_caps_ingestion() {
    let t = TestDb::new();
    let b = t.db.create_default_box().unwrap();
    t.db.insert_record(&b.id, "hostnames", "a.com", &[], OnConflict::Skip)
        .unwrap();
    let a = automation(&t.db, &b.id, "seq 1 50 | sed 's/$/.{data}/'", &[]);

    // 1 record present, limit 10 → 10 - 1 - 1 = 8 rows admitted
    let ctx = context(&t.db, 10, 10);
    start_automation(&t.db, &ctx.queue, &a.id).unwrap();
    drain(&ctx).await;

    let event = &t.db.list_events(&a.id, 1).unwrap()[0];
    assert_eq!(event.status, EventStatus::Finished);
    assert_eq!(event.affected_rows, 8);
    assert_eq!(t.db.count_records_by_box(&b.id).unwrap(), 9);
}

#[tokio::test]
async fn test_event_status_never_moves_backwards() {
    let t = TestDb::new();
    let b = t.db.create_default_box().unwrap();
    t.db.insert_record(&b.id, "hostnames", "a.com", &[], OnConflict::Skip)
        .unwrap();
    let a = automation(&t.db, &b.id, "echo {data}", &[]);
    let ctx = context(&t.db, 10, 1000);

    start_automation(&t.db, &ctx.queue, &a.id).unwrap();
    // Simulate a worker that died after leasing: the lease expires and the
    // job is delivered again after the first delivery already finished.
    let first = ctx.queue.dequeue(Duration::ZERO).unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let redelivered = ctx.queue.dequeue(Duration::from_secs(60)).unwrap().unwrap();
    assert_eq!(first.id, redelivered.id);

    assert!(matches!(handle_job(&ctx, first).await, JobDisposition::Executed(_)));
    assert_eq!(handle_job(&ctx, redelivered).await, JobDisposition::AlreadyDone);

    let event = &t.db.list_events(&a.id, 1).unwrap()[0];
    assert_eq!(event.status, EventStatus::Finished);
    assert!(!t.db.mark_started(&event.id).unwrap());
    assert!(!t.db.mark_scheduled(&event.id).unwrap());
    assert_eq!(t.db.get_event(&event.id).unwrap().status, EventStatus::Finished);
}

#[tokio::test]
async fn test_scheduler_processes_trigger_in_background() {
    let t = TestDb::new();
    let b = t.db.create_default_box().unwrap();
    let lines: Vec<String> = (0..6).map(|i| format!("h{i}.com")).collect();
    t.db.batch_insert(&b.id, "hostnames", &lines, &[], 100, OnConflict::Skip)
        .unwrap();
    let a = automation(&t.db, &b.id, "echo done-{data}", &[]);

    let mut scheduler = Scheduler::new(t.db.clone(), config(10))
        .unwrap()
        .with_records_limit(1000);
    scheduler.start();
    scheduler.trigger(&a.id).unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    while scheduler.queue().pending_count().unwrap() > 0 {
        assert!(Instant::now() < deadline, "queue never drained");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    scheduler.shutdown().await;

    let events = t.db.list_events(&a.id, 100).unwrap();
    assert_eq!(events.len(), 6);
    assert!(events.iter().all(|e| e.status == EventStatus::Finished));
    assert_eq!(destination(&t.db, &a).len(), 6);
}

#[test]
fn test_pull_model_round_trip() {
    let t = TestDb::new();
    let b = t.db.create_default_box().unwrap();
    t.db.batch_insert(&b.id, "hostnames", ["a.com", "b.com"], &[], 100, OnConflict::Skip)
        .unwrap();
    let a = automation(&t.db, &b.id, "resolve {data}", &[]);
    let queue = JobQueue::new(t.db.clone()).unwrap();
    let agent = RemoteAgent::new(t.db.clone(), queue.clone(), config(30), 1000);

    start_automation(&t.db, &queue, &a.id).unwrap();
    let assignments = agent.dequeue(&b.id, 10).unwrap();
    assert_eq!(assignments.len(), 2);

    for (i, assignment) in assignments.iter().enumerate() {
        assert_eq!(assignment.command, format!("resolve {}", assignment.data));
        let status = if i == 0 {
            EventStatus::Finished
        } else {
            EventStatus::Timeout
        };
        agent
            .submit_result(
                &b.id,
                &assignment.event_id,
                ResultReport {
                    status,
                    output: format!("10.0.0.{i}\n"),
                },
            )
            .unwrap();
    }

    assert_eq!(queue.pending_count().unwrap(), 0);
    let mut statuses: Vec<EventStatus> = t
        .db
        .list_events(&a.id, 10)
        .unwrap()
        .into_iter()
        .map(|e| e.status)
        .collect();
    statuses.sort_by_key(|s| s.as_str());
    assert_eq!(statuses, vec![EventStatus::Finished, EventStatus::Timeout]);
    assert_eq!(destination(&t.db, &a), vec!["10.0.0.0", "10.0.0.1"]);
}
