//! Runs one automation command and streams its output into the store.
//!
//! The command runs as `<shell> -c <command>` in its own process group.
//! Stdout is read concurrently with the process and inserted in chunks, so a
//! chatty command never blocks on a full pipe. On deadline the whole group is
//! killed and whatever was already ingested is kept.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::SplitStream;

use hntr_core::{Automation, EventStatus, HntrError, OnConflict, Result, SchedulerConfig};
use hntr_db::Database;

use crate::command::build_command;

/// Bytes of stderr kept for diagnostics.
const STDERR_TAIL_BYTES: usize = 2000;
/// How long a partial chunk of output may wait before it is flushed.
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);
/// How long to wait for the pipes to close once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Result of one command run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// `Finished`, `Timeout` or `Error`.
    pub status: EventStatus,
    /// Rows created in the destination container.
    pub affected_rows: i64,
    pub exit_code: Option<i32>,
    pub stderr_tail: String,
}

impl ExecutionOutcome {
    fn error(affected_rows: i64, reason: impl Into<String>) -> Self {
        Self {
            status: EventStatus::Error,
            affected_rows,
            exit_code: None,
            stderr_tail: reason.into(),
        }
    }
}

/// Run `automation` against `data` under the configured deadline.
///
/// Never fails: every problem ends up as an `Error` outcome.
pub async fn run_automation(
    db: &Database,
    config: &SchedulerConfig,
    records_limit: i64,
    automation: &Automation,
    data: &str,
) -> ExecutionOutcome {
    let command = match build_command(&automation.command, data) {
        Ok(c) => c,
        Err(e) => return ExecutionOutcome::error(0, e.to_string()),
    };
    let quota = match db.remaining_quota(&automation.box_id, records_limit) {
        Ok(q) => q,
        Err(e) => return ExecutionOutcome::error(0, e.to_string()),
    };
    if quota == 0 {
        tracing::warn!(
            "⚠️ Box {} is at its record limit; output of '{}' will be discarded",
            automation.box_id,
            automation.name
        );
    }

    let mut cmd = Command::new(&config.shell);
    cmd.arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    isolate(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("❌ Failed to spawn '{}': {e}", config.shell);
            return ExecutionOutcome::error(0, format!("spawn {}: {e}", config.shell));
        }
    };
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return ExecutionOutcome::error(0, "child pipes unavailable");
    };

    let affected = Arc::new(AtomicI64::new(0));
    let mut ingest = tokio::spawn(ingest_stream(
        db.clone(),
        automation.clone(),
        stdout,
        quota,
        config.batch_size,
        affected.clone(),
    ));
    let mut stderr_task = tokio::spawn(read_tail(stderr));

    let (mut status, exit_code) =
        match tokio::time::timeout(config.job_timeout(), child.wait()).await {
            Ok(Ok(exit)) if exit.success() => (EventStatus::Finished, exit.code()),
            Ok(Ok(exit)) => (EventStatus::Error, exit.code()),
            Ok(Err(e)) => {
                tracing::warn!("❌ Waiting on command failed: {e}");
                (EventStatus::Error, None)
            }
            Err(_) => {
                tracing::warn!(
                    "⏰ '{}' timed out after {}s, killing",
                    automation.name,
                    config.job_timeout_secs
                );
                kill_group(&mut child).await;
                (EventStatus::Timeout, None)
            }
        };

    match tokio::time::timeout(DRAIN_GRACE, &mut ingest).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            tracing::error!("❌ Ingesting output of '{}' failed: {e}", automation.name);
            if status == EventStatus::Finished {
                status = EventStatus::Error;
            }
        }
        Ok(Err(e)) => {
            tracing::error!("❌ Ingest task failed: {e}");
            if status == EventStatus::Finished {
                status = EventStatus::Error;
            }
        }
        Err(_) => {
            // A background process still holds stdout open.
            tracing::warn!("⚠️ Output of '{}' still open after exit; detaching", automation.name);
            ingest.abort();
        }
    }

    let stderr_tail = match tokio::time::timeout(DRAIN_GRACE, &mut stderr_task).await {
        Ok(Ok(tail)) => tail,
        _ => {
            stderr_task.abort();
            String::new()
        }
    };
    if status == EventStatus::Error && !stderr_tail.is_empty() {
        tracing::debug!("stderr of '{}':\n{}", automation.name, stderr_tail);
    }

    ExecutionOutcome {
        status,
        affected_rows: affected.load(Ordering::SeqCst),
        exit_code,
        stderr_tail,
    }
}

/// Ingest output that was collected elsewhere (pull-model results).
pub fn ingest_text(
    db: &Database,
    automation: &Automation,
    output: &str,
    quota: i64,
    batch_size: usize,
) -> Result<i64> {
    let lines: Vec<&str> = output.lines().collect();
    let mut remaining = quota;
    let mut affected = 0;
    for chunk in lines.chunks(batch_size.max(1)) {
        if remaining <= 0 {
            break;
        }
        let summary = db.batch_insert(
            &automation.box_id,
            &automation.destination_container,
            chunk,
            &automation.destination_tags,
            remaining,
            OnConflict::Skip,
        )?;
        remaining -= summary.affected();
        affected += summary.affected();
    }
    Ok(affected)
}

/// Read stdout line by line and insert it in chunks.
///
/// Keeps draining after the quota is spent or a storage error occurs so the
/// child never stalls on a full pipe.
async fn ingest_stream(
    db: Database,
    automation: Automation,
    stdout: ChildStdout,
    quota: i64,
    batch_size: usize,
    affected: Arc<AtomicI64>,
) -> Result<()> {
    let lines = SplitStream::new(BufReader::new(stdout).split(b'\n'));
    let chunks = lines.chunks_timeout(batch_size.max(1), FLUSH_INTERVAL);
    tokio::pin!(chunks);

    let mut remaining = quota;
    let mut failure: Option<HntrError> = None;
    while let Some(chunk) = chunks.next().await {
        let mut batch = Vec::with_capacity(chunk.len());
        for line in chunk {
            match line {
                Ok(bytes) => batch.push(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    failure.get_or_insert(HntrError::Process(format!("read stdout: {e}")));
                }
            }
        }
        if remaining <= 0 || failure.is_some() {
            continue;
        }
        match db.batch_insert(
            &automation.box_id,
            &automation.destination_container,
            &batch,
            &automation.destination_tags,
            remaining,
            OnConflict::Skip,
        ) {
            Ok(summary) => {
                remaining -= summary.affected();
                if summary.stopped_by_quota {
                    remaining = 0;
                }
                affected.fetch_add(summary.affected(), Ordering::SeqCst);
            }
            Err(e) => failure = Some(e),
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn read_tail(mut stderr: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let cut = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..cut);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

// ─── Process groups ─────────────────────────────────────────

#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(pid: u32) {
    // The child leads its own group, so its pid is the group id.
    unsafe {
        libc::killpg(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) {}

/// Kill the child and everything it spawned, then reap it.
async fn kill_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        signal_group(pid);
    }
    if let Err(e) = child.kill().await {
        tracing::debug!("kill after timeout: {e}");
    }
}
