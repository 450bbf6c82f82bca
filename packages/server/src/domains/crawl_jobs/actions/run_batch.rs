//! Claiming a job and running a bounded pass of chunks over it.
//!
//! ```text
//! claim_job (ready/paused, or processing with a stale heartbeat)
//!     │
//!     └─► run_batch
//!             ├─► release in-flight units orphaned by a dead run
//!             ├─► per chunk: re-read status, heartbeat, process_chunk
//!             ├─► first failure: retry revert / release / fail, then stop
//!             └─► finalize: counts re-queried, status, alerts
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::process_chunk::process_chunk;
use crate::domains::crawl_jobs::alerts;
use crate::domains::crawl_jobs::error::{ChunkError, ControlError, ControlResult};
use crate::domains::crawl_jobs::models::{Job, JobId, JobStatus, RunCompletion, UnitId};
use crate::domains::crawl_jobs::planner::{self, Chunk};
use crate::kernel::{AlertKind, LogLevel, ServerDeps};

/// `now` minus `window`, saturating at the earliest representable time.
pub(crate) fn older_than(now: DateTime<Utc>, window: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job_id: JobId,
    pub chunks_completed: usize,
    pub units_completed: u64,
    pub status: JobStatus,
    pub error: Option<String>,
}

/// The failure that ended a run, by what it does to the job.
#[derive(Debug)]
enum RunFailure {
    /// Chunk went back to pending; the job stays runnable.
    Retry(String),
    /// Nothing wrong with the chunk, but the job cannot continue.
    Pause(String),
    /// Chunk failed permanently: pause and turn auto mode off.
    Fatal(String),
}

impl RunFailure {
    fn message(&self) -> &str {
        match self {
            RunFailure::Retry(m) | RunFailure::Pause(m) | RunFailure::Fatal(m) => m,
        }
    }
}

/// How the chunk loop ended.
#[derive(Debug, Default)]
struct LoopOutcome {
    chunks_completed: usize,
    units_completed: u64,
    failure: Option<RunFailure>,
}

/// Move a job into `processing`, optionally changing its merge size first.
///
/// Rejections are side-effect free: unknown job, completed job, a job that
/// is still discovering or failed, a live run (fresh heartbeat), or no
/// generation keys at all.
pub async fn claim_job(
    job_id: JobId,
    merge_override: Option<i32>,
    deps: &ServerDeps,
) -> ControlResult<Job> {
    let job = deps
        .store
        .get_job(job_id)
        .await?
        .ok_or(ControlError::JobNotFound(job_id))?;

    match job.status {
        JobStatus::Completed => return Err(ControlError::AlreadyCompleted(job_id)),
        JobStatus::Initializing | JobStatus::Crawling | JobStatus::Failed => {
            return Err(ControlError::InvalidState {
                job_id,
                status: job.status,
            })
        }
        _ => {}
    }

    if let Some(merge_size) = merge_override {
        if merge_size < 1 {
            return Err(ControlError::InvalidRequest(
                "merge size must be at least 1".to_string(),
            ));
        }
    }

    if deps.key_pool().key_count() == 0 {
        return Err(ControlError::NoKeysConfigured);
    }

    let now = Utc::now();
    let stale_before = older_than(now, deps.pipeline.stale_run_after);
    let mut claimed = deps
        .store
        .claim_job(job_id, now, stale_before)
        .await?
        .ok_or(ControlError::AlreadyProcessing(job_id))?;

    if job.status == JobStatus::Processing {
        warn!(job_id = %job_id, last_heartbeat = ?job.last_processed_at, "Reclaiming stale processing run");
        deps.live_log.emit(
            LogLevel::Warning,
            "Previous run stopped responding, taking over",
            Some(job_id),
        );
    }

    if let Some(merge_size) = merge_override {
        deps.store.set_merge_size(job_id, merge_size).await?;
        claimed.merge_size = merge_size;
        claimed.batch_size = merge_size;
    }

    Ok(claimed)
}

/// Run up to `chunk_count` chunks of a claimed job and write the final
/// state. Stops at the first chunk failure.
pub async fn run_batch(job: Job, chunk_count: i32, deps: &ServerDeps) -> Result<RunReport> {
    release_orphans(&job, deps).await?;
    let counts_before = deps.store.unit_counts(job.id).await?;
    let merge_size = planner::merge_size(&job);

    let outcome = match run_chunks(&job, chunk_count, merge_size, deps).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Processing run aborted");
            LoopOutcome {
                failure: Some(RunFailure::Pause(format!("{:#}", e))),
                ..LoopOutcome::default()
            }
        }
    };

    finalize(&job, counts_before.completed, outcome, deps).await
}

/// The claim makes this the only live run, so in-flight units that have not
/// moved for `stuck_unit_after` belong to a run that died.
async fn release_orphans(job: &Job, deps: &ServerDeps) -> Result<()> {
    let now = Utc::now();
    let released = deps
        .store
        .release_stale_units(job.id, older_than(now, deps.pipeline.stuck_unit_after), now)
        .await?;
    if released > 0 {
        warn!(job_id = %job.id, released, "Released units left in flight by a previous run");
        deps.live_log.emit(
            LogLevel::Warning,
            &format!("Recovered {} chapters left in flight by a previous run", released),
            Some(job.id),
        );
    }
    Ok(())
}

async fn run_chunks(
    job: &Job,
    chunk_count: i32,
    merge_size: i32,
    deps: &ServerDeps,
) -> Result<LoopOutcome> {
    let pending = deps
        .store
        .list_pending_units(job.id, planner::fetch_limit(chunk_count, merge_size))
        .await?;
    let chunks = planner::plan_chunks(pending, merge_size);
    info!(job_id = %job.id, chunks = chunks.len(), merge_size, "Starting processing run");

    let mut outcome = LoopOutcome::default();
    for chunk in &chunks {
        let current = deps
            .store
            .get_job(job.id)
            .await?
            .with_context(|| format!("job {} disappeared", job.id))?;
        if current.status.is_halted() {
            info!(job_id = %job.id, status = %current.status, "Job halted mid-run");
            deps.live_log.emit(
                LogLevel::Warning,
                &format!("Stopped: job is {}", current.status),
                Some(job.id),
            );
            break;
        }

        deps.store.touch_heartbeat(job.id, Utc::now()).await?;
        deps.live_log.emit(
            LogLevel::Info,
            &format!(
                "Processing chapters {} -> output #{}",
                chunk.source_range(),
                chunk.output_ordinal
            ),
            Some(job.id),
        );

        match process_chunk(job, chunk, deps).await {
            Ok(done) => {
                outcome.chunks_completed += 1;
                outcome.units_completed += done.units_completed;
            }
            Err(e) => {
                outcome.failure = handle_chunk_failure(job, chunk, e, deps).await?;
                break;
            }
        }
    }
    Ok(outcome)
}

/// Apply the failure policy to the chunk's units.
async fn handle_chunk_failure(
    job: &Job,
    chunk: &Chunk,
    error: ChunkError,
    deps: &ServerDeps,
) -> Result<Option<RunFailure>> {
    let ids: Vec<UnitId> = chunk.units.iter().map(|u| u.id).collect();
    let range = chunk.source_range();
    let message = error.to_string();
    let now = Utc::now();

    // process_chunk has already released whatever part of the chunk it claimed.
    if let ChunkError::Contended { .. } = error {
        warn!(job_id = %job.id, source_range = %range, "Chunk already claimed by another run");
        return Ok(None);
    }

    if error.is_configuration() {
        deps.store.release_units(&ids, now).await?;
        warn!(job_id = %job.id, "No generation keys configured, pausing job");
        deps.live_log
            .emit(LogLevel::Error, &format!("Paused: {}", message), Some(job.id));
        alerts::send(
            deps.notifier.as_ref(),
            AlertKind::Error,
            alerts::format_error(&job.work_title, &range, &message, job.id),
        )
        .await;
        return Ok(Some(RunFailure::Pause(message)));
    }

    let retries = chunk.retry_count();
    if error.is_transient() && retries < deps.pipeline.max_chunk_retries {
        deps.store
            .revert_units_for_retry(&ids, &message, now)
            .await?;
        warn!(
            job_id = %job.id,
            source_range = %range,
            attempt = retries + 1,
            error = %message,
            "Chunk failed, will retry on a later run"
        );
        deps.live_log.emit(
            LogLevel::Warning,
            &format!(
                "Chapters {} failed (attempt {}/{}), retrying later: {}",
                range,
                retries + 1,
                deps.pipeline.max_chunk_retries + 1,
                message
            ),
            Some(job.id),
        );
        return Ok(Some(RunFailure::Retry(message)));
    }

    deps.store.fail_units(&ids, &message, now).await?;
    error!(job_id = %job.id, source_range = %range, error = %message, "Chunk failed permanently");
    deps.live_log.emit(
        LogLevel::Error,
        &format!("Chapters {} failed: {}", range, message),
        Some(job.id),
    );
    alerts::send(
        deps.notifier.as_ref(),
        AlertKind::Error,
        alerts::format_error(&job.work_title, &range, &message, job.id),
    )
    .await;
    Ok(Some(RunFailure::Fatal(message)))
}

async fn finalize(
    job: &Job,
    completed_before: i32,
    outcome: LoopOutcome,
    deps: &ServerDeps,
) -> Result<RunReport> {
    let counts = deps.store.unit_counts(job.id).await?;
    let current = deps
        .store
        .get_job(job.id)
        .await?
        .with_context(|| format!("job {} disappeared", job.id))?;

    let pauses = matches!(
        outcome.failure,
        Some(RunFailure::Pause(_) | RunFailure::Fatal(_))
    );
    let status = if current.status.is_halted() {
        current.status
    } else if counts.pending == 0 && counts.in_flight == 0 {
        JobStatus::Completed
    } else if pauses {
        JobStatus::Paused
    } else {
        JobStatus::Ready
    };

    let finished_at = Utc::now();
    let disable_auto_mode = matches!(outcome.failure, Some(RunFailure::Fatal(_)));
    let error = outcome.failure.as_ref().map(|f| f.message().to_string());
    deps.store
        .finish_run(
            job.id,
            RunCompletion {
                status,
                counts,
                last_error: error.clone(),
                disable_auto_mode,
                finished_at,
            },
        )
        .await?;

    info!(
        job_id = %job.id,
        status = %status,
        chunks = outcome.chunks_completed,
        completed = counts.completed,
        failed = counts.failed,
        pending = counts.pending,
        "Processing run finished"
    );

    if status == JobStatus::Completed {
        deps.live_log.emit(
            LogLevel::Success,
            &format!(
                "{} completed: {}/{} chapters",
                job.work_title, counts.completed, counts.total
            ),
            Some(job.id),
        );
        alerts::send(
            deps.notifier.as_ref(),
            AlertKind::Complete,
            alerts::format_complete(
                &job.work_title,
                counts.total,
                counts.failed,
                job.id,
                &alerts::format_duration(current.started_at, finished_at),
            ),
        )
        .await;
    } else if alerts::crosses_progress_mark(
        completed_before,
        counts.completed,
        deps.pipeline.progress_alert_every,
    ) {
        alerts::send(
            deps.notifier.as_ref(),
            AlertKind::Progress,
            alerts::format_progress(&job.work_title, counts.completed, counts.total, job.id),
        )
        .await;
    }

    Ok(RunReport {
        job_id: job.id,
        chunks_completed: outcome.chunks_completed,
        units_completed: outcome.units_completed,
        status,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn older_than_saturates() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            older_than(now, Duration::from_secs(15 * 60)),
            Utc.with_ymd_and_hms(2026, 1, 1, 11, 45, 0).unwrap()
        );
        assert_eq!(older_than(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
