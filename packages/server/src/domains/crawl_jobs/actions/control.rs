//! Operator control surface.
//!
//! Every rejection is returned as a [`ControlError`] before anything is
//! written. Long-running work (discovery, processing runs) is handed to the
//! run queue; callers get the job back immediately.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::discover::discover_units;
use super::run_batch::{claim_job, run_batch};
use crate::domains::crawl_jobs::error::{ControlError, ControlResult};
use crate::domains::crawl_jobs::models::{Job, JobId, JobStatus, NewJob, Unit, UnitCounts, WorkId};
use crate::kernel::key_pool::KeySnapshot;
use crate::kernel::run_queue::{RunTask, RunTaskHandler};
use crate::kernel::{LogLevel, ServerDeps};

/// Jobs shown by [`list_active_jobs`].
pub const ACTIVE_JOBS_LIMIT: i64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct InitJobRequest {
    pub work_id: WorkId,
    pub source_url: String,
    /// Display title; derived from the source URL when absent.
    pub title: Option<String>,
    pub merge_size: Option<i32>,
    pub start: Option<i32>,
    pub end: Option<i32>,
    #[serde(default)]
    pub auto_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job: Job,
    pub counts: UnitCounts,
    pub failed_units: Vec<Unit>,
}

fn validate_init(req: &InitJobRequest) -> ControlResult<Url> {
    let url = Url::parse(req.source_url.trim())
        .map_err(|e| ControlError::InvalidRequest(format!("invalid source url: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ControlError::InvalidRequest(
            "source url must be http or https".to_string(),
        ));
    }
    if req.merge_size.is_some_and(|size| size < 1) {
        return Err(ControlError::InvalidRequest(
            "merge size must be at least 1".to_string(),
        ));
    }
    if req.start.is_some_and(|start| start < 1) {
        return Err(ControlError::InvalidRequest(
            "range start must be at least 1".to_string(),
        ));
    }
    if let (Some(start), Some(end)) = (req.start, req.end) {
        if start > end {
            return Err(ControlError::InvalidRequest(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
    }
    Ok(url)
}

/// Last non-empty path segment, e.g. `tien-nghich` for
/// `https://truyenfull.vn/tien-nghich/`.
fn title_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(String::from)
        .unwrap_or_else(|| url.host_str().unwrap_or("untitled").to_string())
}

/// Create a job for a work and queue discovery of its units.
pub async fn init_job(req: InitJobRequest, deps: &ServerDeps) -> ControlResult<Job> {
    let url = validate_init(&req)?;

    if let Some(active) = deps.store.find_active_job_for_work(req.work_id).await? {
        return Err(ControlError::AlreadyActive {
            work_id: req.work_id,
            job_id: active.id,
        });
    }

    let work_title = req
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .unwrap_or_else(|| title_from_url(&url));

    let job = deps
        .store
        .insert_job(
            NewJob {
                id: Uuid::new_v4(),
                work_id: req.work_id,
                work_title,
                source_url: url.to_string(),
                merge_size: req.merge_size.unwrap_or(1),
                target_start: req.start,
                target_end: req.end,
                auto_mode: req.auto_mode,
            },
            Utc::now(),
        )
        .await?;

    if deps
        .run_queue
        .submit(RunTask::Discover { job_id: job.id })
        .await
        .is_err()
    {
        deps.store
            .mark_job_failed(job.id, "discovery could not be queued")
            .await?;
        return Err(ControlError::QueueClosed);
    }

    info!(job_id = %job.id, work_id = %job.work_id, source_url = %job.source_url, "Crawl job created");
    deps.live_log.emit(
        LogLevel::Info,
        &format!("Created crawl job for {}", job.work_title),
        Some(job.id),
    );
    Ok(job)
}

/// Claim a job and queue a run of `chunk_count` chunks.
pub async fn start_batch(
    job_id: JobId,
    chunk_count: i32,
    merge_override: Option<i32>,
    deps: &ServerDeps,
) -> ControlResult<Job> {
    let job = claim_job(job_id, merge_override, deps).await?;
    if deps
        .run_queue
        .submit(RunTask::ProcessBatch {
            job_id,
            chunk_count,
        })
        .await
        .is_err()
    {
        deps.store.set_job_status(job_id, JobStatus::Ready).await?;
        return Err(ControlError::QueueClosed);
    }
    Ok(job)
}

pub async fn process_batch(
    job_id: JobId,
    chunk_count: i32,
    merge_override: Option<i32>,
    deps: &ServerDeps,
) -> ControlResult<Job> {
    if chunk_count < 1 {
        return Err(ControlError::InvalidRequest(
            "count must be at least 1".to_string(),
        ));
    }
    start_batch(job_id, chunk_count, merge_override, deps).await
}

async fn require_job(job_id: JobId, deps: &ServerDeps) -> ControlResult<Job> {
    deps.store
        .get_job(job_id)
        .await?
        .ok_or(ControlError::JobNotFound(job_id))
}

/// Takes effect at the next chunk boundary of a running job.
pub async fn pause_job(job_id: JobId, deps: &ServerDeps) -> ControlResult<Job> {
    let mut job = require_job(job_id, deps).await?;
    match job.status {
        JobStatus::Ready | JobStatus::Processing | JobStatus::Paused => {}
        JobStatus::Completed => return Err(ControlError::AlreadyCompleted(job_id)),
        status => return Err(ControlError::InvalidState { job_id, status }),
    }

    deps.store.set_job_status(job_id, JobStatus::Paused).await?;
    job.status = JobStatus::Paused;
    deps.live_log
        .emit(LogLevel::Warning, "Job paused by operator", Some(job_id));
    Ok(job)
}

pub async fn resume_job(job_id: JobId, deps: &ServerDeps) -> ControlResult<Job> {
    let mut job = require_job(job_id, deps).await?;
    if job.status != JobStatus::Paused {
        return Err(ControlError::InvalidState {
            job_id,
            status: job.status,
        });
    }

    deps.store.set_job_status(job_id, JobStatus::Ready).await?;
    job.status = JobStatus::Ready;
    deps.live_log.emit(LogLevel::Info, "Job resumed", Some(job_id));
    Ok(job)
}

pub async fn toggle_auto_mode(
    job_id: JobId,
    enabled: bool,
    deps: &ServerDeps,
) -> ControlResult<Job> {
    let mut job = require_job(job_id, deps).await?;
    deps.store.set_auto_mode(job_id, enabled).await?;
    job.auto_mode = enabled;
    deps.live_log.emit(
        LogLevel::Info,
        &format!("Auto mode {}", if enabled { "enabled" } else { "disabled" }),
        Some(job_id),
    );
    Ok(job)
}

pub async fn job_status(job_id: JobId, deps: &ServerDeps) -> ControlResult<JobStatusView> {
    let job = require_job(job_id, deps).await?;
    let counts = deps.store.unit_counts(job_id).await?;
    let failed_units = deps.store.list_failed_units(job_id).await?;
    Ok(JobStatusView {
        job,
        counts,
        failed_units,
    })
}

pub async fn list_active_jobs(deps: &ServerDeps) -> ControlResult<Vec<Job>> {
    Ok(deps.store.list_active_jobs(ACTIVE_JOBS_LIMIT).await?)
}

pub fn key_status(deps: &ServerDeps) -> Vec<KeySnapshot> {
    deps.key_pool().snapshot()
}

pub async fn reload_keys(deps: &ServerDeps) -> ControlResult<usize> {
    let count = deps.reload_keys().await?;
    info!(keys = count, "Generation keys reloaded");
    deps.live_log.emit(
        LogLevel::Info,
        &format!("Reloaded {} generation keys", count),
        None,
    );
    Ok(count)
}

/// Executes queued run tasks against the pipeline.
pub struct CrawlTaskHandler {
    deps: ServerDeps,
}

impl CrawlTaskHandler {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl RunTaskHandler for CrawlTaskHandler {
    async fn execute(&self, task: RunTask) -> Result<()> {
        match task {
            RunTask::Discover { job_id } => {
                discover_units(job_id, &self.deps).await?;
            }
            RunTask::ProcessBatch {
                job_id,
                chunk_count,
            } => {
                let Some(job) = self.deps.store.get_job(job_id).await? else {
                    warn!(job_id = %job_id, "Queued run for unknown job");
                    return Ok(());
                };
                if job.status != JobStatus::Processing {
                    info!(job_id = %job_id, status = %job.status, "Job no longer processing, skipping queued run");
                    return Ok(());
                }
                run_batch(job, chunk_count, &self.deps).await?;
            }
        }
        Ok(())
    }
}
