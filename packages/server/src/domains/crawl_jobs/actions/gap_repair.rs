//! Gap detection and repair for a work's latest job.
//!
//! A gap is a unit that failed, a unit stuck in flight past the stuck
//! window, or a completed unit whose merged output is missing. Repair resets
//! those units to pending, reopens a completed/failed job and queues a
//! bounded processing run.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use super::control::start_batch;
use super::run_batch::older_than;
use crate::domains::crawl_jobs::error::{ControlError, ControlResult};
use crate::domains::crawl_jobs::models::{Job, JobId, JobStatus, Unit, UnitId, UnitStatus, WorkId};
use crate::domains::crawl_jobs::planner;
use crate::kernel::{LogLevel, ServerDeps};

#[derive(Debug, Clone, Default, Serialize)]
pub struct GapReport {
    pub job_id: Option<JobId>,
    /// Ordinals by gap kind.
    pub failed: Vec<i32>,
    pub stuck: Vec<i32>,
    pub missing_output: Vec<i32>,
    pub reset: u64,
    pub retriggered: bool,
}

impl GapReport {
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.stuck.is_empty() && self.missing_output.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gap {
    Failed,
    Stuck,
    MissingOutput,
}

fn classify(
    unit: &Unit,
    merge_size: i32,
    outputs: &HashSet<i32>,
    stuck_before: chrono::DateTime<Utc>,
) -> Option<Gap> {
    match unit.status {
        UnitStatus::Failed => Some(Gap::Failed),
        UnitStatus::Crawling | UnitStatus::Summarizing if unit.updated_at < stuck_before => {
            Some(Gap::Stuck)
        }
        UnitStatus::Completed
            if !outputs.contains(&planner::output_ordinal(unit.ordinal, merge_size)) =>
        {
            Some(Gap::MissingOutput)
        }
        _ => None,
    }
}

async fn latest_job(work_id: WorkId, deps: &ServerDeps) -> ControlResult<Job> {
    deps.store
        .latest_job_for_work(work_id)
        .await?
        .ok_or(ControlError::WorkNotFound(work_id))
}

async fn detect(
    job: &Job,
    range: Option<(i32, i32)>,
    deps: &ServerDeps,
) -> ControlResult<(GapReport, Vec<UnitId>)> {
    let units = deps.store.list_units(job.id).await?;
    let outputs: HashSet<i32> = deps
        .store
        .list_output_ordinals(job.work_id)
        .await?
        .into_iter()
        .collect();
    let merge_size = planner::merge_size(job);
    let stuck_before = older_than(Utc::now(), deps.pipeline.stuck_unit_after);

    let mut report = GapReport {
        job_id: Some(job.id),
        ..GapReport::default()
    };
    let mut ids = Vec::new();
    for unit in units
        .iter()
        .filter(|u| range.map_or(true, |(start, end)| u.ordinal >= start && u.ordinal <= end))
    {
        let Some(gap) = classify(unit, merge_size, &outputs, stuck_before) else {
            continue;
        };
        match gap {
            Gap::Failed => report.failed.push(unit.ordinal),
            Gap::Stuck => report.stuck.push(unit.ordinal),
            Gap::MissingOutput => report.missing_output.push(unit.ordinal),
        }
        ids.push(unit.id);
    }
    Ok((report, ids))
}

/// Reset the units, reopen the job and queue a repair run.
async fn repair(job: &Job, ids: &[UnitId], deps: &ServerDeps) -> ControlResult<(u64, bool)> {
    let reset = deps.store.reset_units(ids, Utc::now()).await?;

    let mut status = job.status;
    if status.is_terminal() {
        deps.store.set_job_status(job.id, JobStatus::Ready).await?;
        status = JobStatus::Ready;
    }
    let counts = deps.store.unit_counts(job.id).await?;
    deps.store.update_job_counts(job.id, counts).await?;

    deps.live_log.emit(
        LogLevel::Info,
        &format!("Reset {} chapters for reprocessing", reset),
        Some(job.id),
    );

    // Paused jobs stay paused. A live run keeps its claim; a dead one is reclaimed.
    if !matches!(status, JobStatus::Ready | JobStatus::Processing) {
        return Ok((reset, false));
    }
    match start_batch(job.id, deps.pipeline.repair_chunk_limit, None, deps).await {
        Ok(_) => Ok((reset, true)),
        Err(ControlError::AlreadyProcessing(_)) => Ok((reset, false)),
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Could not start repair run");
            Ok((reset, false))
        }
    }
}

/// Detect and repair every gap in the work's latest job.
pub async fn scan_gaps(work_id: WorkId, deps: &ServerDeps) -> ControlResult<GapReport> {
    let job = latest_job(work_id, deps).await?;
    repair_in_range(&job, None, deps).await
}

/// Gap repair restricted to ordinals `start..=end`.
pub async fn fix_range(
    work_id: WorkId,
    start: i32,
    end: i32,
    deps: &ServerDeps,
) -> ControlResult<GapReport> {
    if start < 1 || start > end {
        return Err(ControlError::InvalidRequest(format!(
            "invalid range {}-{}",
            start, end
        )));
    }
    let job = latest_job(work_id, deps).await?;
    repair_in_range(&job, Some((start, end)), deps).await
}

async fn repair_in_range(
    job: &Job,
    range: Option<(i32, i32)>,
    deps: &ServerDeps,
) -> ControlResult<GapReport> {
    let (mut report, ids) = detect(job, range, deps).await?;
    if ids.is_empty() {
        info!(job_id = %job.id, "No gaps found");
        return Ok(report);
    }

    info!(
        job_id = %job.id,
        failed = report.failed.len(),
        stuck = report.stuck.len(),
        missing_output = report.missing_output.len(),
        "Repairing gaps"
    );
    let (reset, retriggered) = repair(job, &ids, deps).await?;
    report.reset = reset;
    report.retriggered = retriggered;
    Ok(report)
}

/// Force one unit back to pending regardless of its state.
pub async fn retry_unit(work_id: WorkId, ordinal: i32, deps: &ServerDeps) -> ControlResult<GapReport> {
    let job = latest_job(work_id, deps).await?;
    let unit = deps
        .store
        .list_units(job.id)
        .await?
        .into_iter()
        .find(|u| u.ordinal == ordinal)
        .ok_or(ControlError::UnitNotFound { work_id, ordinal })?;

    let (reset, retriggered) = repair(&job, &[unit.id], deps).await?;
    Ok(GapReport {
        job_id: Some(job.id),
        reset,
        retriggered,
        ..GapReport::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::crawl_jobs::models::NewUnit;
    use uuid::Uuid;

    fn unit(ordinal: i32, status: UnitStatus, updated_minutes_ago: i64) -> Unit {
        let mut unit = NewUnit {
            ordinal,
            title: None,
            source_url: String::new(),
        }
        .into_unit(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        unit.status = status;
        unit.updated_at = Utc::now() - chrono::Duration::minutes(updated_minutes_ago);
        unit
    }

    #[test]
    fn classifies_each_gap_kind() {
        let outputs: HashSet<i32> = [1].into_iter().collect();
        let stuck_before = Utc::now() - chrono::Duration::minutes(10);

        let c = |u: &Unit| classify(u, 5, &outputs, stuck_before);
        assert_eq!(c(&unit(3, UnitStatus::Failed, 0)), Some(Gap::Failed));
        assert_eq!(c(&unit(4, UnitStatus::Crawling, 30)), Some(Gap::Stuck));
        assert_eq!(c(&unit(4, UnitStatus::Summarizing, 2)), None);
        assert_eq!(c(&unit(5, UnitStatus::Completed, 0)), None);
        assert_eq!(c(&unit(6, UnitStatus::Completed, 0)), Some(Gap::MissingOutput));
        assert_eq!(c(&unit(7, UnitStatus::Pending, 60)), None);
    }
}
