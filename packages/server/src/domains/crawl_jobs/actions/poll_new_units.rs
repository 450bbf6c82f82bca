//! Pick up units published after a job's discovery.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::domains::crawl_jobs::models::{Job, JobStatus};
use crate::kernel::{LogLevel, ServerDeps};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PollReport {
    pub jobs_checked: usize,
    pub units_added: usize,
}

/// Append units beyond each followed job's highest known ordinal. Completed
/// jobs that gain units go back to `ready`. Listing failures skip the job.
pub async fn poll_new_units(deps: &ServerDeps) -> anyhow::Result<PollReport> {
    let jobs = deps.store.list_followed_jobs().await?;
    let mut report = PollReport::default();

    for job in jobs {
        report.jobs_checked += 1;
        match poll_job(&job, deps).await {
            Ok(added) => report.units_added += added,
            Err(e) => warn!(job_id = %job.id, error = %e, "New-unit poll failed"),
        }
    }

    if report.units_added > 0 {
        info!(
            jobs = report.jobs_checked,
            added = report.units_added,
            "New units discovered"
        );
    }
    Ok(report)
}

async fn poll_job(job: &Job, deps: &ServerDeps) -> anyhow::Result<usize> {
    let known_max = deps.store.max_unit_ordinal(job.id).await?.unwrap_or(0);
    let listed = deps.fetcher.list_units(&job.source_url).await?;

    let fresh: Vec<_> = listed
        .into_iter()
        .filter(|u| u.ordinal > known_max && job.in_target_range(u.ordinal))
        .collect();
    if fresh.is_empty() {
        return Ok(0);
    }

    let added = deps
        .store
        .insert_units(job.id, job.work_id, fresh, Utc::now())
        .await?;
    if added == 0 {
        return Ok(0);
    }

    deps.store.extend_total_units(job.id, added as i32).await?;
    // Conditional: a run or repair may have claimed the job since the snapshot.
    if deps
        .store
        .transition_job_status(job.id, JobStatus::Completed, JobStatus::Ready)
        .await?
    {
        info!(job_id = %job.id, added, "Completed job reopened for new units");
    }

    deps.live_log.emit(
        LogLevel::Info,
        &format!("{} new chapters published for {}", added, job.work_title),
        Some(job.id),
    );
    Ok(added)
}
