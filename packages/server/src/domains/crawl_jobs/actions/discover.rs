//! Unit discovery for a freshly created job.
//!
//! `initializing -> crawling -> ready`. Listing failures fail the job and
//! send an error alert.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::domains::crawl_jobs::alerts;
use crate::domains::crawl_jobs::models::{JobId, JobStatus};
use crate::kernel::{AlertKind, LogLevel, ServerDeps};

/// List the job's source, persist the units inside its target range and
/// mark the job ready. Returns the number of units inserted.
pub async fn discover_units(job_id: JobId, deps: &ServerDeps) -> Result<usize> {
    let job = deps
        .store
        .get_job(job_id)
        .await?
        .with_context(|| format!("job {} not found", job_id))?;

    if job.status != JobStatus::Initializing {
        warn!(job_id = %job_id, status = %job.status, "Skipping discovery for job that is not initializing");
        return Ok(0);
    }

    deps.store.mark_discovery_started(job_id, Utc::now()).await?;
    deps.live_log.emit(
        LogLevel::Info,
        &format!("Listing chapters for {}", job.work_title),
        Some(job_id),
    );

    let listed = match deps.fetcher.list_units(&job.source_url).await {
        Ok(units) => units,
        Err(e) => {
            let message = e.to_string();
            deps.store.mark_job_failed(job_id, &message).await?;
            deps.live_log.emit(
                LogLevel::Error,
                &format!("Chapter listing failed: {}", message),
                Some(job_id),
            );
            alerts::send(
                deps.notifier.as_ref(),
                AlertKind::Error,
                alerts::format_error(&job.work_title, "listing", &message, job_id),
            )
            .await;
            return Err(e).context("chapter listing failed");
        }
    };

    let listed_count = listed.len();
    let in_range: Vec<_> = listed
        .into_iter()
        .filter(|unit| job.in_target_range(unit.ordinal))
        .collect();

    let inserted = deps
        .store
        .insert_units(job_id, job.work_id, in_range, Utc::now())
        .await?;
    let counts = deps.store.unit_counts(job_id).await?;
    deps.store
        .mark_discovery_complete(job_id, counts.total)
        .await?;

    info!(
        job_id = %job_id,
        listed = listed_count,
        inserted,
        total = counts.total,
        "Discovery complete"
    );
    deps.live_log.emit(
        LogLevel::Success,
        &format!("Found {} chapters for {}", counts.total, job.work_title),
        Some(job_id),
    );

    Ok(inserted)
}
