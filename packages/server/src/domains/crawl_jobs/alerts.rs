//! Alert message bodies and best-effort delivery.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::models::JobId;
use crate::kernel::{AlertKind, BaseNotifier};

pub fn format_error(work_title: &str, source_range: &str, error: &str, job_id: JobId) -> String {
    format!(
        "*Crawl Error*\n\nWork: {}\nChapters: {}\nError: {}\nJob ID: {}\n\nAction: processing stopped, check the admin panel.",
        work_title, source_range, error, job_id
    )
}

pub fn format_progress(work_title: &str, completed: i32, total: i32, job_id: JobId) -> String {
    let percentage = if total > 0 {
        f64::from(completed) / f64::from(total) * 100.0
    } else {
        0.0
    };
    format!(
        "*Progress Update*\n\nWork: {}\nCompleted: {}/{} ({:.1}%)\nJob ID: {}",
        work_title, completed, total, percentage, job_id
    )
}

pub fn format_complete(
    work_title: &str,
    total: i32,
    failed: i32,
    job_id: JobId,
    duration: &str,
) -> String {
    format!(
        "*Crawl Completed!* 🎉\n\nWork: {}\nChapters: {}/{} ✓\nFailed: {}\nDuration: {}\nJob ID: {}",
        work_title, total, total, failed, duration, job_id
    )
}

/// `"2h 5m"`, `"12m"`, or `"N/A"` when the job never started.
pub fn format_duration(started_at: Option<DateTime<Utc>>, finished_at: DateTime<Utc>) -> String {
    let Some(started_at) = started_at else {
        return "N/A".to_string();
    };
    let minutes = (finished_at - started_at).num_minutes().max(0);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Whether moving from `before` to `after` summarized units crosses a
/// multiple of `every`.
pub fn crosses_progress_mark(before: i32, after: i32, every: i32) -> bool {
    every > 0 && after > 0 && after / every > before.max(0) / every
}

/// Send an alert, logging instead of propagating failures.
pub async fn send(notifier: &dyn BaseNotifier, kind: AlertKind, message: String) {
    if let Err(e) = notifier.send_alert(kind, &message).await {
        warn!(kind = kind.as_str(), error = %e, "Failed to send alert");
    }
}
