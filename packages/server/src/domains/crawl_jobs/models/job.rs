//! Crawl job - one end-to-end crawl-and-summarize workflow for a parent work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

pub type JobId = Uuid;
pub type WorkId = Uuid;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Initializing,
    Crawling,
    Ready,
    Processing,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs no longer block a new job for the same work.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// An operator (or a fatal error) stopped the job; runs must not continue.
    pub fn is_halted(&self) -> bool {
        matches!(self, JobStatus::Paused | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Crawling => "crawling",
            JobStatus::Ready => "ready",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub work_id: WorkId,
    pub work_title: String,
    pub source_url: String,
    pub status: JobStatus,

    // Progress
    pub total_units: i32,
    pub crawled_units: i32,
    pub summarized_units: i32,
    pub failed_units: i32,

    // Merge settings. `batch_size` is the legacy column; the effective merge
    // size is the larger of the two.
    pub merge_size: i32,
    pub batch_size: i32,
    pub target_start: Option<i32>,
    pub target_end: Option<i32>,

    pub auto_mode: bool,
    pub follow_source: bool,

    /// Heartbeat while processing.
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether `ordinal` falls inside the job's optional target range.
    pub fn in_target_range(&self, ordinal: i32) -> bool {
        self.target_start.map_or(true, |start| ordinal >= start)
            && self.target_end.map_or(true, |end| ordinal <= end)
    }
}

/// Insert payload for a new job.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJob {
    #[builder(default = Uuid::new_v4())]
    pub id: JobId,
    pub work_id: WorkId,
    pub work_title: String,
    pub source_url: String,
    #[builder(default = 1)]
    pub merge_size: i32,
    #[builder(default, setter(strip_option))]
    pub target_start: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub target_end: Option<i32>,
    #[builder(default = false)]
    pub auto_mode: bool,
}

impl NewJob {
    /// Jobs pinned to an explicit end ordinal never pick up newly published units.
    pub fn follows_source(&self) -> bool {
        self.target_end.is_none()
    }

    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        let follow_source = self.follows_source();
        Job {
            id: self.id,
            work_id: self.work_id,
            work_title: self.work_title,
            source_url: self.source_url,
            status: JobStatus::Initializing,
            total_units: 0,
            crawled_units: 0,
            summarized_units: 0,
            failed_units: 0,
            merge_size: self.merge_size,
            batch_size: self.merge_size,
            target_start: self.target_start,
            target_end: self.target_end,
            auto_mode: self.auto_mode,
            follow_source,
            last_processed_at: None,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Final state written at the end of a processing run.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: JobStatus,
    pub counts: UnitCounts,
    pub last_error: Option<String>,
    pub disable_auto_mode: bool,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate unit state for one job, re-queried rather than tracked incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounts {
    pub total: i32,
    pub pending: i32,
    pub in_flight: i32,
    pub crawled: i32,
    pub completed: i32,
    pub failed: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_end_disables_follow() {
        let job = NewJob::builder()
            .work_id(Uuid::new_v4())
            .work_title("Tiên Nghịch")
            .source_url("https://example.com/tien-nghich")
            .target_end(100)
            .build();
        assert!(!job.follows_source());

        let job = job.into_job(Utc::now());
        assert_eq!(job.status, JobStatus::Initializing);
        assert_eq!(job.batch_size, job.merge_size);
        assert!(job.in_target_range(100));
        assert!(!job.in_target_range(101));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(JobStatus::Paused.is_halted());
        assert!(!JobStatus::Processing.is_halted());
    }
}
