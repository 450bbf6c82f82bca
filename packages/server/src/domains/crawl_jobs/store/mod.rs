//! Persistence for jobs, units, merged outputs, tags and settings.
//!
//! Every mutation takes an explicit `now` so that staleness checks
//! (heartbeats, stuck units) are deterministic under test. Conditional
//! updates (`claim_job`, unit transitions) are enforced by the store itself so
//! that two overlapping runs cannot both win.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domains::crawl_jobs::models::*;

pub mod memory;
pub mod postgres;

pub use memory::MemoryCrawlStore;
pub use postgres::PostgresCrawlStore;

#[async_trait]
pub trait CrawlStore: Send + Sync {
    // Jobs
    async fn insert_job(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Newest job for the work that is not completed or failed.
    async fn find_active_job_for_work(&self, work_id: WorkId) -> Result<Option<Job>>;

    /// Newest job for the work regardless of status.
    async fn latest_job_for_work(&self, work_id: WorkId) -> Result<Option<Job>>;

    /// Newest non-terminal jobs, most recent first.
    async fn list_active_jobs(&self, limit: i64) -> Result<Vec<Job>>;

    /// Auto-mode jobs a tick may claim: ready ones, plus processing ones
    /// whose heartbeat is older than `stale_before`. Oldest heartbeat first.
    async fn list_runnable_auto_jobs(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>>;

    /// Jobs that still track their source for newly published units.
    async fn list_followed_jobs(&self) -> Result<Vec<Job>>;

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()>;

    /// Set `to` only if the job is currently `from`. Returns whether it moved.
    async fn transition_job_status(&self, id: JobId, from: JobStatus, to: JobStatus)
        -> Result<bool>;

    /// `initializing -> crawling`, stamping `started_at`.
    async fn mark_discovery_started(&self, id: JobId, now: DateTime<Utc>) -> Result<()>;

    /// `crawling -> ready` with the discovered unit total.
    async fn mark_discovery_complete(&self, id: JobId, total_units: i32) -> Result<()>;

    async fn mark_job_failed(&self, id: JobId, error: &str) -> Result<()>;

    /// Enter `processing` if the job is ready/paused, or if it is processing
    /// with a heartbeat older than `stale_before`. Returns the claimed job,
    /// or `None` when another run holds it or it is not runnable.
    async fn claim_job(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    async fn touch_heartbeat(&self, id: JobId, now: DateTime<Utc>) -> Result<()>;

    async fn set_auto_mode(&self, id: JobId, enabled: bool) -> Result<()>;

    async fn set_merge_size(&self, id: JobId, merge_size: i32) -> Result<()>;

    async fn record_job_error(&self, id: JobId, error: &str) -> Result<()>;

    /// Write counters and the final status of a processing run.
    async fn finish_run(&self, id: JobId, completion: RunCompletion) -> Result<()>;

    /// Overwrite the aggregate counters only.
    async fn update_job_counts(&self, id: JobId, counts: UnitCounts) -> Result<()>;

    async fn extend_total_units(&self, id: JobId, added: i32) -> Result<()>;

    // Units
    /// Insert units, skipping ordinals the job already has. Returns inserted count.
    async fn insert_units(
        &self,
        job_id: JobId,
        work_id: WorkId,
        units: Vec<NewUnit>,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    async fn list_units(&self, job_id: JobId) -> Result<Vec<Unit>>;

    /// Pending units ordered by ordinal ascending.
    async fn list_pending_units(&self, job_id: JobId, limit: i64) -> Result<Vec<Unit>>;

    async fn list_failed_units(&self, job_id: JobId) -> Result<Vec<Unit>>;

    async fn max_unit_ordinal(&self, job_id: JobId) -> Result<Option<i32>>;

    /// `pending -> crawling` for the given units. Returns how many moved.
    async fn mark_units_crawling(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64>;

    /// Persist fetched content and move `crawling -> summarizing`.
    async fn save_unit_content(&self, id: UnitId, content: &str, now: DateTime<Utc>) -> Result<()>;

    /// `summarizing -> completed` with the chunk's short summary.
    async fn complete_units(&self, ids: &[UnitId], summary: &str, now: DateTime<Utc>)
        -> Result<u64>;

    /// In-flight units -> failed.
    async fn fail_units(&self, ids: &[UnitId], error: &str, now: DateTime<Utc>) -> Result<u64>;

    /// Throttled retry: back to pending with `retry_count + 1`.
    async fn revert_units_for_retry(
        &self,
        ids: &[UnitId],
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Back to pending without consuming a retry.
    async fn release_units(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64>;

    /// In-flight units of the job untouched since `stale_before` go back to
    /// pending without consuming a retry.
    async fn release_stale_units(
        &self,
        job_id: JobId,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Repair reset: pending, error/summary cleared, retry count zeroed.
    async fn reset_units(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64>;

    async fn unit_counts(&self, job_id: JobId) -> Result<UnitCounts>;

    // Merged outputs
    async fn upsert_output(
        &self,
        output: NewMergedOutput,
        now: DateTime<Utc>,
    ) -> Result<(MergedOutput, UpsertKind)>;

    async fn get_output(&self, work_id: WorkId, output_ordinal: i32)
        -> Result<Option<MergedOutput>>;

    async fn list_output_ordinals(&self, work_id: WorkId) -> Result<Vec<i32>>;

    async fn delete_output(&self, work_id: WorkId, output_ordinal: i32) -> Result<bool>;

    // Tags
    async fn add_work_tags(&self, work_id: WorkId, tags: &[String]) -> Result<usize>;

    async fn list_work_tags(&self, work_id: WorkId) -> Result<Vec<String>>;

    // Settings
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
