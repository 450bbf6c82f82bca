//! In-memory store for tests and local development.
//!
//! Mirrors the conditional-update semantics of the Postgres store. Not
//! suitable for production: everything is lost on restart.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::CrawlStore;
use crate::domains::crawl_jobs::models::*;

#[derive(Default)]
struct State {
    // Insertion order doubles as creation order.
    jobs: Vec<Job>,
    units: HashMap<UnitId, Unit>,
    outputs: BTreeMap<(WorkId, i32), MergedOutput>,
    tags: BTreeMap<WorkId, BTreeSet<String>>,
    settings: HashMap<String, String>,
}

impl State {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| anyhow!("job {} not found", id))
    }

    fn units_for(&self, job_id: JobId) -> Vec<Unit> {
        let mut units: Vec<Unit> = self
            .units
            .values()
            .filter(|u| u.job_id == job_id)
            .cloned()
            .collect();
        units.sort_by_key(|u| u.ordinal);
        units
    }

    fn transition(
        &mut self,
        ids: &[UnitId],
        allowed: impl Fn(UnitStatus) -> bool,
        apply: impl Fn(&mut Unit),
    ) -> u64 {
        let mut moved = 0;
        for id in ids {
            if let Some(unit) = self.units.get_mut(id) {
                if allowed(unit.status) {
                    apply(unit);
                    moved += 1;
                }
            }
        }
        moved
    }
}

#[derive(Default)]
pub struct MemoryCrawlStore {
    state: Mutex<State>,
}

impl MemoryCrawlStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of stored merged outputs across all works.
    pub fn output_count(&self) -> usize {
        self.state().outputs.len()
    }

    /// Rewrite a unit's `updated_at`, for simulating stuck units.
    pub fn backdate_unit(&self, id: UnitId, updated_at: DateTime<Utc>) {
        if let Some(unit) = self.state().units.get_mut(&id) {
            unit.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl CrawlStore for MemoryCrawlStore {
    async fn insert_job(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job> {
        let job = job.into_job(now);
        self.state().jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.state().jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn find_active_job_for_work(&self, work_id: WorkId) -> Result<Option<Job>> {
        Ok(self
            .state()
            .jobs
            .iter()
            .rev()
            .find(|j| j.work_id == work_id && !j.status.is_terminal())
            .cloned())
    }

    async fn latest_job_for_work(&self, work_id: WorkId) -> Result<Option<Job>> {
        Ok(self
            .state()
            .jobs
            .iter()
            .rev()
            .find(|j| j.work_id == work_id)
            .cloned())
    }

    async fn list_active_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        Ok(self
            .state()
            .jobs
            .iter()
            .rev()
            .filter(|j| !j.status.is_terminal())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_runnable_auto_jobs(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .state()
            .jobs
            .iter()
            .filter(|j| {
                j.auto_mode
                    && match j.status {
                        JobStatus::Ready => true,
                        JobStatus::Processing => {
                            j.last_processed_at.map_or(true, |hb| hb < stale_before)
                        }
                        _ => false,
                    }
            })
            .cloned()
            .collect();
        // Never-processed jobs first, then the longest idle.
        jobs.sort_by_key(|j| j.last_processed_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn list_followed_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .state()
            .jobs
            .iter()
            .filter(|j| {
                j.follow_source
                    && matches!(
                        j.status,
                        JobStatus::Ready
                            | JobStatus::Processing
                            | JobStatus::Paused
                            | JobStatus::Completed
                    )
            })
            .cloned()
            .collect())
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        self.state().job_mut(id)?.status = status;
        Ok(())
    }

    async fn transition_job_status(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool> {
        let mut state = self.state();
        let job = state.job_mut(id)?;
        if job.status != from {
            return Ok(false);
        }
        job.status = to;
        Ok(true)
    }

    async fn mark_discovery_started(&self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        let job = state.job_mut(id)?;
        job.status = JobStatus::Crawling;
        job.started_at = Some(now);
        Ok(())
    }

    async fn mark_discovery_complete(&self, id: JobId, total_units: i32) -> Result<()> {
        let mut state = self.state();
        let job = state.job_mut(id)?;
        job.status = JobStatus::Ready;
        job.total_units = total_units;
        Ok(())
    }

    async fn mark_job_failed(&self, id: JobId, error: &str) -> Result<()> {
        let mut state = self.state();
        let job = state.job_mut(id)?;
        job.status = JobStatus::Failed;
        job.last_error = Some(error.to_string());
        Ok(())
    }

    async fn claim_job(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut state = self.state();
        let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(None);
        };

        let claimable = match job.status {
            JobStatus::Ready | JobStatus::Paused => true,
            JobStatus::Processing => job.last_processed_at.map_or(true, |hb| hb < stale_before),
            _ => false,
        };
        if !claimable {
            return Ok(None);
        }

        job.status = JobStatus::Processing;
        job.last_processed_at = Some(now);
        job.started_at.get_or_insert(now);
        Ok(Some(job.clone()))
    }

    async fn touch_heartbeat(&self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        self.state().job_mut(id)?.last_processed_at = Some(now);
        Ok(())
    }

    async fn set_auto_mode(&self, id: JobId, enabled: bool) -> Result<()> {
        self.state().job_mut(id)?.auto_mode = enabled;
        Ok(())
    }

    async fn set_merge_size(&self, id: JobId, merge_size: i32) -> Result<()> {
        let mut state = self.state();
        let job = state.job_mut(id)?;
        job.merge_size = merge_size;
        job.batch_size = merge_size;
        Ok(())
    }

    async fn record_job_error(&self, id: JobId, error: &str) -> Result<()> {
        self.state().job_mut(id)?.last_error = Some(error.to_string());
        Ok(())
    }

    async fn finish_run(&self, id: JobId, completion: RunCompletion) -> Result<()> {
        let mut state = self.state();
        let job = state.job_mut(id)?;
        job.status = completion.status;
        job.crawled_units = completion.counts.crawled;
        job.summarized_units = completion.counts.completed;
        job.failed_units = completion.counts.failed;
        job.last_processed_at = Some(completion.finished_at);
        if let Some(error) = completion.last_error {
            job.last_error = Some(error);
        }
        if completion.disable_auto_mode {
            job.auto_mode = false;
        }
        if completion.status == JobStatus::Completed {
            job.completed_at = Some(completion.finished_at);
        }
        Ok(())
    }

    async fn update_job_counts(&self, id: JobId, counts: UnitCounts) -> Result<()> {
        let mut state = self.state();
        let job = state.job_mut(id)?;
        job.crawled_units = counts.crawled;
        job.summarized_units = counts.completed;
        job.failed_units = counts.failed;
        Ok(())
    }

    async fn extend_total_units(&self, id: JobId, added: i32) -> Result<()> {
        self.state().job_mut(id)?.total_units += added;
        Ok(())
    }

    async fn insert_units(
        &self,
        job_id: JobId,
        work_id: WorkId,
        units: Vec<NewUnit>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut state = self.state();
        let mut known: BTreeSet<i32> = state
            .units
            .values()
            .filter(|u| u.job_id == job_id)
            .map(|u| u.ordinal)
            .collect();

        let mut inserted = 0;
        for unit in units {
            if !known.insert(unit.ordinal) {
                continue;
            }
            let unit = unit.into_unit(job_id, work_id, now);
            state.units.insert(unit.id, unit);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_units(&self, job_id: JobId) -> Result<Vec<Unit>> {
        Ok(self.state().units_for(job_id))
    }

    async fn list_pending_units(&self, job_id: JobId, limit: i64) -> Result<Vec<Unit>> {
        Ok(self
            .state()
            .units_for(job_id)
            .into_iter()
            .filter(|u| u.status == UnitStatus::Pending)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_failed_units(&self, job_id: JobId) -> Result<Vec<Unit>> {
        Ok(self
            .state()
            .units_for(job_id)
            .into_iter()
            .filter(|u| u.status == UnitStatus::Failed)
            .collect())
    }

    async fn max_unit_ordinal(&self, job_id: JobId) -> Result<Option<i32>> {
        Ok(self
            .state()
            .units
            .values()
            .filter(|u| u.job_id == job_id)
            .map(|u| u.ordinal)
            .max())
    }

    async fn mark_units_crawling(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64> {
        Ok(self.state().transition(
            ids,
            |s| s.can_advance_to(UnitStatus::Crawling),
            |u| {
                u.status = UnitStatus::Crawling;
                u.updated_at = now;
            },
        ))
    }

    async fn save_unit_content(&self, id: UnitId, content: &str, now: DateTime<Utc>) -> Result<()> {
        let moved = self.state().transition(
            &[id],
            |s| s.can_advance_to(UnitStatus::Summarizing),
            |u| {
                u.status = UnitStatus::Summarizing;
                u.raw_content = Some(content.to_string());
                u.crawled_at = Some(now);
                u.updated_at = now;
            },
        );
        if moved == 0 {
            return Err(anyhow!("unit {} is not crawling", id));
        }
        Ok(())
    }

    async fn complete_units(
        &self,
        ids: &[UnitId],
        summary: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self.state().transition(
            ids,
            |s| s.can_advance_to(UnitStatus::Completed),
            |u| {
                u.status = UnitStatus::Completed;
                u.summary = Some(summary.to_string());
                u.error = None;
                u.summarized_at = Some(now);
                u.updated_at = now;
            },
        ))
    }

    async fn fail_units(&self, ids: &[UnitId], error: &str, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.state().transition(
            ids,
            |s| s.can_advance_to(UnitStatus::Failed),
            |u| {
                u.status = UnitStatus::Failed;
                u.error = Some(error.to_string());
                u.retry_count += 1;
                u.updated_at = now;
            },
        ))
    }

    async fn revert_units_for_retry(
        &self,
        ids: &[UnitId],
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self.state().transition(
            ids,
            |s| s.is_in_flight(),
            |u| {
                u.status = UnitStatus::Pending;
                u.error = Some(error.to_string());
                u.retry_count += 1;
                u.updated_at = now;
            },
        ))
    }

    async fn release_units(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64> {
        Ok(self.state().transition(
            ids,
            |s| s.is_in_flight(),
            |u| {
                u.status = UnitStatus::Pending;
                u.updated_at = now;
            },
        ))
    }

    async fn release_stale_units(
        &self,
        job_id: JobId,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state();
        let ids: Vec<UnitId> = state
            .units
            .values()
            .filter(|u| u.job_id == job_id && u.updated_at < stale_before)
            .map(|u| u.id)
            .collect();
        Ok(state.transition(
            &ids,
            |s| s.is_in_flight(),
            |u| {
                u.status = UnitStatus::Pending;
                u.updated_at = now;
            },
        ))
    }

    async fn reset_units(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64> {
        Ok(self.state().transition(
            ids,
            |_| true,
            |u| {
                u.status = UnitStatus::Pending;
                u.error = None;
                u.summary = None;
                u.retry_count = 0;
                u.summarized_at = None;
                u.updated_at = now;
            },
        ))
    }

    async fn unit_counts(&self, job_id: JobId) -> Result<UnitCounts> {
        let state = self.state();
        let mut counts = UnitCounts::default();
        for unit in state.units.values().filter(|u| u.job_id == job_id) {
            counts.total += 1;
            if unit.crawled_at.is_some() {
                counts.crawled += 1;
            }
            match unit.status {
                UnitStatus::Pending => counts.pending += 1,
                UnitStatus::Crawling | UnitStatus::Summarizing => counts.in_flight += 1,
                UnitStatus::Completed => counts.completed += 1,
                UnitStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn upsert_output(
        &self,
        output: NewMergedOutput,
        now: DateTime<Utc>,
    ) -> Result<(MergedOutput, UpsertKind)> {
        let mut state = self.state();
        let key = (output.work_id, output.output_ordinal);

        if let Some(existing) = state.outputs.get_mut(&key) {
            existing.title = output.title;
            existing.rewritten_body = output.rewritten_body;
            existing.short_summary = output.short_summary;
            existing.source_range = output.source_range;
            existing.status = output.status;
            existing.updated_at = now;
            return Ok((existing.clone(), UpsertKind::Updated));
        }

        let row = MergedOutput {
            id: Uuid::new_v4(),
            work_id: output.work_id,
            output_ordinal: output.output_ordinal,
            title: output.title,
            rewritten_body: output.rewritten_body,
            short_summary: output.short_summary,
            source_range: output.source_range,
            status: output.status,
            created_at: now,
            updated_at: now,
        };
        state.outputs.insert(key, row.clone());
        Ok((row, UpsertKind::Inserted))
    }

    async fn get_output(
        &self,
        work_id: WorkId,
        output_ordinal: i32,
    ) -> Result<Option<MergedOutput>> {
        Ok(self.state().outputs.get(&(work_id, output_ordinal)).cloned())
    }

    async fn list_output_ordinals(&self, work_id: WorkId) -> Result<Vec<i32>> {
        Ok(self
            .state()
            .outputs
            .keys()
            .filter(|(w, _)| *w == work_id)
            .map(|(_, ordinal)| *ordinal)
            .collect())
    }

    async fn delete_output(&self, work_id: WorkId, output_ordinal: i32) -> Result<bool> {
        Ok(self
            .state()
            .outputs
            .remove(&(work_id, output_ordinal))
            .is_some())
    }

    async fn add_work_tags(&self, work_id: WorkId, tags: &[String]) -> Result<usize> {
        let mut state = self.state();
        let entry = state.tags.entry(work_id).or_default();
        Ok(tags.iter().filter(|t| entry.insert((*t).clone())).count())
    }

    async fn list_work_tags(&self, work_id: WorkId) -> Result<Vec<String>> {
        Ok(self
            .state()
            .tags
            .get(&work_id)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state().settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.state()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
