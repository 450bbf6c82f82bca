//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! - Processing tick: runs a bounded pass over ready auto-mode jobs
//! - New-unit poll: appends units published since discovery
//!
//! # Architecture
//!
//! ```text
//! Scheduler (every 2 minutes)
//!     │
//!     └─► ProcessingScheduler::tick()
//!             ├─► global auto-mode flag off → skip
//!             ├─► idle backoff asleep → skip
//!             └─► for each ready (or stale processing) auto job → claim_job → run_batch
//!
//! Scheduler (every hour)
//!     │
//!     └─► poll_new_units() → wake() when anything was added
//! ```

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::config::{Config, SchedulerConfig};
use crate::domains::crawl_jobs::actions::run_batch::older_than;
use crate::domains::crawl_jobs::actions::{claim_job, poll_new_units, run_batch};
use crate::domains::crawl_jobs::settings;
use crate::kernel::ServerDeps;

/// Empty-tick counter. After `idle_ticks_before_sleep` ticks without ready
/// jobs, the next `sleep_ticks` ticks are skipped.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    idle_ticks_before_sleep: u32,
    sleep_ticks: u32,
    idle_ticks: u32,
    sleep_remaining: u32,
}

impl IdleBackoff {
    pub fn new(idle_ticks_before_sleep: u32, sleep_ticks: u32) -> Self {
        Self {
            idle_ticks_before_sleep,
            sleep_ticks,
            idle_ticks: 0,
            sleep_remaining: 0,
        }
    }

    /// Consume one tick of sleep. Returns true while asleep.
    pub fn should_skip(&mut self) -> bool {
        if self.sleep_remaining == 0 {
            return false;
        }
        self.sleep_remaining -= 1;
        true
    }

    pub fn record(&mut self, jobs_found: usize) {
        if jobs_found > 0 {
            self.idle_ticks = 0;
            return;
        }
        self.idle_ticks += 1;
        if self.idle_ticks >= self.idle_ticks_before_sleep.max(1) {
            self.idle_ticks = 0;
            self.sleep_remaining = self.sleep_ticks;
        }
    }

    pub fn wake(&mut self) {
        self.idle_ticks = 0;
        self.sleep_remaining = 0;
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleep_remaining > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Disabled,
    Sleeping,
    Ran { jobs_found: usize, jobs_run: usize },
}

/// Periodic driver of processing runs for auto-mode jobs.
pub struct ProcessingScheduler {
    deps: ServerDeps,
    config: SchedulerConfig,
    backoff: Mutex<IdleBackoff>,
}

impl ProcessingScheduler {
    pub fn new(deps: ServerDeps, config: SchedulerConfig) -> Self {
        let backoff = IdleBackoff::new(config.idle_ticks_before_sleep, config.sleep_ticks);
        Self {
            deps,
            config,
            backoff: Mutex::new(backoff),
        }
    }

    fn backoff(&self) -> MutexGuard<'_, IdleBackoff> {
        self.backoff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel any idle sleep so the next tick looks for work again.
    pub fn wake(&self) {
        self.backoff().wake();
        info!("Processing scheduler woken");
    }

    pub fn is_sleeping(&self) -> bool {
        self.backoff().is_sleeping()
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        if !settings::auto_mode_enabled(self.deps.store.as_ref()).await? {
            debug!("Auto mode disabled, skipping tick");
            return Ok(TickOutcome::Disabled);
        }
        if self.backoff().should_skip() {
            debug!("Scheduler asleep, skipping tick");
            return Ok(TickOutcome::Sleeping);
        }

        let stale_before = older_than(Utc::now(), self.deps.pipeline.stale_run_after);
        let jobs = self
            .deps
            .store
            .list_runnable_auto_jobs(stale_before, self.config.jobs_per_tick)
            .await?;
        let jobs_found = jobs.len();
        {
            let mut backoff = self.backoff();
            backoff.record(jobs_found);
            if backoff.is_sleeping() {
                info!("No ready jobs for several ticks, scheduler going to sleep");
            }
        }

        let mut jobs_run = 0;
        for job in jobs {
            let claimed = match claim_job(job.id, None, &self.deps).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    debug!(job_id = %job.id, error = %e, "Skipping job this tick");
                    continue;
                }
            };
            match run_batch(claimed, self.config.chunks_per_job, &self.deps).await {
                Ok(report) => {
                    jobs_run += 1;
                    debug!(job_id = %job.id, status = %report.status, "Scheduled run finished");
                }
                Err(e) => error!(job_id = %job.id, error = %e, "Scheduled run failed"),
            }
        }

        Ok(TickOutcome::Ran {
            jobs_found,
            jobs_run,
        })
    }
}

/// Start all scheduled tasks
pub async fn start_scheduler(
    scheduler: Arc<ProcessingScheduler>,
    config: &Config,
) -> Result<JobScheduler> {
    let cron = JobScheduler::new().await?;

    // Processing tick
    let tick_scheduler = scheduler.clone();
    let tick_job = Job::new_async(config.process_schedule.as_str(), move |_uuid, _lock| {
        let scheduler = tick_scheduler.clone();
        Box::pin(async move {
            if let Err(e) = scheduler.tick().await {
                tracing::error!("Processing tick failed: {}", e);
            }
        })
    })?;
    cron.add(tick_job).await?;

    // New-unit discovery for followed jobs
    let poll_scheduler = scheduler.clone();
    let poll_job = Job::new_async(config.discovery_schedule.as_str(), move |_uuid, _lock| {
        let scheduler = poll_scheduler.clone();
        Box::pin(async move {
            match poll_new_units(&scheduler.deps).await {
                Ok(report) if report.units_added > 0 => scheduler.wake(),
                Ok(_) => {}
                Err(e) => tracing::error!("New-unit poll failed: {}", e),
            }
        })
    })?;
    cron.add(poll_job).await?;

    cron.start().await?;

    tracing::info!(
        process_schedule = %config.process_schedule,
        discovery_schedule = %config.discovery_schedule,
        "Scheduled tasks started"
    );
    Ok(cron)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeps_after_idle_ticks_and_wakes_on_signal() {
        let mut backoff = IdleBackoff::new(2, 3);
        assert!(!backoff.should_skip());
        backoff.record(0);
        assert!(!backoff.is_sleeping());
        backoff.record(0);
        assert!(backoff.is_sleeping());

        assert!(backoff.should_skip());
        assert!(backoff.should_skip());
        backoff.wake();
        assert!(!backoff.should_skip());
    }

    #[test]
    fn sleep_lasts_a_fixed_number_of_ticks() {
        let mut backoff = IdleBackoff::new(1, 2);
        backoff.record(0);
        assert!(backoff.should_skip());
        assert!(backoff.should_skip());
        assert!(!backoff.should_skip());
    }

    #[test]
    fn finding_jobs_resets_the_idle_count() {
        let mut backoff = IdleBackoff::new(2, 5);
        backoff.record(0);
        backoff.record(1);
        backoff.record(0);
        assert!(!backoff.is_sleeping());
    }
}
