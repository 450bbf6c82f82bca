//! Pipeline tests over the in-memory store with mock collaborators.
//!
//! Covers discovery, chunked processing, the failure policy, concurrent
//! trigger protection, operator control and the scheduler tick.

mod common;

use std::sync::Arc;
use std::time::Duration;

use crate::common::Pipeline;
use async_trait::async_trait;
use chrono::Utc;
use digest_core::domains::crawl_jobs::actions::{self, InitJobRequest};
use digest_core::domains::crawl_jobs::error::{ChunkError, ControlError};
use digest_core::domains::crawl_jobs::models::{JobId, JobStatus, NewUnit, UnitId, UnitStatus};
use digest_core::domains::crawl_jobs::{planner, settings};
use digest_core::domains::crawl_jobs::store::{CrawlStore, MemoryCrawlStore};
use digest_core::kernel::scheduled_tasks::{ProcessingScheduler, TickOutcome};
use digest_core::kernel::test_dependencies::{
    unit_url, MockGenerationProvider, MockSourceFetcher, MockTagHandler,
};
use digest_core::kernel::{
    AlertKind, BaseSourceFetcher, FetchError, ProviderError, TestDependencies,
};
use digest_core::SchedulerConfig;
use tokio_test::assert_ok;
use uuid::Uuid;

fn with_units(count: i32) -> TestDependencies {
    TestDependencies::new().mock_fetcher(MockSourceFetcher::new().with_units(count))
}

fn request(work_id: Uuid) -> InitJobRequest {
    InitJobRequest {
        work_id,
        source_url: "https://source.test/tien-nghich/".to_string(),
        title: Some("Tiên Nghịch".to_string()),
        merge_size: Some(1),
        start: None,
        end: None,
        auto_mode: false,
    }
}

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn discovery_makes_the_job_ready() {
    let mut pipeline = Pipeline::new(with_units(12));
    let job = pipeline.discovered_job(5).await;

    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.total_units, 12);
    assert!(job.started_at.is_some());
    assert!(job.follow_source);
    assert!(pipeline
        .units(job.id)
        .await
        .iter()
        .all(|u| u.status == UnitStatus::Pending));
}

#[tokio::test]
async fn discovery_respects_the_target_range() {
    let mut pipeline = Pipeline::new(with_units(10));
    let mut req = request(Uuid::new_v4());
    req.start = Some(3);
    req.end = Some(6);
    let job = pipeline.discovered_job_with(req).await;

    assert_eq!(job.total_units, 4);
    assert!(!job.follow_source);
    let ordinals: Vec<i32> = pipeline.units(job.id).await.iter().map(|u| u.ordinal).collect();
    assert_eq!(ordinals, vec![3, 4, 5, 6]);
}

#[tokio::test]
async fn listing_failure_fails_the_job() {
    let mocks = TestDependencies::new().mock_fetcher(MockSourceFetcher::new().with_listing_error(
        FetchError::Status {
            url: "https://source.test/tien-nghich/".into(),
            status: 503,
        },
    ));
    let mut pipeline = Pipeline::new(mocks);
    let job = actions::init_job(request(Uuid::new_v4()), &pipeline.deps)
        .await
        .unwrap();
    let results = pipeline.drain().await;
    assert!(results[0].is_err());

    let job = pipeline.job(job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().contains("503"));
    assert_eq!(pipeline.mocks.notifier.alerts_of(AlertKind::Error).len(), 1);
}

#[tokio::test]
async fn second_active_job_for_a_work_is_rejected() {
    let mut pipeline = Pipeline::new(with_units(3));
    let work_id = Uuid::new_v4();
    let first = pipeline.discovered_job_with(request(work_id)).await;

    let err = actions::init_job(request(work_id), &pipeline.deps)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::AlreadyActive { job_id, .. } if job_id == first.id));
}

// =============================================================================
// Processing
// =============================================================================

#[tokio::test]
async fn batch_over_all_units_completes_the_job() {
    let mut pipeline = Pipeline::new(with_units(10));
    let job = pipeline.discovered_job(2).await;

    let job = pipeline.run_batch(job.id, 5).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.summarized_units, 10);
    assert_eq!(job.failed_units, 0);
    assert!(job.completed_at.is_some());

    let ordinals = pipeline.store.list_output_ordinals(job.work_id).await.unwrap();
    assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
    let second = pipeline.store.get_output(job.work_id, 2).await.unwrap().unwrap();
    assert_eq!(second.source_range, "3-4");
    assert_eq!(second.title, "Rewritten chapter");

    assert_eq!(pipeline.mocks.generation.call_count(), 5);
    assert_eq!(pipeline.mocks.notifier.alerts_of(AlertKind::Complete).len(), 1);
}

#[tokio::test]
async fn units_are_fetched_in_order_and_merged_into_one_prompt() {
    let mut pipeline = Pipeline::new(with_units(3));
    let job = pipeline.discovered_job(3).await;
    pipeline.run_batch(job.id, 1).await;

    assert_eq!(
        pipeline.mocks.fetcher.fetched_urls(),
        vec![unit_url(1), unit_url(2), unit_url(3)]
    );
    let prompts = pipeline.mocks.generation.prompts();
    assert_eq!(prompts.len(), 1);
    let first = prompts[0].find("=== Chapter 1: Title 1 ===").unwrap();
    let third = prompts[0].find("=== Chapter 3: Title 3 ===").unwrap();
    assert!(first < third);
}

#[tokio::test]
async fn partial_batch_leaves_the_job_ready() {
    let mut pipeline = Pipeline::new(with_units(12));
    let job = pipeline.discovered_job(5).await;

    let job = pipeline.run_batch(job.id, 1).await;

    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.summarized_units, 5);
    assert_eq!(pipeline.unit(job.id, 6).await.status, UnitStatus::Pending);
}

#[tokio::test]
async fn malformed_reply_still_completes_the_chunk() {
    let reply = "The model ignored the format and wrote a plain paragraph instead.";
    let mocks = with_units(1).mock_generation(MockGenerationProvider::new().with_reply(reply));
    let mut pipeline = Pipeline::new(mocks);
    let job = pipeline.discovered_job(1).await;

    let job = pipeline.run_batch(job.id, 1).await;

    assert_eq!(job.status, JobStatus::Completed);
    let output = pipeline.store.get_output(job.work_id, 1).await.unwrap().unwrap();
    assert_eq!(output.title, "Chapter 1: Title 1");
    assert_eq!(output.rewritten_body, reply);
    assert_eq!(output.short_summary, reply);
    assert_eq!(
        pipeline.unit(job.id, 1).await.summary.as_deref(),
        Some(reply)
    );
    assert!(pipeline.mocks.tag_handler.calls().is_empty());
}

#[tokio::test]
async fn tags_reach_the_handler_and_its_failures_are_ignored() {
    let mocks = with_units(2).mock_tags(MockTagHandler::new().failing());
    let mut pipeline = Pipeline::new(mocks);
    let job = pipeline.discovered_job(1).await;

    let job = pipeline.run_batch(job.id, 2).await;

    assert_eq!(job.status, JobStatus::Completed);
    let calls = pipeline.mocks.tag_handler.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, job.work_id);
    assert_eq!(calls[0].1, vec!["Tu Tiên", "Huyền Huyễn"]);
}

#[tokio::test]
async fn merge_override_changes_the_chunking() {
    let mut pipeline = Pipeline::new(with_units(6));
    let job = pipeline.discovered_job(1).await;

    actions::process_batch(job.id, 1, Some(3), &pipeline.deps)
        .await
        .unwrap();
    pipeline.drain().await;

    let job = pipeline.job(job.id).await;
    assert_eq!(job.merge_size, 3);
    assert_eq!(job.summarized_units, 3);
    let output = pipeline.store.get_output(job.work_id, 1).await.unwrap().unwrap();
    assert_eq!(output.source_range, "1-3");
}

// =============================================================================
// Failure policy
// =============================================================================

#[tokio::test]
async fn transient_fetch_failure_reverts_the_chunk_and_stops_the_run() {
    let fetcher = MockSourceFetcher::new().with_units(5).with_fetch_error(
        &unit_url(3),
        FetchError::Timeout { url: unit_url(3) },
    );
    let mut pipeline = Pipeline::new(TestDependencies::new().mock_fetcher(fetcher));
    let job = pipeline.discovered_job(1).await;

    let job = pipeline.run_batch(job.id, 5).await;

    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.summarized_units, 2);
    assert!(job.last_error.is_some());

    let third = pipeline.unit(job.id, 3).await;
    assert_eq!(third.status, UnitStatus::Pending);
    assert_eq!(third.retry_count, 1);
    // The run stopped instead of skipping ahead.
    assert_eq!(pipeline.unit(job.id, 4).await.retry_count, 0);
    assert!(!pipeline.mocks.fetcher.fetched_urls().contains(&unit_url(4)));
    assert!(pipeline.mocks.notifier.alerts_of(AlertKind::Error).is_empty());
}

#[tokio::test]
async fn chunk_fails_permanently_after_three_retries() {
    let fetcher = MockSourceFetcher::new().with_units(5).with_fetch_error(
        &unit_url(3),
        FetchError::Network {
            url: unit_url(3),
            message: "connection reset".into(),
        },
    );
    let mocks = TestDependencies::new().mock_fetcher(fetcher);
    let mut pipeline = Pipeline::new(mocks);
    let job = pipeline.discovered_job(1).await;
    pipeline.store.set_auto_mode(job.id, true).await.unwrap();

    let mut job = pipeline.run_batch(job.id, 5).await;
    for _ in 0..3 {
        job = pipeline.run_batch(job.id, 5).await;
    }

    let third = pipeline.unit(job.id, 3).await;
    assert_eq!(third.status, UnitStatus::Failed);
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.failed_units, 1);
    assert!(!job.auto_mode);
    assert_eq!(pipeline.mocks.notifier.alerts_of(AlertKind::Error).len(), 1);

    // Operator fixes the source and resumes; the failed unit stays failed.
    pipeline.mocks.fetcher.clear_failures();
    let job = pipeline.run_batch(job.id, 5).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.summarized_units, 4);
    assert_eq!(job.failed_units, 1);
}

#[tokio::test(start_paused = true)]
async fn fetched_content_is_reused_after_a_generation_failure() {
    // Enough server errors to exhaust every attempt of one request.
    let mut provider = MockGenerationProvider::new();
    for _ in 0..10 {
        provider = provider.with_error(ProviderError::ServerError("overloaded".into()));
    }
    let mocks = with_units(2).mock_generation(provider);
    let mut pipeline = Pipeline::new(mocks);
    let job = pipeline.discovered_job(2).await;

    // Nothing left pending, so the job completes with both units failed.
    let job = pipeline.run_batch(job.id, 1).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.failed_units, 2);
    let first = pipeline.unit(job.id, 1).await;
    assert_eq!(first.status, UnitStatus::Failed);
    assert_eq!(first.raw_content, Some(format!("Content of {}", unit_url(1))));

    let report = actions::retry_unit(job.work_id, 1, &pipeline.deps).await.unwrap();
    assert!(report.retriggered);
    pipeline.drain().await;

    // Content came from the store, not the source.
    assert_eq!(pipeline.mocks.fetcher.fetched_urls().len(), 2);
    assert_eq!(pipeline.unit(job.id, 1).await.status, UnitStatus::Completed);
}

#[tokio::test]
async fn missing_keys_are_rejected_before_claiming() {
    let mut pipeline = Pipeline::new(with_units(2).keys(Vec::new()));
    let job = pipeline.discovered_job(1).await;

    let err = actions::process_batch(job.id, 1, None, &pipeline.deps)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::NoKeysConfigured));
    assert_eq!(pipeline.job(job.id).await.status, JobStatus::Ready);
}

// =============================================================================
// Concurrency and control
// =============================================================================

#[tokio::test]
async fn live_run_rejects_a_second_trigger_until_its_heartbeat_is_stale() {
    let mut pipeline = Pipeline::new(with_units(4));
    let job = pipeline.discovered_job(1).await;

    actions::process_batch(job.id, 1, None, &pipeline.deps)
        .await
        .unwrap();
    let err = actions::process_batch(job.id, 1, None, &pipeline.deps)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::AlreadyProcessing(_)));

    // The first run died without finishing.
    pipeline
        .store
        .touch_heartbeat(job.id, Utc::now() - chrono::Duration::minutes(20))
        .await
        .unwrap();
    let reclaimed = actions::process_batch(job.id, 1, None, &pipeline.deps)
        .await
        .unwrap();
    assert_eq!(reclaimed.status, JobStatus::Processing);
}

#[tokio::test]
async fn pause_before_the_next_chunk_is_preserved() {
    let mut pipeline = Pipeline::new(with_units(4));
    let job = pipeline.discovered_job(1).await;

    actions::process_batch(job.id, 4, None, &pipeline.deps)
        .await
        .unwrap();
    actions::pause_job(job.id, &pipeline.deps).await.unwrap();
    pipeline.drain().await;

    let job = pipeline.job(job.id).await;
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.summarized_units, 0);
    assert_eq!(pipeline.store.output_count(), 0);

    let job = actions::resume_job(job.id, &pipeline.deps).await.unwrap();
    assert_eq!(job.status, JobStatus::Ready);
}

#[tokio::test]
async fn control_rejections() {
    let mut pipeline = Pipeline::new(with_units(1));
    let missing = Uuid::new_v4();
    assert!(matches!(
        actions::pause_job(missing, &pipeline.deps).await,
        Err(ControlError::JobNotFound(_))
    ));

    let job = pipeline.discovered_job(1).await;
    assert!(matches!(
        actions::resume_job(job.id, &pipeline.deps).await,
        Err(ControlError::InvalidState { .. })
    ));
    assert!(matches!(
        actions::process_batch(job.id, 0, None, &pipeline.deps).await,
        Err(ControlError::InvalidRequest(_))
    ));

    pipeline.run_batch(job.id, 1).await;
    assert!(matches!(
        actions::process_batch(job.id, 1, None, &pipeline.deps).await,
        Err(ControlError::AlreadyCompleted(_))
    ));
}

#[tokio::test]
async fn status_lists_failed_units() {
    let fetcher = MockSourceFetcher::new()
        .with_units(2)
        .with_fetch_error(&unit_url(1), FetchError::Empty { url: unit_url(1) });
    let mut pipeline = Pipeline::new(TestDependencies::new().mock_fetcher(fetcher));
    let job = pipeline.discovered_job(1).await;
    for _ in 0..4 {
        pipeline.run_batch(job.id, 1).await;
    }

    let view = actions::job_status(job.id, &pipeline.deps).await.unwrap();
    assert_eq!(view.failed_units.len(), 1);
    assert_eq!(view.failed_units[0].ordinal, 1);
    assert_eq!(view.counts.failed, 1);

    let active = actions::list_active_jobs(&pipeline.deps).await.unwrap();
    assert!(active.iter().any(|j| j.id == job.id));
}

#[tokio::test]
async fn partially_claimed_chunk_is_released() {
    let mut pipeline = Pipeline::new(with_units(2));
    let job = pipeline.discovered_job(2).await;
    let pending = assert_ok!(pipeline.store.list_pending_units(job.id, 2).await);
    let chunks = planner::plan_chunks(pending, 2);
    assert_eq!(chunks.len(), 1);

    // Another run takes unit 2 after the chunk was planned.
    let taken = pipeline.unit(job.id, 2).await.id;
    assert_ok!(pipeline.store.mark_units_crawling(&[taken], Utc::now()).await);

    let err = actions::process_chunk(&job, &chunks[0], &pipeline.deps)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ChunkError::Contended {
            claimed: 1,
            expected: 2
        }
    ));
    assert_eq!(pipeline.unit(job.id, 1).await.status, UnitStatus::Pending);
    assert_eq!(pipeline.unit(job.id, 2).await.status, UnitStatus::Crawling);
    assert_eq!(pipeline.mocks.generation.call_count(), 0);
    assert!(pipeline.mocks.fetcher.fetched_urls().is_empty());
}

/// Fetches through the wrapped fetcher; fetching `trigger_url` first resets
/// `reset` to pending, as a concurrent repair would.
struct ResetDuringFetch {
    inner: Arc<dyn BaseSourceFetcher>,
    store: Arc<MemoryCrawlStore>,
    trigger_url: String,
    reset: UnitId,
}

#[async_trait]
impl BaseSourceFetcher for ResetDuringFetch {
    async fn list_units(&self, source_url: &str) -> Result<Vec<NewUnit>, FetchError> {
        self.inner.list_units(source_url).await
    }

    async fn fetch_content(&self, url: &str) -> Result<String, FetchError> {
        if url == self.trigger_url {
            self.store
                .reset_units(&[self.reset], Utc::now())
                .await
                .map_err(|e| FetchError::Invalid(e.to_string()))?;
        }
        self.inner.fetch_content(url).await
    }
}

#[tokio::test]
async fn units_reset_mid_chunk_are_reported() {
    let mut pipeline = Pipeline::new(with_units(2));
    let job = pipeline.discovered_job(2).await;
    let first = pipeline.unit(job.id, 1).await.id;
    pipeline.deps.fetcher = Arc::new(ResetDuringFetch {
        inner: pipeline.deps.fetcher.clone(),
        store: pipeline.store.clone(),
        trigger_url: unit_url(2),
        reset: first,
    });

    let job = pipeline.run_batch(job.id, 1).await;

    assert_eq!(pipeline.unit(job.id, 1).await.status, UnitStatus::Pending);
    assert_eq!(pipeline.unit(job.id, 2).await.status, UnitStatus::Completed);
    assert_eq!(job.status, JobStatus::Ready);
    assert!(pipeline
        .mocks
        .live_log
        .messages()
        .iter()
        .any(|m| m.contains("only 1 of 2 units completed")));
}

#[tokio::test]
async fn scheduler_recovers_a_run_that_died_mid_chunk() {
    let mut pipeline = Pipeline::new(with_units(4));
    let job = pipeline.discovered_job(2).await;
    assert_ok!(actions::toggle_auto_mode(job.id, true, &pipeline.deps).await);
    assert_ok!(
        pipeline
            .store
            .set_setting(settings::AUTO_MODE_ENABLED, "true")
            .await
    );

    // A run claimed the job an hour ago and died after claiming units 1-2.
    let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
    let claimed = assert_ok!(
        pipeline
            .store
            .claim_job(job.id, an_hour_ago, an_hour_ago - chrono::Duration::minutes(15))
            .await
    );
    assert!(claimed.is_some());
    let orphans = vec![
        pipeline.unit(job.id, 1).await.id,
        pipeline.unit(job.id, 2).await.id,
    ];
    assert_eq!(
        assert_ok!(pipeline.store.mark_units_crawling(&orphans, an_hour_ago).await),
        2
    );

    let scheduler = ProcessingScheduler::new(pipeline.deps.clone(), SchedulerConfig::default());
    let ran_one = TickOutcome::Ran {
        jobs_found: 1,
        jobs_run: 1,
    };
    assert_eq!(assert_ok!(scheduler.tick().await), ran_one);
    assert_eq!(pipeline.job(job.id).await.summarized_units, 2);
    assert_eq!(assert_ok!(scheduler.tick().await), ran_one);

    let job = pipeline.job(job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.summarized_units, 4);
    assert!(pipeline
        .units(job.id)
        .await
        .iter()
        .all(|u| u.status == UnitStatus::Completed));
    assert_eq!(
        assert_ok!(pipeline.store.list_output_ordinals(job.work_id).await),
        vec![1, 2]
    );

    // Nothing left, so the tick goes idle.
    assert_eq!(
        assert_ok!(scheduler.tick().await),
        TickOutcome::Ran {
            jobs_found: 0,
            jobs_run: 0
        }
    );
}

#[tokio::test]
async fn fresh_in_flight_units_are_left_to_their_run() {
    let mut pipeline = Pipeline::new(with_units(2));
    let job = pipeline.discovered_job(1).await;
    let busy = pipeline.unit(job.id, 1).await.id;
    assert_ok!(pipeline.store.mark_units_crawling(&[busy], Utc::now()).await);

    let job = pipeline.run_batch(job.id, 2).await;

    assert_eq!(pipeline.unit(job.id, 1).await.status, UnitStatus::Crawling);
    assert_eq!(pipeline.unit(job.id, 2).await.status, UnitStatus::Completed);
    assert_eq!(job.status, JobStatus::Ready);

    // Once it has been idle past the stuck window, the next run takes it back.
    pipeline
        .store
        .backdate_unit(busy, Utc::now() - chrono::Duration::minutes(30));
    let job = pipeline.run_batch(job.id, 2).await;
    assert_eq!(job.status, JobStatus::Completed);
}

// =============================================================================
// Followed sources and scheduling
// =============================================================================

#[tokio::test]
async fn newly_published_units_reopen_a_completed_job() {
    let mut pipeline = Pipeline::new(with_units(3));
    let job = pipeline.discovered_job(1).await;
    let job = pipeline.run_batch(job.id, 3).await;
    assert_eq!(job.status, JobStatus::Completed);

    pipeline.mocks.fetcher.set_units(5);
    let report = actions::poll_new_units(&pipeline.deps).await.unwrap();
    assert_eq!(report.units_added, 2);

    let job = pipeline.job(job.id).await;
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.total_units, 5);
    assert_eq!(pipeline.unit(job.id, 5).await.status, UnitStatus::Pending);

    // Nothing new the second time.
    let report = actions::poll_new_units(&pipeline.deps).await.unwrap();
    assert_eq!(report.units_added, 0);
}

/// Lists through the wrapped fetcher, but first lets a run claim the job,
/// as if it won the race against the poll.
struct ClaimedDuringListing {
    inner: Arc<dyn BaseSourceFetcher>,
    store: Arc<MemoryCrawlStore>,
    job_id: JobId,
}

#[async_trait]
impl BaseSourceFetcher for ClaimedDuringListing {
    async fn list_units(&self, source_url: &str) -> Result<Vec<NewUnit>, FetchError> {
        self.store
            .set_job_status(self.job_id, JobStatus::Processing)
            .await
            .map_err(|e| FetchError::Invalid(e.to_string()))?;
        self.inner.list_units(source_url).await
    }

    async fn fetch_content(&self, url: &str) -> Result<String, FetchError> {
        self.inner.fetch_content(url).await
    }
}

#[tokio::test]
async fn new_units_do_not_reopen_a_job_claimed_by_a_run() {
    let mut pipeline = Pipeline::new(with_units(2));
    let job = pipeline.discovered_job(1).await;
    let job = pipeline.run_batch(job.id, 2).await;
    assert_eq!(job.status, JobStatus::Completed);

    pipeline.mocks.fetcher.set_units(3);
    pipeline.deps.fetcher = Arc::new(ClaimedDuringListing {
        inner: pipeline.deps.fetcher.clone(),
        store: pipeline.store.clone(),
        job_id: job.id,
    });
    let report = assert_ok!(actions::poll_new_units(&pipeline.deps).await);

    assert_eq!(report.units_added, 1);
    let job = pipeline.job(job.id).await;
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.total_units, 3);
}

#[tokio::test]
async fn scheduler_tick_runs_ready_auto_jobs() {
    let mut pipeline = Pipeline::new(with_units(4));
    let job = pipeline.discovered_job(2).await;
    let idle = pipeline.discovered_job(2).await;
    actions::toggle_auto_mode(job.id, true, &pipeline.deps)
        .await
        .unwrap();

    let scheduler = ProcessingScheduler::new(pipeline.deps.clone(), SchedulerConfig::default());
    assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Disabled);

    pipeline
        .store
        .set_setting(settings::AUTO_MODE_ENABLED, "true")
        .await
        .unwrap();
    assert_eq!(
        scheduler.tick().await.unwrap(),
        TickOutcome::Ran {
            jobs_found: 1,
            jobs_run: 1
        }
    );

    let job = pipeline.job(job.id).await;
    assert_eq!(job.summarized_units, 2);
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(pipeline.job(idle.id).await.summarized_units, 0);
}

#[tokio::test]
async fn scheduler_sleeps_when_idle_and_wakes_on_demand() {
    let pipeline = Pipeline::new(with_units(1));
    pipeline
        .store
        .set_setting(settings::AUTO_MODE_ENABLED, "true")
        .await
        .unwrap();
    let scheduler = ProcessingScheduler::new(
        pipeline.deps.clone(),
        SchedulerConfig {
            idle_ticks_before_sleep: 2,
            sleep_ticks: 3,
            ..SchedulerConfig::default()
        },
    );

    scheduler.tick().await.unwrap();
    scheduler.tick().await.unwrap();
    assert!(scheduler.is_sleeping());
    assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Sleeping);

    scheduler.wake();
    assert!(matches!(
        scheduler.tick().await.unwrap(),
        TickOutcome::Ran { jobs_found: 0, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn inter_unit_delay_applies_between_fetches() {
    let mut mocks = with_units(3);
    mocks.pipeline.inter_unit_delay = Duration::from_secs(1);
    let mut pipeline = Pipeline::new(mocks);
    let job = pipeline.discovered_job(3).await;

    let started = tokio::time::Instant::now();
    pipeline.run_batch(job.id, 1).await;
    assert!(started.elapsed() >= Duration::from_secs(2));
}
