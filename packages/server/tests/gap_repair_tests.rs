mod common;

use crate::common::Pipeline;
use chrono::Utc;
use digest_core::domains::crawl_jobs::actions;
use digest_core::domains::crawl_jobs::error::ControlError;
use digest_core::domains::crawl_jobs::models::{Job, JobStatus, UnitStatus};
use digest_core::domains::crawl_jobs::store::CrawlStore;
use digest_core::kernel::test_dependencies::MockSourceFetcher;
use digest_core::kernel::TestDependencies;
use uuid::Uuid;

async fn completed_job(pipeline: &mut Pipeline, units: i32) -> Job {
    pipeline.mocks.fetcher.set_units(units);
    let job = pipeline.discovered_job(1).await;
    let job = pipeline.run_batch(job.id, units).await;
    assert_eq!(job.status, JobStatus::Completed);
    job
}

/// Put a completed unit back in flight, optionally failing it.
async fn break_unit(pipeline: &Pipeline, job: &Job, ordinal: i32, fail: bool) {
    let id = pipeline.unit(job.id, ordinal).await.id;
    let now = Utc::now();
    pipeline.store.reset_units(&[id], now).await.unwrap();
    assert_eq!(pipeline.store.mark_units_crawling(&[id], now).await.unwrap(), 1);
    if fail {
        pipeline
            .store
            .fail_units(&[id], "connection reset", now)
            .await
            .unwrap();
    }
}

fn pipeline() -> Pipeline {
    Pipeline::new(TestDependencies::new().mock_fetcher(MockSourceFetcher::new()))
}

#[tokio::test]
async fn scan_repairs_every_gap_kind_and_reopens_the_job() {
    let mut pipeline = pipeline();
    let job = completed_job(&mut pipeline, 6).await;

    break_unit(&pipeline, &job, 2, true).await;
    break_unit(&pipeline, &job, 3, true).await;
    break_unit(&pipeline, &job, 4, false).await;
    let stuck = pipeline.unit(job.id, 4).await.id;
    pipeline
        .store
        .backdate_unit(stuck, Utc::now() - chrono::Duration::minutes(30));
    assert!(pipeline.store.delete_output(job.work_id, 5).await.unwrap());

    let report = actions::scan_gaps(job.work_id, &pipeline.deps).await.unwrap();

    assert_eq!(report.job_id, Some(job.id));
    assert_eq!(report.failed, vec![2, 3]);
    assert_eq!(report.stuck, vec![4]);
    assert_eq!(report.missing_output, vec![5]);
    assert_eq!(report.reset, 4);
    assert!(report.retriggered);
    assert_eq!(pipeline.job(job.id).await.status, JobStatus::Processing);

    pipeline.drain().await;

    let job = pipeline.job(job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.summarized_units, 6);
    assert_eq!(job.failed_units, 0);
    assert_eq!(
        pipeline.store.list_output_ordinals(job.work_id).await.unwrap(),
        vec![1, 2, 3, 4, 5, 6]
    );
    // Reset units keep their fetched content.
    assert_eq!(pipeline.mocks.fetcher.fetched_urls().len(), 6);
}

#[tokio::test]
async fn fresh_in_flight_units_are_not_stuck() {
    let mut pipeline = pipeline();
    let job = completed_job(&mut pipeline, 3).await;
    break_unit(&pipeline, &job, 2, false).await;

    let report = actions::scan_gaps(job.work_id, &pipeline.deps).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(report.reset, 0);
    assert!(!report.retriggered);
    assert_eq!(pipeline.job(job.id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn fix_range_only_touches_the_range() {
    let mut pipeline = pipeline();
    let job = completed_job(&mut pipeline, 6).await;
    break_unit(&pipeline, &job, 2, true).await;
    break_unit(&pipeline, &job, 5, true).await;

    let report = actions::fix_range(job.work_id, 4, 6, &pipeline.deps)
        .await
        .unwrap();

    assert_eq!(report.failed, vec![5]);
    assert_eq!(report.reset, 1);
    assert_eq!(pipeline.unit(job.id, 2).await.status, UnitStatus::Failed);
    assert_eq!(pipeline.unit(job.id, 5).await.status, UnitStatus::Pending);

    assert!(matches!(
        actions::fix_range(job.work_id, 6, 4, &pipeline.deps).await,
        Err(ControlError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn retry_unit_forces_a_completed_unit_back() {
    let mut pipeline = pipeline();
    let job = completed_job(&mut pipeline, 3).await;

    let report = actions::retry_unit(job.work_id, 2, &pipeline.deps)
        .await
        .unwrap();
    assert_eq!(report.reset, 1);
    assert!(report.retriggered);
    let unit = pipeline.unit(job.id, 2).await;
    assert_eq!(unit.status, UnitStatus::Pending);
    assert!(unit.summary.is_none());

    pipeline.drain().await;
    let job = pipeline.job(job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(pipeline.mocks.generation.call_count(), 4);

    assert!(matches!(
        actions::retry_unit(job.work_id, 99, &pipeline.deps).await,
        Err(ControlError::UnitNotFound { ordinal: 99, .. })
    ));
}

#[tokio::test]
async fn paused_jobs_are_reset_but_not_retriggered() {
    let mut pipeline = pipeline();
    let job = completed_job(&mut pipeline, 4).await;
    break_unit(&pipeline, &job, 3, true).await;
    pipeline
        .store
        .set_job_status(job.id, JobStatus::Paused)
        .await
        .unwrap();

    let report = actions::scan_gaps(job.work_id, &pipeline.deps).await.unwrap();

    assert_eq!(report.reset, 1);
    assert!(!report.retriggered);
    assert_eq!(pipeline.job(job.id).await.status, JobStatus::Paused);
    assert!(pipeline.drain().await.is_empty());
}

#[tokio::test]
async fn unknown_work_is_rejected() {
    let pipeline = pipeline();
    assert!(matches!(
        actions::scan_gaps(Uuid::new_v4(), &pipeline.deps).await,
        Err(ControlError::WorkNotFound(_))
    ));
}
