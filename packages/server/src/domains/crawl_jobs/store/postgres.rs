use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::CrawlStore;
use crate::domains::crawl_jobs::models::*;

/// Postgres-backed store. Conditional transitions are expressed as guarded
/// `UPDATE ... WHERE status = ...` statements.
#[derive(Clone)]
pub struct PostgresCrawlStore {
    pool: PgPool,
}

impl PostgresCrawlStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CrawlStore for PostgresCrawlStore {
    async fn insert_job(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job> {
        let follow_source = job.follows_source();
        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO crawl_jobs (
                id, work_id, work_title, source_url, status,
                merge_size, batch_size, target_start, target_end,
                auto_mode, follow_source, created_at
            )
            VALUES ($1, $2, $3, $4, 'initializing', $5, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.work_id)
        .bind(&job.work_title)
        .bind(&job.source_url)
        .bind(job.merge_size)
        .bind(job.target_start)
        .bind(job.target_end)
        .bind(job.auto_mode)
        .bind(follow_source)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM crawl_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn find_active_job_for_work(&self, work_id: WorkId) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM crawl_jobs
            WHERE work_id = $1 AND status NOT IN ('completed', 'failed')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(work_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn latest_job_for_work(&self, work_id: WorkId) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM crawl_jobs WHERE work_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(work_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_active_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM crawl_jobs
            WHERE status NOT IN ('completed', 'failed')
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_runnable_auto_jobs(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM crawl_jobs
            WHERE auto_mode = true
              AND (status = 'ready'
                   OR (status = 'processing'
                       AND (last_processed_at IS NULL OR last_processed_at < $1)))
            ORDER BY last_processed_at ASC NULLS FIRST
            LIMIT $2
            "#,
        )
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_followed_jobs(&self) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM crawl_jobs
            WHERE follow_source = true
              AND status IN ('ready', 'processing', 'paused', 'completed')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transition_job_status(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE crawl_jobs SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_discovery_started(&self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET status = 'crawling', started_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_discovery_complete(&self, id: JobId, total_units: i32) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET status = 'ready', total_units = $2 WHERE id = $1")
            .bind(id)
            .bind(total_units)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_job_failed(&self, id: JobId, error: &str) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET status = 'failed', last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_job(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            UPDATE crawl_jobs
            SET status = 'processing',
                last_processed_at = $2,
                started_at = COALESCE(started_at, $2)
            WHERE id = $1
              AND (
                status IN ('ready', 'paused')
                OR (status = 'processing'
                    AND (last_processed_at IS NULL OR last_processed_at < $3))
              )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn touch_heartbeat(&self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET last_processed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_auto_mode(&self, id: JobId, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET auto_mode = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_merge_size(&self, id: JobId, merge_size: i32) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET merge_size = $2, batch_size = $2 WHERE id = $1")
            .bind(id)
            .bind(merge_size)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_job_error(&self, id: JobId, error: &str) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_run(&self, id: JobId, completion: RunCompletion) -> Result<()> {
        let completed_at = (completion.status == JobStatus::Completed)
            .then_some(completion.finished_at);

        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = $2,
                crawled_units = $3,
                summarized_units = $4,
                failed_units = $5,
                last_processed_at = $6,
                last_error = COALESCE($7, last_error),
                auto_mode = CASE WHEN $8 THEN false ELSE auto_mode END,
                completed_at = COALESCE($9, completed_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(completion.status)
        .bind(completion.counts.crawled)
        .bind(completion.counts.completed)
        .bind(completion.counts.failed)
        .bind(completion.finished_at)
        .bind(completion.last_error)
        .bind(completion.disable_auto_mode)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_job_counts(&self, id: JobId, counts: UnitCounts) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET crawled_units = $2, summarized_units = $3, failed_units = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(counts.crawled)
        .bind(counts.completed)
        .bind(counts.failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn extend_total_units(&self, id: JobId, added: i32) -> Result<()> {
        sqlx::query("UPDATE crawl_jobs SET total_units = total_units + $2 WHERE id = $1")
            .bind(id)
            .bind(added)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_units(
        &self,
        job_id: JobId,
        work_id: WorkId,
        units: Vec<NewUnit>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for unit in units {
            let unit = unit.into_unit(job_id, work_id, now);
            let result = sqlx::query(
                r#"
                INSERT INTO crawl_units (
                    id, job_id, work_id, ordinal, title, source_url,
                    status, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)
                ON CONFLICT (job_id, ordinal) DO NOTHING
                "#,
            )
            .bind(unit.id)
            .bind(unit.job_id)
            .bind(unit.work_id)
            .bind(unit.ordinal)
            .bind(&unit.title)
            .bind(&unit.source_url)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_units(&self, job_id: JobId) -> Result<Vec<Unit>> {
        sqlx::query_as::<_, Unit>("SELECT * FROM crawl_units WHERE job_id = $1 ORDER BY ordinal")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn list_pending_units(&self, job_id: JobId, limit: i64) -> Result<Vec<Unit>> {
        sqlx::query_as::<_, Unit>(
            r#"
            SELECT * FROM crawl_units
            WHERE job_id = $1 AND status = 'pending'
            ORDER BY ordinal ASC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_failed_units(&self, job_id: JobId) -> Result<Vec<Unit>> {
        sqlx::query_as::<_, Unit>(
            "SELECT * FROM crawl_units WHERE job_id = $1 AND status = 'failed' ORDER BY ordinal",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn max_unit_ordinal(&self, job_id: JobId) -> Result<Option<i32>> {
        let row: (Option<i32>,) =
            sqlx::query_as("SELECT MAX(ordinal) FROM crawl_units WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn mark_units_crawling(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_units
            SET status = 'crawling', updated_at = $2
            WHERE id = ANY($1) AND status = 'pending'
            "#,
        )
        .bind(ids)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn save_unit_content(&self, id: UnitId, content: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_units
            SET status = 'summarizing', raw_content = $2, crawled_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'crawling'
            "#,
        )
        .bind(id)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
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
        let result = sqlx::query(
            r#"
            UPDATE crawl_units
            SET status = 'completed', summary = $2, error = NULL,
                summarized_at = $3, updated_at = $3
            WHERE id = ANY($1) AND status = 'summarizing'
            "#,
        )
        .bind(ids)
        .bind(summary)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fail_units(&self, ids: &[UnitId], error: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_units
            SET status = 'failed', error = $2, retry_count = retry_count + 1, updated_at = $3
            WHERE id = ANY($1) AND status IN ('crawling', 'summarizing')
            "#,
        )
        .bind(ids)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revert_units_for_retry(
        &self,
        ids: &[UnitId],
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_units
            SET status = 'pending', error = $2, retry_count = retry_count + 1, updated_at = $3
            WHERE id = ANY($1) AND status IN ('crawling', 'summarizing')
            "#,
        )
        .bind(ids)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_units(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_units
            SET status = 'pending', updated_at = $2
            WHERE id = ANY($1) AND status IN ('crawling', 'summarizing')
            "#,
        )
        .bind(ids)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_stale_units(
        &self,
        job_id: JobId,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_units
            SET status = 'pending', updated_at = $3
            WHERE job_id = $1
              AND status IN ('crawling', 'summarizing')
              AND updated_at < $2
            "#,
        )
        .bind(job_id)
        .bind(stale_before)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_units(&self, ids: &[UnitId], now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_units
            SET status = 'pending', error = NULL, summary = NULL, retry_count = 0,
                summarized_at = NULL, updated_at = $2
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn unit_counts(&self, job_id: JobId) -> Result<UnitCounts> {
        let (total, pending, in_flight, crawled, completed, failed): (i32, i32, i32, i32, i32, i32) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*)::int,
                    COUNT(*) FILTER (WHERE status = 'pending')::int,
                    COUNT(*) FILTER (WHERE status IN ('crawling', 'summarizing'))::int,
                    COUNT(*) FILTER (WHERE crawled_at IS NOT NULL)::int,
                    COUNT(*) FILTER (WHERE status = 'completed')::int,
                    COUNT(*) FILTER (WHERE status = 'failed')::int
                FROM crawl_units
                WHERE job_id = $1
                "#,
            )
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(UnitCounts {
            total,
            pending,
            in_flight,
            crawled,
            completed,
            failed,
        })
    }

    async fn upsert_output(
        &self,
        output: NewMergedOutput,
        now: DateTime<Utc>,
    ) -> Result<(MergedOutput, UpsertKind)> {
        // `xmax = 0` only for freshly inserted rows.
        #[derive(sqlx::FromRow)]
        struct Upserted {
            #[sqlx(flatten)]
            output: MergedOutput,
            inserted: bool,
        }

        let row = sqlx::query_as::<_, Upserted>(
            r#"
            INSERT INTO merged_outputs (
                id, work_id, output_ordinal, title, rewritten_body,
                short_summary, source_range, status, created_at, updated_at
            )
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (work_id, output_ordinal) DO UPDATE SET
                title = EXCLUDED.title,
                rewritten_body = EXCLUDED.rewritten_body,
                short_summary = EXCLUDED.short_summary,
                source_range = EXCLUDED.source_range,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            RETURNING *, (xmax = 0) AS inserted
            "#,
        )
        .bind(output.work_id)
        .bind(output.output_ordinal)
        .bind(&output.title)
        .bind(&output.rewritten_body)
        .bind(&output.short_summary)
        .bind(&output.source_range)
        .bind(output.status)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let kind = if row.inserted {
            UpsertKind::Inserted
        } else {
            UpsertKind::Updated
        };
        Ok((row.output, kind))
    }

    async fn get_output(
        &self,
        work_id: WorkId,
        output_ordinal: i32,
    ) -> Result<Option<MergedOutput>> {
        sqlx::query_as::<_, MergedOutput>(
            "SELECT * FROM merged_outputs WHERE work_id = $1 AND output_ordinal = $2",
        )
        .bind(work_id)
        .bind(output_ordinal)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_output_ordinals(&self, work_id: WorkId) -> Result<Vec<i32>> {
        let rows: Vec<(i32,)> = sqlx::query_as(
            "SELECT output_ordinal FROM merged_outputs WHERE work_id = $1 ORDER BY output_ordinal",
        )
        .bind(work_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(ordinal,)| ordinal).collect())
    }

    async fn delete_output(&self, work_id: WorkId, output_ordinal: i32) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM merged_outputs WHERE work_id = $1 AND output_ordinal = $2")
                .bind(work_id)
                .bind(output_ordinal)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_work_tags(&self, work_id: WorkId, tags: &[String]) -> Result<usize> {
        let result = sqlx::query(
            r#"
            INSERT INTO work_tags (work_id, tag)
            SELECT $1, UNNEST($2::text[])
            ON CONFLICT (work_id, tag) DO NOTHING
            "#,
        )
        .bind(work_id)
        .bind(tags)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_work_tags(&self, work_id: WorkId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT tag FROM work_tags WHERE work_id = $1 ORDER BY tag")
                .bind(work_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(tag,)| tag).collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM system_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
