//! One chunk: fetch each unit, merge, rewrite, persist.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domains::crawl_jobs::error::ChunkError;
use crate::domains::crawl_jobs::models::{
    Job, MergedOutput, NewMergedOutput, OutputStatus, UnitId, UpsertKind,
};
use crate::domains::crawl_jobs::planner::Chunk;
use crate::domains::crawl_jobs::prompts::{merge_contents, rewrite_prompt};
use crate::domains::crawl_jobs::reply::parse_reply;
use crate::kernel::{LogLevel, ServerDeps};

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub output: MergedOutput,
    pub kind: UpsertKind,
    pub units_completed: u64,
}

/// Title used when the reply did not provide one.
fn fallback_title(chunk: &Chunk) -> String {
    match chunk.units.as_slice() {
        [only] => only.display_title(),
        _ => format!("Chapters {}", chunk.source_range()),
    }
}

/// Move every unit of the chunk to `crawling`, one at a time so that a
/// partial claim can be undone exactly. On contention the units this call
/// took are released again.
async fn claim_units(ids: &[UnitId], deps: &ServerDeps) -> Result<(), ChunkError> {
    let now = Utc::now();
    let mut taken: Vec<UnitId> = Vec::with_capacity(ids.len());
    for id in ids {
        if deps.store.mark_units_crawling(&[*id], now).await? == 1 {
            taken.push(*id);
        }
    }
    if taken.len() == ids.len() {
        return Ok(());
    }

    deps.store.release_units(&taken, Utc::now()).await?;
    Err(ChunkError::Contended {
        claimed: taken.len() as u64,
        expected: ids.len() as u64,
    })
}

/// Run one chunk end to end. Units are fetched sequentially and each one is
/// persisted as soon as its content arrives, so a failure later in the chunk
/// keeps what was already fetched.
pub async fn process_chunk(
    job: &Job,
    chunk: &Chunk,
    deps: &ServerDeps,
) -> Result<ChunkOutcome, ChunkError> {
    let ids: Vec<UnitId> = chunk.units.iter().map(|u| u.id).collect();
    let range = chunk.source_range();

    claim_units(&ids, deps).await?;

    let mut contents: Vec<String> = Vec::with_capacity(chunk.units.len());
    for (index, unit) in chunk.units.iter().enumerate() {
        let content = match unit.cached_content() {
            Some(cached) => {
                debug!(unit_id = %unit.id, ordinal = unit.ordinal, "Reusing fetched content");
                cached.to_string()
            }
            None => {
                if index > 0 && !deps.pipeline.inter_unit_delay.is_zero() {
                    tokio::time::sleep(deps.pipeline.inter_unit_delay).await;
                }
                deps.fetcher
                    .fetch_content(&unit.source_url)
                    .await
                    .map_err(|source| ChunkError::Fetch {
                        ordinal: unit.ordinal,
                        source,
                    })?
            }
        };
        deps.store
            .save_unit_content(unit.id, &content, Utc::now())
            .await?;
        contents.push(content);
    }

    let sections: Vec<_> = chunk
        .units
        .iter()
        .zip(contents.iter())
        .map(|(unit, content)| (unit, content.as_str()))
        .collect();
    let merged = merge_contents(&sections);
    let prompt = rewrite_prompt(&job.work_title, &range, &merged);

    let raw = deps.generation.generate(&prompt).await?;
    let reply = parse_reply(&raw, deps.pipeline.summary_prefix_chars);

    let (output, kind) = deps
        .store
        .upsert_output(
            NewMergedOutput {
                work_id: job.work_id,
                output_ordinal: chunk.output_ordinal,
                title: reply.title.clone().unwrap_or_else(|| fallback_title(chunk)),
                rewritten_body: reply.body.clone(),
                short_summary: reply.short_summary.clone(),
                source_range: range.clone(),
                status: OutputStatus::Published,
            },
            Utc::now(),
        )
        .await?;

    let units_completed = deps
        .store
        .complete_units(&ids, &reply.short_summary, Utc::now())
        .await?;
    if units_completed != ids.len() as u64 {
        warn!(
            job_id = %job.id,
            source_range = %range,
            completed = units_completed,
            expected = ids.len(),
            "Some chunk units changed state while the chunk ran"
        );
        deps.live_log.emit(
            LogLevel::Warning,
            &format!(
                "Chapters {}: only {} of {} units completed, the rest changed state mid-chunk",
                range,
                units_completed,
                ids.len()
            ),
            Some(job.id),
        );
    }

    if !reply.tags.is_empty() {
        if let Err(e) = deps.tag_handler.handle(job.work_id, &reply.tags).await {
            warn!(job_id = %job.id, error = %e, "Tag handler failed");
        }
    }

    info!(
        job_id = %job.id,
        output_ordinal = chunk.output_ordinal,
        source_range = %range,
        ?kind,
        "Chunk completed"
    );
    let verb = match kind {
        UpsertKind::Inserted => "created",
        UpsertKind::Updated => "updated",
    };
    deps.live_log.emit(
        LogLevel::Success,
        &format!(
            "Chapters {} {} output #{}: {}",
            range, verb, chunk.output_ordinal, output.title
        ),
        Some(job.id),
    );

    Ok(ChunkOutcome {
        output,
        kind,
        units_completed,
    })
}
