//! Crawl pipeline actions
//!
//! Free async functions over [`ServerDeps`](crate::kernel::ServerDeps).
//! The HTTP routes, the run queue handler and the scheduler all call into
//! these; none of them touch the store directly.

pub mod control;
pub mod discover;
pub mod gap_repair;
pub mod poll_new_units;
pub mod process_chunk;
pub mod run_batch;

pub use control::{
    init_job, job_status, key_status, list_active_jobs, pause_job, process_batch, reload_keys,
    resume_job, start_batch, toggle_auto_mode, CrawlTaskHandler, InitJobRequest, JobStatusView,
};
pub use discover::discover_units;
pub use gap_repair::{fix_range, retry_unit, scan_gaps, GapReport};
pub use poll_new_units::{poll_new_units, PollReport};
pub use process_chunk::{process_chunk, ChunkOutcome};
pub use run_batch::{claim_job, run_batch, RunReport};
