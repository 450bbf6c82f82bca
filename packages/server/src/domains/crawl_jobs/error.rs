use thiserror::Error;

use super::models::{JobId, JobStatus, WorkId};
use crate::kernel::generation::GenerationError;
use crate::kernel::FetchError;

/// Why a single chunk did not complete.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("failed to fetch chapter {ordinal}: {source}")]
    Fetch {
        ordinal: i32,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    /// Another run claimed some of the chunk's units first.
    #[error("only {claimed} of {expected} units could be claimed")]
    Contended { claimed: u64, expected: u64 },
}

impl ChunkError {
    /// Transient failures send the chunk back to pending (bounded by the
    /// retry limit) instead of failing it.
    pub fn is_transient(&self) -> bool {
        match self {
            ChunkError::Fetch { .. } | ChunkError::Store(_) => true,
            ChunkError::Generation(e) => e.is_transient(),
            ChunkError::Contended { .. } => false,
        }
    }

    /// No credentials at all: nothing the chunk did wrong.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ChunkError::Generation(e) if e.is_configuration())
    }
}

/// Explicit, side-effect-free rejections from the control surface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("no crawl job found for work {0}")]
    WorkNotFound(WorkId),

    #[error("chapter {ordinal} not found for work {work_id}")]
    UnitNotFound { work_id: WorkId, ordinal: i32 },

    #[error("job {0} is already completed")]
    AlreadyCompleted(JobId),

    #[error("job {0} is already processing")]
    AlreadyProcessing(JobId),

    #[error("work {work_id} already has active job {job_id}")]
    AlreadyActive { work_id: WorkId, job_id: JobId },

    #[error("job {job_id} cannot do that while {status}")]
    InvalidState { job_id: JobId, status: JobStatus },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no generation keys configured")]
    NoKeysConfigured,

    #[error("task queue unavailable")]
    QueueClosed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;
