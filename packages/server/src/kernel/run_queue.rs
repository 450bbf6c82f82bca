//! Supervised hand-off for background pipeline work.
//!
//! Control-surface calls and repairs never spawn detached tasks. They submit a
//! [`RunTask`] to the bounded [`RunQueue`]; a single [`RunWorker`] executes
//! tasks in a `JoinSet`, so failures and panics are logged and surfaced on the
//! live log instead of disappearing.
//!
//! ```text
//! init / scan_gaps / fix_range
//!     │
//!     └─► RunQueue::submit(task)
//!             └─► RunWorker (JoinSet)
//!                     └─► RunTaskHandler::execute(task)
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::traits::{BaseLiveLog, LogLevel};
use crate::domains::crawl_jobs::models::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTask {
    /// List the job's source and create its units.
    Discover { job_id: JobId },
    /// Run up to `chunk_count` chunks of the job.
    ProcessBatch { job_id: JobId, chunk_count: i32 },
}

impl RunTask {
    pub fn job_id(&self) -> JobId {
        match self {
            RunTask::Discover { job_id } | RunTask::ProcessBatch { job_id, .. } => *job_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunTask::Discover { .. } => "discover",
            RunTask::ProcessBatch { .. } => "process_batch",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunQueueError {
    #[error("run queue is closed")]
    Closed,
}

#[async_trait]
pub trait RunTaskHandler: Send + Sync {
    async fn execute(&self, task: RunTask) -> Result<()>;
}

#[derive(Clone)]
pub struct RunQueue {
    sender: mpsc::Sender<RunTask>,
}

impl RunQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RunTask>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Waits for space when the queue is full.
    pub async fn submit(&self, task: RunTask) -> Result<(), RunQueueError> {
        debug!(task = task.name(), job_id = %task.job_id(), "Submitting run task");
        self.sender.send(task).await.map_err(|_| RunQueueError::Closed)
    }

    /// The worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

pub struct RunWorker {
    receiver: mpsc::Receiver<RunTask>,
    handler: Arc<dyn RunTaskHandler>,
    live_log: Arc<dyn BaseLiveLog>,
    max_concurrent: usize,
}

impl RunWorker {
    pub fn new(
        receiver: mpsc::Receiver<RunTask>,
        handler: Arc<dyn RunTaskHandler>,
        live_log: Arc<dyn BaseLiveLog>,
    ) -> Self {
        Self {
            receiver,
            handler,
            live_log,
            max_concurrent: 4,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Run until `shutdown` fires or every queue handle is dropped. In-flight
    /// tasks are allowed to finish.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut tasks: JoinSet<(RunTask, Result<()>)> = JoinSet::new();
        info!(max_concurrent = self.max_concurrent, "Run worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.record(joined);
                }
                received = self.receiver.recv(), if tasks.len() < self.max_concurrent => {
                    let Some(task) = received else { break };
                    let handler = self.handler.clone();
                    tasks.spawn(async move {
                        let result = handler.execute(task).await;
                        (task, result)
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.record(joined);
        }
        info!("Run worker stopped");
    }

    fn record(&self, joined: Result<(RunTask, Result<()>), tokio::task::JoinError>) {
        match joined {
            Ok((task, Ok(()))) => {
                debug!(task = task.name(), job_id = %task.job_id(), "Run task finished");
            }
            Ok((task, Err(e))) => {
                error!(task = task.name(), job_id = %task.job_id(), error = %e, "Run task failed");
                self.live_log.emit(
                    LogLevel::Error,
                    &format!("{} failed: {:#}", task.name(), e),
                    Some(task.job_id()),
                );
            }
            Err(e) => {
                error!(error = %e, "Run task panicked");
                self.live_log
                    .emit(LogLevel::Error, &format!("Background task aborted: {}", e), None);
            }
        }
    }
}
