//! In-process broadcast hub for the operator activity feed.
//!
//! Producers (pipeline actions):
//!   live_log.emit(LogLevel::Info, "Processing chapters 1-5", Some(job_id));
//!
//! Consumers (SSE endpoint):
//!   let rx = hub.subscribe();

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::traits::{BaseLiveLog, LogLevel};
use crate::domains::crawl_jobs::models::JobId;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub level: LogLevel,
    pub job_id: Option<JobId>,
    pub timestamp: DateTime<Utc>,
}

/// Thread-safe, cloneable. Entries sent while nobody listens are dropped.
#[derive(Clone)]
pub struct LiveLogHub {
    sender: broadcast::Sender<LogEntry>,
}

impl LiveLogHub {
    /// Create a hub with the default capacity (256 entries per subscriber).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LiveLogHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseLiveLog for LiveLogHub {
    fn emit(&self, level: LogLevel, message: &str, job_id: Option<JobId>) {
        // Ignore send errors (no active receivers)
        let _ = self.sender.send(LogEntry {
            message: message.to_string(),
            level,
            job_id,
            timestamp: Utc::now(),
        });
    }
}
