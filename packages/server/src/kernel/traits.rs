// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The pipeline itself lives in domains/crawl_jobs and talks to the outside
// world exclusively through these seams.
//
// Naming convention: Base* for trait names (e.g., BaseGenerationProvider)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::credential::Credential;
use crate::domains::crawl_jobs::models::{JobId, NewUnit, WorkId};
use crate::domains::crawl_jobs::tags::Tag;

// =============================================================================
// Generation Provider Trait (Infrastructure - external text generation)
// =============================================================================

/// Classified provider failure. Drives the key pool's backoff decisions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("provider error: {0}")]
    ServerError(String),

    #[error("generation timed out")]
    Timeout,
}

#[async_trait]
pub trait BaseGenerationProvider: Send + Sync {
    /// Run one generation request with the given credential.
    async fn generate(&self, prompt: &str, credential: &Credential)
        -> Result<String, ProviderError>;
}

// =============================================================================
// Source Fetcher Trait (Infrastructure - upstream listing and content)
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("no content found at {url}")]
    Empty { url: String },

    #[error("invalid source: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait BaseSourceFetcher: Send + Sync {
    /// All units currently published for a work, ordered by ordinal.
    async fn list_units(&self, source_url: &str) -> Result<Vec<NewUnit>, FetchError>;

    /// Plain text of one unit.
    async fn fetch_content(&self, url: &str) -> Result<String, FetchError>;
}

// =============================================================================
// Notification Trait (Infrastructure - operator alerts)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Error,
    Complete,
    Progress,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Error => "error",
            AlertKind::Complete => "complete",
            AlertKind::Progress => "progress",
        }
    }
}

#[async_trait]
pub trait BaseNotifier: Send + Sync {
    /// Best-effort; callers log and drop failures.
    async fn send_alert(&self, kind: AlertKind, message: &str) -> Result<()>;
}

// =============================================================================
// Tag Handler Trait (Infrastructure - downstream tag sink)
// =============================================================================

#[async_trait]
pub trait BaseTagHandler: Send + Sync {
    async fn handle(&self, work_id: WorkId, tags: &[Tag]) -> Result<()>;
}

// =============================================================================
// Live Log Trait (Infrastructure - operator-facing activity feed)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

pub trait BaseLiveLog: Send + Sync {
    /// Fire-and-forget. No delivery guarantee.
    fn emit(&self, level: LogLevel, message: &str, job_id: Option<JobId>);
}
