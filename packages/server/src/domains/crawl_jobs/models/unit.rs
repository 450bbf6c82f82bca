//! Crawl unit - one source chapter tracked through fetch/summarize states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::job::{JobId, WorkId};

pub type UnitId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Pending,
    Crawling,
    Summarizing,
    Completed,
    Failed,
}

impl UnitStatus {
    /// Forward transitions only. Going back to `Pending` is a retry revert
    /// or a repair reset, both of which bypass this check on purpose.
    pub fn can_advance_to(&self, next: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, next),
            (Pending, Crawling)
                | (Crawling, Summarizing)
                | (Crawling, Failed)
                | (Summarizing, Completed)
                | (Summarizing, Failed)
        )
    }

    /// Claimed by a run but not finished.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, UnitStatus::Crawling | UnitStatus::Summarizing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Crawling => "crawling",
            UnitStatus::Summarizing => "summarizing",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
        }
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub job_id: JobId,
    pub work_id: WorkId,
    pub ordinal: i32,
    pub title: Option<String>,
    pub source_url: String,
    pub status: UnitStatus,

    #[serde(skip_serializing)]
    pub raw_content: Option<String>,
    pub summary: Option<String>,

    pub retry_count: i32,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub crawled_at: Option<DateTime<Utc>>,
    pub summarized_at: Option<DateTime<Utc>>,
}

impl Unit {
    pub fn display_title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => format!("Chapter {}: {}", self.ordinal, title),
            _ => format!("Chapter {}", self.ordinal),
        }
    }

    /// Previously fetched content, if a crashed or reverted attempt left any.
    pub fn cached_content(&self) -> Option<&str> {
        self.raw_content.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// A unit as discovered on the source listing, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUnit {
    pub ordinal: i32,
    pub title: Option<String>,
    pub source_url: String,
}

impl NewUnit {
    pub fn into_unit(self, job_id: JobId, work_id: WorkId, now: DateTime<Utc>) -> Unit {
        Unit {
            id: Uuid::new_v4(),
            job_id,
            work_id,
            ordinal: self.ordinal,
            title: self.title,
            source_url: self.source_url,
            status: UnitStatus::Pending,
            raw_content: None,
            summary: None,
            retry_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
            crawled_at: None,
            summarized_at: None,
        }
    }
}
