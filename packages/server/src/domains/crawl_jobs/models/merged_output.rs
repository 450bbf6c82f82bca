//! Merged output - the rewritten artifact produced for one chunk.
//!
//! Keyed uniquely by `(work_id, output_ordinal)`: reprocessing a chunk
//! overwrites the existing row instead of adding another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::job::WorkId;

pub type MergedOutputId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    Draft,
    #[default]
    Published,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct MergedOutput {
    pub id: MergedOutputId,
    pub work_id: WorkId,
    pub output_ordinal: i32,
    pub title: String,
    pub rewritten_body: String,
    pub short_summary: String,
    /// Source ordinals this output was built from, e.g. `"6-10"`.
    pub source_range: String,
    pub status: OutputStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMergedOutput {
    pub work_id: WorkId,
    pub output_ordinal: i32,
    pub title: String,
    pub rewritten_body: String,
    pub short_summary: String,
    pub source_range: String,
    pub status: OutputStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Updated,
}
