//! Grouping of pending units into merge chunks.

use super::models::{Job, Unit};

/// Consecutive units merged into one generation request.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub output_ordinal: i32,
    pub units: Vec<Unit>,
}

impl Chunk {
    pub fn first_ordinal(&self) -> i32 {
        self.units.first().map_or(0, |u| u.ordinal)
    }

    pub fn last_ordinal(&self) -> i32 {
        self.units.last().map_or(0, |u| u.ordinal)
    }

    /// `"6-10"`, or `"6"` for a single unit.
    pub fn source_range(&self) -> String {
        let (first, last) = (self.first_ordinal(), self.last_ordinal());
        if first == last {
            first.to_string()
        } else {
            format!("{}-{}", first, last)
        }
    }

    /// Highest retry count among the chunk's units.
    pub fn retry_count(&self) -> i32 {
        self.units.iter().map(|u| u.retry_count).max().unwrap_or(0)
    }
}

/// Effective merge size, never below 1. The legacy batch size still counts.
pub fn merge_size(job: &Job) -> i32 {
    job.merge_size.max(job.batch_size).max(1)
}

/// Pending units to load for a run of `chunk_count` chunks.
pub fn fetch_limit(chunk_count: i32, merge_size: i32) -> i64 {
    i64::from(chunk_count.max(1)) * i64::from(merge_size.max(1))
}

/// Output ordinal of the chunk starting at `first_ordinal`.
pub fn output_ordinal(first_ordinal: i32, merge_size: i32) -> i32 {
    (first_ordinal - 1).div_euclid(merge_size.max(1)) + 1
}

/// Split pending units (ascending by ordinal) into consecutive groups of
/// `merge_size`; the final group may be shorter.
pub fn plan_chunks(pending: Vec<Unit>, merge_size: i32) -> Vec<Chunk> {
    let size = merge_size.max(1) as usize;
    let mut units = pending;
    units.sort_by_key(|u| u.ordinal);

    let mut chunks = Vec::with_capacity(units.len().div_ceil(size));
    let mut iter = units.into_iter().peekable();
    while iter.peek().is_some() {
        let group: Vec<Unit> = iter.by_ref().take(size).collect();
        let output_ordinal = output_ordinal(group[0].ordinal, merge_size);
        chunks.push(Chunk {
            output_ordinal,
            units: group,
        });
    }
    chunks
}
