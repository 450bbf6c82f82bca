//! Tags suggested by the generation reply, validated at the parse boundary.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::models::WorkId;
use super::store::CrawlStore;
use crate::kernel::BaseTagHandler;

pub const MAX_TAG_CHARS: usize = 50;

/// A trimmed, non-empty tag of bounded length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim().trim_matches('#').trim();
        if name.is_empty() || name.chars().count() > MAX_TAG_CHARS {
            return None;
        }
        Some(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shapes the model is known to produce for a tag entry.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTag {
    Name(String),
    Object { name: String },
}

impl RawTag {
    fn name(&self) -> &str {
        match self {
            RawTag::Name(name) | RawTag::Object { name } => name,
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language hint on the opening fence.
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a JSON tag list. Anything unparseable yields an empty list;
/// invalid entries and duplicates (case-insensitive) are dropped.
pub fn parse_tag_list(raw: &str) -> Vec<Tag> {
    let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(strip_code_fence(raw)) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter_map(|value| serde_json::from_value::<RawTag>(value).ok())
        .filter_map(|raw| Tag::parse(raw.name()))
        .filter(|tag| seen.insert(tag.as_str().to_lowercase()))
        .collect()
}

/// Records tags per work in the store.
pub struct StoreTagHandler {
    store: Arc<dyn CrawlStore>,
}

impl StoreTagHandler {
    pub fn new(store: Arc<dyn CrawlStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BaseTagHandler for StoreTagHandler {
    async fn handle(&self, work_id: WorkId, tags: &[Tag]) -> Result<()> {
        let names: Vec<String> = tags.iter().map(|t| t.as_str().to_string()).collect();
        let added = self.store.add_work_tags(work_id, &names).await?;
        tracing::debug!(work_id = %work_id, added, "Stored work tags");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(Tag::as_str).collect()
    }

    #[test]
    fn accepts_strings_and_objects() {
        let tags = parse_tag_list(r#"["Tu Tiên", {"name": "Huyền Huyễn"}, 42, "  "]"#);
        assert_eq!(names(&tags), vec!["Tu Tiên", "Huyền Huyễn"]);
    }

    #[test]
    fn strips_fences_and_dedupes() {
        let tags = parse_tag_list("```json\n[\"Action\", \"action\", \"#Drama\"]\n```");
        assert_eq!(names(&tags), vec!["Action", "Drama"]);
    }

    #[test]
    fn garbage_is_empty() {
        assert!(parse_tag_list("tags: action, drama").is_empty());
        assert!(parse_tag_list(r#"{"name": "solo"}"#).is_empty());
        assert!(parse_tag_list(&format!("[\"{}\"]", "x".repeat(51))).is_empty());
    }
}
