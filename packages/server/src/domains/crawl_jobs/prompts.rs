//! Prompt construction for chunk rewriting.

use super::models::Unit;
use super::reply::DELIMITER;

/// Join unit contents under `=== Chapter N: title ===` separators.
pub fn merge_contents(units: &[(&Unit, &str)]) -> String {
    units
        .iter()
        .map(|(unit, content)| format!("=== {} ===\n{}", unit.display_title(), content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn rewrite_prompt(work_title: &str, source_range: &str, merged: &str) -> String {
    format!(
        r#"You are an editor preparing a condensed retelling of the serialized work "{work_title}".
Below are the source chapters {source_range}. Rewrite them into ONE continuous chapter that
keeps every plot event, character name and important line of dialogue, but removes padding
and repetition. Write in the same language as the source.

Respond with exactly four parts separated by "{d}" and nothing else:
1. A short chapter title
2. A JSON array of 3-6 genre or theme tags, e.g. ["Tu Tiên", "Huyền Huyễn"]
3. A 2-3 sentence summary of what happens
4. The full rewritten chapter

Format: TITLE {d} TAGS {d} SUMMARY {d} CONTENT

SOURCE:
{merged}"#,
        work_title = work_title,
        source_range = source_range,
        merged = merged,
        d = DELIMITER,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::crawl_jobs::models::NewUnit;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn merged_sections_are_labelled() {
        let unit = |n: i32, title: Option<&str>| {
            NewUnit {
                ordinal: n,
                title: title.map(String::from),
                source_url: String::new(),
            }
            .into_unit(Uuid::new_v4(), Uuid::new_v4(), Utc::now())
        };
        let (a, b) = (unit(1, Some("Ly hương")), unit(2, None));
        let merged = merge_contents(&[(&a, " one "), (&b, "two")]);
        assert_eq!(
            merged,
            "=== Chapter 1: Ly hương ===\none\n\n=== Chapter 2 ===\ntwo"
        );

        let prompt = rewrite_prompt("Tiên Nghịch", "1-2", &merged);
        assert!(prompt.contains("chapters 1-2"));
        assert!(prompt.contains("TITLE ||| TAGS ||| SUMMARY ||| CONTENT"));
    }
}
