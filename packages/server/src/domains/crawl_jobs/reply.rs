//! Parsing of generation replies.
//!
//! The prompt asks for `title ||| tags ||| summary ||| body`. Models do not
//! always comply, so parsing never fails: missing parts fall back to what
//! can be recovered from the text that is there.

use super::tags::{parse_tag_list, Tag};

pub const DELIMITER: &str = "|||";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub title: Option<String>,
    pub tags: Vec<Tag>,
    pub short_summary: String,
    pub body: String,
}

/// First `max_chars` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn non_empty(part: &str) -> Option<String> {
    let trimmed = part.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn parse_reply(raw: &str, summary_chars: usize) -> ParsedReply {
    let parts: Vec<&str> = raw.split(DELIMITER).collect();

    let (title, tags, summary, body) = match parts.as_slice() {
        [title, tags, summary, rest @ ..] if !rest.is_empty() => (
            non_empty(title),
            parse_tag_list(tags),
            non_empty(summary),
            rest.join(DELIMITER),
        ),
        [title, tags, body] => (non_empty(title), parse_tag_list(tags), None, body.to_string()),
        [title, body] => (non_empty(title), Vec::new(), None, body.to_string()),
        _ => (None, Vec::new(), None, raw.to_string()),
    };

    let body = body.trim().to_string();
    let short_summary = summary.unwrap_or_else(|| truncate_chars(&body, summary_chars));

    ParsedReply {
        title,
        tags,
        short_summary,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_reply() {
        let reply = parse_reply(
            "Hồi 1: Ly hương ||| [\"Tu Tiên\"] ||| Vương Lâm rời làng. ||| Toàn văn...",
            200,
        );
        assert_eq!(reply.title.as_deref(), Some("Hồi 1: Ly hương"));
        assert_eq!(reply.tags.len(), 1);
        assert_eq!(reply.short_summary, "Vương Lâm rời làng.");
        assert_eq!(reply.body, "Toàn văn...");
    }

    #[test]
    fn extra_delimiters_stay_in_body() {
        let reply = parse_reply("T ||| [] ||| S ||| a ||| b", 200);
        assert_eq!(reply.body, "a ||| b");
    }

    #[test]
    fn two_parts_fall_back_to_prefix_summary() {
        let body = "x".repeat(500);
        let reply = parse_reply(&format!("Title|||{}", body), 200);
        assert_eq!(reply.title.as_deref(), Some("Title"));
        assert!(reply.tags.is_empty());
        assert_eq!(reply.short_summary.chars().count(), 200);
        assert_eq!(reply.body, body);
    }

    #[test]
    fn three_parts_are_title_tags_body() {
        let reply = parse_reply("T ||| not json ||| Body text", 4);
        assert_eq!(reply.title.as_deref(), Some("T"));
        assert!(reply.tags.is_empty());
        assert_eq!(reply.body, "Body text");
        assert_eq!(reply.short_summary, "Body");
    }

    #[test]
    fn no_delimiter_is_all_body() {
        let reply = parse_reply("Chỉ có nội dung", 3);
        assert_eq!(reply.title, None);
        assert_eq!(reply.body, "Chỉ có nội dung");
        assert_eq!(reply.short_summary, "Chỉ");
    }

    #[test]
    fn empty_summary_part_uses_prefix() {
        let reply = parse_reply("T ||| [] |||   ||| Nội dung dài", 3);
        assert_eq!(reply.short_summary, "Nội");
    }
}
