//! Field extraction from Amazon HTML and Google Books JSON.
//!
//! Each field is an ordered list of [`FieldPattern`]s tried first-match-wins.
//! Extractors return `None` or an empty list when nothing matches; they never
//! fail.

pub mod amazon;
pub mod google_books;
pub mod search;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shelf_core::Dimensions;

pub use amazon::extract_candidate;
pub use search::{SearchHit, extract_search_results};

/// What one Amazon product page says about itself. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentCandidate {
    pub asin: Option<String>,
    pub title: Option<String>,
    pub isbn: Option<String>,
    pub authors: Option<String>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub page_count: Option<u32>,
    pub publisher: Option<String>,
    pub is_book: bool,
}

/// One regex and the check its first capture group must pass.
pub struct FieldPattern {
    pub name: &'static str,
    pub regex: Regex,
    pub validate: fn(&str) -> Option<String>,
}

impl FieldPattern {
    pub fn new(name: &'static str, pattern: &str, validate: fn(&str) -> Option<String>) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("valid regex"),
            validate,
        }
    }

    /// First capture across all matches that passes validation.
    pub fn apply(&self, haystack: &str) -> Option<String> {
        self.regex.captures_iter(haystack).find_map(|caps| {
            let raw = caps.get(1).or_else(|| caps.get(0))?.as_str();
            (self.validate)(raw)
        })
    }
}

pub fn first_match(patterns: &[FieldPattern], haystack: &str) -> Option<String> {
    patterns.iter().find_map(|p| {
        let value = p.apply(haystack)?;
        tracing::trace!(pattern = p.name, value = %value, "field matched");
        Some(value)
    })
}

// ─── Text helpers ─────────────────────────────────────────────────────────────

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static NUMERIC_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid regex"));

pub fn decode_entities(input: &str) -> String {
    let named = input
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&lrm;", "")
        .replace("&rlm;", "");
    let numeric = NUMERIC_ENTITY_RE.replace_all(&named, |caps: &regex::Captures<'_>| {
        let code = &caps[1];
        let parsed = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    // last, so "&amp;lt;" stays literal
    numeric.replace("&amp;", "&")
}

pub fn strip_tags(input: &str) -> String {
    TAG_RE.replace_all(input, " ").into_owned()
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tags removed, entities decoded, whitespace collapsed.
pub fn clean_text(input: &str) -> String {
    collapse_whitespace(&decode_entities(&strip_tags(input)))
        .trim_matches(|c: char| c.is_whitespace() || c == '\u{200e}' || c == '\u{200f}')
        .to_string()
}

pub(crate) fn non_empty(input: &str) -> Option<String> {
    let cleaned = clean_text(input);
    (!cleaned.is_empty()).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_and_tags() {
        assert_eq!(decode_entities("Tom &amp; Jerry &#8211; &#x41;"), "Tom & Jerry – A");
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
        assert_eq!(clean_text("  <b>Dom</b>\n  Casmurro&nbsp; "), "Dom Casmurro");
    }

    #[test]
    fn first_match_respects_order_and_validation() {
        fn digits(s: &str) -> Option<String> {
            s.chars().all(|c| c.is_ascii_digit()).then(|| s.to_string())
        }
        let patterns = vec![
            FieldPattern::new("primary", r"id=(\w+)", digits),
            FieldPattern::new("fallback", r"num=(\w+)", digits),
        ];
        assert_eq!(first_match(&patterns, "id=abc id=123 num=9"), Some("123".into()));
        assert_eq!(first_match(&patterns, "id=abc num=9"), Some("9".into()));
        assert_eq!(first_match(&patterns, "nothing here"), None);
    }
}
