//! Amazon search results page.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use super::amazon::valid_asin;
use super::clean_text;

pub const MAX_SEARCH_HITS: usize = 5;

/// A result row: the ASIN and, when the markup has one, its title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub asin: String,
    pub title: Option<String>,
}

static DATA_ASIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"data-asin="([A-Z0-9]{10})"[^>]*data-component-type="s-search-result""#)
        .expect("valid regex")
});
static DP_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href="[^"]*/dp/([A-Z0-9]{10})[/?"]"#).expect("valid regex"));

fn result_title(row: &ElementRef<'_>, title_sel: &Selector) -> Option<String> {
    row.select(title_sel)
        .map(|el| clean_text(&el.text().collect::<Vec<_>>().join(" ")))
        .find(|t| !t.is_empty())
}

fn is_sponsored(row: &ElementRef<'_>) -> bool {
    row.value()
        .attr("class")
        .is_some_and(|c| c.contains("AdHolder") || c.contains("s-sponsored"))
}

/// Organic results in page order, deduplicated, at most `limit`.
pub fn extract_search_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let (Ok(row_sel), Ok(title_sel)) = (
        Selector::parse(r#"[data-component-type="s-search-result"][data-asin]"#),
        Selector::parse("h2 span, h2 a"),
    ) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for row in document.select(&row_sel) {
        if hits.len() >= limit {
            break;
        }
        if is_sponsored(&row) {
            continue;
        }
        let Some(asin) = row.value().attr("data-asin").and_then(valid_asin) else {
            continue;
        };
        if seen.insert(asin.clone()) {
            hits.push(SearchHit {
                asin,
                title: result_title(&row, &title_sel),
            });
        }
    }
    if !hits.is_empty() {
        return hits;
    }

    // Markup the parser could not walk: ASINs without titles.
    for re in [&*DATA_ASIN_RE, &*DP_LINK_RE] {
        for caps in re.captures_iter(html) {
            if hits.len() >= limit {
                return hits;
            }
            if let Some(asin) = valid_asin(&caps[1])
                && seen.insert(asin.clone())
            {
                hits.push(SearchHit { asin, title: None });
            }
        }
        if !hits.is_empty() {
            break;
        }
    }
    hits
}
