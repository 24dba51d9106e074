//! Fuzzy title, author and ISBN comparison used to decide whether a remote
//! record describes the same work as a local book.
//!
//! `similarity` is the `similar_text` ratio: the longest common substring is
//! found (first occurrence wins), then the parts left and right of it are
//! matched recursively. The ratio is `2 * matched / (len_a + len_b)` over
//! Unicode scalar values.

use shelf_core::MatchingConfig;

use crate::identifiers::{Isbn, strip_isbn};

/// Similarity thresholds for each comparison site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    pub prefilter: f64,
    pub title: f64,
    pub author: f64,
    pub google_title: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        MatchingConfig::default().into()
    }
}

impl From<MatchingConfig> for MatchThresholds {
    fn from(cfg: MatchingConfig) -> Self {
        Self {
            prefilter: cfg.prefilter_threshold,
            title: cfg.title_threshold,
            author: cfg.author_threshold,
            google_title: cfg.google_title_threshold,
        }
    }
}

impl MatchThresholds {
    pub fn with_title(mut self, threshold: f64) -> Self {
        self.title = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_google_title(mut self, threshold: f64) -> Self {
        self.google_title = threshold.clamp(0.0, 1.0);
        self
    }
}

const STOPWORDS: &[&str] = &[
    // en
    "the", "a", "an", "of", "and",
    // pt
    "o", "os", "as", "um", "uma", "de", "da", "do", "das", "dos", "e",
    // es
    "el", "la", "los", "las", "un", "una", "del", "y",
    // fr
    "le", "les", "des", "du", "et",
    // de
    "der", "die", "das", "und",
];

/// Lowercases, drops everything that is not a letter, digit or whitespace,
/// and collapses runs of whitespace.
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes stopwords from an already normalized string. A string made only
/// of stopwords is returned unchanged.
pub fn strip_stopwords(normalized: &str) -> String {
    let kept: Vec<&str> = normalized
        .split_whitespace()
        .filter(|w| !STOPWORDS.contains(w))
        .collect();
    if kept.is_empty() {
        normalized.to_string()
    } else {
        kept.join(" ")
    }
}

fn matching_key(title: &str) -> String {
    strip_stopwords(&normalize_title(title))
}

/// Number of characters the two sequences share under `similar_text`.
pub fn similar_text(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (mut pos_a, mut pos_b, mut max) = (0, 0, 0);
    for i in 0..a.len() {
        for j in 0..b.len() {
            let mut k = 0;
            while i + k < a.len() && j + k < b.len() && a[i + k] == b[j + k] {
                k += 1;
            }
            if k > max {
                max = k;
                pos_a = i;
                pos_b = j;
            }
        }
    }
    if max == 0 {
        return 0;
    }

    max + similar_text(&a[..pos_a], &b[..pos_b])
        + similar_text(&a[pos_a + max..], &b[pos_b + max..])
}

/// Ratio in `[0, 1]`. Two empty strings score 0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 0.0;
    }
    2.0 * similar_text(&a, &b) as f64 / total as f64
}

fn first_words(s: &str, n: usize) -> String {
    s.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

/// Best of: plain similarity, containment (0.8), and 0.9 times the similarity
/// of the first three words, which absorbs subtitle noise.
pub fn title_match(ours: &str, theirs: &str) -> f64 {
    let a = matching_key(ours);
    let b = matching_key(theirs);

    if a.is_empty() || b.is_empty() {
        let (ra, rb) = (ours.trim().to_lowercase(), theirs.trim().to_lowercase());
        return if !ra.is_empty() && ra == rb { 1.0 } else { 0.0 };
    }
    if a == b {
        return 1.0;
    }

    let direct = similarity(&a, &b);

    let a_len = a.chars().count();
    let b_len = b.chars().count();
    let containment = if a_len > 3 && b_len > 3 && (a.contains(&b) || b.contains(&a)) {
        0.8
    } else {
        0.0
    };

    let prefix = 0.9 * similarity(&first_words(&a, 3), &first_words(&b, 3));

    direct.max(containment).max(prefix)
}

/// True when one normalized title contains the other.
pub fn title_contains(ours: &str, theirs: &str) -> bool {
    let a = matching_key(ours);
    let b = matching_key(theirs);
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

/// Equality after stripping to `[0-9X]`. ISBN-10 and ISBN-13 spellings of the
/// same valid number also match. Empty input never matches.
pub fn isbn_match(a: &str, b: &str) -> bool {
    let sa = strip_isbn(a);
    let sb = strip_isbn(b);
    if sa.is_empty() || sb.is_empty() {
        return false;
    }
    if sa == sb {
        return true;
    }
    match (Isbn::parse(&sa), Isbn::parse(&sb)) {
        (Ok(x), Ok(y)) => x.same_as(&y),
        _ => false,
    }
}

/// Every word of two or more characters in `a` must appear in `b`: exactly,
/// as a substring either way, or (words over three characters) with a
/// normalized Levenshtein similarity of at least 0.8.
pub fn author_words_match(a: &str, b: &str) -> bool {
    let a = normalize_title(a);
    let b = normalize_title(b);
    let theirs: Vec<&str> = b.split_whitespace().collect();

    let significant: Vec<&str> = a
        .split_whitespace()
        .filter(|w| w.chars().count() >= 2)
        .collect();
    if significant.is_empty() || theirs.is_empty() {
        return false;
    }

    significant.iter().all(|word| {
        theirs.iter().any(|candidate| {
            word == candidate
                || candidate.contains(word)
                || word.contains(candidate) && candidate.chars().count() >= 2
                || word.chars().count() > 3
                    && strsim::normalized_levenshtein(word, candidate) >= 0.8
        })
    })
}

pub fn author_similarity(a: &str, b: &str) -> f64 {
    similarity(&normalize_title(a), &normalize_title(b))
}

/// Word overlap, or whole-string similarity at `threshold`.
pub fn authors_compatible(ours: &str, theirs: &str, threshold: f64) -> bool {
    author_words_match(ours, theirs) || author_similarity(ours, theirs) >= threshold
}
