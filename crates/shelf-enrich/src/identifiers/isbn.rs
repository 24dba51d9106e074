use serde::{Deserialize, Serialize};

use crate::error::{EnrichError, Result};

/// A checksum-validated ISBN, always carried in its 13-digit form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Isbn {
    pub raw: String,
    pub isbn13: String,
    /// Only present for the `978` prefix.
    pub isbn10: Option<String>,
}

/// Keeps digits and `X`, uppercased. Everything else is dropped.
pub fn strip_isbn(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'x' || *c == 'X')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// True when a free-text query is really an ISBN (10 or 13 chars once
/// hyphens and spaces are gone). Checksums are not verified.
pub fn looks_like_isbn(query: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | ' ' | 'x' | 'X'))
    {
        return false;
    }
    let stripped = strip_isbn(trimmed);
    let len = stripped.len();
    if len != 10 && len != 13 {
        return false;
    }
    // X only as the ISBN-10 check digit
    stripped[..len - 1].chars().all(|c| c.is_ascii_digit())
        && (len == 10 || stripped.ends_with(|c: char| c.is_ascii_digit()))
}

fn weighted_sum_13(digits: &[u32]) -> u32 {
    digits
        .iter()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 })
        .sum()
}

fn check_digit_13(first12: &[u32]) -> u32 {
    (10 - weighted_sum_13(first12) % 10) % 10
}

fn check_char_10(first9: &[u32]) -> char {
    let sum: u32 = first9
        .iter()
        .enumerate()
        .map(|(i, d)| (10 - i as u32) * d)
        .sum();
    match (11 - sum % 11) % 11 {
        10 => 'X',
        n => char::from_digit(n, 10).unwrap_or('0'),
    }
}

fn to_digits(s: &str) -> Vec<u32> {
    s.chars().filter_map(|c| c.to_digit(10)).collect()
}

impl Isbn {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || EnrichError::InvalidIsbn(input.to_string());
        let stripped = strip_isbn(input);

        match stripped.len() {
            13 => {
                if !stripped.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
                let digits = to_digits(&stripped);
                if weighted_sum_13(&digits) % 10 != 0 {
                    return Err(invalid());
                }
                let isbn10 = stripped.starts_with("978").then(|| {
                    let body = &stripped[3..12];
                    format!("{body}{}", check_char_10(&digits[3..12]))
                });
                Ok(Self {
                    raw: input.to_string(),
                    isbn13: stripped,
                    isbn10,
                })
            }
            10 => {
                let (body, check) = stripped.split_at(9);
                if !body.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
                let digits = to_digits(body);
                if check.chars().next() != Some(check_char_10(&digits)) {
                    return Err(invalid());
                }
                let mut first12 = vec![9, 7, 8];
                first12.extend_from_slice(&digits);
                let isbn13 = format!("978{body}{}", check_digit_13(&first12));
                Ok(Self {
                    raw: input.to_string(),
                    isbn13,
                    isbn10: Some(stripped),
                })
            }
            _ => Err(invalid()),
        }
    }

    /// `978-X-XXXX-XXXX-X` style grouping. Not registration-group aware.
    pub fn hyphenated(&self) -> String {
        let s = &self.isbn13;
        format!("{}-{}-{}-{}-{}", &s[0..3], &s[3..4], &s[4..8], &s[8..12], &s[12..13])
    }

    pub fn same_as(&self, other: &Isbn) -> bool {
        self.isbn13 == other.isbn13
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_isbn13_with_hyphens() {
        let isbn = Isbn::parse("978-0-306-40615-7").unwrap();
        assert_eq!(isbn.isbn13, "9780306406157");
        assert_eq!(isbn.isbn10.as_deref(), Some("0306406152"));
        assert_eq!(isbn.hyphenated(), "978-0-3064-0615-7");
    }

    #[test]
    fn isbn10_converts_to_isbn13() {
        let isbn = Isbn::parse("0306406152").unwrap();
        assert_eq!(isbn.isbn13, "9780306406157");
        assert!(isbn.same_as(&Isbn::parse("9780306406157").unwrap()));
    }

    #[test]
    fn isbn10_with_x_check_digit() {
        let isbn = Isbn::parse("007462542x").unwrap();
        assert_eq!(isbn.isbn10.as_deref(), Some("007462542X"));
    }

    #[test]
    fn rejects_bad_checksums_and_lengths() {
        assert!(Isbn::parse("9780306406158").is_err());
        assert!(Isbn::parse("0306406153").is_err());
        assert!(Isbn::parse("12345").is_err());
        assert!(Isbn::parse("").is_err());
    }

    #[test]
    fn prefix_979_has_no_isbn10() {
        let isbn = Isbn::parse("9791032305690").unwrap();
        assert_eq!(isbn.isbn10, None);
    }

    #[test]
    fn query_detection() {
        assert!(looks_like_isbn("978-85-254-0655-2"));
        assert!(looks_like_isbn(" 030640615X "));
        assert!(!looks_like_isbn("Dom Casmurro"));
        assert!(!looks_like_isbn("1984"));
        assert!(!looks_like_isbn("97803064061X7"));
    }

    #[test]
    fn strip_keeps_digits_and_x() {
        assert_eq!(strip_isbn("ISBN: 0-07-462542-x"), "007462542X");
        assert_eq!(digits_only("978-85 254"), "97885254");
    }
}
