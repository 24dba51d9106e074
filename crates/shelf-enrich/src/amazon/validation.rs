use std::fmt;

use shelf_core::Book;
use tracing::{debug, info};

use crate::extract::EnrichmentCandidate;
use crate::matching::{MatchThresholds, authors_compatible, isbn_match, title_contains, title_match};

/// Why a product page was accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchEvidence {
    Isbn,
    Title { score: f64 },
    Containment { score: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NoTitle,
    NotABook { title: String },
    IsbnMismatch { ours: String, theirs: String },
    TitleMismatch { ours: String, theirs: String, score: f64 },
    AuthorMismatch { ours: String, theirs: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTitle => f.write_str("page has no title"),
            Self::NotABook { title } => write!(f, "'{title}' is not a book"),
            Self::IsbnMismatch { ours, theirs } => write!(f, "ISBN {theirs} != {ours}"),
            Self::TitleMismatch { ours, theirs, score } => {
                write!(f, "title '{theirs}' vs '{ours}' scored {score:.2}")
            }
            Self::AuthorMismatch { ours, theirs } => write!(f, "authors '{theirs}' vs '{ours}'"),
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Decides whether `candidate` is the same work as `book`.
///
/// When both sides carry an ISBN it is authoritative in both directions.
/// Otherwise the title must reach `thresholds.title` or be contained in the
/// other, and authors (when both sides have them) must be compatible at
/// `thresholds.author`. A page with no book signal and no ISBN is only
/// accepted on an exact title match.
pub fn validate_candidate(
    book: &Book,
    candidate: &EnrichmentCandidate,
    thresholds: &MatchThresholds,
) -> Result<MatchEvidence, Rejection> {
    let verdict = judge(book, candidate, thresholds);
    match &verdict {
        Ok(evidence) => debug!(
            book_id = book.id,
            asin = candidate.asin.as_deref().unwrap_or_default(),
            ?evidence,
            "candidate accepted"
        ),
        Err(rejection) => info!(
            book_id = book.id,
            asin = candidate.asin.as_deref().unwrap_or_default(),
            threshold = thresholds.title,
            reason = %rejection,
            "candidate rejected"
        ),
    }
    verdict
}

fn judge(
    book: &Book,
    candidate: &EnrichmentCandidate,
    thresholds: &MatchThresholds,
) -> Result<MatchEvidence, Rejection> {
    if let (Some(ours), Some(theirs)) = (present(book.isbn.as_deref()), present(candidate.isbn.as_deref())) {
        return if isbn_match(ours, theirs) {
            Ok(MatchEvidence::Isbn)
        } else {
            Err(Rejection::IsbnMismatch {
                ours: ours.to_string(),
                theirs: theirs.to_string(),
            })
        };
    }

    let theirs = present(candidate.title.as_deref()).ok_or(Rejection::NoTitle)?;
    let ours = book.title.trim();
    let score = title_match(ours, theirs);

    if !candidate.is_book && candidate.isbn.is_none() && score < 1.0 {
        return Err(Rejection::NotABook {
            title: theirs.to_string(),
        });
    }

    let evidence = if score >= thresholds.title {
        MatchEvidence::Title { score }
    } else if title_contains(ours, theirs) {
        MatchEvidence::Containment { score }
    } else {
        return Err(Rejection::TitleMismatch {
            ours: ours.to_string(),
            theirs: theirs.to_string(),
            score,
        });
    };

    if let (Some(ours), Some(theirs)) = (present(book.authors.as_deref()), present(candidate.authors.as_deref()))
        && !authors_compatible(ours, theirs, thresholds.author)
    {
        return Err(Rejection::AuthorMismatch {
            ours: ours.to_string(),
            theirs: theirs.to_string(),
        });
    }

    Ok(evidence)
}

/// Cheap check on a search result's title before its product page is fetched.
/// Rows without a title, and books without one, always pass.
pub fn passes_prefilter(book_title: &str, hit_title: Option<&str>, threshold: f64) -> bool {
    let (ours, Some(theirs)) = (book_title.trim(), present(hit_title)) else {
        return true;
    };
    if ours.is_empty() {
        return true;
    }
    title_match(ours, theirs) >= threshold || title_contains(ours, theirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, authors: Option<&str>, isbn: Option<&str>) -> Book {
        Book {
            authors: authors.map(Into::into),
            isbn: isbn.map(Into::into),
            ..Book::new(title)
        }
    }

    fn page(title: &str, authors: Option<&str>, isbn: Option<&str>) -> EnrichmentCandidate {
        EnrichmentCandidate {
            asin: Some("B000000001".into()),
            title: Some(title.into()),
            authors: authors.map(Into::into),
            isbn: isbn.map(Into::into),
            is_book: true,
            ..Default::default()
        }
    }

    #[test]
    fn exact_title_without_isbn_is_accepted() {
        let b = book("1984", None, None);
        let mut c = page("1984", None, None);
        c.is_book = false;
        let verdict = validate_candidate(&b, &c, &MatchThresholds::default());
        assert_eq!(verdict, Ok(MatchEvidence::Title { score: 1.0 }));
    }

    #[test]
    fn isbn_mismatch_is_hard_reject() {
        let b = book("Dom Casmurro", None, Some("9788525406552"));
        let c = page("Dom Casmurro", None, Some("9780306406157"));
        assert!(matches!(
            validate_candidate(&b, &c, &MatchThresholds::default()),
            Err(Rejection::IsbnMismatch { .. })
        ));
    }

    #[test]
    fn isbn_match_wins_over_title() {
        let b = book("Dom Casmurro", None, Some("8525406554"));
        let c = page("Dom Casmurro (Edição de Bolso) - Clássicos", None, Some("978-8525406552"));
        assert_eq!(
            validate_candidate(&b, &c, &MatchThresholds::default()),
            Ok(MatchEvidence::Isbn)
        );
    }

    #[test]
    fn unrelated_product_rejected() {
        let b = book("The Hobbit", None, None);
        let mut c = page("Samsung 55\" Smart TV", None, None);
        c.is_book = false;
        assert!(validate_candidate(&b, &c, &MatchThresholds::default()).is_err());

        c.is_book = true;
        assert!(matches!(
            validate_candidate(&b, &c, &MatchThresholds::default()),
            Err(Rejection::TitleMismatch { .. })
        ));
    }

    #[test]
    fn authors_must_be_compatible() {
        let b = book("Animal Farm", Some("George Orwell"), None);
        let ok = page("Animal Farm", Some("Orwell, George"), None);
        assert!(validate_candidate(&b, &ok, &MatchThresholds::default()).is_ok());

        let wrong = page("Animal Farm", Some("Aldous Huxley"), None);
        assert!(matches!(
            validate_candidate(&b, &wrong, &MatchThresholds::default()),
            Err(Rejection::AuthorMismatch { .. })
        ));
    }

    #[test]
    fn containment_accepts_long_subtitles() {
        let b = book("Dom Casmurro", None, None);
        let c = page(
            "Dom Casmurro: Edição comentada com notas, prefácio e posfácio de especialistas",
            None,
            None,
        );
        let strict = MatchThresholds::default().with_title(0.99);
        assert!(matches!(
            validate_candidate(&b, &c, &strict),
            Ok(MatchEvidence::Containment { .. })
        ));
    }

    #[test]
    fn missing_title_rejected() {
        let b = book("Dom Casmurro", None, None);
        let c = EnrichmentCandidate {
            is_book: true,
            ..Default::default()
        };
        assert_eq!(
            validate_candidate(&b, &c, &MatchThresholds::default()),
            Err(Rejection::NoTitle)
        );
    }

    #[test]
    fn prefilter() {
        assert!(passes_prefilter("Dom Casmurro", Some("Dom Casmurro"), 0.5));
        assert!(passes_prefilter("Dom Casmurro", None, 0.5));
        assert!(passes_prefilter("", Some("anything"), 0.5));
        assert!(!passes_prefilter("The Hobbit", Some("Samsung 55\" Smart TV"), 0.5));
    }
}
