use chrono::Utc;
use serde::Serialize;
use shelf_core::{AppConfig, Book};
use tracing::{debug, info, warn};

use super::{BookMergeExt, EnrichmentReport};
use crate::error::Result;
use crate::http::RateLimiter;
use crate::identifiers::strip_isbn;
use crate::matching::{MatchThresholds, isbn_match, title_match};
use crate::providers::{BookRecord, GoogleBooksProvider, SearchOptions};

const SOURCE: &str = "google_books";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GoogleOutcome {
    Matched,
    NotFound,
    NothingToSearch,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoogleRun {
    pub book_id: i64,
    pub outcome: GoogleOutcome,
    pub volume_id: Option<String>,
    pub report: EnrichmentReport,
}

/// Fills a book from Google Books: stored volume id, then ISBN, then title and author.
pub struct GoogleEnrichment {
    provider: GoogleBooksProvider,
    thresholds: MatchThresholds,
    max_results: u32,
}

impl GoogleEnrichment {
    pub fn new(provider: GoogleBooksProvider) -> Self {
        Self {
            provider,
            thresholds: MatchThresholds::default(),
            max_results: 10,
        }
    }

    pub fn from_config(config: &AppConfig, limiter: RateLimiter) -> Result<Self> {
        Ok(Self::new(GoogleBooksProvider::from_config(config, limiter)?)
            .with_thresholds(config.matching.into())
            .with_max_results(config.google_books.max_results))
    }

    pub fn with_thresholds(mut self, thresholds: MatchThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(1, 40);
        self
    }

    /// A volume is the same book when the ISBNs agree, or, with no ISBN on
    /// one side, when the titles are close enough.
    pub fn accepts(&self, book: &Book, record: &BookRecord) -> bool {
        let ours = book.isbn.as_deref().map(strip_isbn).filter(|s| !s.is_empty());
        let theirs = record.isbn.as_deref().filter(|s| !s.is_empty());
        if let (Some(ours), Some(theirs)) = (ours.as_deref(), theirs) {
            return isbn_match(ours, theirs);
        }
        let score = title_match(&book.title, &record.title);
        if score < self.thresholds.google_title {
            debug!(
                book_id = book.id,
                ours = %book.title,
                theirs = %record.title,
                score,
                threshold = self.thresholds.google_title,
                "volume rejected"
            );
            return false;
        }
        true
    }

    /// Language restriction only applies to text queries.
    fn options(&self, book: &Book, label: &str) -> SearchOptions {
        SearchOptions {
            max_results: self.max_results,
            language: (label != "isbn").then(|| book.language.clone()).flatten(),
        }
    }

    pub async fn enrich(&self, book: &mut Book) -> GoogleRun {
        let mut report = EnrichmentReport::default();
        let Some((step, record)) = self.find_volume(book, &mut report).await else {
            let outcome = if book.google_id.is_none() && !book.has_isbn() && !book.has_title() {
                GoogleOutcome::NothingToSearch
            } else {
                GoogleOutcome::NotFound
            };
            return GoogleRun {
                book_id: book.id,
                outcome,
                volume_id: None,
                report,
            };
        };

        let fields = book.merge_record(&record);
        book.enriched_at = Some(Utc::now());
        info!(book_id = book.id, volume = ?record.google_id, fields = fields.len(), "enriched from Google Books");
        report.add_step(step);
        report.add_source(SOURCE);
        report.add_fields(fields);
        GoogleRun {
            book_id: book.id,
            outcome: GoogleOutcome::Matched,
            volume_id: record.google_id,
            report,
        }
    }

    async fn find_volume(&self, book: &Book, report: &mut EnrichmentReport) -> Option<(String, BookRecord)> {
        if let Some(id) = book.google_id.as_deref().filter(|id| !id.trim().is_empty()) {
            match self.provider.fetch_volume(id.trim()).await {
                Ok(record) => return Some(("Fetched Google Books volume by id".to_string(), record)),
                Err(e) => {
                    warn!(book_id = book.id, volume = id, error = %e, "volume lookup failed");
                    report.add_error(format!("volume {id} lookup failed: {e}"));
                }
            }
        }

        let mut queries = Vec::new();
        if let Some(isbn) = book.isbn.as_deref().map(strip_isbn).filter(|s| !s.is_empty()) {
            queries.push(("isbn", isbn));
        }
        if book.has_title() {
            let query = match book.authors.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
                Some(authors) => format!("{} {authors}", book.title.trim()),
                None => book.title.trim().to_string(),
            };
            queries.push(("title_author", query));
        }

        for (label, query) in queries {
            let options = self.options(book, label);
            match self.provider.search_volumes(&query, &options).await {
                Ok((_, records)) => {
                    if let Some(record) = records.into_iter().find(|r| self.accepts(book, r)) {
                        return Some((format!("Matched Google Books volume via {label} search"), record));
                    }
                    report.add_step(format!("No acceptable volume from {label} search"));
                }
                Err(e) => {
                    warn!(book_id = book.id, strategy = label, error = %e, "google books search failed");
                    report.add_error(format!("{label} search failed: {e}"));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};
    use shelf_core::{InfoQuality, ProviderToggle};

    use super::*;
    use crate::extract::google_books::SAMPLE_VOLUME;
    use crate::http::RateLimitedClient;

    fn workflow(server: &Server) -> GoogleEnrichment {
        let client =
            RateLimitedClient::new(RateLimiter::unlimited(), 0, "shelf-test", Duration::from_secs(5))
                .unwrap();
        GoogleEnrichment::new(
            GoogleBooksProvider::new(client, ProviderToggle::default()).with_base_url(server.url()),
        )
    }

    #[tokio::test]
    async fn isbn_search_fills_missing_fields() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/volumes")
            .match_query(Matcher::UrlEncoded("q".into(), "isbn:9788525406552".into()))
            .with_status(200)
            .with_body(format!(r#"{{"totalItems": 1, "items": [{SAMPLE_VOLUME}]}}"#))
            .create_async()
            .await;

        let mut book = Book {
            id: 3,
            isbn: Some("978-85-254-0655-2".into()),
            publisher: Some("Globo".into()),
            ..Book::new("Dom Casmurro")
        };
        let run = workflow(&server).enrich(&mut book).await;

        assert_eq!(run.outcome, GoogleOutcome::Matched);
        assert_eq!(run.volume_id.as_deref(), Some("g1Xy0AEACAAJ"));
        assert_eq!(book.google_id.as_deref(), Some("g1Xy0AEACAAJ"));
        assert_eq!(book.publisher.as_deref(), Some("Globo"));
        assert_eq!(book.page_count, Some(256));
        assert!(book.enriched_at.is_some());
        assert!(book.info_quality >= InfoQuality::Enhanced);
    }

    #[tokio::test]
    async fn stored_volume_id_is_used_first() {
        let mut server = Server::new_async().await;
        let by_id = server
            .mock("GET", "/volumes/g1Xy0AEACAAJ")
            .with_status(200)
            .with_body(SAMPLE_VOLUME)
            .create_async()
            .await;
        let search = server
            .mock("GET", "/volumes")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let mut book = Book {
            google_id: Some("g1Xy0AEACAAJ".into()),
            ..Book::new("Dom Casmurro")
        };
        let run = workflow(&server).enrich(&mut book).await;
        by_id.assert_async().await;
        search.assert_async().await;
        assert_eq!(run.outcome, GoogleOutcome::Matched);
        assert_eq!(book.authors.as_deref(), Some("Machado de Assis"));
    }

    #[tokio::test]
    async fn weak_title_match_is_not_found() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/volumes")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(r#"{{"totalItems": 1, "items": [{SAMPLE_VOLUME}]}}"#))
            .create_async()
            .await;

        let mut book = Book::new("The Hobbit");
        let run = workflow(&server).enrich(&mut book).await;
        assert_eq!(run.outcome, GoogleOutcome::NotFound);
        assert!(book.google_id.is_none());
        assert!(book.enriched_at.is_none());
    }

    #[test]
    fn isbn_mismatch_rejects_even_with_same_title() {
        let server_less = GoogleEnrichment::new(GoogleBooksProvider::new(
            RateLimitedClient::new(RateLimiter::unlimited(), 0, "t", Duration::from_secs(1)).unwrap(),
            ProviderToggle::default(),
        ));
        let book = Book {
            isbn: Some("9780306406157".into()),
            ..Book::new("Dom Casmurro")
        };
        let record = BookRecord {
            title: "Dom Casmurro".into(),
            isbn: Some("9788525406552".into()),
            ..Default::default()
        };
        assert!(!server_less.accepts(&book, &record));

        let no_isbn = Book::new("Dom Casmurro");
        assert!(server_less.accepts(&no_isbn, &record));
    }
}
