use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use shelf_core::{AppConfig, AsinStatus, Book};
use tracing::{debug, info, warn};

use super::product_api::{NoProductApi, ProductApi, product_api_from_config};
use super::scraper::AmazonScraper;
use super::validation::{MatchEvidence, passes_prefilter, validate_candidate};
use crate::enrichment::{BookMergeExt, EnrichmentReport};
use crate::error::Result;
use crate::extract::EnrichmentCandidate;
use crate::extract::search::MAX_SEARCH_HITS;
use crate::http::RateLimiter;
use crate::identifiers::strip_isbn;
use crate::matching::MatchThresholds;
use crate::region::{Region, RegionResolver};

const SOURCE_SCRAPE: &str = "amazon_scrape";
const SOURCE_API: &str = "amazon_pa_api";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmazonOutcome {
    /// The book already had an ASIN. Nothing was fetched.
    AlreadyLinked,
    /// Neither ISBN nor title to search with.
    NothingToSearch,
    Matched,
    NotFound,
}

/// Result of one book's run. The book itself carries the new status.
#[derive(Debug, Clone, Serialize)]
pub struct AmazonRun {
    pub book_id: i64,
    pub outcome: AmazonOutcome,
    pub region: Option<Region>,
    pub asin: Option<String>,
    pub strategy: Option<String>,
    #[serde(skip)]
    pub evidence: Option<MatchEvidence>,
    pub elapsed_ms: u64,
    pub report: EnrichmentReport,
}

impl AmazonRun {
    fn new(book: &Book, outcome: AmazonOutcome) -> Self {
        Self {
            book_id: book.id,
            outcome,
            region: None,
            asin: None,
            strategy: None,
            evidence: None,
            elapsed_ms: 0,
            report: EnrichmentReport::default(),
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self.outcome, AmazonOutcome::Matched | AmazonOutcome::AlreadyLinked)
    }
}

/// One search to run against a marketplace, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStrategy {
    pub label: &'static str,
    pub query: String,
}

/// ISBN first, then title with authors. Empty when the book has neither.
pub fn search_strategies(book: &Book) -> Vec<SearchStrategy> {
    let mut strategies = Vec::new();
    if let Some(isbn) = book.isbn.as_deref().map(strip_isbn).filter(|s| !s.is_empty()) {
        strategies.push(SearchStrategy {
            label: "isbn",
            query: isbn,
        });
    }
    if book.has_title() {
        let query = match book.authors.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(authors) => format!("{} {authors}", book.title.trim()),
            None => book.title.trim().to_string(),
        };
        strategies.push(SearchStrategy {
            label: "title_author",
            query,
        });
    }
    strategies
}

/// A match must link the book to a product, so candidates without an ASIN
/// never reach validation.
fn has_asin(candidate: &EnrichmentCandidate) -> bool {
    candidate.asin.as_deref().is_some_and(|a| !a.trim().is_empty())
}

/// Per-book Amazon enrichment: product API when configured, then ISBN and
/// title searches on the book's marketplace. Requests are sequential and
/// paced by the scraper's limiter.
pub struct AmazonEnrichment {
    scraper: AmazonScraper,
    api: Arc<dyn ProductApi>,
    resolver: RegionResolver,
    thresholds: MatchThresholds,
    max_candidates: usize,
}

impl AmazonEnrichment {
    pub fn new(scraper: AmazonScraper) -> Self {
        Self {
            scraper,
            api: Arc::new(NoProductApi),
            resolver: RegionResolver::default(),
            thresholds: MatchThresholds::default(),
            max_candidates: MAX_SEARCH_HITS,
        }
    }

    pub fn from_config(config: &AppConfig, limiter: RateLimiter) -> Result<Self> {
        Ok(Self::new(AmazonScraper::from_config(config, limiter)?)
            .with_product_api(product_api_from_config(config)?)
            .with_resolver(RegionResolver::from_code(&config.core.default_region))
            .with_thresholds(config.matching.into())
            .with_max_candidates(config.amazon.max_candidates))
    }

    pub fn with_product_api(mut self, api: Arc<dyn ProductApi>) -> Self {
        self.api = api;
        self
    }

    pub fn with_resolver(mut self, resolver: RegionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_thresholds(mut self, thresholds: MatchThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max.clamp(1, MAX_SEARCH_HITS);
        self
    }

    pub fn thresholds(&self) -> &MatchThresholds {
        &self.thresholds
    }

    /// Runs the workflow on `book`, leaving it `completed` or `failed`.
    /// Fetch and parse problems end up in the report, never as an error.
    pub async fn enrich(&self, book: &mut Book) -> AmazonRun {
        let started = Instant::now();

        if book.has_asin() {
            book.mark_asin(AsinStatus::Completed);
            let mut run = AmazonRun::new(book, AmazonOutcome::AlreadyLinked);
            run.asin = book.amazon_asin.clone();
            run.report.add_step("ASIN already present");
            debug!(book_id = book.id, "book already linked, skipping");
            return run;
        }

        let strategies = search_strategies(book);
        if strategies.is_empty() {
            book.mark_asin(AsinStatus::Failed);
            let mut run = AmazonRun::new(book, AmazonOutcome::NothingToSearch);
            run.report.add_error("book has neither ISBN nor title");
            warn!(book_id = book.id, "nothing to search amazon with");
            return run;
        }

        book.mark_asin(AsinStatus::Processing);
        let region = self.resolver.resolve(book.language.as_deref());
        let mut run = AmazonRun::new(book, AmazonOutcome::NotFound);
        run.region = Some(region);
        info!(book_id = book.id, region = %region, title = %book.title, "amazon enrichment started");

        let accepted = match self.try_product_api(book, region, &strategies, &mut run.report).await {
            Some(found) => Some(found),
            None => self.try_scraping(book, region, &strategies, &mut run.report).await,
        };

        match accepted {
            Some((strategy, evidence, candidate)) => {
                let fields = book.merge_candidate(&candidate);
                run.report.add_fields(fields);
                book.mark_asin(AsinStatus::Completed);
                run.outcome = AmazonOutcome::Matched;
                run.asin = book.amazon_asin.clone();
                run.strategy = Some(strategy);
                run.evidence = Some(evidence);
                info!(
                    book_id = book.id,
                    asin = run.asin.as_deref().unwrap_or_default(),
                    strategy = run.strategy.as_deref().unwrap_or_default(),
                    "amazon match accepted"
                );
            }
            None => {
                book.mark_asin(AsinStatus::Failed);
                info!(book_id = book.id, region = %region, "no amazon candidate validated");
            }
        }
        run.elapsed_ms = started.elapsed().as_millis() as u64;
        run
    }

    async fn try_product_api(
        &self,
        book: &Book,
        region: Region,
        strategies: &[SearchStrategy],
        report: &mut EnrichmentReport,
    ) -> Option<(String, MatchEvidence, EnrichmentCandidate)> {
        if !self.api.is_configured() {
            return None;
        }
        for strategy in strategies {
            report.add_step(format!("PA-API {} search", strategy.label));
            let items = match self.api.search_items(&strategy.query, region).await {
                Ok(items) => items,
                Err(e) => {
                    report.add_error(format!("PA-API {} search failed: {e}", strategy.label));
                    return None;
                }
            };
            report.add_source(SOURCE_API);
            for item in items {
                if !has_asin(&item) {
                    debug!(book_id = book.id, strategy = strategy.label, "PA-API item without ASIN skipped");
                    report.add_error(format!("PA-API {} item without ASIN skipped", strategy.label));
                    continue;
                }
                if let Ok(evidence) = validate_candidate(book, &item, &self.thresholds) {
                    return Some((format!("pa_api_{}", strategy.label), evidence, item));
                }
            }
        }
        None
    }

    async fn try_scraping(
        &self,
        book: &Book,
        region: Region,
        strategies: &[SearchStrategy],
        report: &mut EnrichmentReport,
    ) -> Option<(String, MatchEvidence, EnrichmentCandidate)> {
        let mut fetched = HashSet::new();
        for strategy in strategies {
            report.add_step(format!("{} search on {}", strategy.label, region.domain()));
            let hits = match self.scraper.search(region, &strategy.query, self.max_candidates).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(book_id = book.id, strategy = strategy.label, error = %e, "amazon search failed");
                    report.add_error(format!("{} search failed: {e}", strategy.label));
                    continue;
                }
            };
            report.add_source(SOURCE_SCRAPE);
            if hits.is_empty() {
                debug!(book_id = book.id, strategy = strategy.label, "no search results");
                continue;
            }

            for hit in hits {
                if !fetched.insert(hit.asin.clone()) {
                    continue;
                }
                if !passes_prefilter(&book.title, hit.title.as_deref(), self.thresholds.prefilter) {
                    debug!(
                        book_id = book.id,
                        asin = %hit.asin,
                        result_title = hit.title.as_deref().unwrap_or_default(),
                        threshold = self.thresholds.prefilter,
                        "search result filtered out"
                    );
                    continue;
                }
                let candidate = match self.scraper.product(region, &hit.asin).await {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        report.add_error(format!("product page {} failed: {e}", hit.asin));
                        continue;
                    }
                };
                if !has_asin(&candidate) {
                    debug!(book_id = book.id, asin = %hit.asin, "product page without ASIN skipped");
                    report.add_error(format!("product page {} has no ASIN", hit.asin));
                    continue;
                }
                if let Ok(evidence) = validate_candidate(book, &candidate, &self.thresholds) {
                    return Some((strategy.label.to_string(), evidence, candidate));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use mockito::{Matcher, Server};

    use super::*;
    use crate::amazon::product_api::{PaApiClient, PaApiCredentials};
    use crate::error::EnrichError;
    use crate::http::RateLimitedClient;

    const ISBN_RESULTS: &str = r#"<html><body>
<div data-asin="8525406554" data-component-type="s-search-result"><h2><a><span>Dom Casmurro</span></a></h2></div>
</body></html>"#;

    const DOM_CASMURRO: &str = r#"<html><body>
<a href="/livros/b/?node=6740748011">Livros</a>
<span id="productTitle">Dom Casmurro</span>
<div id="bylineInfo"><span class="author"><a class="a-link-normal" href="/x">Machado de Assis</a></span></div>
<ul>
<li>Editora : Penguin-Companhia; 1ª edição</li>
<li>Capa comum : 256 páginas</li>
<li>ISBN-13 : 978-8525406552</li>
</ul>
<img id="landingImage" src="https://m.media-amazon.com/images/I/51abc._SY342_.jpg">
</body></html>"#;

    fn scraper(server: &Server) -> AmazonScraper {
        let client =
            RateLimitedClient::new(RateLimiter::unlimited(), 0, "shelf-test", Duration::from_secs(5))
                .unwrap();
        AmazonScraper::new(client).with_base_url(server.url())
    }

    fn dom_casmurro() -> Book {
        Book {
            id: 7,
            isbn: Some("9788525406552".into()),
            language: Some("pt-BR".into()),
            ..Book::new("Dom Casmurro")
        }
    }

    #[test]
    fn strategies_isbn_first() {
        let book = Book {
            authors: Some("Machado de Assis".into()),
            ..dom_casmurro()
        };
        let strategies = search_strategies(&book);
        assert_eq!(strategies[0].label, "isbn");
        assert_eq!(strategies[0].query, "9788525406552");
        assert_eq!(strategies[1].query, "Dom Casmurro Machado de Assis");
        assert!(search_strategies(&Book::new("  ")).is_empty());
    }

    #[tokio::test]
    async fn isbn_search_on_resolved_marketplace_first() {
        let mut server = Server::new_async().await;
        let isbn_search = server
            .mock("GET", "/s")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("k".into(), "9788525406552".into()),
                Matcher::UrlEncoded("i".into(), "stripbooks".into()),
            ]))
            .match_header("accept-language", Region::Br.config().accept_language)
            .with_status(200)
            .with_body(ISBN_RESULTS)
            .expect(1)
            .create_async()
            .await;
        let title_search = server
            .mock("GET", "/s")
            .match_query(Matcher::UrlEncoded("k".into(), "Dom Casmurro".into()))
            .with_status(200)
            .with_body("<html></html>")
            .expect(0)
            .create_async()
            .await;
        let product = server
            .mock("GET", "/dp/8525406554")
            .with_status(200)
            .with_body(DOM_CASMURRO)
            .create_async()
            .await;

        let workflow = AmazonEnrichment::new(scraper(&server));
        let mut book = dom_casmurro();
        let run = workflow.enrich(&mut book).await;

        isbn_search.assert_async().await;
        title_search.assert_async().await;
        product.assert_async().await;
        assert_eq!(run.region, Some(Region::Br));
        assert_eq!(run.outcome, AmazonOutcome::Matched);
        assert_eq!(run.strategy.as_deref(), Some("isbn"));
        assert_eq!(run.evidence, Some(MatchEvidence::Isbn));
        assert_eq!(book.amazon_asin.as_deref(), Some("8525406554"));
        assert_eq!(book.asin_status, AsinStatus::Completed);
        assert!(book.asin_processed_at.is_some());
        assert_eq!(book.authors.as_deref(), Some("Machado de Assis"));
        assert_eq!(book.page_count, Some(256));
        assert!(run.report.fields_updated.contains(&"thumbnail".to_string()));
    }

    #[tokio::test]
    async fn existing_asin_short_circuits_without_http() {
        let mut server = Server::new_async().await;
        let any = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let workflow = AmazonEnrichment::new(scraper(&server));
        let mut book = Book {
            amazon_asin: Some("8525406554".into()),
            ..dom_casmurro()
        };
        let run = workflow.enrich(&mut book).await;

        any.assert_async().await;
        assert_eq!(run.outcome, AmazonOutcome::AlreadyLinked);
        assert_eq!(book.asin_status, AsinStatus::Completed);
        assert!(book.asin_processed_at.is_some());
    }

    #[tokio::test]
    async fn unrelated_candidates_rejected_then_failed() {
        let mut server = Server::new_async().await;
        let _search = server
            .mock("GET", "/s")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"<div data-asin="B0TVTVTVTV" data-component-type="s-search-result"></div>"#,
            )
            .create_async()
            .await;
        let _tv = server
            .mock("GET", "/dp/B0TVTVTVTV")
            .with_status(200)
            .with_body(r#"<span id="productTitle">Samsung 55&quot; Smart TV</span>"#)
            .expect(1)
            .create_async()
            .await;

        let workflow = AmazonEnrichment::new(scraper(&server));
        let mut book = Book::new("The Hobbit");
        let run = workflow.enrich(&mut book).await;

        assert_eq!(run.outcome, AmazonOutcome::NotFound);
        assert_eq!(book.asin_status, AsinStatus::Failed);
        assert!(book.amazon_asin.is_none());
    }

    #[tokio::test]
    async fn search_errors_recorded_not_raised() {
        let mut server = Server::new_async().await;
        let _search = server
            .mock("GET", "/s")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let workflow = AmazonEnrichment::new(scraper(&server));
        let mut book = dom_casmurro();
        let run = workflow.enrich(&mut book).await;
        assert_eq!(run.outcome, AmazonOutcome::NotFound);
        assert_eq!(run.report.errors.len(), 2);
        assert_eq!(book.asin_status, AsinStatus::Failed);
    }

    #[tokio::test]
    async fn nothing_to_search_fails_immediately() {
        let server = Server::new_async().await;
        let workflow = AmazonEnrichment::new(scraper(&server));
        let mut book = Book::new("");
        let run = workflow.enrich(&mut book).await;
        assert_eq!(run.outcome, AmazonOutcome::NothingToSearch);
        assert_eq!(book.asin_status, AsinStatus::Failed);
    }

    struct OneItemApi;

    #[async_trait]
    impl ProductApi for OneItemApi {
        fn is_configured(&self) -> bool {
            true
        }

        async fn search_items(&self, keywords: &str, _region: Region) -> Result<Vec<EnrichmentCandidate>> {
            if keywords == "1984" {
                return Ok(vec![EnrichmentCandidate {
                    asin: Some("0451524934".into()),
                    title: Some("1984".into()),
                    ..Default::default()
                }]);
            }
            Err(EnrichError::SourceUnavailable("throttled".into()))
        }
    }

    #[tokio::test]
    async fn product_api_match_skips_scraping() {
        let mut server = Server::new_async().await;
        let any = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let workflow = AmazonEnrichment::new(scraper(&server)).with_product_api(Arc::new(OneItemApi));
        let mut book = Book::new("1984");
        let run = workflow.enrich(&mut book).await;

        any.assert_async().await;
        assert_eq!(run.outcome, AmazonOutcome::Matched);
        assert_eq!(run.strategy.as_deref(), Some("pa_api_title_author"));
        assert_eq!(book.amazon_asin.as_deref(), Some("0451524934"));
        assert_eq!(run.region, Some(Region::Us));
    }

    struct AsinlessApi;

    #[async_trait]
    impl ProductApi for AsinlessApi {
        fn is_configured(&self) -> bool {
            true
        }

        async fn search_items(&self, _keywords: &str, _region: Region) -> Result<Vec<EnrichmentCandidate>> {
            Ok(vec![EnrichmentCandidate {
                asin: None,
                title: Some("1984".into()),
                isbn: Some("9780451524935".into()),
                is_book: true,
                ..Default::default()
            }])
        }
    }

    #[test]
    fn blank_asin_is_not_an_asin() {
        let mut candidate = EnrichmentCandidate {
            asin: Some("  ".into()),
            ..Default::default()
        };
        assert!(!has_asin(&candidate));
        candidate.asin = Some("0451524934".into());
        assert!(has_asin(&candidate));
    }

    #[tokio::test]
    async fn candidates_without_asin_never_complete() {
        let mut server = Server::new_async().await;
        let _search = server
            .mock("GET", "/s")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html></html>")
            .create_async()
            .await;

        let workflow = AmazonEnrichment::new(scraper(&server)).with_product_api(Arc::new(AsinlessApi));
        let mut book = Book {
            isbn: Some("9780451524935".into()),
            ..Book::new("1984")
        };
        let run = workflow.enrich(&mut book).await;

        assert_eq!(run.outcome, AmazonOutcome::NotFound);
        assert_eq!(book.asin_status, AsinStatus::Failed);
        assert!(book.amazon_asin.is_none());
        assert!(run.report.errors.iter().any(|e| e.contains("without ASIN")));
    }

    #[tokio::test]
    async fn signed_product_api_search_drives_enrichment() {
        let mut server = Server::new_async().await;
        let api_search = server
            .mock("POST", "/paapi5/searchitems")
            .match_header("x-amz-target", Matcher::Regex("SearchItems$".into()))
            .match_body(Matcher::PartialJsonString(
                r#"{"Keywords":"9788525406552","Marketplace":"www.amazon.com.br"}"#.into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"SearchResult":{"Items":[{
                    "ASIN":"8525406554",
                    "ItemInfo":{
                        "Title":{"DisplayValue":"Dom Casmurro"},
                        "ByLineInfo":{"Contributors":[{"Name":"Machado de Assis","RoleType":"author"}]},
                        "ExternalIds":{"ISBNs":{"DisplayValues":["8525406554"]},"EANs":{"DisplayValues":["9788525406552"]}},
                        "ContentInfo":{"PagesCount":{"DisplayValue":256}},
                        "Classifications":{"ProductGroup":{"DisplayValue":"Book"}}
                    }
                }]}}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let scraping = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client =
            RateLimitedClient::new(RateLimiter::unlimited(), 0, "shelf-test", Duration::from_secs(5))
                .unwrap();
        let api = PaApiClient::new(
            client,
            PaApiCredentials {
                access_key: "AKIDEXAMPLE".into(),
                secret_key: "secret".into(),
            },
        )
        .with_partner_tag("shelf-br-20")
        .with_base_url(server.url());

        let workflow = AmazonEnrichment::new(scraper(&server)).with_product_api(Arc::new(api));
        let mut book = dom_casmurro();
        let run = workflow.enrich(&mut book).await;

        api_search.assert_async().await;
        scraping.assert_async().await;
        assert_eq!(run.outcome, AmazonOutcome::Matched);
        assert_eq!(run.strategy.as_deref(), Some("pa_api_isbn"));
        assert_eq!(book.amazon_asin.as_deref(), Some("8525406554"));
        assert_eq!(book.asin_status, AsinStatus::Completed);
        assert_eq!(book.page_count, Some(256));
        assert!(run.report.sources_used.iter().any(|s| s == "amazon_pa_api"));
    }
}
