use std::sync::Arc;

use async_trait::async_trait;
use shelf_core::{AppConfig, ProviderToggle};
use tracing::{debug, warn};

use super::{BookProvider, BookRecord, SearchOptions, SearchResult};
use crate::amazon::AmazonScraper;
use crate::error::Result;
use crate::extract::EnrichmentCandidate;
use crate::extract::search::MAX_SEARCH_HITS;
use crate::http::RateLimiter;
use crate::identifiers::{looks_like_isbn, strip_isbn};
use crate::region::{Region, RegionResolver};

pub use crate::amazon::product_api::{NoProductApi, ProductApi};
use crate::amazon::product_api::product_api_from_config;

const SOURCE: &str = "amazon";

/// A product page as a provider record. Pages without a title are dropped.
pub fn candidate_record(candidate: EnrichmentCandidate) -> Option<BookRecord> {
    let title = candidate.title?;
    Some(BookRecord {
        title,
        authors: candidate
            .authors
            .map(|a| {
                a.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        isbn: candidate.isbn,
        amazon_asin: candidate.asin,
        publisher: candidate.publisher,
        page_count: candidate.page_count,
        description: candidate.description,
        thumbnail: candidate.thumbnail,
        dimensions: candidate.dimensions,
        source: SOURCE.to_string(),
        ..Default::default()
    })
}

/// Product API first, then the search page and up to `max_candidates`
/// product pages of the marketplace resolved from the search language.
pub struct AmazonProvider {
    api: Arc<dyn ProductApi>,
    scraper: AmazonScraper,
    resolver: RegionResolver,
    toggle: ProviderToggle,
    max_candidates: usize,
}

impl AmazonProvider {
    pub fn new(api: Arc<dyn ProductApi>, scraper: AmazonScraper, toggle: ProviderToggle) -> Self {
        Self {
            api,
            scraper,
            resolver: RegionResolver::default(),
            toggle,
            max_candidates: MAX_SEARCH_HITS,
        }
    }

    pub fn from_config(config: &AppConfig, limiter: RateLimiter) -> Result<Self> {
        let scraper = AmazonScraper::from_config(config, limiter)?;
        Ok(Self::new(
            product_api_from_config(config)?,
            scraper,
            config.providers.amazon,
        )
        .with_resolver(RegionResolver::from_code(&config.core.default_region))
        .with_max_candidates(config.amazon.max_candidates))
    }

    pub fn with_resolver(mut self, resolver: RegionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max.clamp(1, MAX_SEARCH_HITS);
        self
    }

    async fn via_api(&self, query: &str, region: Region) -> Option<Vec<BookRecord>> {
        if !self.api.is_configured() {
            return None;
        }
        match self.api.search_items(query, region).await {
            Ok(items) => {
                let records: Vec<BookRecord> = items
                    .into_iter()
                    .filter(|c| c.is_book)
                    .filter_map(candidate_record)
                    .collect();
                (!records.is_empty()).then_some(records)
            }
            Err(e) => {
                warn!(provider = SOURCE, error = %e, "product API failed, scraping instead");
                None
            }
        }
    }

    async fn via_scraping(&self, query: &str, region: Region, limit: usize) -> Result<Vec<BookRecord>> {
        let hits = self.scraper.search(region, query, limit).await?;
        let mut records = Vec::new();
        for hit in hits {
            match self.scraper.product(region, &hit.asin).await {
                Ok(candidate) if candidate.is_book => records.extend(candidate_record(candidate)),
                Ok(_) => debug!(asin = %hit.asin, "skipping non-book result"),
                Err(e) => warn!(asin = %hit.asin, error = %e, "product page failed"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl BookProvider for AmazonProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    fn priority(&self) -> u32 {
        self.toggle.priority
    }

    fn is_enabled(&self) -> bool {
        self.toggle.enabled
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult> {
        let region = self.resolver.resolve(options.language.as_deref());
        let query = if looks_like_isbn(query) {
            strip_isbn(query)
        } else {
            query.trim().to_string()
        };

        let records = match self.via_api(&query, region).await {
            Some(records) => records,
            None => {
                let limit = self.max_candidates.min(options.max_results.max(1) as usize);
                self.via_scraping(&query, region, limit).await?
            }
        };
        if records.is_empty() {
            return Ok(SearchResult::empty(
                SOURCE,
                format!("no books on {} for '{query}'", region.domain()),
            ));
        }
        let total = records.len();
        Ok(SearchResult::found(SOURCE, records, total))
    }
}
