use std::time::Duration;

use reqwest::Url;
use shelf_core::AppConfig;
use tracing::debug;

use crate::error::{EnrichError, Result};
use crate::extract::{EnrichmentCandidate, SearchHit, extract_candidate, extract_search_results};
use crate::http::{RateLimitedClient, RateLimiter};
use crate::region::Region;

/// Fetches Amazon search and product pages for a marketplace, sending the
/// marketplace's `Accept-Language`.
pub struct AmazonScraper {
    client: RateLimitedClient,
    base_url: Option<String>,
}

impl AmazonScraper {
    pub fn new(client: RateLimitedClient) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    pub fn from_config(config: &AppConfig, limiter: RateLimiter) -> Result<Self> {
        let client = RateLimitedClient::new(
            limiter,
            1,
            &config.amazon.user_agent,
            Duration::from_secs(config.amazon.request_timeout_secs),
        )?;
        Ok(Self::new(client))
    }

    /// Sends every request to `base_url` instead of the marketplace domain.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        self.client.limiter()
    }

    fn base(&self, region: Region) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| region.config().base_url())
    }

    fn url(&self, region: Region, segments: &[&str]) -> Result<Url> {
        let base = self.base(region);
        let mut url =
            Url::parse(&base).map_err(|e| EnrichError::Parse(format!("invalid URL {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| EnrichError::Parse(format!("invalid base URL {base}")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `{base}/s?k={query}&i=stripbooks`
    pub fn search_url(&self, region: Region, query: &str) -> Result<Url> {
        let mut url = self.url(region, &["s"])?;
        url.query_pairs_mut()
            .append_pair("k", query.trim())
            .append_pair("i", "stripbooks");
        Ok(url)
    }

    pub fn product_url(&self, region: Region, asin: &str) -> Result<Url> {
        self.url(region, &["dp", asin])
    }

    pub async fn search(&self, region: Region, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let url = self.search_url(region, query)?;
        let html = self
            .client
            .get_localized(url.as_str(), region.config().accept_language)
            .await?;
        let hits = extract_search_results(&html, limit);
        debug!(region = %region, query, hits = hits.len(), "amazon search page parsed");
        Ok(hits)
    }

    pub async fn product(&self, region: Region, asin: &str) -> Result<EnrichmentCandidate> {
        let url = self.product_url(region, asin)?;
        let html = self
            .client
            .get_localized(url.as_str(), region.config().accept_language)
            .await?;
        Ok(extract_candidate(&html, Some(asin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn scraper() -> AmazonScraper {
        let client =
            RateLimitedClient::new(RateLimiter::unlimited(), 0, "shelf-test", Duration::from_secs(5))
                .unwrap();
        AmazonScraper::new(client)
    }

    #[test]
    fn urls_follow_marketplace() {
        let s = scraper();
        assert_eq!(
            s.search_url(Region::Br, "Dom Casmurro").unwrap().as_str(),
            "https://www.amazon.com.br/s?k=Dom+Casmurro&i=stripbooks"
        );
        assert_eq!(
            s.product_url(Region::Uk, "0141036141").unwrap().as_str(),
            "https://www.amazon.co.uk/dp/0141036141"
        );
    }

    #[tokio::test]
    async fn search_sends_marketplace_language() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/s")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("k".into(), "9788525406552".into()),
                Matcher::UrlEncoded("i".into(), "stripbooks".into()),
            ]))
            .match_header("accept-language", Region::Br.config().accept_language)
            .with_status(200)
            .with_body(
                r#"<div data-asin="8525406554" data-component-type="s-search-result"><h2><a><span>Dom Casmurro</span></a></h2></div>"#,
            )
            .create_async()
            .await;

        let s = scraper().with_base_url(server.url());
        let hits = s.search(Region::Br, "9788525406552", 5).await.unwrap();
        mock.assert_async().await;
        assert_eq!(hits[0].asin, "8525406554");
    }

    #[tokio::test]
    async fn product_page_errors_propagate() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/dp/B000000000")
            .with_status(503)
            .create_async()
            .await;

        let s = scraper().with_base_url(server.url());
        let err = s.product(Region::Us, "B000000000").await.unwrap_err();
        assert!(matches!(err, EnrichError::ApiError(_, _)));
    }
}
