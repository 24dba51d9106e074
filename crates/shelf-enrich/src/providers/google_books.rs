use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use shelf_core::{AppConfig, ProviderToggle};
use tracing::debug;

use super::{BookProvider, BookRecord, SearchOptions, SearchResult};
use crate::error::{EnrichError, Result};
use crate::extract::google_books::{SOURCE, parse_volume, parse_volumes};
use crate::http::{RateLimitedClient, RateLimiter};
use crate::identifiers::{looks_like_isbn, strip_isbn};

const BASE_URL: &str = "https://www.googleapis.com/books/v1";

pub struct GoogleBooksProvider {
    client: RateLimitedClient,
    base_url: String,
    api_key: Option<String>,
    toggle: ProviderToggle,
}

impl GoogleBooksProvider {
    pub fn new(client: RateLimitedClient, toggle: ProviderToggle) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            api_key: None,
            toggle,
        }
    }

    pub fn from_config(config: &AppConfig, limiter: RateLimiter) -> Result<Self> {
        let client = RateLimitedClient::new(
            limiter,
            config.http.max_retries,
            &config.http.user_agent,
            Duration::from_secs(config.google_books.request_timeout_secs),
        )?;
        Ok(Self::new(client, config.providers.google_books).with_api_key(config.google_api_key()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| EnrichError::Parse(format!("invalid URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| EnrichError::Parse("invalid Google Books base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    /// `isbn:<digits>` for ISBN-looking input, the trimmed text otherwise.
    pub fn build_query(query: &str) -> String {
        if looks_like_isbn(query) {
            format!("isbn:{}", strip_isbn(query))
        } else {
            query.split_whitespace().collect::<Vec<_>>().join(" ")
        }
    }

    /// An ISBN already names one edition, so the language filter only applies
    /// to free-text queries.
    fn volumes_url(&self, query: &str, options: &SearchOptions) -> Result<Url> {
        let mut url = self.endpoint(&["volumes"])?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("q", &Self::build_query(query));
            qp.append_pair("maxResults", &options.max_results.clamp(1, 40).to_string());
            qp.append_pair("printType", "books");
            if !looks_like_isbn(query)
                && let Some(lang) = options.language.as_deref().filter(|l| !l.is_empty())
            {
                let primary = lang.split(['-', '_']).next().unwrap_or(lang);
                qp.append_pair("langRestrict", primary);
            }
        }
        Ok(url)
    }

    pub async fn search_volumes(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<(usize, Vec<BookRecord>)> {
        let url = self.volumes_url(query, options)?;
        debug!(provider = SOURCE, query, "searching volumes");
        let body = self.client.get(url.as_str()).await?;
        parse_volumes(&body)
    }

    pub async fn fetch_volume(&self, volume_id: &str) -> Result<BookRecord> {
        let url = self.endpoint(&["volumes", volume_id])?;
        let body = self.client.get(url.as_str()).await?;
        parse_volume(&body)
    }
}

#[async_trait]
impl BookProvider for GoogleBooksProvider {
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
        let (total, books) = self.search_volumes(query, options).await?;
        if books.is_empty() {
            return Ok(SearchResult::empty(SOURCE, format!("no volumes for '{query}'")));
        }
        Ok(SearchResult::found(SOURCE, books, total))
    }
}
