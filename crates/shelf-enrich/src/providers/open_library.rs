use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use shelf_core::{AppConfig, ProviderToggle};

use super::{BookProvider, BookRecord, SearchOptions, SearchResult, non_blank};
use crate::error::{EnrichError, Result};
use crate::http::{RateLimitedClient, RateLimiter};
use crate::identifiers::{looks_like_isbn, strip_isbn};

const BASE_URL: &str = "https://openlibrary.org";
const SOURCE: &str = "open_library";

fn string_list(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str).or_else(|| item.as_str()))
                .filter_map(|s| non_blank(Some(s)))
                .collect()
        })
        .unwrap_or_default()
}

fn first_isbn(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        v.get(*key)
            .and_then(Value::as_array)
            .and_then(|arr| arr.iter().filter_map(Value::as_str).map(strip_isbn).find(|s| !s.is_empty()))
    })
}

/// Record from an `/api/books?jscmd=data` entry.
pub fn record_from_data(v: &Value, isbn: &str) -> BookRecord {
    let thumbnail = v
        .get("cover")
        .and_then(|cover| cover.get("large").or_else(|| cover.get("medium")))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    BookRecord {
        title: v.get("title").and_then(Value::as_str).unwrap_or_default().trim().to_string(),
        subtitle: non_blank(v.get("subtitle").and_then(Value::as_str)),
        authors: string_list(v, "authors"),
        isbn: v
            .get("identifiers")
            .and_then(|ids| first_isbn(ids, &["isbn_13", "isbn_10"]))
            .or_else(|| Some(isbn.to_string())),
        open_library_key: non_blank(v.get("key").and_then(Value::as_str)),
        publisher: string_list(v, "publishers").into_iter().next(),
        published_date: non_blank(v.get("publish_date").and_then(Value::as_str)),
        page_count: v
            .get("number_of_pages")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
        thumbnail,
        source: SOURCE.to_string(),
        ..Default::default()
    }
}

/// Record from a `/search.json` doc.
pub fn record_from_doc(v: &Value) -> BookRecord {
    BookRecord {
        title: v.get("title").and_then(Value::as_str).unwrap_or_default().trim().to_string(),
        subtitle: non_blank(v.get("subtitle").and_then(Value::as_str)),
        authors: string_list(v, "author_name"),
        isbn: first_isbn(v, &["isbn"]),
        open_library_key: non_blank(v.get("key").and_then(Value::as_str)),
        publisher: string_list(v, "publisher").into_iter().next(),
        published_date: v
            .get("first_publish_year")
            .and_then(Value::as_i64)
            .map(|year| year.to_string()),
        page_count: v
            .get("number_of_pages_median")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
        language: v
            .get("language")
            .and_then(Value::as_array)
            .and_then(|langs| langs.first())
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        thumbnail: v
            .get("cover_i")
            .and_then(Value::as_i64)
            .map(|id| format!("https://covers.openlibrary.org/b/id/{id}-L.jpg")),
        source: SOURCE.to_string(),
        ..Default::default()
    }
}

pub struct OpenLibraryProvider {
    client: RateLimitedClient,
    base_url: String,
    toggle: ProviderToggle,
}

impl OpenLibraryProvider {
    pub fn new(client: RateLimitedClient, toggle: ProviderToggle) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            toggle,
        }
    }

    pub fn from_config(config: &AppConfig, limiter: RateLimiter) -> Result<Self> {
        let client = RateLimitedClient::new(
            limiter,
            config.http.max_retries,
            &config.http.user_agent,
            Duration::from_secs(config.open_library.request_timeout_secs),
        )?;
        Ok(Self::new(client, config.providers.open_library))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| EnrichError::Parse(format!("invalid URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| EnrichError::Parse("invalid Open Library base URL".to_string()))?
            .pop_if_empty()
            .extend(path.split('/'));
        Ok(url)
    }

    async fn fetch_json(&self, url: &Url) -> Result<Value> {
        let body = self.client.get(url.as_str()).await?;
        serde_json::from_str(&body).map_err(|e| EnrichError::Parse(e.to_string()))
    }

    pub async fn lookup_isbn(&self, isbn: &str) -> Result<Vec<BookRecord>> {
        let isbn = strip_isbn(isbn);
        let bibkey = format!("ISBN:{isbn}");
        let mut url = self.endpoint("api/books")?;
        url.query_pairs_mut()
            .append_pair("bibkeys", &bibkey)
            .append_pair("format", "json")
            .append_pair("jscmd", "data");

        let json = self.fetch_json(&url).await?;
        Ok(json
            .get(&bibkey)
            .map(|data| record_from_data(data, &isbn))
            .filter(|r| !r.title.is_empty())
            .into_iter()
            .collect())
    }

    pub async fn search_text(&self, query: &str, limit: u32) -> Result<(usize, Vec<BookRecord>)> {
        let mut url = self.endpoint("search.json")?;
        url.query_pairs_mut()
            .append_pair("q", query.trim())
            .append_pair("limit", &limit.clamp(1, 100).to_string());

        let json = self.fetch_json(&url).await?;
        let docs: Vec<BookRecord> = json
            .get("docs")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(record_from_doc).filter(|r| !r.title.is_empty()).collect())
            .unwrap_or_default();
        let total = json
            .get("numFound")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(docs.len());
        Ok((total, docs))
    }
}

#[async_trait]
impl BookProvider for OpenLibraryProvider {
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
        let (total, books) = if looks_like_isbn(query) {
            let books = self.lookup_isbn(query).await?;
            (books.len(), books)
        } else {
            self.search_text(query, options.max_results).await?
        };
        if books.is_empty() {
            return Ok(SearchResult::empty(SOURCE, format!("nothing found for '{query}'")));
        }
        Ok(SearchResult::found(SOURCE, books, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn provider_for(server: &Server) -> OpenLibraryProvider {
        let client = RateLimitedClient::new(
            RateLimiter::unlimited(),
            0,
            "shelf-test",
            Duration::from_secs(5),
        )
        .unwrap();
        OpenLibraryProvider::new(client, ProviderToggle::default()).with_base_url(server.url())
    }

    #[test]
    fn parses_search_doc() {
        let doc = json!({
            "title": "Dom Casmurro",
            "author_name": ["Machado de Assis"],
            "publisher": ["Garnier"],
            "first_publish_year": 1899,
            "isbn": ["8525406554", "9788525406552"],
            "cover_i": 12345,
            "key": "/works/OL123W"
        });
        let r = record_from_doc(&doc);
        assert_eq!(r.authors, vec!["Machado de Assis"]);
        assert_eq!(r.isbn.as_deref(), Some("8525406554"));
        assert_eq!(r.published_date.as_deref(), Some("1899"));
        assert_eq!(
            r.thumbnail.as_deref(),
            Some("https://covers.openlibrary.org/b/id/12345-L.jpg")
        );
    }

    #[tokio::test]
    async fn isbn_query_uses_books_api() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/books")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("bibkeys".into(), "ISBN:9788525406552".into()),
                Matcher::UrlEncoded("jscmd".into(), "data".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "ISBN:9788525406552": {
                        "title": "Dom Casmurro",
                        "authors": [{"name": "Machado de Assis"}],
                        "publishers": [{"name": "Penguin-Companhia"}],
                        "number_of_pages": 256,
                        "identifiers": {"isbn_13": ["9788525406552"]}
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let result = provider_for(&server)
            .search("978-85-254-0655-2", &SearchOptions::default())
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(result.has_results());
        assert_eq!(result.books[0].publisher.as_deref(), Some("Penguin-Companhia"));
        assert_eq!(result.books[0].page_count, Some(256));
    }

    #[tokio::test]
    async fn text_query_uses_search_json() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/search.json")
            .match_query(Matcher::UrlEncoded("q".into(), "dom casmurro".into()))
            .with_status(200)
            .with_body(
                json!({
                    "numFound": 3,
                    "docs": [
                        {"title": "Dom Casmurro", "author_name": ["Machado de Assis"]},
                        {"title": "Dom Casmurro (Edição Especial)"},
                        {"title": "Dom Casmurro e outros"}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let result = provider_for(&server)
            .search("dom casmurro", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(result.total_found, 3);
        assert_eq!(result.books.len(), 3);
    }

    #[tokio::test]
    async fn unknown_isbn_is_empty_success() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/books")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let result = provider_for(&server)
            .search("9780306406157", &SearchOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.total_found, 0);
    }

    #[tokio::test]
    async fn from_config_uses_shared_http_settings() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/books")
            .match_query(Matcher::Any)
            .match_header("user-agent", "shelf-ol-test/2")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let mut config = AppConfig::default();
        config.http.user_agent = "shelf-ol-test/2".into();
        config.http.max_retries = 0;
        let provider = OpenLibraryProvider::from_config(&config, RateLimiter::unlimited())
            .unwrap()
            .with_base_url(server.url());
        provider
            .search("9780306406157", &SearchOptions::default())
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
