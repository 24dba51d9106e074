//! Multi-source search: providers in priority order, first hit wins, both
//! outcomes cached.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shelf_core::AppConfig;
use tracing::{debug, info, warn};

use crate::cache::{Cache, get_typed, put_typed};
use crate::identifiers::{looks_like_isbn, strip_isbn};
use crate::providers::{ProviderRegistry, SearchOptions, SearchResult};

const SUCCESS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const FAILURE_TTL: Duration = Duration::from_secs(60 * 60);

/// Collapses whitespace; ISBN-looking input becomes its bare digits.
pub fn normalize_query(query: &str) -> String {
    if looks_like_isbn(query) {
        return strip_isbn(query);
    }
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn cache_key(normalized: &str, options: &SearchOptions) -> String {
    let mut hasher = DefaultHasher::new();
    options.hash(&mut hasher);
    format!("multi_search:{normalized}:{:016x}", hasher.finish())
}

fn suggestions(normalized: &str) -> Vec<String> {
    let mut out = Vec::new();
    if looks_like_isbn(normalized) {
        out.push("Search by title instead of ISBN".to_string());
        out.push("Check the ISBN for typos".to_string());
    } else {
        out.push("Check the spelling of the title".to_string());
        out.push("Try fewer words, or add the author's name".to_string());
    }
    out.push("Try again later; some sources may be temporarily unavailable".to_string());
    out
}

pub struct MultiSourceSearch {
    registry: ProviderRegistry,
    cache: Arc<dyn Cache>,
    success_ttl: Duration,
    failure_ttl: Duration,
}

impl MultiSourceSearch {
    pub fn new(registry: ProviderRegistry, cache: Arc<dyn Cache>) -> Self {
        Self {
            registry,
            cache,
            success_ttl: SUCCESS_TTL,
            failure_ttl: FAILURE_TTL,
        }
    }

    pub fn from_config(config: &AppConfig, registry: ProviderRegistry, cache: Arc<dyn Cache>) -> Self {
        Self::new(registry, cache).with_ttls(
            Duration::from_secs(config.search.success_ttl_secs),
            Duration::from_secs(config.search.failure_ttl_secs),
        )
    }

    pub fn with_ttls(mut self, success: Duration, failure: Duration) -> Self {
        self.success_ttl = success;
        self.failure_ttl = failure;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> SearchResult {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return SearchResult::failure("empty query");
        }

        let key = cache_key(&normalized, options);
        if let Some(cached) = get_typed::<SearchResult>(self.cache.as_ref(), &key).await {
            debug!(query = %normalized, success = cached.success, "search served from cache");
            return cached;
        }
        self.search_uncached(&normalized, &key, options).await
    }

    /// Skips the cache lookup but still stores the outcome.
    pub async fn refresh(&self, query: &str, options: &SearchOptions) -> SearchResult {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return SearchResult::failure("empty query");
        }
        let key = cache_key(&normalized, options);
        self.search_uncached(&normalized, &key, options).await
    }

    async fn search_uncached(&self, normalized: &str, key: &str, options: &SearchOptions) -> SearchResult {
        let mut tried = Vec::new();
        for provider in self.registry.enabled() {
            let name = provider.name().to_string();
            tried.push(name.clone());
            let started = Instant::now();
            match provider.search(normalized, options).await {
                Ok(result) if result.has_results() => {
                    info!(
                        provider = %name,
                        total_found = result.total_found,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "search hit"
                    );
                    let result = SearchResult {
                        providers_tried: tried,
                        ..result
                    };
                    put_typed(self.cache.as_ref(), key, &result, self.success_ttl).await;
                    return result;
                }
                Ok(result) => debug!(
                    provider = %name,
                    message = %result.message,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "no results"
                ),
                Err(e) => warn!(
                    provider = %name,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "provider failed"
                ),
            }
        }

        let message = if tried.is_empty() {
            "no search providers are enabled".to_string()
        } else {
            format!("no results for '{normalized}' from {}", tried.join(", "))
        };
        let failure = SearchResult {
            providers_tried: tried,
            suggestions: suggestions(normalized),
            ..SearchResult::failure(message)
        };
        put_typed(self.cache.as_ref(), key, &failure, self.failure_ttl).await;
        failure
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::{EnrichError, Result};
    use crate::providers::{BookProvider, BookRecord};

    enum Outcome {
        Empty,
        Found(usize),
        Fail,
    }

    struct Scripted {
        name: &'static str,
        priority: u32,
        outcome: Outcome,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, priority: u32, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                name,
                priority,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BookProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn search(&self, query: &str, _options: &SearchOptions) -> Result<SearchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Empty => Ok(SearchResult::empty(self.name, "nothing")),
                Outcome::Found(n) => {
                    let books = (0..n)
                        .map(|i| BookRecord {
                            title: format!("{query} {i}"),
                            source: self.name.to_string(),
                            ..Default::default()
                        })
                        .collect();
                    Ok(SearchResult::found(self.name, books, n))
                }
                Outcome::Fail => Err(EnrichError::SourceUnavailable(self.name.to_string())),
            }
        }
    }

    /// Records the TTL of every write.
    #[derive(Default)]
    struct TtlSpy {
        inner: MemoryCache,
        puts: Mutex<Vec<(String, Duration)>>,
    }

    #[async_trait]
    impl Cache for TtlSpy {
        async fn get(&self, key: &str) -> Option<Value> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Value, ttl: Duration) {
            self.puts.lock().await.push((key.to_string(), ttl));
            self.inner.put(key, value, ttl).await;
        }

        async fn flush(&self) -> Result<usize> {
            self.inner.flush().await
        }
    }

    #[test]
    fn query_normalization() {
        assert_eq!(normalize_query("  dom \t casmurro "), "dom casmurro");
        assert_eq!(normalize_query("978-85-254-0655-2"), "9788525406552");
        assert_eq!(normalize_query("0-8044-2957-x"), "080442957X");

        let a = cache_key("dom casmurro", &SearchOptions::default());
        let b = cache_key(
            "dom casmurro",
            &SearchOptions {
                max_results: 3,
                language: None,
            },
        );
        assert!(a.starts_with("multi_search:dom casmurro:"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn first_provider_with_results_wins() {
        let google = Scripted::new("google_books", 1, Outcome::Empty);
        let open_library = Scripted::new("open_library", 2, Outcome::Found(3));
        let amazon = Scripted::new("amazon", 3, Outcome::Found(1));

        let mut registry = ProviderRegistry::new();
        registry.register(amazon.clone());
        registry.register(open_library.clone());
        registry.register(google.clone());

        let cache = Arc::new(TtlSpy::default());
        let search = MultiSourceSearch::new(registry, cache.clone());
        let options = SearchOptions::default();

        let result = search.search("Dom Casmurro", &options).await;
        assert_eq!(result.provider_name, "open_library");
        assert_eq!(result.total_found, 3);
        assert_eq!(result.providers_tried, vec!["google_books", "open_library"]);
        assert_eq!(amazon.calls.load(Ordering::SeqCst), 0);

        let puts = cache.puts.lock().await.clone();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].1, SUCCESS_TTL);

        let again = search.search("Dom   Casmurro", &options).await;
        assert_eq!(again, result);
        assert_eq!(open_library.calls.load(Ordering::SeqCst), 1);
        assert_eq!(google.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_logged_and_cached_short() {
        let mut registry = ProviderRegistry::new();
        registry.register(Scripted::new("google_books", 1, Outcome::Fail));
        registry.register(Scripted::new("open_library", 2, Outcome::Empty));

        let cache = Arc::new(TtlSpy::default());
        let search = MultiSourceSearch::new(registry, cache.clone());
        let result = search.search("9788525406552", &SearchOptions::default()).await;

        assert!(!result.success);
        assert_eq!(result.providers_tried, vec!["google_books", "open_library"]);
        assert!(result.suggestions.iter().any(|s| s.contains("title instead of ISBN")));

        let puts = cache.puts.lock().await.clone();
        assert_eq!(puts, vec![(cache_key("9788525406552", &SearchOptions::default()), FAILURE_TTL)]);

        let cached = search.search("978-85-254-0655-2", &SearchOptions::default()).await;
        assert_eq!(cached, result);
    }

    #[tokio::test]
    async fn refresh_bypasses_cache() {
        let provider = Scripted::new("google_books", 1, Outcome::Found(1));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let search = MultiSourceSearch::new(registry, Arc::new(MemoryCache::new()));

        search.search("dune", &SearchOptions::default()).await;
        search.search("dune", &SearchOptions::default()).await;
        search.refresh("dune", &SearchOptions::default()).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_providers_and_empty_query() {
        let search = MultiSourceSearch::new(ProviderRegistry::new(), Arc::new(MemoryCache::new()));
        let result = search.search("dune", &SearchOptions::default()).await;
        assert!(!result.success);
        assert!(result.providers_tried.is_empty());

        let result = search.search("   ", &SearchOptions::default()).await;
        assert_eq!(result.message, "empty query");
    }
}
