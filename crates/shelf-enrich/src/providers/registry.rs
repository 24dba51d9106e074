use std::sync::Arc;
use std::time::Duration;

use shelf_core::AppConfig;
use tracing::info;

use super::{AmazonProvider, BookProvider, GoogleBooksProvider, OpenLibraryProvider};
use crate::error::Result;
use crate::http::RateLimiter;

/// Set of providers the orchestrator walks. Registration order breaks priority ties.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn BookProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Google Books, Open Library and Amazon, each with its own pacing.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let google = RateLimiter::new(Duration::from_millis(config.google_books.request_delay_ms));
        let open_library =
            RateLimiter::new(Duration::from_millis(config.open_library.request_delay_ms));
        let amazon = RateLimiter::new(Duration::from_millis(config.amazon.request_delay_ms));

        let mut registry = Self::new();
        registry.register(Arc::new(GoogleBooksProvider::from_config(config, google)?));
        registry.register(Arc::new(OpenLibraryProvider::from_config(config, open_library)?));
        registry.register(Arc::new(AmazonProvider::from_config(config, amazon)?));
        Ok(registry)
    }

    /// Adds a provider, replacing any with the same name.
    pub fn register(&mut self, provider: Arc<dyn BookProvider>) {
        let name = provider.name().to_string();
        self.providers.retain(|p| p.name() != name);
        info!(
            provider = %name,
            priority = provider.priority(),
            enabled = provider.is_enabled(),
            "registered provider"
        );
        self.providers.push(provider);
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn BookProvider>> {
        let idx = self.providers.iter().position(|p| p.name() == name)?;
        Some(self.providers.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BookProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Enabled providers, ascending priority.
    pub fn enabled(&self) -> Vec<Arc<dyn BookProvider>> {
        let mut enabled: Vec<_> = self
            .providers
            .iter()
            .filter(|p| p.is_enabled())
            .cloned()
            .collect();
        enabled.sort_by_key(|p| p.priority());
        enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{SearchOptions, SearchResult};
    use async_trait::async_trait;

    struct Stub {
        name: &'static str,
        priority: u32,
        enabled: bool,
    }

    #[async_trait]
    impl BookProvider for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn search(&self, _query: &str, _options: &SearchOptions) -> Result<SearchResult> {
            Ok(SearchResult::empty(self.name, "stub"))
        }
    }

    fn stub(name: &'static str, priority: u32, enabled: bool) -> Arc<dyn BookProvider> {
        Arc::new(Stub {
            name,
            priority,
            enabled,
        })
    }

    #[test]
    fn enabled_sorted_by_priority_stable() {
        let mut registry = ProviderRegistry::new();
        registry.register(stub("c", 2, true));
        registry.register(stub("a", 1, true));
        registry.register(stub("off", 0, false));
        registry.register(stub("b", 2, true));

        let order: Vec<String> = registry.enabled().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn register_replaces_and_remove() {
        let mut registry = ProviderRegistry::new();
        registry.register(stub("a", 5, true));
        registry.register(stub("a", 1, false));
        assert_eq!(registry.len(), 1);
        assert!(!registry.get("a").unwrap().is_enabled());

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn default_config_registers_all_three() {
        let registry = ProviderRegistry::from_config(&AppConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["google_books", "open_library", "amazon"]);
        let enabled: Vec<String> = registry.enabled().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(enabled, vec!["google_books", "open_library"]);
    }
}
