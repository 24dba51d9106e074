//! Book metadata providers and the contract the orchestrator relies on.

pub mod amazon;
pub mod google_books;
pub mod open_library;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_core::{Book, Dimensions};

use crate::error::Result;

pub use amazon::{AmazonProvider, NoProductApi, ProductApi};
pub use google_books::GoogleBooksProvider;
pub use open_library::OpenLibraryProvider;
pub use registry::ProviderRegistry;

/// A search backend. Lower `priority` runs first.
#[async_trait]
pub trait BookProvider: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> u32;

    fn is_enabled(&self) -> bool;

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchOptions {
    pub max_results: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            language: None,
        }
    }
}

/// Metadata for one book as a provider reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amazon_asin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_library_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    pub source: String,
}

impl BookRecord {
    pub fn authors_joined(&self) -> Option<String> {
        (!self.authors.is_empty()).then(|| self.authors.join(", "))
    }

    /// A new, unsaved book built from this record.
    pub fn to_book(&self) -> Book {
        let mut book = Book {
            subtitle: self.subtitle.clone(),
            authors: self.authors_joined(),
            isbn: self.isbn.clone(),
            google_id: self.google_id.clone(),
            amazon_asin: self.amazon_asin.clone(),
            language: self.language.clone(),
            publisher: self.publisher.clone(),
            page_count: self.page_count,
            dimensions: self.dimensions,
            description: self.description.clone(),
            thumbnail: self.thumbnail.clone(),
            ..Book::new(self.title.clone())
        };
        book.refresh_info_quality();
        book
    }
}

/// Uniform provider answer. Also what the orchestrator caches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub success: bool,
    pub provider_name: String,
    pub books: Vec<BookRecord>,
    pub total_found: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers_tried: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl SearchResult {
    pub fn found(provider: &str, books: Vec<BookRecord>, total_found: usize) -> Self {
        let message = format!("{} result(s) from {provider}", books.len());
        Self {
            success: true,
            provider_name: provider.to_string(),
            total_found: total_found.max(books.len()),
            books,
            message,
            ..Default::default()
        }
    }

    /// The provider answered but had nothing.
    pub fn empty(provider: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_name: provider.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn has_results(&self) -> bool {
        self.success && self.total_found > 0
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}
