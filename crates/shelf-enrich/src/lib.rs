//! Shelf enrichment: matching, scraping and multi-source search for book metadata.

pub mod error;
pub mod http;
pub mod cache;
pub mod identifiers;
pub mod region;
pub mod matching;
pub mod extract;
pub mod providers;
pub mod search;
pub mod amazon;
pub mod enrichment;
pub mod links;

pub use error::{EnrichError, Result};
pub use cache::{Cache, DiskCache, MemoryCache};
pub use http::{RateLimitedClient, RateLimiter};
pub use links::{LinkBuilder, LinkInput, build_link};
pub use matching::MatchThresholds;
pub use region::{Region, RegionConfig, RegionResolver};
pub use search::MultiSourceSearch;
