//! Matching books to Amazon products and filling their metadata from the
//! product page.

pub mod product_api;
pub mod scraper;
pub mod validation;
pub mod workflow;

pub use product_api::{NoProductApi, PaApiClient, PaApiCredentials, ProductApi, product_api_from_config};
pub use scraper::AmazonScraper;
pub use validation::{MatchEvidence, Rejection, passes_prefilter, validate_candidate};
pub use workflow::{AmazonEnrichment, AmazonOutcome, AmazonRun};
