use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("invalid ISBN: {0}")]
    InvalidIsbn(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error from {0}: {1}")]
    ApiError(String, String),

    #[error("rate limit from {0}, retry after {1}s")]
    RateLimit(String, u64),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Store(#[from] shelf_core::ShelfError),
}

pub type Result<T> = std::result::Result<T, EnrichError>;
