pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::{AppConfig, MatchingConfig, ProviderToggle};
pub use error::{ExitCode, Result, ShelfError};
pub use models::*;

pub use storage::{BookFilter, BookRepository, Database, SqliteBookRepository};
