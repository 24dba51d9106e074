mod book_repository;
mod database;
mod schema;

pub use book_repository::{BookFilter, BookRepository, SqliteBookRepository};
pub use database::Database;
pub use schema::{SCHEMA_VERSION, init_schema, schema_version};
