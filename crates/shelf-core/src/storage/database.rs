use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, warn};

use super::book_repository::{BookFilter, BookRepository, SqliteBookRepository};
use super::schema::{apply_pragmas, init_schema};
use crate::error::{Result, ShelfError};
use crate::models::{AsinStatus, Book, InfoQuality};

/// Durable book store. One connection, serialized behind a mutex.
pub struct Database {
    path: Option<String>,
    connection: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        init_schema(&conn)?;
        debug!(path = %path.display(), "database opened");
        Ok(Self {
            path: Some(path.to_string_lossy().to_string()),
            connection: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            path: None,
            connection: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn repo(&self) -> SqliteBookRepository<'_> {
        SqliteBookRepository::new(self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("database lock poisoned, reusing connection");
                poisoned.into_inner()
            }
        }
    }

    pub fn insert_book(&self, book: &Book) -> Result<i64> {
        self.repo().insert(book)
    }

    pub fn get_book(&self, id: i64) -> Result<Book> {
        self.repo()
            .find_by_id(id)?
            .ok_or(ShelfError::BookNotFound(id))
    }

    pub fn find_book(&self, id: i64) -> Result<Option<Book>> {
        self.repo().find_by_id(id)
    }

    pub fn save_book(&self, book: &Book) -> Result<()> {
        self.repo().save(book)
    }

    pub fn list_books(&self, filter: &BookFilter) -> Result<Vec<Book>> {
        self.repo().list(filter)
    }

    pub fn count_by_status(&self) -> Result<HashMap<AsinStatus, usize>> {
        self.repo().count_by_status()
    }

    pub fn count_by_quality(&self) -> Result<HashMap<InfoQuality, usize>> {
        self.repo().count_by_quality()
    }

    /// Writes only the ASIN bookkeeping columns.
    pub fn set_asin_status(&self, id: i64, status: AsinStatus) -> Result<Book> {
        let mut book = self.get_book(id)?;
        book.mark_asin(status);
        self.save_book(&book)?;
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dimensions;
    use tempfile::TempDir;

    fn sample(title: &str) -> Book {
        Book {
            authors: Some("Machado de Assis".to_string()),
            isbn: Some("9788525406552".to_string()),
            language: Some("pt-BR".to_string()),
            ..Book::new(title)
        }
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let mut book = sample("Dom Casmurro");
        book.dimensions = Some(Dimensions {
            height_mm: Some(210.0),
            width_mm: Some(140.0),
            thickness_mm: None,
        });
        let id = db.insert_book(&book).unwrap();

        let loaded = db.get_book(id).unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.title, "Dom Casmurro");
        assert_eq!(loaded.isbn.as_deref(), Some("9788525406552"));
        assert_eq!(loaded.asin_status, AsinStatus::Pending);
        assert_eq!(loaded.dimensions.unwrap().width_mm, Some(140.0));
        assert!(loaded.dimensions.unwrap().thickness_mm.is_none());
    }

    #[test]
    fn test_get_missing_book_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_book(42), Err(ShelfError::BookNotFound(42))));
        assert!(db.find_book(42).unwrap().is_none());
    }

    #[test]
    fn test_save_updates_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_book(&sample("Dom Casmurro")).unwrap();

        let mut book = db.get_book(id).unwrap();
        book.set_asin("8525406554");
        book.mark_asin(AsinStatus::Completed);
        db.save_book(&book).unwrap();

        let loaded = db.get_book(id).unwrap();
        assert_eq!(loaded.amazon_asin.as_deref(), Some("8525406554"));
        assert_eq!(loaded.asin_status, AsinStatus::Completed);
        assert!(loaded.asin_processed_at.is_some());
    }

    #[test]
    fn test_save_without_row_fails() {
        let db = Database::open_in_memory().unwrap();
        let mut book = sample("Ghost");
        book.id = 99;
        assert!(matches!(db.save_book(&book), Err(ShelfError::BookNotFound(99))));
    }

    #[test]
    fn test_list_filters() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_book(&sample("A")).unwrap();
        let mut with_asin = sample("B");
        with_asin.amazon_asin = Some("B000000001".to_string());
        with_asin.asin_status = AsinStatus::Completed;
        let b = db.insert_book(&with_asin).unwrap();
        let c = db.insert_book(&sample("C")).unwrap();

        let missing = db
            .list_books(&BookFilter {
                missing_asin: true,
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<i64> = missing.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![a, c]);

        let completed = db
            .list_books(&BookFilter {
                asin_status: Some(AsinStatus::Completed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, b);

        let limited = db
            .list_books(&BookFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);

        let by_id = db.list_books(&BookFilter::by_ids(vec![c])).unwrap();
        assert_eq!(by_id[0].title, "C");
    }

    #[test]
    fn test_counts() {
        let db = Database::open_in_memory().unwrap();
        db.insert_book(&sample("A")).unwrap();
        let id = db.insert_book(&sample("B")).unwrap();
        db.set_asin_status(id, AsinStatus::Failed).unwrap();

        let counts = db.count_by_status().unwrap();
        assert_eq!(counts.get(&AsinStatus::Pending), Some(&1));
        assert_eq!(counts.get(&AsinStatus::Failed), Some(&1));

        let quality = db.count_by_quality().unwrap();
        assert_eq!(quality.get(&InfoQuality::Basic), Some(&2));
    }

    #[test]
    fn test_open_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("shelf.db");
        let id = {
            let db = Database::open(&path).unwrap();
            db.insert_book(&sample("Persisted")).unwrap()
        };
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_book(id).unwrap().title, "Persisted");
    }
}
