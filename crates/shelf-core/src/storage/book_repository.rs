use std::collections::HashMap;
use std::str::FromStr;
use std::sync::MutexGuard;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter, types::Value};

use crate::error::{Result, ShelfError};
use crate::models::{AsinStatus, Book, Dimensions, InfoQuality};

const BOOK_COLUMNS: &str = "id, title, subtitle, authors, isbn, google_id, amazon_asin, language,
     publisher, page_count, height_mm, width_mm, thickness_mm, description, thumbnail,
     info_quality, enriched_at, asin_status, asin_processed_at";

/// Which books a batch command should walk.
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub ids: Vec<i64>,
    pub asin_status: Option<AsinStatus>,
    pub missing_asin: bool,
    pub limit: Option<usize>,
}

impl BookFilter {
    pub fn by_ids(ids: Vec<i64>) -> Self {
        Self {
            ids,
            ..Default::default()
        }
    }
}

pub trait BookRepository {
    fn insert(&self, book: &Book) -> Result<i64>;
    fn find_by_id(&self, id: i64) -> Result<Option<Book>>;
    fn save(&self, book: &Book) -> Result<()>;
    fn list(&self, filter: &BookFilter) -> Result<Vec<Book>>;
    fn count_by_status(&self) -> Result<HashMap<AsinStatus, usize>>;
    fn count_by_quality(&self) -> Result<HashMap<InfoQuality, usize>>;
}

pub struct SqliteBookRepository<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> SqliteBookRepository<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    fn row_to_book(row: &Row) -> rusqlite::Result<Book> {
        let quality: String = row.get(15)?;
        let status: String = row.get(17)?;
        let dimensions = Dimensions {
            height_mm: row.get(10)?,
            width_mm: row.get(11)?,
            thickness_mm: row.get(12)?,
        };

        Ok(Book {
            id: row.get(0)?,
            title: row.get(1)?,
            subtitle: row.get(2)?,
            authors: row.get(3)?,
            isbn: row.get(4)?,
            google_id: row.get(5)?,
            amazon_asin: row.get(6)?,
            language: row.get(7)?,
            publisher: row.get(8)?,
            page_count: row.get(9)?,
            dimensions: (!dimensions.is_empty()).then_some(dimensions),
            description: row.get(13)?,
            thumbnail: row.get(14)?,
            info_quality: InfoQuality::from_str(&quality).unwrap_or_default(),
            enriched_at: parse_timestamp(row.get(16)?),
            asin_status: AsinStatus::from_str(&status).unwrap_or_default(),
            asin_processed_at: parse_timestamp(row.get(18)?),
        })
    }
}

impl BookRepository for SqliteBookRepository<'_> {
    fn insert(&self, book: &Book) -> Result<i64> {
        let dims = book.dimensions.unwrap_or_default();
        self.conn.execute(
            "INSERT INTO books
                (title, subtitle, authors, isbn, google_id, amazon_asin, language, publisher,
                 page_count, height_mm, width_mm, thickness_mm, description, thumbnail,
                 info_quality, enriched_at, asin_status, asin_processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                book.title,
                book.subtitle,
                book.authors,
                book.isbn,
                book.google_id,
                book.amazon_asin,
                book.language,
                book.publisher,
                book.page_count,
                dims.height_mm,
                dims.width_mm,
                dims.thickness_mm,
                book.description,
                book.thumbnail,
                book.info_quality.as_str(),
                book.enriched_at.map(|t| t.to_rfc3339()),
                book.asin_status.as_str(),
                book.asin_processed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Book>> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1");
        let book = self
            .conn
            .query_row(&sql, params![id], Self::row_to_book)
            .optional()?;
        Ok(book)
    }

    fn save(&self, book: &Book) -> Result<()> {
        let dims = book.dimensions.unwrap_or_default();
        let updated = self.conn.execute(
            "UPDATE books SET
                title = ?2, subtitle = ?3, authors = ?4, isbn = ?5, google_id = ?6,
                amazon_asin = ?7, language = ?8, publisher = ?9, page_count = ?10,
                height_mm = ?11, width_mm = ?12, thickness_mm = ?13, description = ?14,
                thumbnail = ?15, info_quality = ?16, enriched_at = ?17, asin_status = ?18,
                asin_processed_at = ?19
             WHERE id = ?1",
            params![
                book.id,
                book.title,
                book.subtitle,
                book.authors,
                book.isbn,
                book.google_id,
                book.amazon_asin,
                book.language,
                book.publisher,
                book.page_count,
                dims.height_mm,
                dims.width_mm,
                dims.thickness_mm,
                book.description,
                book.thumbnail,
                book.info_quality.as_str(),
                book.enriched_at.map(|t| t.to_rfc3339()),
                book.asin_status.as_str(),
                book.asin_processed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        if updated == 0 {
            return Err(ShelfError::BookNotFound(book.id));
        }
        Ok(())
    }

    fn list(&self, filter: &BookFilter) -> Result<Vec<Book>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !filter.ids.is_empty() {
            let placeholders = vec!["?"; filter.ids.len()].join(", ");
            clauses.push(format!("id IN ({placeholders})"));
            values.extend(filter.ids.iter().map(|id| Value::Integer(*id)));
        }
        if let Some(status) = filter.asin_status {
            clauses.push("asin_status = ?".to_string());
            values.push(Value::Text(status.as_str().to_string()));
        }
        if filter.missing_asin {
            clauses.push("(amazon_asin IS NULL OR TRIM(amazon_asin) = '')".to_string());
        }

        let mut sql = format!("SELECT {BOOK_COLUMNS} FROM books");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), Self::row_to_book)?;
        let mut books = Vec::new();
        for row in rows {
            books.push(row?);
        }
        Ok(books)
    }

    fn count_by_status(&self) -> Result<HashMap<AsinStatus, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT asin_status, COUNT(*) FROM books GROUP BY asin_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            let status = AsinStatus::from_str(&status).unwrap_or_default();
            *counts.entry(status).or_insert(0) += count as usize;
        }
        Ok(counts)
    }

    fn count_by_quality(&self) -> Result<HashMap<InfoQuality, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT info_quality, COUNT(*) FROM books GROUP BY info_quality")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (quality, count) = row?;
            let quality = InfoQuality::from_str(&quality).unwrap_or_default();
            *counts.entry(quality).or_insert(0) += count as usize;
        }
        Ok(counts)
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}
