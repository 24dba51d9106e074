use rusqlite::Connection;

use crate::error::{Result, ShelfError};

pub const SCHEMA_VERSION: u32 = 1;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;
    Ok(())
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS books (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            title             TEXT NOT NULL,
            subtitle          TEXT,
            authors           TEXT,
            isbn              TEXT,
            google_id         TEXT,
            amazon_asin       TEXT,
            language          TEXT,
            publisher         TEXT,
            page_count        INTEGER,
            height_mm         REAL,
            width_mm          REAL,
            thickness_mm      REAL,
            description       TEXT,
            thumbnail         TEXT,
            info_quality      TEXT NOT NULL DEFAULT 'basic',
            enriched_at       TEXT,
            asin_status       TEXT NOT NULL DEFAULT 'pending',
            asin_processed_at TEXT
        );
        ",
    )?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_books_isbn        ON books(isbn);
        CREATE INDEX IF NOT EXISTS idx_books_asin        ON books(amazon_asin);
        CREATE INDEX IF NOT EXISTS idx_books_asin_status ON books(asin_status);
        ",
    )?;
    Ok(())
}

/// Stored in `PRAGMA user_version`; 0 means a fresh file.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Creates missing tables and stamps the version. A file written by a newer
/// schema is refused rather than silently misread.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(ShelfError::ConfigError(format!(
            "database schema version {found} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    create_tables(conn)?;
    create_indexes(conn)?;
    if found < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}
