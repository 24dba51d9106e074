use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ShelfError;

/// How much of a book's metadata has been filled in.
///
/// Ordered so that `Basic < Enhanced < Complete`; a book never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoQuality {
    #[default]
    Basic,
    Enhanced,
    Complete,
}

impl InfoQuality {
    /// Grades a book by how many enrichable fields are present.
    pub fn assess(book: &Book) -> Self {
        let filled = [
            has_text(&book.isbn),
            has_text(&book.authors),
            has_text(&book.description),
            has_text(&book.thumbnail),
            has_text(&book.publisher),
            book.page_count.is_some(),
            book.dimensions.as_ref().is_some_and(Dimensions::is_complete),
        ]
        .into_iter()
        .filter(|present| *present)
        .count();

        match filled {
            7 => Self::Complete,
            4..=6 => Self::Enhanced,
            _ => Self::Basic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Enhanced => "enhanced",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for InfoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InfoQuality {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "enhanced" => Ok(Self::Enhanced),
            "complete" => Ok(Self::Complete),
            other => Err(ShelfError::ValidationError(format!(
                "unknown info quality: {other}"
            ))),
        }
    }
}

/// Progress of the Amazon ASIN lookup for a book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsinStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AsinStatus {
    pub const ALL: [AsinStatus; 4] = [
        AsinStatus::Pending,
        AsinStatus::Processing,
        AsinStatus::Completed,
        AsinStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for AsinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AsinStatus {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ShelfError::ValidationError(format!(
                "unknown asin status: {other}"
            ))),
        }
    }
}

/// Physical size in millimeters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thickness_mm: Option<f64>,
}

impl Dimensions {
    pub fn is_complete(&self) -> bool {
        self.height_mm.is_some() && self.width_mm.is_some() && self.thickness_mm.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.height_mm.is_none() && self.width_mm.is_none() && self.thickness_mm.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Book {
    #[serde(default)]
    pub id: i64,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,

    /// Free text, usually a comma separated list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amazon_asin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    #[serde(default)]
    pub info_quality: InfoQuality,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub asin_status: AsinStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asin_processed_at: Option<DateTime<Utc>>,
}

impl Book {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn has_asin(&self) -> bool {
        has_text(&self.amazon_asin)
    }

    pub fn has_isbn(&self) -> bool {
        has_text(&self.isbn)
    }

    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }

    /// Stores an ASIN unless one is already present. Returns whether it was written.
    pub fn set_asin(&mut self, asin: impl Into<String>) -> bool {
        if self.has_asin() {
            return false;
        }
        let asin = asin.into();
        if asin.trim().is_empty() {
            return false;
        }
        self.amazon_asin = Some(asin.trim().to_string());
        true
    }

    pub fn mark_asin(&mut self, status: AsinStatus) {
        self.asin_status = status;
        if status.is_terminal() {
            self.asin_processed_at = Some(Utc::now());
        }
    }

    /// Recomputes quality from the current fields, never lowering it.
    pub fn refresh_info_quality(&mut self) -> InfoQuality {
        let assessed = InfoQuality::assess(self);
        if assessed > self.info_quality {
            self.info_quality = assessed;
        }
        self.info_quality
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_book() -> Book {
        Book {
            isbn: Some("9788525406552".to_string()),
            authors: Some("Machado de Assis".to_string()),
            description: Some("Bentinho e Capitu".to_string()),
            thumbnail: Some("https://example.com/c.jpg".to_string()),
            publisher: Some("Globo".to_string()),
            page_count: Some(256),
            dimensions: Some(Dimensions {
                height_mm: Some(210.0),
                width_mm: Some(140.0),
                thickness_mm: Some(15.0),
            }),
            ..Book::new("Dom Casmurro")
        }
    }

    #[test]
    fn test_assess_grades() {
        assert_eq!(InfoQuality::assess(&Book::new("x")), InfoQuality::Basic);
        assert_eq!(InfoQuality::assess(&full_book()), InfoQuality::Complete);

        let mut partial = full_book();
        partial.dimensions = None;
        partial.page_count = None;
        assert_eq!(InfoQuality::assess(&partial), InfoQuality::Enhanced);
    }

    #[test]
    fn test_info_quality_never_regresses() {
        let mut book = full_book();
        assert_eq!(book.refresh_info_quality(), InfoQuality::Complete);

        book.description = None;
        book.thumbnail = None;
        book.publisher = None;
        assert_eq!(book.refresh_info_quality(), InfoQuality::Complete);
    }

    #[test]
    fn test_set_asin_keeps_existing_value() {
        let mut book = Book::new("1984");
        assert!(book.set_asin("B000FA5ZEG"));
        assert!(!book.set_asin("0451524934"));
        assert_eq!(book.amazon_asin.as_deref(), Some("B000FA5ZEG"));
    }

    #[test]
    fn test_mark_terminal_status_sets_timestamp() {
        let mut book = Book::new("1984");
        book.mark_asin(AsinStatus::Processing);
        assert!(book.asin_processed_at.is_none());
        book.mark_asin(AsinStatus::Failed);
        assert!(book.asin_processed_at.is_some());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in AsinStatus::ALL {
            assert_eq!(status.as_str().parse::<AsinStatus>().unwrap(), status);
        }
        assert!("done".parse::<AsinStatus>().is_err());
    }

    #[test]
    fn test_book_json_defaults() {
        let book: Book = serde_json::from_str(r#"{"title":"Dom Casmurro","language":"pt-BR"}"#).unwrap();
        assert_eq!(book.asin_status, AsinStatus::Pending);
        assert_eq!(book.info_quality, InfoQuality::Basic);
        assert_eq!(book.language.as_deref(), Some("pt-BR"));
    }
}
