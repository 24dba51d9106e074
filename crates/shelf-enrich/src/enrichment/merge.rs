use shelf_core::{Book, Dimensions};

use crate::extract::EnrichmentCandidate;
use crate::providers::BookRecord;

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn fill_text(
    slot: &mut Option<String>,
    value: Option<&str>,
    field: &'static str,
    updated: &mut Vec<String>,
) {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return;
    };
    if is_blank(slot) {
        *slot = Some(value.to_string());
        updated.push(field.to_string());
    }
}

fn fill_page_count(slot: &mut Option<u32>, value: Option<u32>, updated: &mut Vec<String>) {
    if slot.is_none_or(|n| n == 0)
        && let Some(n) = value.filter(|n| *n > 0)
    {
        *slot = Some(n);
        updated.push("page_count".to_string());
    }
}

/// Fills each missing side separately.
fn fill_dimensions(slot: &mut Option<Dimensions>, value: Option<Dimensions>, updated: &mut Vec<String>) {
    let Some(new) = value.filter(|d| !d.is_empty()) else {
        return;
    };
    let current = slot.get_or_insert_with(Dimensions::default);
    let before = *current;
    current.height_mm = current.height_mm.or(new.height_mm);
    current.width_mm = current.width_mm.or(new.width_mm);
    current.thickness_mm = current.thickness_mm.or(new.thickness_mm);
    if *current != before {
        updated.push("dimensions".to_string());
    }
}

/// Merging remote metadata into a book without overwriting what it has.
pub trait BookMergeExt {
    /// Returns the names of the fields that were written.
    fn merge_candidate(&mut self, candidate: &EnrichmentCandidate) -> Vec<String>;

    fn merge_record(&mut self, record: &BookRecord) -> Vec<String>;
}

impl BookMergeExt for Book {
    fn merge_candidate(&mut self, candidate: &EnrichmentCandidate) -> Vec<String> {
        let mut updated = Vec::new();
        if let Some(asin) = candidate.asin.as_deref()
            && self.set_asin(asin)
        {
            updated.push("amazon_asin".to_string());
        }
        if !self.has_title()
            && let Some(title) = candidate.title.as_deref()
        {
            self.title = title.trim().to_string();
            updated.push("title".to_string());
        }
        fill_text(&mut self.isbn, candidate.isbn.as_deref(), "isbn", &mut updated);
        fill_text(&mut self.authors, candidate.authors.as_deref(), "authors", &mut updated);
        fill_text(&mut self.publisher, candidate.publisher.as_deref(), "publisher", &mut updated);
        fill_text(&mut self.description, candidate.description.as_deref(), "description", &mut updated);
        fill_text(&mut self.thumbnail, candidate.thumbnail.as_deref(), "thumbnail", &mut updated);
        fill_page_count(&mut self.page_count, candidate.page_count, &mut updated);
        fill_dimensions(&mut self.dimensions, candidate.dimensions, &mut updated);
        self.refresh_info_quality();
        updated
    }

    fn merge_record(&mut self, record: &BookRecord) -> Vec<String> {
        let mut updated = Vec::new();
        if let Some(asin) = record.amazon_asin.as_deref()
            && self.set_asin(asin)
        {
            updated.push("amazon_asin".to_string());
        }
        if !self.has_title() && !record.title.trim().is_empty() {
            self.title = record.title.trim().to_string();
            updated.push("title".to_string());
        }
        let authors = record.authors_joined();
        fill_text(&mut self.google_id, record.google_id.as_deref(), "google_id", &mut updated);
        fill_text(&mut self.subtitle, record.subtitle.as_deref(), "subtitle", &mut updated);
        fill_text(&mut self.authors, authors.as_deref(), "authors", &mut updated);
        fill_text(&mut self.isbn, record.isbn.as_deref(), "isbn", &mut updated);
        fill_text(&mut self.publisher, record.publisher.as_deref(), "publisher", &mut updated);
        fill_text(&mut self.language, record.language.as_deref(), "language", &mut updated);
        fill_text(&mut self.description, record.description.as_deref(), "description", &mut updated);
        fill_text(&mut self.thumbnail, record.thumbnail.as_deref(), "thumbnail", &mut updated);
        fill_page_count(&mut self.page_count, record.page_count, &mut updated);
        fill_dimensions(&mut self.dimensions, record.dimensions, &mut updated);
        self.refresh_info_quality();
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::InfoQuality;

    fn candidate() -> EnrichmentCandidate {
        EnrichmentCandidate {
            asin: Some("8525406554".into()),
            title: Some("Dom Casmurro (Edição de Bolso)".into()),
            isbn: Some("9788525406552".into()),
            authors: Some("Machado de Assis".into()),
            thumbnail: Some("https://m.media-amazon.com/images/I/51abc._SL1500_.jpg".into()),
            description: Some("Bentinho e <b>Capitu</b>.".into()),
            dimensions: Some(Dimensions {
                height_mm: Some(210.0),
                width_mm: Some(138.0),
                thickness_mm: Some(15.0),
            }),
            page_count: Some(256),
            publisher: Some("Penguin-Companhia".into()),
            is_book: true,
        }
    }

    #[test]
    fn fills_only_missing_fields() {
        let mut book = Book {
            authors: Some("Machado de Assis (org.)".into()),
            publisher: Some("Globo".into()),
            dimensions: Some(Dimensions {
                height_mm: Some(200.0),
                ..Default::default()
            }),
            ..Book::new("Dom Casmurro")
        };
        let updated = book.merge_candidate(&candidate());

        assert_eq!(book.title, "Dom Casmurro");
        assert_eq!(book.authors.as_deref(), Some("Machado de Assis (org.)"));
        assert_eq!(book.publisher.as_deref(), Some("Globo"));
        assert_eq!(book.amazon_asin.as_deref(), Some("8525406554"));
        assert_eq!(book.page_count, Some(256));
        let dims = book.dimensions.unwrap();
        assert_eq!(dims.height_mm, Some(200.0));
        assert_eq!(dims.width_mm, Some(138.0));

        assert!(updated.contains(&"amazon_asin".to_string()));
        assert!(updated.contains(&"dimensions".to_string()));
        assert!(!updated.contains(&"authors".to_string()));
        assert!(!updated.contains(&"title".to_string()));
        assert_eq!(book.info_quality, InfoQuality::Complete);
    }

    #[test]
    fn existing_asin_kept() {
        let mut book = Book {
            amazon_asin: Some("B000000001".into()),
            ..Book::new("Dom Casmurro")
        };
        let updated = book.merge_candidate(&candidate());
        assert_eq!(book.amazon_asin.as_deref(), Some("B000000001"));
        assert!(!updated.contains(&"amazon_asin".to_string()));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut book = Book {
            description: Some("   ".into()),
            thumbnail: Some(String::new()),
            ..Book::new("Dom Casmurro")
        };
        book.merge_candidate(&candidate());
        assert!(book.description.unwrap().contains("Capitu"));
        assert!(book.thumbnail.unwrap().ends_with("_SL1500_.jpg"));
    }

    #[test]
    fn record_merge_joins_authors() {
        let record = BookRecord {
            title: "Good Omens".into(),
            authors: vec!["Terry Pratchett".into(), "Neil Gaiman".into()],
            google_id: Some("abc".into()),
            language: Some("en".into()),
            source: "google_books".into(),
            ..Default::default()
        };
        let mut book = Book::new("Good Omens");
        let updated = book.merge_record(&record);
        assert_eq!(book.authors.as_deref(), Some("Terry Pratchett, Neil Gaiman"));
        assert_eq!(updated, vec!["google_id", "authors", "language"]);
    }
}
