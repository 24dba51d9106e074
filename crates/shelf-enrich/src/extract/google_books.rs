//! Google Books `volumes` JSON.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use shelf_core::Dimensions;

use super::amazon::sanitize_description;
use crate::error::{EnrichError, Result};
use crate::identifiers::strip_isbn;
use crate::providers::{BookRecord, non_blank};

pub const SOURCE: &str = "google_books";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumesResponse {
    #[serde(default)]
    pub total_items: usize,
    #[serde(default)]
    pub items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub volume_info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub industry_identifiers: Vec<IndustryIdentifier>,
    pub page_count: Option<u32>,
    pub language: Option<String>,
    pub image_links: Option<ImageLinks>,
    pub dimensions: Option<VolumeDimensions>,
}

#[derive(Debug, Deserialize)]
pub struct IndustryIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLinks {
    pub small_thumbnail: Option<String>,
    pub thumbnail: Option<String>,
    pub small: Option<String>,
    pub medium: Option<String>,
    pub large: Option<String>,
    pub extra_large: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VolumeDimensions {
    pub height: Option<String>,
    pub width: Option<String>,
    pub thickness: Option<String>,
}

static LENGTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(cm|mm|in|inches)?").expect("valid regex")
});

/// "24.00 cm" to millimeters. A bare number is taken as centimeters.
pub fn parse_length_mm(raw: &str) -> Option<f64> {
    let caps = LENGTH_RE.captures(raw)?;
    let value: f64 = caps[1].replace(',', ".").parse().ok()?;
    let mm = match caps.get(2).map(|u| u.as_str().to_lowercase()).as_deref() {
        Some("mm") => value,
        Some("in") | Some("inches") => value * 25.4,
        _ => value * 10.0,
    };
    (mm > 0.0).then(|| (mm * 10.0).round() / 10.0)
}

fn best_image(links: &ImageLinks) -> Option<String> {
    let url = [
        &links.extra_large,
        &links.large,
        &links.medium,
        &links.small,
        &links.thumbnail,
        &links.small_thumbnail,
    ]
    .into_iter()
    .find_map(|u| non_blank(u.as_deref()))?;

    let url = url.replacen("http://", "https://", 1).replace("&edge=curl", "");
    Some(url)
}

fn preferred_isbn(ids: &[IndustryIdentifier]) -> Option<String> {
    let by_kind = |kind: &str| {
        ids.iter()
            .find(|id| id.kind == kind)
            .map(|id| strip_isbn(&id.identifier))
            .filter(|s| !s.is_empty())
    };
    by_kind("ISBN_13").or_else(|| by_kind("ISBN_10"))
}

impl Volume {
    pub fn into_record(self) -> BookRecord {
        let info = self.volume_info;
        let dimensions = info.dimensions.as_ref().map(|d| Dimensions {
            height_mm: d.height.as_deref().and_then(parse_length_mm),
            width_mm: d.width.as_deref().and_then(parse_length_mm),
            thickness_mm: d.thickness.as_deref().and_then(parse_length_mm),
        });

        BookRecord {
            title: info.title.unwrap_or_default().trim().to_string(),
            subtitle: non_blank(info.subtitle.as_deref()),
            authors: info
                .authors
                .iter()
                .filter_map(|a| non_blank(Some(a.as_str())))
                .collect(),
            isbn: preferred_isbn(&info.industry_identifiers),
            google_id: Some(self.id),
            publisher: non_blank(info.publisher.as_deref()),
            published_date: non_blank(info.published_date.as_deref()),
            page_count: info.page_count.filter(|n| *n > 0),
            language: non_blank(info.language.as_deref()),
            description: info.description.as_deref().and_then(sanitize_description),
            thumbnail: info.image_links.as_ref().and_then(best_image),
            dimensions: dimensions.filter(|d| !d.is_empty()),
            source: SOURCE.to_string(),
            ..Default::default()
        }
    }
}

/// Parses a search response. Volumes without a title are dropped.
pub fn parse_volumes(body: &str) -> Result<(usize, Vec<BookRecord>)> {
    let response: VolumesResponse =
        serde_json::from_str(body).map_err(|e| EnrichError::Parse(e.to_string()))?;
    let records: Vec<BookRecord> = response
        .items
        .into_iter()
        .map(Volume::into_record)
        .filter(|r| !r.title.is_empty())
        .collect();
    Ok((response.total_items, records))
}

pub fn parse_volume(body: &str) -> Result<BookRecord> {
    let volume: Volume =
        serde_json::from_str(body).map_err(|e| EnrichError::Parse(e.to_string()))?;
    Ok(volume.into_record())
}

#[cfg(test)]
pub(crate) const SAMPLE_VOLUME: &str = r#"{
  "kind": "books#volume",
  "id": "g1Xy0AEACAAJ",
  "volumeInfo": {
    "title": "Dom Casmurro",
    "authors": ["Machado de Assis"],
    "publisher": "Penguin-Companhia",
    "publishedDate": "2016-06-01",
    "description": "<p>Bentinho e <b>Capitu</b>, um clássico.</p>",
    "industryIdentifiers": [
      {"type": "ISBN_10", "identifier": "8525406554"},
      {"type": "ISBN_13", "identifier": "9788525406552"}
    ],
    "pageCount": 256,
    "language": "pt-BR",
    "imageLinks": {
      "smallThumbnail": "http://books.google.com/books/content?id=g1Xy0AEACAAJ&zoom=5&edge=curl",
      "thumbnail": "http://books.google.com/books/content?id=g1Xy0AEACAAJ&zoom=1&edge=curl"
    },
    "dimensions": {"height": "21.00 cm", "width": "14.00 cm", "thickness": "1.50 cm"}
  }
}"#;
