//! Amazon product page extractors.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use shelf_core::Dimensions;

use super::{EnrichmentCandidate, FieldPattern, clean_text, decode_entities, first_match, non_empty};
use crate::identifiers::strip_isbn;

// Whitespace, entities, tags, colons and bidi marks between a label and its value.
const FILLER: &str = r"(?:\s|&[a-zA-Z]+;|&#[0-9]+;|<[^>]*>|:|\x{200E}|\x{200F})*";

// ─── Title ────────────────────────────────────────────────────────────────────

static INVALID_TITLE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // dates
        r"^\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}$",
        r"(?i)^\d{1,2}\s+de\s+\p{L}+\s+de\s+\d{4}$",
        r"(?i)^\p{L}+\s+\d{1,2},\s*\d{4}$",
        r"(?i)^\d{1,2}\s+\p{L}+\.?\s+\d{4}$",
        // prices
        r"^(?:R\$|US\$|\$|€|£|¥)\s*\d",
        r"^\d+(?:[.,]\d+)?\s*(?:€|R\$|\$)$",
        // numbers with separators, one or two digits, or five and more
        r"^\d+[.,]\d+$",
        r"^\d{1,2}$",
        r"^\d{5,}$",
        // format labels
        r"(?i)^(?:paperback|hardcover|kindle edition|kindle|ebook|e-book|audiobook|audible|audio cd|mass market paperback|board book|spiral-bound|capa comum|capa dura|edição kindle|livro de bolso|tapa blanda|tapa dura|broché|relié|taschenbuch|gebundene ausgabe|copertina flessibile|copertina rigida)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Rejects dates, prices, bare numbers and format labels.
pub fn valid_title(raw: &str) -> Option<String> {
    let title = clean_text(raw);
    if title.is_empty() || title.chars().count() > 500 {
        return None;
    }
    if INVALID_TITLE.iter().any(|re| re.is_match(&title)) {
        return None;
    }
    Some(title)
}

static AMAZON_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^amazon\.[a-z.]+\s*:\s*").expect("valid regex"));
static AMAZON_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*[:|\-–]\s*amazon\.[a-z.]+.*$").expect("valid regex"));

fn page_title(raw: &str) -> Option<String> {
    let cleaned = clean_text(raw);
    let without_prefix = AMAZON_PREFIX.replace(&cleaned, "");
    let without_suffix = AMAZON_SUFFIX.replace(&without_prefix, "");
    // "Title: 9788525406552: Author: Books" keeps the first segment
    let head = without_suffix.split(": ").next().unwrap_or_default();
    valid_title(head)
}

fn ld_json_name(raw: &str) -> Option<String> {
    ld_json_objects(raw)
        .iter()
        .filter(|obj| is_book_or_product(obj))
        .find_map(|obj| obj.get("name").and_then(Value::as_str).and_then(valid_title))
}

static TITLE_PATTERNS: Lazy<Vec<FieldPattern>> = Lazy::new(|| {
    vec![
        FieldPattern::new(
            "product_title",
            r#"(?is)<span[^>]*\bid="productTitle"[^>]*>(.*?)</span>"#,
            valid_title,
        ),
        FieldPattern::new(
            "ebooks_product_title",
            r#"(?is)<span[^>]*\bid="ebooksProductTitle"[^>]*>(.*?)</span>"#,
            valid_title,
        ),
        FieldPattern::new(
            "size_large_heading",
            r#"(?is)<h1[^>]*class="[^"]*a-size-large[^"]*"[^>]*>(.*?)</h1>"#,
            valid_title,
        ),
        FieldPattern::new(
            "json_ld_name",
            r#"(?is)<script[^>]*application/ld\+json[^>]*>(.*?)</script>"#,
            ld_json_name,
        ),
        FieldPattern::new("html_title", r"(?is)<title[^>]*>(.*?)</title>", page_title),
    ]
});

pub fn extract_title(html: &str) -> Option<String> {
    first_match(&TITLE_PATTERNS, html)
}

// ─── ISBN ─────────────────────────────────────────────────────────────────────

fn isbn_of_valid_length(raw: &str) -> Option<String> {
    let stripped = strip_isbn(raw);
    matches!(stripped.len(), 10 | 13).then_some(stripped)
}

static ISBN_PATTERNS: Lazy<Vec<FieldPattern>> = Lazy::new(|| {
    vec![
        FieldPattern::new(
            "isbn13_label",
            &format!(r"(?i)ISBN-13{FILLER}([0-9][0-9\- ]{{11,16}}[0-9])"),
            isbn_of_valid_length,
        ),
        FieldPattern::new(
            "isbn10_label",
            &format!(r"(?i)ISBN-10{FILLER}([0-9][0-9\- ]{{8,11}}[0-9Xx])"),
            isbn_of_valid_length,
        ),
        FieldPattern::new(
            "json_isbn",
            r#"(?i)"isbn"\s*:\s*"([0-9Xx\- ]{10,17})""#,
            isbn_of_valid_length,
        ),
        FieldPattern::new(
            "isbn_label",
            &format!(r"(?i)\bISBN{FILLER}([0-9][0-9\- ]{{8,16}}[0-9Xx])"),
            isbn_of_valid_length,
        ),
    ]
});

pub fn extract_isbn(html: &str) -> Option<String> {
    first_match(&ISBN_PATTERNS, html)
}

// ─── Is-a-book signal ─────────────────────────────────────────────────────────

const BOOK_NODE_IDS: &str = "283155|6740748011|266239|916520|186606|301061|411663031|599364031|465392";

static BOOK_SIGNALS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "breadcrumb",
            r"(?is)wayfinding-breadcrumbs.{0,1500}?>\s*(?:Books|Livros|Libros|Livres|Bücher|Libri|Boeken|Böcker|Książki|Kitaplar|本|Kindle Store|Loja Kindle)\s*<".to_string(),
        ),
        (
            "books_node",
            format!(r#"(?:node=|n%3A|n:|"nodeId"\s*:\s*"?)(?:{BOOK_NODE_IDS})\b"#),
        ),
        ("book_format_key", r#""bookFormat""#.to_string()),
        (
            "format_word",
            r#"(?is)id="(?:productSubtitle|productBinding|tmmSwatches|formats)"[^>]*>.{0,600}?\b(?:Paperback|Hardcover|Mass Market Paperback|Kindle Edition|Capa comum|Capa dura|Edição Kindle|Tapa blanda|Tapa dura|Broché|Relié|Taschenbuch|Gebundene Ausgabe|Copertina flessibile|Copertina rigida)\b"#.to_string(),
        ),
        ("schema_book", r#""@type"\s*:\s*"Book""#.to_string()),
        ("book_details_id", r#"id="[^"]*book_details[^"]*""#.to_string()),
        (
            "publisher_label",
            r"(?i)(?:Publisher|Editora|Editorial|Éditeur|Verlag|Editore)\s*(?:&[a-zA-Z]+;|\x{200E}|\x{200F})*\s*:".to_string(),
        ),
        (
            "publication_date_label",
            r"(?i)Publication date|Data da publicação|Fecha de publicación|Date de publication|Erscheinungstermin|Data di pubblicazione".to_string(),
        ),
    ]
    .into_iter()
    .map(|(name, p)| (name, Regex::new(&p).expect("valid regex")))
    .collect()
});

/// Names of the book signals present on the page.
pub fn book_signals(html: &str) -> Vec<&'static str> {
    BOOK_SIGNALS
        .iter()
        .filter(|(_, re)| re.is_match(html))
        .map(|(name, _)| *name)
        .collect()
}

pub fn is_book(html: &str) -> bool {
    BOOK_SIGNALS.iter().any(|(_, re)| re.is_match(html))
}

// ─── Dimensions ───────────────────────────────────────────────────────────────

const DIMENSION_TRIPLE: &str = r"(\d+(?:[.,]\d+)?)\s*[x×]\s*(\d+(?:[.,]\d+)?)\s*[x×]\s*(\d+(?:[.,]\d+)?)\s*(cm|mm|inches|inch|in|centímetros|centimeters|pulgadas|polegadas)\b";

static DIMENSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        format!(r"(?is)(?:Dimensions|Dimensões|Dimensiones|Abmessungen|Dimensioni|Afmetingen){FILLER}{DIMENSION_TRIPLE}"),
        format!(r"(?i){DIMENSION_TRIPLE}"),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

pub(crate) fn to_mm(value: f64, unit: &str) -> f64 {
    let mm = match unit.to_lowercase().as_str() {
        "mm" => value,
        "cm" | "centímetros" | "centimeters" => value * 10.0,
        _ => value * 25.4,
    };
    (mm * 10.0).round() / 10.0
}

/// Largest side is the height, middle the width, smallest the thickness.
pub fn extract_dimensions(html: &str) -> Option<Dimensions> {
    for re in DIMENSION_PATTERNS.iter() {
        for caps in re.captures_iter(html) {
            let unit = &caps[4];
            let sides: Option<Vec<f64>> = (1..=3)
                .map(|i| parse_decimal(&caps[i]).map(|v| to_mm(v, unit)))
                .collect();
            if let Some(dims) = sides.and_then(dimensions_from_sides) {
                return Some(dims);
            }
        }
    }
    None
}

/// Three positive sides in millimetres, largest first.
pub(crate) fn dimensions_from_sides(mut sides: Vec<f64>) -> Option<Dimensions> {
    if sides.len() != 3 || sides.iter().any(|s| *s <= 0.0) {
        return None;
    }
    sides.sort_by(|a, b| b.total_cmp(a));
    Some(Dimensions {
        height_mm: Some(sides[0]),
        width_mm: Some(sides[1]),
        thickness_mm: Some(sides[2]),
    })
}

// ─── Page count / publisher ───────────────────────────────────────────────────

fn page_number(raw: &str) -> Option<String> {
    let n: u32 = raw.trim().parse().ok()?;
    (1..=20_000).contains(&n).then(|| n.to_string())
}

static PAGE_PATTERNS: Lazy<Vec<FieldPattern>> = Lazy::new(|| {
    vec![
        FieldPattern::new(
            "print_length_label",
            &format!(r"(?i)(?:Print length|Número de páginas|Número de Páginas|Nombre de pages|Seitenzahl der Print-Ausgabe|Lunghezza stampa|Paperback|Hardcover|Capa comum|Capa dura|Tapa blanda|Tapa dura|Broché|Relié|Taschenbuch){FILLER}(\d{{1,5}})\s*(?:pages|páginas|Seiten|pagine|pagina's)\b"),
            page_number,
        ),
        FieldPattern::new(
            "number_of_pages_json",
            r#"(?i)"numberOfPages"\s*:\s*"?(\d{1,5})"#,
            page_number,
        ),
        FieldPattern::new(
            "bare_pages",
            r"(?i)\b(\d{1,5})\s*(?:pages|páginas|Seiten|pagine)\b",
            page_number,
        ),
    ]
});

pub fn extract_page_count(html: &str) -> Option<u32> {
    first_match(&PAGE_PATTERNS, html).and_then(|n| n.parse().ok())
}

fn publisher_name(raw: &str) -> Option<String> {
    let text = clean_text(raw);
    // "Penguin Classics; Reprint edition (June 1, 2021)"
    let head = text.split(';').next().unwrap_or_default();
    let head = head.split(" (").next().unwrap_or_default().trim();
    let len = head.chars().count();
    if len < 2 || len > 150 || head.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(head.to_string())
}

fn ld_json_publisher(raw: &str) -> Option<String> {
    ld_json_objects(raw).iter().find_map(|obj| match obj.get("publisher")? {
        Value::String(s) => publisher_name(s),
        Value::Object(p) => p.get("name").and_then(Value::as_str).and_then(publisher_name),
        _ => None,
    })
}

static PUBLISHER_PATTERNS: Lazy<Vec<FieldPattern>> = Lazy::new(|| {
    vec![
        FieldPattern::new(
            "publisher_label",
            &format!(r"(?i)(?:Publisher|Editora|Editorial|Éditeur|Verlag|Editore|Uitgever){FILLER}([^<>:]{{2,200}})<"),
            publisher_name,
        ),
        FieldPattern::new(
            "json_ld_publisher",
            r#"(?is)<script[^>]*application/ld\+json[^>]*>(.*?)</script>"#,
            ld_json_publisher,
        ),
    ]
});

pub fn extract_publisher(html: &str) -> Option<String> {
    first_match(&PUBLISHER_PATTERNS, html)
}

// ─── Description ──────────────────────────────────────────────────────────────

static BOLD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(?:b|strong)(?:\s[^>]*)?>").expect("valid regex"));
static BOLD_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</(?:b|strong)\s*>").expect("valid regex"));
static ITALIC_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(?:i|em)(?:\s[^>]*)?>").expect("valid regex"));
static ITALIC_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</(?:i|em)\s*>").expect("valid regex"));
static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>|</li\s*>").expect("valid regex"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static READ_MORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:Read more|Read less|Leia mais|Leia menos|Ver más|Ver menos|Lire la suite|En lire plus|Mehr lesen|Weniger lesen|Leggi di più|Meer lezen)\b")
        .expect("valid regex")
});
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Keeps only `<b>` and `<i>` markup, one paragraph per line.
pub fn sanitize_description(raw: &str) -> Option<String> {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");
    let text = BOLD_OPEN.replace_all(&text, "\u{1}");
    let text = BOLD_CLOSE.replace_all(&text, "\u{2}");
    let text = ITALIC_OPEN.replace_all(&text, "\u{3}");
    let text = ITALIC_CLOSE.replace_all(&text, "\u{4}");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = decode_entities(&text)
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\u{1}', "<b>")
        .replace('\u{2}', "</b>")
        .replace('\u{3}', "<i>")
        .replace('\u{4}', "</i>");
    let text = READ_MORE.replace_all(&text, "");

    let lines: Vec<String> = text
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let joined = BLANK_LINES.replace_all(&lines.join("\n"), "\n\n").trim().to_string();

    let visible = joined.replace("<b>", "").replace("</b>", "").replace("<i>", "").replace("</i>", "");
    (visible.trim().chars().count() >= 10).then_some(joined)
}

static DESCRIPTION_PATTERNS: Lazy<Vec<FieldPattern>> = Lazy::new(|| {
    vec![
        FieldPattern::new(
            "book_description_expander",
            r#"(?is)id="bookDescription_feature_div".*?<div[^>]*a-expander-content[^>]*>(.*?)</div>"#,
            sanitize_description,
        ),
        FieldPattern::new(
            "book_description_noscript",
            r"(?is)<noscript>\s*<div>(.*?)</div>\s*</noscript>",
            sanitize_description,
        ),
        FieldPattern::new(
            "product_description",
            r#"(?is)<div[^>]*\bid="productDescription"[^>]*>(.*?)</div>"#,
            sanitize_description,
        ),
        FieldPattern::new(
            "meta_description",
            r#"(?is)<meta[^>]*name="description"[^>]*content="([^"]+)""#,
            sanitize_description,
        ),
    ]
});

pub fn extract_description(html: &str) -> Option<String> {
    first_match(&DESCRIPTION_PATTERNS, html)
}

// ─── Thumbnail ────────────────────────────────────────────────────────────────

static SIZE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\._[^./]+_\.(jpe?g|png|gif|webp)").expect("valid regex"));
static IMG_HIRES_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-old-hires="(https?://[^"]+)""#).expect("valid regex"));
static IMG_SRC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bsrc="(https?://[^"]+)""#).expect("valid regex"));

/// Swaps Amazon's size token for a 1500px variant.
pub fn high_resolution(url: &str) -> String {
    SIZE_TOKEN.replace(url, "._SL1500_.$1").into_owned()
}

fn image_url(raw: &str) -> Option<String> {
    let url = decode_entities(raw.trim());
    if !url.starts_with("http") {
        return None;
    }
    Some(high_resolution(&url))
}

fn landing_image(tag: &str) -> Option<String> {
    IMG_HIRES_ATTR
        .captures(tag)
        .or_else(|| IMG_SRC_ATTR.captures(tag))
        .and_then(|c| image_url(&c[1]))
}

static THUMBNAIL_PATTERNS: Lazy<Vec<FieldPattern>> = Lazy::new(|| {
    vec![
        FieldPattern::new(
            "landing_image",
            r#"(?is)(<img[^>]*\bid="(?:landingImage|imgBlkFront|ebooksImgBlkFront)"[^>]*>)"#,
            landing_image,
        ),
        FieldPattern::new("hi_res_json", r#""hiRes"\s*:\s*"(https?://[^"]+)""#, image_url),
        FieldPattern::new("large_json", r#""large"\s*:\s*"(https?://[^"]+)""#, image_url),
        FieldPattern::new(
            "og_image",
            r#"(?is)<meta[^>]*property="og:image"[^>]*content="([^"]+)""#,
            image_url,
        ),
    ]
});

pub fn extract_thumbnail(html: &str) -> Option<String> {
    first_match(&THUMBNAIL_PATTERNS, html)
}

// ─── ASIN / authors ───────────────────────────────────────────────────────────

pub fn valid_asin(raw: &str) -> Option<String> {
    let asin = raw.trim().to_ascii_uppercase();
    (asin.len() == 10 && asin.chars().all(|c| c.is_ascii_alphanumeric())).then_some(asin)
}

static ASIN_PATTERNS: Lazy<Vec<FieldPattern>> = Lazy::new(|| {
    vec![
        FieldPattern::new(
            "asin_input",
            r#"(?i)<input[^>]*\b(?:id|name)="ASIN"[^>]*value="([A-Z0-9]{10})""#,
            valid_asin,
        ),
        FieldPattern::new(
            "canonical_link",
            r#"(?i)<link[^>]*rel="canonical"[^>]*href="[^"]*/dp/([A-Z0-9]{10})"#,
            valid_asin,
        ),
        FieldPattern::new("asin_json", r#""(?:asin|ASIN)"\s*:\s*"([A-Z0-9]{10})""#, valid_asin),
        FieldPattern::new("dp_path", r"/dp/([A-Z0-9]{10})\b", valid_asin),
    ]
});

pub fn extract_asin(html: &str) -> Option<String> {
    first_match(&ASIN_PATTERNS, html)
}

fn selector(input: &str) -> Option<Selector> {
    Selector::parse(input).ok()
}

pub fn extract_authors(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let mut names: Vec<String> = Vec::new();
    for css in ["#bylineInfo span.author > a", "span.author a.a-link-normal", "a.contributorNameID"] {
        let Some(sel) = selector(css) else { continue };
        for el in document.select(&sel) {
            let name = clean_text(&el.text().collect::<Vec<_>>().join(" "));
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        if !names.is_empty() {
            return Some(names.join(", "));
        }
    }

    let script_sel = selector(r#"script[type="application/ld+json"]"#)?;
    for script in document.select(&script_sel) {
        let body = script.text().collect::<String>();
        for obj in ld_json_objects(&body) {
            let found = match obj.get("author") {
                Some(Value::Array(list)) => list.iter().filter_map(author_name).collect(),
                Some(other) => author_name(other).into_iter().collect(),
                None => Vec::new(),
            };
            if !found.is_empty() {
                return Some(found.join(", "));
            }
        }
    }
    None
}

fn author_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Object(o) => o.get("name").and_then(Value::as_str).and_then(non_empty),
        _ => None,
    }
}

// ─── JSON-LD ──────────────────────────────────────────────────────────────────

/// Parses a JSON-LD block into its objects, flattening arrays and `@graph`.
pub fn ld_json_objects(raw: &str) -> Vec<Value> {
    let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut stack = vec![value];
    while let Some(v) = stack.pop() {
        match v {
            Value::Array(items) => stack.extend(items.into_iter().rev()),
            Value::Object(mut map) => {
                if let Some(graph) = map.remove("@graph") {
                    stack.push(graph);
                }
                out.push(Value::Object(map));
            }
            _ => {}
        }
    }
    out
}

fn is_book_or_product(obj: &Value) -> bool {
    match obj.get("@type") {
        Some(Value::String(t)) => t == "Book" || t == "Product",
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| matches!(t.as_str(), Some("Book") | Some("Product"))),
        _ => false,
    }
}

// ─── Candidate ────────────────────────────────────────────────────────────────

/// Runs every extractor over one product page. `asin_hint` is the ASIN the
/// page was fetched for and wins over anything found in the markup.
pub fn extract_candidate(html: &str, asin_hint: Option<&str>) -> EnrichmentCandidate {
    EnrichmentCandidate {
        asin: asin_hint.and_then(valid_asin).or_else(|| extract_asin(html)),
        title: extract_title(html),
        isbn: extract_isbn(html),
        authors: extract_authors(html),
        thumbnail: extract_thumbnail(html),
        description: extract_description(html),
        dimensions: extract_dimensions(html),
        page_count: extract_page_count(html),
        publisher: extract_publisher(html),
        is_book: is_book(html),
    }
}
