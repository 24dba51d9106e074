//! Affiliate links. No network access.

use std::collections::BTreeMap;

use shelf_core::{AppConfig, Book};

use crate::identifiers::strip_isbn;
use crate::region::{Region, RegionResolver};

const FALLBACK_TERM: &str = "book";

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// What a link can be built from.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkInput<'a> {
    pub asin: Option<&'a str>,
    pub isbn: Option<&'a str>,
    pub title: Option<&'a str>,
    pub authors: Option<&'a str>,
}

impl<'a> From<&'a Book> for LinkInput<'a> {
    fn from(book: &'a Book) -> Self {
        Self {
            asin: book.amazon_asin.as_deref(),
            isbn: book.isbn.as_deref(),
            title: Some(book.title.as_str()),
            authors: book.authors.as_deref(),
        }
    }
}

/// Search term: ISBN, else title and authors, else title, else `"book"`.
pub fn search_term(input: &LinkInput<'_>) -> String {
    if let Some(isbn) = present(input.isbn).map(strip_isbn).filter(|s| !s.is_empty()) {
        return isbn;
    }
    match (present(input.title), present(input.authors)) {
        (Some(title), Some(authors)) => format!("{title} {authors}"),
        (Some(title), None) => title.to_string(),
        _ => FALLBACK_TERM.to_string(),
    }
}

/// `/dp/{asin}` when the ASIN is known, a books search otherwise. The tag is
/// omitted when blank.
pub fn build_link(input: &LinkInput<'_>, region: Region, tag: Option<&str>) -> String {
    let base = region.config().base_url();
    let tag = present(tag);

    if let Some(asin) = present(input.asin) {
        let mut url = format!("{base}/dp/{}", urlencoding::encode(asin));
        if let Some(tag) = tag {
            url.push_str(&format!("?tag={}", urlencoding::encode(tag)));
        }
        return url;
    }

    let term = search_term(input);
    let mut url = format!("{base}/s?k={}&i=stripbooks", urlencoding::encode(&term));
    if let Some(tag) = tag {
        url.push_str(&format!("&tag={}", urlencoding::encode(tag)));
    }
    url
}

/// Resolves the marketplace from the book's language and the tag from config.
#[derive(Debug, Clone, Default)]
pub struct LinkBuilder {
    resolver: RegionResolver,
    tags: BTreeMap<String, String>,
    default_tag: Option<String>,
}

impl LinkBuilder {
    pub fn new(resolver: RegionResolver) -> Self {
        Self {
            resolver,
            ..Default::default()
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            resolver: RegionResolver::from_code(&config.core.default_region),
            tags: config
                .amazon
                .associate_tags
                .iter()
                .map(|(code, tag)| (code.to_ascii_uppercase(), tag.clone()))
                .collect(),
            default_tag: config.amazon.default_associate_tag.clone(),
        }
    }

    pub fn with_tag(mut self, region: Region, tag: impl Into<String>) -> Self {
        self.tags.insert(region.code().to_string(), tag.into());
        self
    }

    pub fn tag_for(&self, region: Region) -> Option<&str> {
        self.tags
            .get(region.code())
            .map(String::as_str)
            .or(self.default_tag.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn region_for(&self, language: Option<&str>) -> Region {
        self.resolver.resolve(language)
    }

    pub fn link(&self, input: &LinkInput<'_>, language: Option<&str>) -> String {
        let region = self.region_for(language);
        build_link(input, region, self.tag_for(region))
    }

    pub fn link_for_book(&self, book: &Book) -> String {
        self.link(&LinkInput::from(book), book.language.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_link_with_tag() {
        let input = LinkInput {
            asin: Some("8525406554"),
            isbn: Some("9788525406552"),
            ..Default::default()
        };
        let url = build_link(&input, Region::Br, Some("shelf-br-20"));
        assert_eq!(url, "https://www.amazon.com.br/dp/8525406554?tag=shelf-br-20");
        assert!(url.contains("/dp/8525406554"));
    }

    #[test]
    fn search_term_priority() {
        let mut input = LinkInput {
            isbn: Some("978-85-254-0655-2"),
            title: Some("Dom Casmurro"),
            authors: Some("Machado de Assis"),
            ..Default::default()
        };
        assert_eq!(search_term(&input), "9788525406552");
        input.isbn = Some("  ");
        assert_eq!(search_term(&input), "Dom Casmurro Machado de Assis");
        input.authors = None;
        assert_eq!(search_term(&input), "Dom Casmurro");
        input.title = Some("");
        assert_eq!(search_term(&input), "book");
    }

    #[test]
    fn search_link_encodes_and_omits_blank_tag() {
        let input = LinkInput {
            title: Some("Cien años de soledad"),
            authors: Some("García Márquez"),
            ..Default::default()
        };
        let url = build_link(&input, Region::Es, None);
        assert_eq!(
            url,
            "https://www.amazon.es/s?k=Cien%20a%C3%B1os%20de%20soledad%20Garc%C3%ADa%20M%C3%A1rquez&i=stripbooks"
        );
        assert_eq!(build_link(&input, Region::Es, Some(" ")), url);
    }

    #[test]
    fn builder_resolves_region_and_tag() {
        let builder = LinkBuilder::new(RegionResolver::default()).with_tag(Region::Uk, "shelf-uk-21");
        let book = Book {
            amazon_asin: Some("0141036141".into()),
            language: Some("en-GB".into()),
            ..Book::new("1984")
        };
        assert_eq!(
            builder.link_for_book(&book),
            "https://www.amazon.co.uk/dp/0141036141?tag=shelf-uk-21"
        );

        let untagged = Book {
            language: Some("de".into()),
            ..Book::new("Der Prozess")
        };
        assert_eq!(
            builder.link_for_book(&untagged),
            "https://www.amazon.de/s?k=Der%20Prozess&i=stripbooks"
        );
    }

    #[test]
    fn builder_from_config_uses_default_tag() {
        let mut config = AppConfig::default();
        config.amazon.default_associate_tag = Some("shelf-20".into());
        let builder = LinkBuilder::from_config(&config);
        assert_eq!(builder.tag_for(Region::Fr), Some("shelf-20"));
        let link = builder.link(&LinkInput::default(), None);
        assert_eq!(link, "https://www.amazon.com/s?k=book&i=stripbooks&tag=shelf-20");
    }
}
