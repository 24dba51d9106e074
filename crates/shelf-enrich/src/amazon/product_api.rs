use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use shelf_core::AppConfig;
use tracing::{debug, warn};

use crate::error::{EnrichError, Result};
use crate::extract::EnrichmentCandidate;
use crate::extract::amazon::{dimensions_from_sides, to_mm};
use crate::http::{RateLimitedClient, RateLimiter};
use crate::region::Region;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "ProductAdvertisingAPI";
const SEARCH_PATH: &str = "/paapi5/searchitems";
const SEARCH_TARGET: &str = "com.amazon.paapi5.v1.ProductAdvertisingAPIv1.SearchItems";
const SIGNED_HEADERS: &str = "content-encoding;host;x-amz-date;x-amz-target";
const MAX_ITEM_COUNT: usize = 10;

const RESOURCES: [&str; 7] = [
    "ItemInfo.Title",
    "ItemInfo.ByLineInfo",
    "ItemInfo.ExternalIds",
    "ItemInfo.ContentInfo",
    "ItemInfo.ProductInfo",
    "ItemInfo.Classifications",
    "Images.Primary.Large",
];

/// Amazon Product Advertising API. Results are validated like scraped pages.
#[async_trait]
pub trait ProductApi: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn search_items(&self, keywords: &str, region: Region) -> Result<Vec<EnrichmentCandidate>>;
}

/// PA-API client when it is enabled and both keys are set, the stub otherwise.
pub fn product_api_from_config(config: &AppConfig) -> Result<Arc<dyn ProductApi>> {
    match PaApiClient::from_config(config)? {
        Some(client) => Ok(Arc::new(client)),
        None => Ok(Arc::new(NoProductApi::from_config(config))),
    }
}

/// Stand-in used when the API is disabled or unconfigured. Never configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProductApi;

impl NoProductApi {
    pub fn from_config(config: &AppConfig) -> Self {
        if config.amazon.pa_api.enabled {
            warn!(
                access_key_env = %config.amazon.pa_api.access_key_env,
                secret_key_env = %config.amazon.pa_api.secret_key_env,
                "amazon.pa_api.enabled is set but credentials are missing; using scraping only"
            );
        }
        Self
    }
}

#[async_trait]
impl ProductApi for NoProductApi {
    fn is_configured(&self) -> bool {
        false
    }

    async fn search_items(&self, _keywords: &str, _region: Region) -> Result<Vec<EnrichmentCandidate>> {
        Err(EnrichError::SourceUnavailable("PA-API not configured".to_string()))
    }
}

// ─── Signing ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PaApiCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for PaApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaApiCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// AWS region that signs requests for a marketplace.
pub fn aws_region(region: Region) -> &'static str {
    match region {
        Region::Us | Region::Ca | Region::Mx | Region::Br => "us-east-1",
        Region::Jp | Region::Au | Region::Sg => "us-west-2",
        _ => "eu-west-1",
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| EnrichError::Parse(format!("invalid signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `Authorization` header value for a SearchItems POST (AWS Signature V4).
pub fn sign_search_request(
    credentials: &PaApiCredentials,
    aws_region: &str,
    host: &str,
    body: &str,
    at: DateTime<Utc>,
) -> Result<String> {
    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = at.format("%Y%m%d").to_string();

    let canonical_headers = format!(
        "content-encoding:amz-1.0\nhost:{host}\nx-amz-date:{amz_date}\nx-amz-target:{SEARCH_TARGET}\n"
    );
    let canonical_request = format!(
        "POST\n{SEARCH_PATH}\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{}",
        sha256_hex(body.as_bytes())
    );
    let scope = format!("{date}/{aws_region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{}", credentials.secret_key).as_bytes(), &date)?;
    let k_region = hmac_sha256(&k_date, aws_region)?;
    let k_service = hmac_sha256(&k_region, SERVICE)?;
    let k_signing = hmac_sha256(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        credentials.access_key
    ))
}

// ─── Response ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SearchResponse {
    search_result: Option<SearchItemsResult>,
    errors: Vec<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SearchItemsResult {
    items: Vec<Item>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ApiErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Item {
    #[serde(rename = "ASIN")]
    asin: Option<String>,
    item_info: ItemInfo,
    images: Option<Images>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ItemInfo {
    title: Option<Display<String>>,
    by_line_info: Option<ByLineInfo>,
    external_ids: Option<ExternalIds>,
    content_info: Option<ContentInfo>,
    product_info: Option<ProductInfo>,
    classifications: Option<Classifications>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Display<T> {
    display_value: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ByLineInfo {
    contributors: Vec<Contributor>,
    manufacturer: Option<Display<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Contributor {
    name: String,
    role_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ExternalIds {
    #[serde(rename = "ISBNs")]
    isbns: Option<DisplayList>,
    #[serde(rename = "EANs")]
    eans: Option<DisplayList>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DisplayList {
    display_values: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ContentInfo {
    pages_count: Option<Display<u32>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ProductInfo {
    item_dimensions: Option<ItemDimensions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ItemDimensions {
    height: Option<Measure>,
    length: Option<Measure>,
    width: Option<Measure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Measure {
    display_value: f64,
    unit: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Classifications {
    product_group: Option<Display<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Images {
    primary: Option<ImageSet>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ImageSet {
    large: Option<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    #[serde(rename = "URL")]
    url: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn is_book_group(group: &str) -> bool {
    let group = group.to_lowercase();
    ["book", "livro", "libro", "livre", "buch", "boek", "książka", "kitap", "本"]
        .iter()
        .any(|word| group.contains(word))
}

impl Item {
    fn into_candidate(self) -> EnrichmentCandidate {
        let info = self.item_info;
        let by_line = info.by_line_info.unwrap_or_default();

        let authors: Vec<String> = {
            let named = |c: &&Contributor| !c.name.trim().is_empty();
            let writers: Vec<&Contributor> = by_line
                .contributors
                .iter()
                .filter(named)
                .filter(|c| c.role_type.as_deref() == Some("author"))
                .collect();
            let chosen = if writers.is_empty() {
                by_line.contributors.iter().filter(named).collect()
            } else {
                writers
            };
            chosen.into_iter().map(|c| c.name.trim().to_string()).collect()
        };

        let ids = info.external_ids.unwrap_or_default();
        let isbn = ids
            .isbns
            .and_then(|l| l.display_values.into_iter().next())
            .or_else(|| {
                ids.eans.and_then(|l| {
                    l.display_values
                        .into_iter()
                        .find(|ean| ean.starts_with("978") || ean.starts_with("979"))
                })
            });

        let dimensions = info
            .product_info
            .and_then(|p| p.item_dimensions)
            .and_then(|d| {
                let sides: Option<Vec<f64>> = [d.height, d.length, d.width]
                    .into_iter()
                    .map(|m| m.map(|m| to_mm(m.display_value, &m.unit)))
                    .collect();
                sides.and_then(dimensions_from_sides)
            });

        EnrichmentCandidate {
            asin: non_blank(self.asin),
            title: non_blank(info.title.map(|t| t.display_value)),
            isbn: non_blank(isbn),
            authors: (!authors.is_empty()).then(|| authors.join(", ")),
            thumbnail: self
                .images
                .and_then(|i| i.primary)
                .and_then(|p| p.large)
                .map(|l| l.url),
            description: None,
            dimensions,
            page_count: info.content_info.and_then(|c| c.pages_count).map(|p| p.display_value),
            publisher: non_blank(by_line.manufacturer.map(|m| m.display_value)),
            is_book: info
                .classifications
                .and_then(|c| c.product_group)
                .is_none_or(|g| is_book_group(&g.display_value)),
        }
    }
}

fn is_no_results(code: &str) -> bool {
    code == "NoResults"
}

/// Items of a SearchItems answer. `NoResults` is an empty success.
fn parse_search_response(body: &str) -> Result<Vec<EnrichmentCandidate>> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| EnrichError::Parse(format!("PA-API response: {e}")))?;
    if let Some(err) = response.errors.iter().find(|e| !is_no_results(&e.code)) {
        return Err(EnrichError::ApiError(
            "PA-API".to_string(),
            format!("{}: {}", err.code, err.message),
        ));
    }
    Ok(response
        .search_result
        .map(|r| r.items.into_iter().map(Item::into_candidate).collect())
        .unwrap_or_default())
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// SearchItems on the marketplace's `webservices` host, restricted to books.
pub struct PaApiClient {
    client: RateLimitedClient,
    credentials: PaApiCredentials,
    partner_tag: Option<String>,
    associate_tags: BTreeMap<String, String>,
    default_tag: Option<String>,
    item_count: usize,
    base_url: Option<String>,
}

impl PaApiClient {
    pub fn new(client: RateLimitedClient, credentials: PaApiCredentials) -> Self {
        Self {
            client,
            credentials,
            partner_tag: None,
            associate_tags: BTreeMap::new(),
            default_tag: None,
            item_count: MAX_ITEM_COUNT,
            base_url: None,
        }
    }

    /// `None` when the API is disabled or a key variable is unset.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>> {
        let pa = &config.amazon.pa_api;
        if !pa.enabled {
            return Ok(None);
        }
        let key = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let (Some(access_key), Some(secret_key)) = (key(&pa.access_key_env), key(&pa.secret_key_env))
        else {
            return Ok(None);
        };

        let client = RateLimitedClient::new(
            RateLimiter::new(Duration::from_millis(pa.request_delay_ms)),
            config.http.max_retries,
            &config.http.user_agent,
            Duration::from_secs(pa.request_timeout_secs),
        )?;
        let mut api = Self::new(client, PaApiCredentials { access_key, secret_key })
            .with_item_count(config.amazon.max_candidates);
        api.partner_tag = pa.partner_tag.clone();
        api.associate_tags = config
            .amazon
            .associate_tags
            .iter()
            .map(|(code, tag)| (code.to_ascii_uppercase(), tag.clone()))
            .collect();
        api.default_tag = config.amazon.default_associate_tag.clone();
        debug!(item_count = api.item_count, "PA-API client configured");
        Ok(Some(api))
    }

    pub fn with_partner_tag(mut self, tag: impl Into<String>) -> Self {
        self.partner_tag = Some(tag.into());
        self
    }

    pub fn with_item_count(mut self, count: usize) -> Self {
        self.item_count = count.clamp(1, MAX_ITEM_COUNT);
        self
    }

    /// Sends every request to `base_url` instead of the marketplace host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Explicit partner tag, else the region's associate tag, else the default.
    pub fn partner_tag_for(&self, region: Region) -> Option<&str> {
        self.partner_tag
            .as_deref()
            .or_else(|| self.associate_tags.get(region.code()).map(String::as_str))
            .or(self.default_tag.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    fn endpoint(&self, region: Region) -> String {
        match &self.base_url {
            Some(base) => format!("{}{SEARCH_PATH}", base.trim_end_matches('/')),
            None => format!("https://webservices.{}{SEARCH_PATH}", region.domain()),
        }
    }

    fn request_body(&self, keywords: &str, region: Region, tag: &str) -> String {
        json!({
            "Keywords": keywords,
            "PartnerTag": tag,
            "PartnerType": "Associates",
            "Marketplace": format!("www.{}", region.domain()),
            "SearchIndex": "Books",
            "ItemCount": self.item_count,
            "Resources": RESOURCES,
        })
        .to_string()
    }
}

fn header(name: &'static str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| EnrichError::Parse(format!("invalid {name} header: {e}")))?;
    Ok((HeaderName::from_static(name), value))
}

#[async_trait]
impl ProductApi for PaApiClient {
    fn is_configured(&self) -> bool {
        true
    }

    async fn search_items(&self, keywords: &str, region: Region) -> Result<Vec<EnrichmentCandidate>> {
        let tag = self.partner_tag_for(region).ok_or_else(|| {
            EnrichError::SourceUnavailable(format!("no partner tag for {}", region.code()))
        })?;
        let url = self.endpoint(region);
        let parsed = Url::parse(&url).map_err(|e| EnrichError::Parse(format!("invalid URL {url}: {e}")))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(EnrichError::Parse(format!("no host in {url}"))),
        };

        let body = self.request_body(keywords, region, tag);
        let now = Utc::now();
        let authorization =
            sign_search_request(&self.credentials, aws_region(region), &host, &body, now)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("amz-1.0"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        for (name, value) in [
            header("x-amz-date", &now.format("%Y%m%dT%H%M%SZ").to_string())?,
            header("x-amz-target", SEARCH_TARGET)?,
            header("authorization", &authorization)?,
        ] {
            headers.insert(name, value);
        }

        debug!(region = %region, keywords, "PA-API search");
        match self.client.post_with_headers(&url, body, headers).await {
            Ok(text) => parse_search_response(&text),
            Err(EnrichError::ApiError(_, message)) if message.contains("NoResults") => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
