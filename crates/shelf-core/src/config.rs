use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Root application configuration, loaded from `~/.config/shelf/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub http: HttpConfig,
    pub amazon: AmazonConfig,
    pub google_books: GoogleBooksConfig,
    pub open_library: OpenLibraryConfig,
    pub matching: MatchingConfig,
    pub search: SearchConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_path: String,
    pub cache_dir: String,
    /// Marketplace used when a book's language maps to nothing.
    pub default_region: String,
}

/// Shared by the JSON API clients. Amazon page scraping has its own user agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmazonConfig {
    /// Associate tag per region code (`US`, `BR`, ...).
    pub associate_tags: BTreeMap<String, String>,
    pub default_associate_tag: Option<String>,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_candidates: usize,
    pub user_agent: String,
    pub pa_api: PaApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaApiConfig {
    pub enabled: bool,
    pub partner_tag: Option<String>,
    pub access_key_env: String,
    pub secret_key_env: String,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleBooksConfig {
    pub api_key_env: String,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_results: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenLibraryConfig {
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
}

/// Similarity thresholds, one per call site.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Cheap check on search-result titles before fetching a product page.
    pub prefilter_threshold: f64,
    /// Title similarity required on an Amazon product page.
    pub title_threshold: f64,
    /// Author string similarity used when word overlap fails.
    pub author_threshold: f64,
    /// Title similarity required for a Google Books volume.
    pub google_title_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub success_ttl_secs: u64,
    pub failure_ttl_secs: u64,
    pub default_max_results: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToggle {
    pub enabled: bool,
    /// Lower runs first.
    pub priority: u32,
}

impl Default for ProviderToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub google_books: ProviderToggle,
    pub open_library: ProviderToggle,
    pub amazon: ProviderToggle,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("shelf");
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("shelf");

        Self {
            database_path: data_dir.join("shelf.db").to_string_lossy().to_string(),
            cache_dir: cache_dir.to_string_lossy().to_string(),
            default_region: "US".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("shelf/", env!("CARGO_PKG_VERSION")).to_string(),
            max_retries: 2,
        }
    }
}

impl Default for AmazonConfig {
    fn default() -> Self {
        Self {
            associate_tags: BTreeMap::new(),
            default_associate_tag: None,
            request_delay_ms: 3000,
            request_timeout_secs: 15,
            max_candidates: 5,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            pa_api: PaApiConfig::default(),
        }
    }
}

impl Default for PaApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            partner_tag: None,
            access_key_env: "AMAZON_PAAPI_ACCESS_KEY".to_string(),
            secret_key_env: "AMAZON_PAAPI_SECRET_KEY".to_string(),
            request_delay_ms: 1000,
            request_timeout_secs: 10,
        }
    }
}

impl Default for GoogleBooksConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GOOGLE_BOOKS_API_KEY".to_string(),
            request_delay_ms: 1000,
            request_timeout_secs: 10,
            max_results: 10,
        }
    }
}

impl Default for OpenLibraryConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 500,
            request_timeout_secs: 10,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            prefilter_threshold: 0.5,
            title_threshold: 0.6,
            author_threshold: 0.7,
            google_title_threshold: 0.7,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            success_ttl_secs: 24 * 60 * 60,
            failure_ttl_secs: 60 * 60,
            default_max_results: 10,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            google_books: ProviderToggle {
                enabled: true,
                priority: 1,
            },
            open_library: ProviderToggle {
                enabled: true,
                priority: 2,
            },
            amazon: ProviderToggle {
                enabled: false,
                priority: 3,
            },
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/shelf/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SHELF_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("shelf")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SHELF_DATABASE") {
            self.core.database_path = path;
        }
        if let Ok(dir) = std::env::var("SHELF_CACHE_DIR") {
            self.core.cache_dir = dir;
        }
    }

    // ─── Derived values ────────────────────────────────────

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.core.database_path)
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.core.cache_dir)
    }

    /// Associate tag for a region, falling back to the default tag.
    pub fn associate_tag(&self, region_code: &str) -> Option<String> {
        self.amazon
            .associate_tags
            .get(&region_code.to_ascii_uppercase())
            .cloned()
            .or_else(|| self.amazon.default_associate_tag.clone())
            .filter(|tag| !tag.trim().is_empty())
    }

    pub fn google_api_key(&self) -> Option<String> {
        std::env::var(&self.google_books.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}
