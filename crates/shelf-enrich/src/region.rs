use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EnrichError;

/// Amazon marketplaces a book can be matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Us,
    Br,
    Uk,
    Ca,
    De,
    Fr,
    It,
    Es,
    Jp,
    In,
    Mx,
    Au,
    Nl,
    Se,
    Pl,
    Tr,
    Ae,
    Sa,
    Sg,
    Eg,
    Be,
}

/// Static marketplace description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionConfig {
    pub code: &'static str,
    pub name: &'static str,
    pub domain: &'static str,
    pub language: &'static str,
    pub accept_language: &'static str,
}

impl RegionConfig {
    pub fn base_url(&self) -> String {
        format!("https://www.{}", self.domain)
    }

    pub fn search_url(&self) -> String {
        format!("https://www.{}/s", self.domain)
    }

    pub fn product_url(&self, asin: &str) -> String {
        format!("https://www.{}/dp/{}", self.domain, asin)
    }
}

macro_rules! region {
    ($code:literal, $name:literal, $domain:literal, $lang:literal, $accept:literal) => {
        RegionConfig {
            code: $code,
            name: $name,
            domain: $domain,
            language: $lang,
            accept_language: $accept,
        }
    };
}

static US: RegionConfig = region!("US", "United States", "amazon.com", "en-US", "en-US,en;q=0.9");
static BR: RegionConfig = region!("BR", "Brazil", "amazon.com.br", "pt-BR", "pt-BR,pt;q=0.9,en;q=0.8");
static UK: RegionConfig = region!("UK", "United Kingdom", "amazon.co.uk", "en-GB", "en-GB,en;q=0.9");
static CA: RegionConfig = region!("CA", "Canada", "amazon.ca", "en-CA", "en-CA,en;q=0.9,fr-CA;q=0.8");
static DE: RegionConfig = region!("DE", "Germany", "amazon.de", "de-DE", "de-DE,de;q=0.9,en;q=0.8");
static FR: RegionConfig = region!("FR", "France", "amazon.fr", "fr-FR", "fr-FR,fr;q=0.9,en;q=0.8");
static IT: RegionConfig = region!("IT", "Italy", "amazon.it", "it-IT", "it-IT,it;q=0.9,en;q=0.8");
static ES: RegionConfig = region!("ES", "Spain", "amazon.es", "es-ES", "es-ES,es;q=0.9,en;q=0.8");
static JP: RegionConfig = region!("JP", "Japan", "amazon.co.jp", "ja-JP", "ja-JP,ja;q=0.9,en;q=0.8");
static IN: RegionConfig = region!("IN", "India", "amazon.in", "en-IN", "en-IN,en;q=0.9,hi;q=0.8");
static MX: RegionConfig = region!("MX", "Mexico", "amazon.com.mx", "es-MX", "es-MX,es;q=0.9,en;q=0.8");
static AU: RegionConfig = region!("AU", "Australia", "amazon.com.au", "en-AU", "en-AU,en;q=0.9");
static NL: RegionConfig = region!("NL", "Netherlands", "amazon.nl", "nl-NL", "nl-NL,nl;q=0.9,en;q=0.8");
static SE: RegionConfig = region!("SE", "Sweden", "amazon.se", "sv-SE", "sv-SE,sv;q=0.9,en;q=0.8");
static PL: RegionConfig = region!("PL", "Poland", "amazon.pl", "pl-PL", "pl-PL,pl;q=0.9,en;q=0.8");
static TR: RegionConfig = region!("TR", "Turkey", "amazon.com.tr", "tr-TR", "tr-TR,tr;q=0.9,en;q=0.8");
static AE: RegionConfig = region!("AE", "United Arab Emirates", "amazon.ae", "ar-AE", "ar-AE,ar;q=0.9,en;q=0.8");
static SA: RegionConfig = region!("SA", "Saudi Arabia", "amazon.sa", "ar-SA", "ar-SA,ar;q=0.9,en;q=0.8");
static SG: RegionConfig = region!("SG", "Singapore", "amazon.sg", "en-SG", "en-SG,en;q=0.9");
static EG: RegionConfig = region!("EG", "Egypt", "amazon.eg", "ar-EG", "ar-EG,ar;q=0.9,en;q=0.8");
static BE: RegionConfig = region!("BE", "Belgium", "amazon.com.be", "fr-BE", "fr-BE,nl-BE;q=0.9,fr;q=0.8,en;q=0.7");

impl Region {
    pub const ALL: [Region; 21] = [
        Region::Us,
        Region::Br,
        Region::Uk,
        Region::Ca,
        Region::De,
        Region::Fr,
        Region::It,
        Region::Es,
        Region::Jp,
        Region::In,
        Region::Mx,
        Region::Au,
        Region::Nl,
        Region::Se,
        Region::Pl,
        Region::Tr,
        Region::Ae,
        Region::Sa,
        Region::Sg,
        Region::Eg,
        Region::Be,
    ];

    pub fn config(self) -> &'static RegionConfig {
        match self {
            Region::Us => &US,
            Region::Br => &BR,
            Region::Uk => &UK,
            Region::Ca => &CA,
            Region::De => &DE,
            Region::Fr => &FR,
            Region::It => &IT,
            Region::Es => &ES,
            Region::Jp => &JP,
            Region::In => &IN,
            Region::Mx => &MX,
            Region::Au => &AU,
            Region::Nl => &NL,
            Region::Se => &SE,
            Region::Pl => &PL,
            Region::Tr => &TR,
            Region::Ae => &AE,
            Region::Sa => &SA,
            Region::Sg => &SG,
            Region::Eg => &EG,
            Region::Be => &BE,
        }
    }

    pub fn code(self) -> &'static str {
        self.config().code
    }

    pub fn domain(self) -> &'static str {
        self.config().domain
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = EnrichError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        let code = if code == "GB" { "UK".to_string() } else { code };
        Region::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .ok_or_else(|| EnrichError::Parse(format!("unknown region code: {s}")))
    }
}

// Full locale tags first, then bare language subtags.
const LOCALE_MAP: &[(&str, Region)] = &[
    ("en-us", Region::Us),
    ("en-gb", Region::Uk),
    ("en-uk", Region::Uk),
    ("en-ca", Region::Ca),
    ("fr-ca", Region::Ca),
    ("en-in", Region::In),
    ("hi-in", Region::In),
    ("en-au", Region::Au),
    ("en-nz", Region::Au),
    ("en-sg", Region::Sg),
    ("zh-sg", Region::Sg),
    ("en-ae", Region::Ae),
    ("ar-ae", Region::Ae),
    ("ar-sa", Region::Sa),
    ("ar-eg", Region::Eg),
    ("pt-br", Region::Br),
    ("pt-pt", Region::Es),
    ("es-es", Region::Es),
    ("es-mx", Region::Mx),
    ("es-us", Region::Us),
    ("de-de", Region::De),
    ("de-at", Region::De),
    ("de-ch", Region::De),
    ("fr-fr", Region::Fr),
    ("fr-ch", Region::Fr),
    ("fr-be", Region::Be),
    ("nl-be", Region::Be),
    ("nl-nl", Region::Nl),
    ("it-it", Region::It),
    ("ja-jp", Region::Jp),
    ("sv-se", Region::Se),
    ("pl-pl", Region::Pl),
    ("tr-tr", Region::Tr),
    ("en", Region::Us),
    ("pt", Region::Br),
    ("es", Region::Es),
    ("de", Region::De),
    ("fr", Region::Fr),
    ("it", Region::It),
    ("ja", Region::Jp),
    ("hi", Region::In),
    ("nl", Region::Nl),
    ("sv", Region::Se),
    ("pl", Region::Pl),
    ("tr", Region::Tr),
    ("ar", Region::Sa),
];

fn lookup(tag: &str) -> Option<Region> {
    LOCALE_MAP
        .iter()
        .find(|(locale, _)| *locale == tag)
        .map(|(_, region)| *region)
}

/// Maps a language tag to a marketplace. Total: unknown input yields the default.
#[derive(Debug, Clone, Copy)]
pub struct RegionResolver {
    default: Region,
}

impl Default for RegionResolver {
    fn default() -> Self {
        Self::new(Region::Us)
    }
}

impl RegionResolver {
    pub fn new(default: Region) -> Self {
        Self { default }
    }

    /// Builds a resolver from a configured region code, falling back to `US`
    /// when the code is not recognised.
    pub fn from_code(code: &str) -> Self {
        Self::new(code.parse().unwrap_or(Region::Us))
    }

    pub fn default_region(&self) -> Region {
        self.default
    }

    pub fn resolve(&self, language: Option<&str>) -> Region {
        let Some(raw) = language else {
            return self.default;
        };
        let tag = raw.trim().to_lowercase().replace('_', "-");
        if tag.is_empty() {
            return self.default;
        }
        if let Some(region) = lookup(&tag) {
            return region;
        }
        let primary = tag.split('-').next().unwrap_or_default();
        lookup(primary).unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_locale_matches() {
        let r = RegionResolver::default();
        assert_eq!(r.resolve(Some("pt-BR")), Region::Br);
        assert_eq!(r.resolve(Some("en_GB")), Region::Uk);
        assert_eq!(r.resolve(Some("fr-CA")), Region::Ca);
        assert_eq!(r.resolve(Some("nl-BE")), Region::Be);
        assert_eq!(r.resolve(Some("es-MX")), Region::Mx);
        assert_eq!(r.resolve(Some("ar-EG")), Region::Eg);
    }

    #[test]
    fn primary_subtag_fallback() {
        let r = RegionResolver::default();
        assert_eq!(r.resolve(Some("pt")), Region::Br);
        assert_eq!(r.resolve(Some("de-LU")), Region::De);
        assert_eq!(r.resolve(Some("en-IE")), Region::Us);
        assert_eq!(r.resolve(Some("ja_JP.UTF-8")), Region::Jp);
    }

    #[test]
    fn unknown_and_empty_use_default() {
        let r = RegionResolver::default();
        assert_eq!(r.resolve(None), Region::Us);
        assert_eq!(r.resolve(Some("")), Region::Us);
        assert_eq!(r.resolve(Some("xx-YY")), Region::Us);

        let br = RegionResolver::from_code("br");
        assert_eq!(br.resolve(Some("klingon")), Region::Br);
        assert_eq!(RegionResolver::from_code("nope").default_region(), Region::Us);
    }

    #[test]
    fn resolution_is_total() {
        let r = RegionResolver::default();
        for input in ["", "-", "_", "--pt", "😀", "EN-us", "  pt_br  ", "a-b-c-d"] {
            let region = r.resolve(Some(input));
            assert!(Region::ALL.contains(&region));
        }
    }

    #[test]
    fn region_urls() {
        let br = Region::Br.config();
        assert_eq!(br.search_url(), "https://www.amazon.com.br/s");
        assert_eq!(br.product_url("8525406554"), "https://www.amazon.com.br/dp/8525406554");
        assert!(br.accept_language.starts_with("pt-BR"));
    }

    #[test]
    fn region_code_parse() {
        assert_eq!("uk".parse::<Region>().unwrap(), Region::Uk);
        assert_eq!("GB".parse::<Region>().unwrap(), Region::Uk);
        assert!("ZZ".parse::<Region>().is_err());
        for region in Region::ALL {
            assert_eq!(region.code().parse::<Region>().unwrap(), region);
        }
    }
}
