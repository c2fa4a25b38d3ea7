//! Session configuration.
//!
//! Everything here is plain data; [`SessionConfig::validate`] checks it once, when a
//! [`BuildSession`](crate::session::BuildSession) is constructed.

use rust_stemmers::Algorithm;
use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const MAX_SHARDS: u32 = 1024;
pub const DEFAULT_SHARD_COUNT: u32 = 32;
pub const DEFAULT_SHARD_BYTE_BUDGET: usize = 128 * 1024;
pub const DEFAULT_EXCERPT_LENGTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Store caller-supplied URLs verbatim instead of canonicalizing them.
    pub keep_url: bool,
    /// Attach a JSON diagnostic report to every response.
    pub verbose: bool,
    pub shard_count: u32,
    /// Soft size target for one shard artifact. Oversized shards are flagged, never split.
    pub shard_byte_budget: usize,
    /// Stemming language as an ISO 639-1 code. `None` disables stemming.
    pub language: Option<String>,
    pub drop_stopwords: bool,
    /// Excerpt length in characters.
    pub excerpt_length: usize,
    pub extraction: ExtractionPolicy,
    pub limits: ExtractionLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_url: false,
            verbose: false,
            shard_count: DEFAULT_SHARD_COUNT,
            shard_byte_budget: DEFAULT_SHARD_BYTE_BUDGET,
            language: None,
            drop_stopwords: false,
            excerpt_length: DEFAULT_EXCERPT_LENGTH,
            extraction: ExtractionPolicy::default(),
            limits: ExtractionLimits::default(),
        }
    }
}

/// Which parts of a page count as content, and which attributes carry filters and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPolicy {
    /// Elements removed together with their subtree.
    pub ignored_tags: Vec<String>,
    /// CSS selectors removed together with their subtree.
    pub exclude_selectors: Vec<String>,
    pub ignore_attribute: String,
    /// When any element carries this attribute, only marked regions are indexed.
    pub body_attribute: String,
    pub filter_attribute: String,
    pub meta_attribute: String,
    pub weight_attribute: String,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        let ignored = [
            "script", "style", "noscript", "template", "iframe", "object", "svg", "canvas", "nav",
        ];
        Self {
            ignored_tags: ignored.iter().map(|t| t.to_string()).collect(),
            exclude_selectors: Vec::new(),
            ignore_attribute: "data-index-ignore".into(),
            body_attribute: "data-index-body".into(),
            filter_attribute: "data-index-filter".into(),
            meta_attribute: "data-index-meta".into(),
            weight_attribute: "data-index-weight".into(),
        }
    }
}

/// Ceilings that keep one pathological page from stalling a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionLimits {
    pub max_html_bytes: usize,
    /// Also checked against the raw start-tag count before parsing.
    pub max_nodes: usize,
    /// Most formatting elements (`b`, `font`, `a`, ...) left open at once. The parser's
    /// formatting-element reconstruction is quadratic in this number.
    pub max_formatting_depth: usize,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_html_bytes: 8 * 1024 * 1024,
            max_nodes: 250_000,
            max_formatting_depth: 1024,
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder { SessionConfigBuilder::default() }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_count == 0 || self.shard_count > MAX_SHARDS {
            return Err(ConfigError::ShardCount(self.shard_count));
        }
        if self.shard_byte_budget == 0 {
            return Err(ConfigError::Zero { field: "shard_byte_budget" });
        }
        if self.excerpt_length == 0 {
            return Err(ConfigError::Zero { field: "excerpt_length" });
        }
        if self.limits.max_html_bytes == 0 {
            return Err(ConfigError::Zero { field: "limits.max_html_bytes" });
        }
        if self.limits.max_nodes == 0 {
            return Err(ConfigError::Zero { field: "limits.max_nodes" });
        }
        if self.limits.max_formatting_depth == 0 {
            return Err(ConfigError::Zero { field: "limits.max_formatting_depth" });
        }
        self.stemming_algorithm()?;
        self.extraction.validate()
    }

    /// Resolves `language` to a stemming algorithm; `Ok(None)` means no stemming.
    pub fn stemming_algorithm(&self) -> Result<Option<Algorithm>, ConfigError> {
        let Some(lang) = self.language.as_deref() else { return Ok(None) };
        // "en-GB" and "en_US" stem like "en"
        let primary = lang.split(['-', '_']).next().unwrap_or(lang).to_ascii_lowercase();
        let algorithm = match primary.as_str() {
            "ar" => Algorithm::Arabic,
            "da" => Algorithm::Danish,
            "de" => Algorithm::German,
            "el" => Algorithm::Greek,
            "en" => Algorithm::English,
            "es" => Algorithm::Spanish,
            "fr" => Algorithm::French,
            "hu" => Algorithm::Hungarian,
            "it" => Algorithm::Italian,
            "nl" => Algorithm::Dutch,
            "no" | "nb" => Algorithm::Norwegian,
            "pt" => Algorithm::Portuguese,
            "ro" => Algorithm::Romanian,
            "ru" => Algorithm::Russian,
            "sv" => Algorithm::Swedish,
            "ta" => Algorithm::Tamil,
            "tr" => Algorithm::Turkish,
            _ => return Err(ConfigError::Language(lang.to_string())),
        };
        Ok(Some(algorithm))
    }
}

impl ExtractionPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let attributes = [
            ("ignore_attribute", &self.ignore_attribute),
            ("body_attribute", &self.body_attribute),
            ("filter_attribute", &self.filter_attribute),
            ("meta_attribute", &self.meta_attribute),
            ("weight_attribute", &self.weight_attribute),
        ];
        for (field, value) in attributes {
            if !is_attribute_name(value) {
                return Err(ConfigError::Attribute { field, value: value.clone() });
            }
        }
        for tag in &self.ignored_tags {
            if !is_attribute_name(tag) {
                return Err(ConfigError::Attribute { field: "ignored_tags", value: tag.clone() });
            }
        }
        self.selectors().map(|_| ())
    }

    /// Parses `exclude_selectors`.
    pub fn selectors(&self) -> Result<Vec<Selector>, ConfigError> {
        self.exclude_selectors
            .iter()
            .map(|s| {
                Selector::parse(s).map_err(|e| ConfigError::Selector {
                    selector: s.clone(),
                    reason: format!("{e:?}"),
                })
            })
            .collect()
    }
}

fn is_attribute_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn keep_url(mut self, keep: bool) -> Self {
        self.config.keep_url = keep;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn shard_count(mut self, count: u32) -> Self {
        self.config.shard_count = count;
        self
    }

    pub fn shard_byte_budget(mut self, bytes: usize) -> Self {
        self.config.shard_byte_budget = bytes;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = Some(lang.into());
        self
    }

    pub fn drop_stopwords(mut self, drop: bool) -> Self {
        self.config.drop_stopwords = drop;
        self
    }

    pub fn excerpt_length(mut self, chars: usize) -> Self {
        self.config.excerpt_length = chars;
        self
    }

    pub fn extraction(mut self, policy: ExtractionPolicy) -> Self {
        self.config.extraction = policy;
        self
    }

    pub fn limits(mut self, limits: ExtractionLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn exclude_selector(mut self, selector: impl Into<String>) -> Self {
        self.config.extraction.exclude_selectors.push(selector.into());
        self
    }

    pub fn build(self) -> SessionConfig { self.config }
}
