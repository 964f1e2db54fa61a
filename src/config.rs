/// Configuration module for sitefeed.
///
/// Handles loading, validating, and providing default configuration values.
/// Configuration lives in a single JSON file; a missing file falls back to
/// defaults and generates a template at the default path.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./sitefeed.db".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_pages() -> usize {
    200
}

fn default_word_budget() -> usize {
    500
}

fn default_summary_words() -> usize {
    40
}

fn default_search_top_k() -> usize {
    10
}

fn default_page_size_max() -> usize {
    50
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_crawl_interval_secs() -> u64 {
    3600
}

fn default_crawl_workers() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_fetch_retries() -> usize {
    2
}

fn default_inline_update_max() -> usize {
    10
}

fn default_update_queue_depth() -> usize {
    64
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_embed_timeout_secs() -> u64 {
    10
}

fn default_embed_retries() -> usize {
    2
}

fn default_deny_tokens() -> Vec<String> {
    [
        "comment", "sidebar", "related", "share", "social", "advert",
        "widget", "cookie", "promo", "newsletter", "breadcrumb",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Base URL of the site to index, e.g. "https://example.com".
    #[serde(default)]
    pub site_url: String,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Shared secret for POST /update. No auth when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_token: Option<String>,

    #[serde(default)]
    pub crawl: CrawlConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub serve: ServeConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub extract: ExtractConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_crawl_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_crawl_workers")]
    pub workers: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_word_budget")]
    pub word_budget: usize,

    #[serde(default = "default_summary_words")]
    pub summary_words: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServeConfig {
    #[serde(default = "default_page_size_max")]
    pub page_size_max: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_inline_update_max")]
    pub inline_update_max: usize,

    #[serde(default = "default_update_queue_depth")]
    pub update_queue_depth: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible base URL ("{endpoint}/embeddings" is called).
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Environment variable holding the API key. Empty key → mock embedder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_embed_retries")]
    pub retries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractConfig {
    /// Class/id substrings marking boilerplate containers to drop.
    #[serde(default = "default_deny_tokens")]
    pub deny_tokens: Vec<String>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            db_path: default_db_path(),
            bind: default_bind(),
            update_token: None,
            crawl: CrawlConfig::default(),
            chunking: ChunkingConfig::default(),
            serve: ServeConfig::default(),
            embedding: EmbeddingConfig::default(),
            extract: ExtractConfig::default(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            interval_secs: default_crawl_interval_secs(),
            workers: default_crawl_workers(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_retries: default_fetch_retries(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            word_budget: default_word_budget(),
            summary_words: default_summary_words(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            page_size_max: default_page_size_max(),
            search_top_k: default_search_top_k(),
            cache_ttl_secs: default_cache_ttl_secs(),
            inline_update_max: default_inline_update_max(),
            update_queue_depth: default_update_queue_depth(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            api_key_env: None,
            timeout_secs: default_embed_timeout_secs(),
            retries: default_embed_retries(),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            deny_tokens: default_deny_tokens(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and generates
    /// a template file at the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.site_url.is_empty(), "site_url must be set");
        let parsed = url::Url::parse(&self.site_url)
            .with_context(|| format!("site_url is not a valid URL: {}", self.site_url))?;
        anyhow::ensure!(
            matches!(parsed.scheme(), "http" | "https"),
            "site_url must be http or https"
        );
        anyhow::ensure!(parsed.host_str().is_some(), "site_url must have a host");
        anyhow::ensure!(self.crawl.max_pages > 0, "crawl.max_pages must be positive");
        anyhow::ensure!(self.crawl.workers > 0, "crawl.workers must be positive");
        anyhow::ensure!(
            self.chunking.word_budget > 0,
            "chunking.word_budget must be positive"
        );
        anyhow::ensure!(
            self.serve.page_size_max > 0,
            "serve.page_size_max must be positive"
        );
        anyhow::ensure!(
            self.serve.search_top_k > 0,
            "serve.search_top_k must be positive"
        );
        anyhow::ensure!(
            self.serve.update_queue_depth > 0,
            "serve.update_queue_depth must be positive"
        );
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        Ok(())
    }

    /// The configured site base URL, parsed. Call after `validate()`.
    pub fn base_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.site_url).context("invalid site_url")
    }
}

// ── Tests ────────────────────────────────────────────────────────────
