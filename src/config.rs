use crate::semantic::{DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE};
use crate::storage::{self, StorageManager};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_OPENAI_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const DEFAULT_TOP_N: usize = 10;

const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 4;
const DEFAULT_ARCHIVE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SCRAPE_PARALLELISM: usize = 8;
const DEFAULT_MAX_TEXT_LENGTH: usize = 4000;

/// Which embedding backend to use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP endpoint
    Openai,
    /// In-process fastembed model
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Local => "local",
        }
    }
}

/// Configuration for the embedding provider and batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Model name, fixed per deployment (e.g. "text-embedding-ada-002", "bge-base-en-v1.5")
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Texts per provider call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between provider calls in milliseconds
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay_ms: default_batch_delay_ms(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::Openai
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_delay_ms() -> u64 {
    DEFAULT_BATCH_DELAY.as_millis() as u64
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Ranking and review settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Number of matches returned per query
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Keep rejected ids when the reviewer switches to a new query
    #[serde(default)]
    pub carry_rejections: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            carry_rejections: false,
        }
    }
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

/// Website scraping settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Timeout for the live site request
    #[serde(default = "default_scrape_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout for the web.archive.org fallback
    #[serde(default = "default_archive_timeout_secs")]
    pub archive_timeout_secs: u64,

    /// Number of sites fetched concurrently
    #[serde(default = "default_scrape_parallelism")]
    pub parallelism: usize,

    /// Characters of page text kept per record
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: DEFAULT_SCRAPE_TIMEOUT_SECS,
            archive_timeout_secs: DEFAULT_ARCHIVE_TIMEOUT_SECS,
            parallelism: DEFAULT_SCRAPE_PARALLELISM,
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scrape_timeout_secs() -> u64 {
    DEFAULT_SCRAPE_TIMEOUT_SECS
}

fn default_archive_timeout_secs() -> u64 {
    DEFAULT_ARCHIVE_TIMEOUT_SECS
}

fn default_scrape_parallelism() -> usize {
    DEFAULT_SCRAPE_PARALLELISM
}

fn default_max_text_length() -> usize {
    DEFAULT_MAX_TEXT_LENGTH
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let emb = &self.embedding;
        if emb.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if emb.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }
        if emb.request_timeout_secs == 0 {
            bail!("embedding.request_timeout_secs must be greater than 0");
        }
        if emb.provider == ProviderKind::Openai && emb.api_base.trim().is_empty() {
            bail!("embedding.api_base must be set for the openai provider");
        }

        if self.matching.top_n == 0 {
            bail!("matching.top_n must be greater than 0");
        }

        if self.scrape.parallelism == 0 {
            bail!("scrape.parallelism must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)
            .with_context(|| format!("failed to create base directory {base_path}"))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(
                CONFIG_FILE,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_str().unwrap();

        let config = Config::load_with(base).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.embedding.provider, ProviderKind::Openai);
        assert_eq!(config.embedding.model, "text-embedding-ada-002");
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.embedding.batch_delay_ms, 1000);
        assert_eq!(config.matching.top_n, 10);
        assert!(config.scrape.enabled);
        assert_eq!(config.base_path(), base);
    }

    #[test]
    fn test_partial_config_gets_defaults_and_is_resaved() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "embedding:\n  provider: local\n  model: bge-base-en-v1.5\n").unwrap();

        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();

        assert_eq!(config.embedding.provider, ProviderKind::Local);
        assert_eq!(config.embedding.model, "bge-base-en-v1.5");
        assert_eq!(config.scrape.timeout_secs, 4);

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("archive_timeout_secs"));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "embedding:\n  batch_size: 0\n").unwrap();

        let result = Config::load_with(tmp.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_top_n() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "matching:\n  top_n: 0\n").unwrap();

        assert!(Config::load_with(tmp.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_malformed_config() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "embedding: [unclosed").unwrap();

        assert!(Config::load_with(tmp.path().to_str().unwrap()).is_err());
    }
}
