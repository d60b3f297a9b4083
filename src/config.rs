//! Router configuration system
//!
//! Configuration is read from a TOML file. Secrets never live in the file:
//! each provider names the environment variable holding its API key, and the
//! variable is resolved when the provider registry is built.

use crate::llm::provider::ProviderId;
use crate::policy::Feature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default locations searched when no config path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["llm-router.toml", "config/llm-router.toml"];

/// Main router configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    pub routing: RoutingSection,
    #[serde(default)]
    pub providers: BTreeMap<ProviderId, ProviderSection>,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub cache: CacheSection,
    /// Remote policy/spend/run store; in-memory collaborators are used when absent
    pub store: Option<StoreSection>,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// Process-wide routing defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingSection {
    /// Provider used when neither policy nor caller picks one
    pub default_provider: ProviderId,
    /// Self-hosted provider mandated for secret and confidential data
    pub private_provider: Option<ProviderId>,
}

/// One backend provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSection {
    /// Environment variable containing the API key
    pub api_key_env: Option<String>,
    /// Override for the provider's base URL (required for self-hosted providers)
    pub base_url: Option<String>,
    /// Model used when no policy names one
    pub default_model: String,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_timeout_secs() -> u64 {
    120
}

/// Retry executor tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    1000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Health tracker tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_stale_after_secs() -> u64 {
    60
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// Request deduplication tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DedupSection {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_key_prefix() -> String {
    "ai:dedup:".to_string()
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// End-to-end time budgets per feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSection {
    #[serde(default = "default_brief_timeout_ms")]
    pub brief_timeout_ms: u64,
    #[serde(default = "default_chat_timeout_ms")]
    pub chat_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

/// Largest accepted per-feature budget (one day)
pub const MAX_TIMEOUT_MS: u64 = 86_400_000;

fn default_brief_timeout_ms() -> u64 {
    120_000
}

fn default_chat_timeout_ms() -> u64 {
    30_000
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            brief_timeout_ms: default_brief_timeout_ms(),
            chat_timeout_ms: default_chat_timeout_ms(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl TimeoutSection {
    /// Budget for one request of the given feature
    pub fn budget_for(&self, feature: Feature) -> Duration {
        let ms = match feature {
            Feature::BriefGeneration => self.brief_timeout_ms,
            Feature::Chat => self.chat_timeout_ms,
            _ => self.default_timeout_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Shared response cache backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSection {
    #[serde(default)]
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    /// Capacity of the process-local backend
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
}

fn default_cache_max_entries() -> u64 {
    crate::cache::DEFAULT_MAX_ENTRIES
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: None,
            max_entries: default_cache_max_entries(),
        }
    }
}

/// Remote procedure store for org policy, spend caps and run records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    pub url: String,
    /// Environment variable containing the service key
    pub service_key_env: String,
}

/// Logging defaults, overridable by LOG_LEVEL / LOG_FORMAT / LOG_SPANS
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub spans: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            spans: false,
        }
    }
}

/// Status server settings for `serve`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_probe_interval_secs() -> u64 {
    30
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RouterConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-section consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.providers.contains_key(&self.routing.default_provider) {
            return Err(ConfigError::InvalidConfig(format!(
                "default provider '{}' has no [providers.{}] section",
                self.routing.default_provider, self.routing.default_provider
            )));
        }

        if let Some(private) = self.routing.private_provider {
            if !private.is_private() {
                return Err(ConfigError::InvalidConfig(format!(
                    "private_provider '{private}' is a cloud provider"
                )));
            }
        }

        for (id, section) in &self.providers {
            if let Some(base_url) = &section.base_url {
                validate_url(&format!("providers.{id}.base_url"), base_url)?;
            }
        }

        if self.cache.backend == CacheBackend::Redis {
            match &self.cache.redis_url {
                Some(url) => validate_url("cache.redis_url", url)?,
                None => {
                    return Err(ConfigError::InvalidConfig(
                        "redis cache backend requires cache.redis_url".to_string(),
                    ))
                }
            }
        }

        if let Some(store) = &self.store {
            validate_url("store.url", &store.url)?;
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidConfig(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }

        for (field, ms) in [
            ("brief_timeout_ms", self.timeouts.brief_timeout_ms),
            ("chat_timeout_ms", self.timeouts.chat_timeout_ms),
            ("default_timeout_ms", self.timeouts.default_timeout_ms),
        ] {
            if ms == 0 || ms > MAX_TIMEOUT_MS {
                return Err(ConfigError::InvalidConfig(format!(
                    "timeouts.{field} must be between 1 and {MAX_TIMEOUT_MS}"
                )));
            }
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name
            .and_then(|name| std::env::var(name).ok())
            .filter(|value| !value.trim().is_empty())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Resolve a provider's API key from its environment variable
    pub fn provider_api_key(&self, provider: ProviderId) -> Option<String> {
        self.providers
            .get(&provider)
            .and_then(|section| Self::get_env_var_optional(section.api_key_env.as_ref()))
    }

    /// Resolve the store service key
    pub fn store_service_key(&self) -> Result<Option<String>, ConfigError> {
        self.store
            .as_ref()
            .map(|store| Self::get_env_var_required(&store.service_key_env))
            .transpose()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[routing]
default_provider = "anthropic"
private_provider = "vllm"

[providers.anthropic]
api_key_env = "ROUTER_TEST_ANTHROPIC_KEY"
default_model = "claude-3-5-sonnet-20241022"

[providers.openai]
api_key_env = "ROUTER_TEST_OPENAI_KEY"
default_model = "gpt-4o"

[providers.vllm]
base_url = "http://localhost:8000/v1"
default_model = "meta-llama/Llama-3.1-8B-Instruct"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl {
            field: field.to_string(),
            reason: e.to_string(),
        })
}
