//! Provider registry
//!
//! Immutable table of the providers known to this process, built once at
//! startup from configuration. A provider is enabled when it has what it
//! needs to be called: an API key for cloud backends, a base URL for
//! self-hosted ones. Every enabled provider gets exactly one adapter.

use crate::config::RouterConfig;
use crate::llm::provider::{LlmError, LlmProvider, ProviderId};
use crate::llm::providers::{
    AnthropicConfig, AnthropicProvider, GatewayConfig, GatewayProvider, OpenAiConfig,
    OpenAiProvider,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Static description of one provider
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: String,
    pub enabled: bool,
}

impl ProviderConfig {
    /// Derive the enabled flag from the credentials and URL present
    pub fn new(
        id: ProviderId,
        api_key: Option<String>,
        base_url: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        let base_url = base_url.filter(|u| !u.trim().is_empty());
        let enabled = if id.is_private() {
            base_url.is_some()
        } else {
            api_key.is_some()
        };
        Self {
            id,
            api_key,
            base_url,
            default_model: default_model.into(),
            enabled,
        }
    }

    pub fn cloud(id: ProviderId, api_key: &str, default_model: &str) -> Self {
        Self::new(id, Some(api_key.to_string()), None, default_model)
    }

    pub fn private(id: ProviderId, base_url: &str, default_model: &str) -> Self {
        Self::new(id, None, Some(base_url.to_string()), default_model)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Provider table plus one adapter per enabled provider
pub struct ProviderRegistry {
    default_provider: ProviderId,
    private_provider: Option<ProviderId>,
    configs: BTreeMap<ProviderId, ProviderConfig>,
    adapters: HashMap<ProviderId, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new(default_provider: ProviderId, private_provider: Option<ProviderId>) -> Self {
        Self {
            default_provider,
            private_provider,
            configs: BTreeMap::new(),
            adapters: HashMap::new(),
        }
    }

    /// Build configs and adapters from the router configuration
    ///
    /// API keys are resolved from the environment here. Providers without
    /// their credential or URL are kept as disabled entries.
    pub fn from_config(config: &RouterConfig) -> Result<Self, LlmError> {
        let mut registry = Self::new(
            config.routing.default_provider,
            config.routing.private_provider,
        );

        for (id, section) in &config.providers {
            let provider_config = ProviderConfig::new(
                *id,
                config.provider_api_key(*id),
                section.base_url.clone(),
                section.default_model.clone(),
            );

            if !provider_config.enabled {
                debug!(provider = %id, "Provider disabled: credentials or base URL missing");
                registry.register_config(provider_config);
                continue;
            }

            let timeout = Duration::from_secs(section.timeout_secs);
            let adapter = build_adapter(&provider_config, timeout)?;
            info!(provider = %id, model = %provider_config.default_model, "Provider enabled");
            registry.register(provider_config, adapter);
        }

        Ok(registry)
    }

    /// Add a provider entry without an adapter
    pub fn register_config(&mut self, config: ProviderConfig) {
        self.configs.insert(config.id, config);
    }

    /// Add a provider entry with its adapter
    pub fn register(&mut self, config: ProviderConfig, adapter: Arc<dyn LlmProvider>) {
        self.adapters.insert(config.id, adapter);
        self.configs.insert(config.id, config);
    }

    pub fn default_provider(&self) -> ProviderId {
        self.default_provider
    }

    /// Config for a provider, enabled or not
    pub fn config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.configs.get(&id)
    }

    /// Config for a provider only when it is enabled
    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.configs.get(&id).filter(|c| c.enabled)
    }

    pub fn adapter(&self, id: ProviderId) -> Option<Arc<dyn LlmProvider>> {
        self.adapters.get(&id).cloned()
    }

    /// The process-wide private provider, when configured and enabled
    pub fn private_provider(&self) -> Option<&ProviderConfig> {
        self.private_provider
            .and_then(|id| self.provider_config(id))
    }

    /// First enabled self-hosted provider in fixed order
    pub fn first_enabled_private(&self) -> Option<&ProviderConfig> {
        ProviderId::PRIVATE
            .into_iter()
            .find_map(|id| self.provider_config(id))
    }

    pub fn enabled_providers(&self) -> Vec<ProviderId> {
        self.configs
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.id)
            .collect()
    }

    pub fn all_configs(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.configs.values()
    }

    pub fn adapters(&self) -> impl Iterator<Item = (ProviderId, Arc<dyn LlmProvider>)> + '_ {
        self.adapters.iter().map(|(id, a)| (*id, Arc::clone(a)))
    }
}

fn build_adapter(
    config: &ProviderConfig,
    timeout: Duration,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let adapter: Arc<dyn LlmProvider> = match config.id {
        ProviderId::Anthropic => {
            let mut anthropic = AnthropicConfig {
                api_key: config.api_key.clone().unwrap_or_default(),
                timeout,
                ..Default::default()
            };
            if let Some(base_url) = &config.base_url {
                anthropic.base_url = base_url.clone();
            }
            Arc::new(AnthropicProvider::new(anthropic)?)
        }
        ProviderId::AnythingLlm => Arc::new(GatewayProvider::new(GatewayConfig {
            base_url: config.base_url.clone().unwrap_or_default(),
            api_key: config.api_key.clone(),
            timeout,
        })?),
        id @ (ProviderId::OpenAi | ProviderId::Google | ProviderId::Vllm | ProviderId::Ollama) => {
            let mut openai = OpenAiConfig::for_provider(id);
            openai.api_key = config.api_key.clone();
            openai.timeout = timeout;
            if let Some(base_url) = &config.base_url {
                openai.base_url = base_url.trim_end_matches('/').to_string();
            }
            Arc::new(OpenAiProvider::new(openai)?)
        }
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_flag_follows_credentials() {
        assert!(ProviderConfig::cloud(ProviderId::OpenAi, "sk-test", "gpt-4o").enabled);
        assert!(!ProviderConfig::new(ProviderId::OpenAi, Some("  ".into()), None, "gpt-4o").enabled);
        assert!(ProviderConfig::private(ProviderId::Vllm, "http://vllm:8000/v1", "llama").enabled);
        // A key alone does not enable a self-hosted provider
        assert!(!ProviderConfig::new(ProviderId::Ollama, Some("k".into()), None, "llama3").enabled);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ProviderConfig::cloud(ProviderId::Anthropic, "sk-ant-secret", "claude");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-ant-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_config_builds_enabled_adapters() {
        std::env::set_var("ROUTER_TEST_ANTHROPIC_KEY", "sk-ant-test");
        std::env::remove_var("ROUTER_TEST_OPENAI_KEY");
        let config = RouterConfig::test_config();

        let registry = ProviderRegistry::from_config(&config).unwrap();

        assert!(registry.adapter(ProviderId::Anthropic).is_some());
        assert!(registry.adapter(ProviderId::Vllm).is_some());
        assert!(registry.adapter(ProviderId::OpenAi).is_none());
        assert!(registry.config(ProviderId::OpenAi).is_some());
        assert!(registry.provider_config(ProviderId::OpenAi).is_none());
        assert_eq!(
            registry.private_provider().map(|c| c.id),
            Some(ProviderId::Vllm)
        );
        assert_eq!(
            registry.enabled_providers(),
            vec![ProviderId::Anthropic, ProviderId::Vllm]
        );
    }

    #[test]
    fn test_first_enabled_private_uses_fixed_order() {
        let mut registry = ProviderRegistry::new(ProviderId::Anthropic, None);
        registry.register_config(ProviderConfig::private(
            ProviderId::AnythingLlm,
            "http://gateway:3001",
            "workspace",
        ));
        registry.register_config(ProviderConfig::private(
            ProviderId::Ollama,
            "http://ollama:11434/v1",
            "llama3",
        ));

        assert!(registry.private_provider().is_none());
        assert_eq!(
            registry.first_enabled_private().map(|c| c.id),
            Some(ProviderId::Ollama)
        );
    }
}
