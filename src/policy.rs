//! Provider selection policy
//!
//! Decides which provider and model serve a request. Classification
//! constraints always win: secret data, and confidential data without an
//! explicit cloud allowance, can only ever be routed to a self-hosted
//! provider. After that come Arabic-language routing, the caller's
//! preference, and finally the org or process-wide defaults.

use crate::accounting::PolicyStore;
use crate::classifier::{is_arabic_dominant, DEFAULT_ARABIC_THRESHOLD};
use crate::error::{RouterError, RouterResult};
use crate::health::HealthTracker;
use crate::llm::provider::ProviderId;
use crate::registry::ProviderRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Application feature issuing the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    BriefGeneration,
    Chat,
    EntityLinking,
    SemanticSearch,
    Embeddings,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::BriefGeneration => "brief_generation",
            Feature::Chat => "chat",
            Feature::EntityLinking => "entity_linking",
            Feature::SemanticSearch => "semantic_search",
            Feature::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brief_generation" => Ok(Feature::BriefGeneration),
            "chat" => Ok(Feature::Chat),
            "entity_linking" => Ok(Feature::EntityLinking),
            "semantic_search" => Ok(Feature::SemanticSearch),
            "embeddings" => Ok(Feature::Embeddings),
            other => Err(format!("unknown feature '{other}'")),
        }
    }
}

/// Sensitivity tier of request content, ordered from least to most sensitive
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    #[default]
    Internal,
    Confidential,
    Secret,
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataClassification::Public => "public",
            DataClassification::Internal => "internal",
            DataClassification::Confidential => "confidential",
            DataClassification::Secret => "secret",
        };
        f.write_str(name)
    }
}

impl FromStr for DataClassification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(DataClassification::Public),
            "internal" => Ok(DataClassification::Internal),
            "confidential" => Ok(DataClassification::Confidential),
            "secret" => Ok(DataClassification::Secret),
            other => Err(format!("unknown classification '{other}'")),
        }
    }
}

/// Per-organization routing policy, fetched fresh for every request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgPolicy {
    pub default_provider: Option<ProviderId>,
    pub default_model: Option<String>,
    pub arabic_provider: Option<ProviderId>,
    pub arabic_model: Option<String>,
    #[serde(default)]
    pub allow_cloud_for_confidential: bool,
    pub private_provider: Option<ProviderId>,
    pub private_model: Option<String>,
    pub private_endpoint_url: Option<String>,
    pub monthly_spend_cap_usd: Option<f64>,
}

/// Routing context attached to every router call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterRequest {
    pub org_id: String,
    pub user_id: String,
    pub feature: Feature,
    /// Treated as `internal` when absent
    pub classification: Option<DataClassification>,
    pub preferred_provider: Option<ProviderId>,
    /// Prepended as a system message when the conversation has none
    pub system_prompt: Option<String>,
}

impl RouterRequest {
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>, feature: Feature) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: user_id.into(),
            feature,
            classification: None,
            preferred_provider: None,
            system_prompt: None,
        }
    }

    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_preferred_provider(mut self, provider: ProviderId) -> Self {
        self.preferred_provider = Some(provider);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn effective_classification(&self) -> DataClassification {
        self.classification.unwrap_or_default()
    }
}

/// Why a selection was made; reported in run metadata and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    SecretData,
    ConfidentialData,
    ArabicContent,
    CallerPreference,
    OrgDefault,
    SystemDefault,
    Fallback,
}

/// Outcome of provider selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSelection {
    pub provider: ProviderId,
    pub model: String,
    pub endpoint: Option<String>,
    pub reason: SelectionReason,
}

impl ProviderSelection {
    /// Selections made for classification reasons must never leave private capacity
    pub fn requires_private(&self) -> bool {
        matches!(
            self.reason,
            SelectionReason::SecretData | SelectionReason::ConfidentialData
        )
    }
}

/// Resolves provider selections from classification, content, policy and defaults
pub struct PolicyResolver {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn PolicyStore>,
    health: Arc<HealthTracker>,
}

impl PolicyResolver {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn PolicyStore>,
        health: Arc<HealthTracker>,
    ) -> Self {
        Self {
            registry,
            store,
            health,
        }
    }

    /// Fetch the org policy; store failures degrade to "no policy"
    pub async fn get_org_policy(&self, org_id: &str) -> Option<OrgPolicy> {
        match self.store.get_org_policy(org_id).await {
            Ok(policy) => policy,
            Err(e) => {
                warn!(org_id = %org_id, error = %e, "Failed to fetch org policy, using defaults");
                None
            }
        }
    }

    /// Pick the provider and model for one request
    pub async fn select_provider(
        &self,
        request: &RouterRequest,
        input_text: &str,
    ) -> RouterResult<ProviderSelection> {
        let policy = self.get_org_policy(&request.org_id).await;
        let classification = request.effective_classification();

        match classification {
            DataClassification::Secret => {
                return self
                    .private_selection(policy.as_ref(), SelectionReason::SecretData)
                    .ok_or_else(|| {
                        RouterError::Configuration(
                            "secret data requires private LLM but none configured".to_string(),
                        )
                    });
            }
            DataClassification::Confidential
                if !policy
                    .as_ref()
                    .is_some_and(|p| p.allow_cloud_for_confidential) =>
            {
                return self
                    .private_selection(policy.as_ref(), SelectionReason::ConfidentialData)
                    .ok_or_else(|| {
                        RouterError::Configuration(
                            "confidential data routing requires private LLM but none configured"
                                .to_string(),
                        )
                    });
            }
            _ => {}
        }

        if let Some(policy) = &policy {
            if let (Some(provider), Some(model)) = (policy.arabic_provider, &policy.arabic_model) {
                if is_arabic_dominant(input_text, DEFAULT_ARABIC_THRESHOLD) {
                    debug!(provider = %provider, "Routing Arabic-dominant content");
                    return Ok(ProviderSelection {
                        provider,
                        model: model.clone(),
                        endpoint: None,
                        reason: SelectionReason::ArabicContent,
                    });
                }
            }
        }

        if let Some(preferred) = request.preferred_provider {
            if let Some(config) = self.registry.provider_config(preferred) {
                return Ok(ProviderSelection {
                    provider: preferred,
                    model: config.default_model.clone(),
                    endpoint: config.base_url.clone(),
                    reason: SelectionReason::CallerPreference,
                });
            }
            debug!(provider = %preferred, "Preferred provider not enabled, ignoring");
        }

        if let Some(provider) = policy.as_ref().and_then(|p| p.default_provider) {
            let model = policy
                .as_ref()
                .and_then(|p| p.default_model.clone())
                .or_else(|| {
                    self.registry
                        .config(provider)
                        .map(|c| c.default_model.clone())
                })
                .unwrap_or_default();
            return Ok(ProviderSelection {
                provider,
                model,
                endpoint: None,
                reason: SelectionReason::OrgDefault,
            });
        }

        let provider = self.registry.default_provider();
        let model = self
            .registry
            .config(provider)
            .map(|c| c.default_model.clone())
            .unwrap_or_default();
        Ok(ProviderSelection {
            provider,
            model,
            endpoint: None,
            reason: SelectionReason::SystemDefault,
        })
    }

    /// Find a replacement for a provider that just failed
    ///
    /// The org's private provider is preferred whenever it differs from the
    /// failed one; otherwise the first configured, healthy cloud provider wins.
    pub async fn get_fallback_provider(
        &self,
        request: &RouterRequest,
        exclude: ProviderId,
    ) -> Option<ProviderSelection> {
        let policy = self.get_org_policy(&request.org_id).await;

        if let Some(policy) = &policy {
            if let Some(private) = policy.private_provider.filter(|p| *p != exclude) {
                let model = policy
                    .private_model
                    .clone()
                    .or_else(|| self.registry.config(private).map(|c| c.default_model.clone()))
                    .unwrap_or_default();
                return Some(ProviderSelection {
                    provider: private,
                    model,
                    endpoint: policy.private_endpoint_url.clone(),
                    reason: SelectionReason::Fallback,
                });
            }
        }

        for candidate in ProviderId::CLOUD_FALLBACK_ORDER {
            if candidate == exclude {
                continue;
            }
            if let Some(config) = self.registry.provider_config(candidate) {
                if self.health.is_healthy(candidate) {
                    return Some(ProviderSelection {
                        provider: candidate,
                        model: config.default_model.clone(),
                        endpoint: config.base_url.clone(),
                        reason: SelectionReason::Fallback,
                    });
                }
            }
        }

        info!(excluded = %exclude, "No fallback provider available");
        None
    }

    /// Fallback restricted to private capacity, for classification-bound requests
    pub async fn get_private_fallback(
        &self,
        request: &RouterRequest,
        exclude: ProviderId,
    ) -> Option<ProviderSelection> {
        let policy = self.get_org_policy(&request.org_id).await;

        let policy_private = policy
            .as_ref()
            .and_then(|p| p.private_provider)
            .filter(|p| p.is_private() && *p != exclude);

        let candidate = policy_private.or_else(|| {
            ProviderId::PRIVATE
                .into_iter()
                .find(|p| *p != exclude && self.registry.provider_config(*p).is_some())
        })?;

        let from_policy = policy_private == Some(candidate);
        let config = self.registry.provider_config(candidate);
        let model = policy
            .as_ref()
            .filter(|_| from_policy)
            .and_then(|p| p.private_model.clone())
            .or_else(|| config.map(|c| c.default_model.clone()))
            .unwrap_or_default();
        let endpoint = policy
            .as_ref()
            .filter(|_| from_policy)
            .and_then(|p| p.private_endpoint_url.clone())
            .or_else(|| config.and_then(|c| c.base_url.clone()));

        Some(ProviderSelection {
            provider: candidate,
            model,
            endpoint,
            reason: SelectionReason::Fallback,
        })
    }

    /// Resolve the mandated private provider, if any can serve the request
    ///
    /// The process-wide private provider wins, then the org's own private
    /// provider, then any enabled self-hosted backend.
    fn private_selection(
        &self,
        policy: Option<&OrgPolicy>,
        reason: SelectionReason,
    ) -> Option<ProviderSelection> {
        let policy_private = policy
            .and_then(|p| p.private_provider)
            .filter(|p| p.is_private() && self.registry.provider_config(*p).is_some());

        let config = self
            .registry
            .private_provider()
            .or_else(|| policy_private.and_then(|p| self.registry.provider_config(p)))
            .or_else(|| self.registry.first_enabled_private())?;

        let org_override = policy.filter(|p| p.private_provider == Some(config.id));
        Some(ProviderSelection {
            provider: config.id,
            model: org_override
                .and_then(|p| p.private_model.clone())
                .unwrap_or_else(|| config.default_model.clone()),
            endpoint: org_override
                .and_then(|p| p.private_endpoint_url.clone())
                .or_else(|| config.base_url.clone()),
            reason,
        })
    }
}
