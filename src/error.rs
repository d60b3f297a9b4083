//! Error types for the router
//!
//! `RouterError` is `Clone` so a single settled result can be handed to every
//! caller that joined the same in-flight request.

use crate::llm::provider::{LlmError, ProviderId};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const MAX_RECORDED_MESSAGE_LEN: usize = 500;

static SECRET_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret|authorization)[=:]\s*\S+")
        .expect("secret pattern is valid")
});

static BEARER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+\S+").expect("bearer pattern is valid"));

static PROVIDER_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bsk-[A-Za-z0-9_-]{8,}").expect("provider key pattern is valid")
});

/// Router-level errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    /// Routing constraints cannot be satisfied by the configured providers
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{reason}")]
    SpendCapExceeded { reason: String },

    #[error("Provider {0} not available")]
    ProviderUnavailable(ProviderId),

    #[error("LLM provider error: {0}")]
    Provider(#[from] LlmError),

    #[error("Provider {provider} failed and no fallback is available: {source}")]
    NoFallback {
        provider: ProviderId,
        source: LlmError,
    },

    #[error("Failed to start AI run: {0}")]
    RunStart(String),

    #[error("Request exceeded its {budget_ms}ms time budget")]
    Timeout { budget_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Stable short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::Configuration(_) => "configuration",
            RouterError::SpendCapExceeded { .. } => "spend_cap_exceeded",
            RouterError::ProviderUnavailable(_) => "provider_unavailable",
            RouterError::Provider(_) => "provider",
            RouterError::NoFallback { .. } => "no_fallback",
            RouterError::RunStart(_) => "run_start",
            RouterError::Timeout { .. } => "timeout",
            RouterError::Internal(_) => "internal",
        }
    }

    /// Rejections raised before any provider was contacted
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RouterError::Configuration(_) | RouterError::SpendCapExceeded { .. }
        )
    }
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Redact secret-looking fragments and bound the length of a message
/// before it is written to an audit record
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PAIR.replace_all(message, "${1}=***");
    let sanitized = BEARER_TOKEN.replace_all(&sanitized, "Bearer ***");
    let mut sanitized = PROVIDER_KEY.replace_all(&sanitized, "sk-***").into_owned();

    if sanitized.len() > MAX_RECORDED_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_RECORDED_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}
