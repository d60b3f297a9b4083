//! Observability: structured logging, router metrics and the status server

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::StatusServer;
pub use logging::{init_default_logging, init_logging, init_logging_from_config, LogFormat};
pub use metrics::{MetricsSnapshot, RouterMetrics};

// Span macros for structured logging
pub use logging::{provider_span, request_span};
