//! LLM Router
//!
//! Routes chat requests across cloud and self-hosted LLM providers while
//! enforcing per-organization data-governance and cost policies.
//!
//! # Overview
//!
//! - Provider selection by data classification, Arabic-content detection,
//!   org policy and caller preference
//! - Per-provider health tracking with failover to healthy alternatives
//! - Exponential-backoff retries for transient provider failures
//! - Deduplication of identical concurrent requests plus a shared response cache
//! - Run accounting and monthly spend-cap enforcement via an external store
//! - Streaming with a guaranteed terminal chunk
//!
//! # Quick Start
//!
//! ```no_run
//! use llm_router::config::RouterConfig;
//! use llm_router::llm::provider::Message;
//! use llm_router::policy::{DataClassification, Feature, RouterRequest};
//! use llm_router::router::{ChatOptions, LlmRouter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RouterConfig::load_from_file("llm-router.toml".as_ref())?;
//! let router = LlmRouter::from_config(&config)?;
//!
//! let request = RouterRequest::new("org-1", "user-1", Feature::BriefGeneration)
//!     .with_classification(DataClassification::Internal);
//! let response = router
//!     .chat(&request, vec![Message::user("Summarize the attached minutes")], ChatOptions::default())
//!     .await?;
//! println!("{} ({})", response.content, response.provider);
//! # Ok(())
//! # }
//! ```

pub mod accounting;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod error;
pub mod health;
pub mod llm;
pub mod observability;
pub mod policy;
pub mod registry;
pub mod retry;
pub mod router;
pub mod rpc;
pub mod testing;

pub use classifier::{detect_arabic_content, is_arabic_dominant};
pub use config::{ConfigError, RouterConfig};
pub use error::{RouterError, RouterResult};
pub use llm::provider::{LlmError, LlmProvider, LlmResponse, Message, ProviderId, StreamChunk};
pub use policy::{DataClassification, Feature, OrgPolicy, ProviderSelection, RouterRequest};
pub use router::{ChatOptions, ChatStream, LlmRouter, RouterBuilder};
