//! LLM provider abstraction layer
//!
//! This module provides a provider-agnostic interface for LLM interactions
//! with adapters for cloud APIs and self-hosted backends.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
