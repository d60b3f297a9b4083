//! LLM provider implementations
//!
//! Concrete implementations of the LlmProvider trait for each backend family.

pub mod anthropic;
pub mod gateway;
pub mod openai;
pub mod sse;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use gateway::{GatewayConfig, GatewayProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};
