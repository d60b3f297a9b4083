//! Testing utilities and mock implementations
//!
//! Scripted providers and failing collaborators for exercising the router
//! without network access to LLM backends or the policy store.

pub mod mocks;

pub use mocks::*;
