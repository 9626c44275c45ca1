//! Code-generation oracle: an external, possibly non-deterministic service
//! that turns natural-language prompts into block code.

pub mod client;
pub mod parser;
pub mod prompts;

pub use client::OracleClient;

use crate::types::{GeneratedCode, GenerationContext};
use anyhow::Result;
use async_trait::async_trait;

/// Interface the orchestrator consumes. Implemented by [`OracleClient`]
/// for production and by scripted mocks in tests.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Generate block code from a prompt, with optional iteration context.
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&GenerationContext>,
    ) -> Result<GeneratedCode>;

    /// Regenerate code for a block that failed at execution time.
    async fn heal(
        &self,
        original_prompt: &str,
        error_message: &str,
        failed_code: &str,
    ) -> Result<GeneratedCode>;
}
