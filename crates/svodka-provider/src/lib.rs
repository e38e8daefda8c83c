pub mod openai;
pub mod prompts;
pub mod strict;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::OpenAiProvider;
pub use prompts::PromptSet;
pub use strict::StrictCaller;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Ask the endpoint for structured/JSON output mode.
    pub json_mode: bool,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network, timeout or handshake trouble after internal retries.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The provider rejected the request shape itself; retrying or
    /// repairing the output cannot help.
    #[error("upstream rejected request: {0}")]
    Rejected(String),
}

/// An endpoint that takes one system+user turn and yields the textual
/// content of the completion. Any provider exposing the OpenAI envelope
/// or SSE stream shape is substitutable.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String, ProviderError>;
}
