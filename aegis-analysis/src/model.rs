//! Model seam used by the analysis delegate.

use async_trait::async_trait;
use thiserror::Error;

/// Result alias used by model adapters.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failures reported by model adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Adapter settings are unusable.
    #[error("adapter not configured: {0}")]
    Configuration(String),

    /// Network failure or timeout before a reply arrived.
    #[error("model unreachable: {0}")]
    Transport(String),

    /// The model server answered with an error or an undecodable body.
    #[error("unusable model reply: {0}")]
    Response(String),
}

/// One scoring exchange: fixed instructions plus the analysis prompt.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoringRequest {
    /// Instructions sent ahead of the prompt.
    pub instructions: String,
    /// Prompt naming the analysis and embedding the content.
    pub prompt: String,
    /// Reply length cap, in tokens.
    pub max_output_tokens: u32,
    /// Sampling temperature; scoring uses `0.0`.
    pub temperature: f32,
}

/// Chat model able to answer a scoring request with plain text.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Returns the model name, for logs.
    fn model(&self) -> &str;

    /// Sends `request` and returns the full reply text.
    async fn complete(&self, request: &ScoringRequest) -> AdapterResult<String>;
}
