//! Generative backend traits
//!
//! A backend turns a prompt into a channel of [`StreamingToken`]s. The
//! generation handlers relay those tokens to the surface as stream envelopes
//! and never look at provider details.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Token stream events from a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A fragment of the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (may differ from concatenated tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// A generation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Prompt text
    pub prompt: String,
    /// Backend-specific model identifier
    pub model: String,
}

impl GenerationRequest {
    /// Create a request
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
        }
    }
}

/// A producer of streamed responses
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Whether the backend is reachable
    async fn health_check(&self) -> bool;

    /// Start a streaming generation
    ///
    /// The returned channel closes after a `Complete` or `Error` token, or
    /// early if the producer stops. Dropping the receiver stops the producer.
    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;
}
