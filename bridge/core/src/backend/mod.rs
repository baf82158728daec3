//! Generative Backends
//!
//! Producers behind the `generate` route, reached through a common trait.
//!
//! # Available Backends
//!
//! - **Scripted**: offline echo/replay, paced by a tokio interval (default)
//! - **Ollama**: local LLM server over NDJSON streaming
//!
//! # Usage
//!
//! ```ignore
//! use bridge_core::backend::{GenerationRequest, GenerativeBackend, ScriptedBackend};
//!
//! let backend = ScriptedBackend::default();
//! let mut rx = backend
//!     .generate_streaming(&GenerationRequest::new("Hello there", "scripted"))
//!     .await?;
//! ```

mod ollama;
mod scripted;
mod traits;

pub use ollama::{OllamaBackend, DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_PORT};
pub use scripted::{ScriptedBackend, DEFAULT_TOKEN_INTERVAL};
pub use traits::{GenerationRequest, GenerativeBackend, StreamingToken};
