//! Bridge Core - Message Routing and Paced Streaming for a Host/Surface Pair
//!
//! The bridge connects a privileged **host** (filesystem, settings, generative
//! backends) with an unprivileged **surface** (the UI) over a single
//! bidirectional channel of typed envelopes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── SURFACE ────────────────────────┐
//! │  Endpoint ──► Router ──► StreamRoutes ──► SessionDriver │
//! │                                              │          │
//! │                                   watch: StreamSnapshot │
//! └──────────────────────────┬──────────────────────────────┘
//!                            │ Transport (framed envelopes)
//! ┌──────────────────────────┴──────────────────────────────┐
//! │  Endpoint ──► Router ──┬─► SettingsRoutes               │
//! │      ▲                 ├─► DocumentRoutes               │
//! │      │                 └─► GenerationRoutes ──► Backend │
//! │      └──────── Outbox (replies, stream events) ◄───┘    │
//! └───────────────────────── HOST ──────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Envelope`] / [`MessageType`]: the wire vocabulary
//! - [`Router`]: one handler per message type, concurrent dispatch
//! - [`Endpoint`]: pumps a [`Transport`] through a router and an [`Outbox`]
//! - [`StreamSession`]: the buffering/debounce state machine for streamed text
//! - [`SessionDriver`]: owns a session and its timers on a task
//!
//! # Module Overview
//!
//! - [`messages`]: envelopes, message types and payloads
//! - [`router`]: handler registry and dispatch
//! - [`endpoint`]: transport pump and outbox
//! - [`transport`]: framed stream and in-process transports
//! - [`streaming`]: paced display of streamed responses
//! - [`handlers`]: host route groups (settings, documents, generation)
//! - [`backend`]: generative backends (scripted, Ollama)
//! - [`config`]: TOML/env/CLI configuration

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod endpoint;
pub mod handlers;
pub mod messages;
pub mod router;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use endpoint::{Endpoint, EndpointConfig, EndpointSummary, Outbox, OutboxError};
pub use messages::{Envelope, EnvelopeError, MessageType, RawEnvelope, RequestId};
pub use router::{DispatchOutcome, Handler, Request, RouteGroup, Router, RouterError};

// Streaming exports
pub use streaming::{
    CancelPolicy, SessionDriver, SessionHandle, StreamRoutes, StreamSession, StreamSignal,
    StreamSnapshot, StreamingConfig,
};

// Transport exports
pub use transport::{InProcessTransport, StreamTransport, Transport, TransportError};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BackendKind, BridgeConfig,
    ConfigError, ConfigOverrides, ConfigSource,
};
