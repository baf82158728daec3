//! Handler seam
//!
//! A handler receives an already type-discriminated [`Request`]. Payload shape
//! validation beyond the discriminant is the handler's own job, which is what
//! [`Request::payload_as`] is for.

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::messages::{decode_payload, EnvelopeError, MessageType, RequestId};

/// An inbound message after route lookup
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Message type that selected the handler
    pub kind: MessageType,
    /// Raw JSON payload
    pub payload: serde_json::Value,
    /// Correlation id, if the sender attached one
    pub request_id: Option<RequestId>,
}

impl Request {
    /// Decode the payload into a typed structure
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidPayload`] when the payload does not
    /// match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        decode_payload(self.kind, &self.payload)
    }
}

/// Something that can be invoked for a routed message
///
/// Errors are reported per message by the router and never propagate to the
/// channel.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one request
    async fn handle(&self, request: Request) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`Handler`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, request: Request) -> anyhow::Result<()> {
        (self.f)(request).await
    }
}

/// Wrap an async closure as a handler
///
/// ```ignore
/// router.register(MessageType::GetSettings, handler_fn(|req| async move {
///     tracing::info!(?req.request_id, "settings requested");
///     Ok(())
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}
