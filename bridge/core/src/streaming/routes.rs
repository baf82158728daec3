//! Surface-side stream routes
//!
//! Turns inbound stream envelopes into [`StreamSignal`]s for a session driver.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use super::driver::SessionHandle;
use super::session::StreamSignal;
use crate::messages::{MessageType, StreamChunkPayload, StreamErrorPayload, StreamStartPayload};
use crate::router::{GroupRoutes, Handler, Request, RouteGroup, RouterError};

/// Stream message types a surface consumes
pub const STREAM_TYPES: &[MessageType] = &[
    MessageType::StreamStart,
    MessageType::StreamChunk,
    MessageType::StreamEnd,
    MessageType::StreamCancelled,
    MessageType::StreamError,
];

/// Route group feeding one session driver
#[derive(Clone, Debug)]
pub struct StreamRoutes {
    session: SessionHandle,
}

impl StreamRoutes {
    /// Forward stream envelopes to `session`
    #[must_use]
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }
}

impl RouteGroup for StreamRoutes {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn owned_types(&self) -> &'static [MessageType] {
        STREAM_TYPES
    }

    fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
        let forwarder: Arc<dyn Handler> = Arc::new(SignalForwarder {
            session: self.session.clone(),
        });
        for &kind in STREAM_TYPES {
            routes.route_shared(kind, Arc::clone(&forwarder))?;
        }
        Ok(())
    }
}

struct SignalForwarder {
    session: SessionHandle,
}

impl SignalForwarder {
    fn signal_for(request: &Request) -> anyhow::Result<StreamSignal> {
        let request_id = request.request_id.clone();
        let signal = match request.kind {
            MessageType::StreamStart => {
                let start: StreamStartPayload = request.payload_as()?;
                tracing::debug!(model = %start.model, request_id = ?request_id, "Stream starting");
                StreamSignal::Start { request_id }
            }
            MessageType::StreamChunk => {
                let chunk: StreamChunkPayload = request.payload_as()?;
                StreamSignal::Token {
                    request_id,
                    text: chunk.text,
                }
            }
            MessageType::StreamEnd => StreamSignal::End { request_id },
            MessageType::StreamCancelled => StreamSignal::Cancel { request_id },
            MessageType::StreamError => {
                let failure: StreamErrorPayload = request.payload_as()?;
                StreamSignal::Error {
                    request_id,
                    error: failure.error,
                }
            }
            other => anyhow::bail!("not a stream signal: {other}"),
        };
        Ok(signal)
    }
}

#[async_trait]
impl Handler for SignalForwarder {
    async fn handle(&self, request: Request) -> anyhow::Result<()> {
        let signal = Self::signal_for(&request)?;
        self.session
            .send(signal)
            .await
            .context("stream session is gone")?;
        Ok(())
    }
}
