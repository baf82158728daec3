//! Endpoint
//!
//! One side of the host/surface channel. The endpoint owns the transport and
//! pumps it in both directions:
//!
//! ```text
//!   transport.recv() ──► Router::dispatch_raw ──► handler
//!                                                   │
//!   transport.send() ◄── outbox receiver ◄── Outbox ┘
//! ```
//!
//! Handler invocations start in arrival order and are polled concurrently, so
//! a slow asynchronous handler never holds up later envelopes. The same type
//! runs on the host (daemon) and on a surface.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::messages::{Envelope, EnvelopeError, ErrorPayload, MessageType, RequestId};
use crate::router::{DispatchOutcome, Router, StatsSnapshot};
use crate::transport::{Transport, TransportError};

/// Default outbox capacity
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Default limit on concurrently running handler invocations
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

// ============================================================================
// Outbox
// ============================================================================

/// Failure to queue an outbound envelope
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The endpoint has stopped
    #[error("outbox closed")]
    Closed,
    /// The payload could not be serialized
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Cloneable handle for sending envelopes to the peer
///
/// Handler groups receive one at construction.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Envelope>,
}

impl Outbox {
    /// Create an outbox and the receiver an [`Endpoint`] drains
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue an envelope
    ///
    /// # Errors
    ///
    /// [`OutboxError::Closed`] if the endpoint is gone.
    pub async fn send(&self, envelope: Envelope) -> Result<(), OutboxError> {
        self.tx.send(envelope).await.map_err(|_| OutboxError::Closed)
    }

    /// Queue a typed reply correlated to `request_id`
    ///
    /// # Errors
    ///
    /// Serialization failure or a closed outbox.
    pub async fn reply<T: Serialize>(
        &self,
        kind: MessageType,
        request_id: Option<RequestId>,
        payload: &T,
    ) -> Result<(), OutboxError> {
        let envelope = Envelope::with_payload(kind, payload)?.with_optional_request_id(request_id);
        self.send(envelope).await
    }

    /// Queue an `error` envelope
    ///
    /// # Errors
    ///
    /// Serialization failure or a closed outbox.
    pub async fn send_error(
        &self,
        request_id: Option<RequestId>,
        payload: ErrorPayload,
    ) -> Result<(), OutboxError> {
        self.reply(MessageType::Error, request_id, &payload).await
    }

    /// Whether the endpoint has dropped its receiver
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Endpoint tuning
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Maximum concurrently running handler invocations
    pub max_in_flight: usize,
    /// Capacity of the outbox channel
    pub outbox_capacity: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Totals reported when an endpoint stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndpointSummary {
    /// Envelopes read from the transport
    pub received: u64,
    /// Envelopes written to the transport
    pub sent: u64,
    /// Malformed frames skipped
    pub skipped: u64,
    /// Router counters at shutdown
    pub dispatch: StatsSnapshot,
}

/// Pumps a transport through a router
pub struct Endpoint {
    router: Arc<Router>,
    outbox_rx: mpsc::Receiver<Envelope>,
    config: EndpointConfig,
}

impl Endpoint {
    /// Create an endpoint draining `outbox_rx`
    #[must_use]
    pub fn new(
        router: Arc<Router>,
        outbox_rx: mpsc::Receiver<Envelope>,
        config: EndpointConfig,
    ) -> Self {
        Self {
            router,
            outbox_rx,
            config,
        }
    }

    /// Run until the transport closes
    ///
    /// In-flight handler invocations are drained (and their replies flushed
    /// where the transport still accepts writes) before returning.
    ///
    /// # Errors
    ///
    /// A fatal [`TransportError`] other than a clean close.
    pub async fn run<T: Transport>(
        mut self,
        mut transport: T,
    ) -> Result<EndpointSummary, TransportError> {
        let max_in_flight = self.config.max_in_flight.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut outbox_open = true;
        let mut summary = EndpointSummary::default();
        let mut can_send = true;

        info!(max_in_flight, routes = self.router.handler_count(), "Endpoint started");

        loop {
            tokio::select! {
                biased;

                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    log_outcome(&outcome);
                }

                outbound = self.outbox_rx.recv(), if outbox_open => match outbound {
                    Some(envelope) => match transport.send(envelope.into()).await {
                        Ok(()) => summary.sent += 1,
                        Err(TransportError::ConnectionClosed | TransportError::SendFailed(_)) => {
                            info!("Peer closed");
                            can_send = false;
                            break;
                        }
                        Err(e) => return Err(e),
                    },
                    None => {
                        debug!("All outbox handles dropped");
                        outbox_open = false;
                    }
                },

                inbound = transport.recv(), if in_flight.len() < max_in_flight => match inbound {
                    Ok(raw) => {
                        summary.received += 1;
                        let router = Arc::clone(&self.router);
                        in_flight.push(async move { router.dispatch_raw(raw).await });
                    }
                    Err(TransportError::ConnectionClosed) => {
                        info!("Transport closed");
                        break;
                    }
                    Err(e) if !e.is_fatal() => {
                        summary.skipped += 1;
                        warn!(error = %e, "Skipping malformed frame");
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        // Drain: keep forwarding replies while the remaining handlers finish.
        while !in_flight.is_empty() {
            tokio::select! {
                Some(outcome) = in_flight.next() => log_outcome(&outcome),
                Some(envelope) = self.outbox_rx.recv(), if outbox_open => {
                    if can_send {
                        can_send = forward(&mut transport, envelope, &mut summary).await;
                    }
                }
            }
        }
        while let Ok(envelope) = self.outbox_rx.try_recv() {
            if !can_send {
                break;
            }
            can_send = forward(&mut transport, envelope, &mut summary).await;
        }

        summary.dispatch = self.router.stats();
        info!(
            received = summary.received,
            sent = summary.sent,
            skipped = summary.skipped,
            failed = summary.dispatch.failed,
            "Endpoint stopped"
        );
        Ok(summary)
    }
}

async fn forward<T: Transport>(
    transport: &mut T,
    envelope: Envelope,
    summary: &mut EndpointSummary,
) -> bool {
    match transport.send(envelope.into()).await {
        Ok(()) => {
            summary.sent += 1;
            true
        }
        Err(e) => {
            debug!(error = %e, "Dropping replies after close");
            false
        }
    }
}

fn log_outcome(outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Handled => debug!("Dispatch complete"),
        DispatchOutcome::Unroutable { kind } => debug!(kind = %kind, "Dispatch unroutable"),
        DispatchOutcome::Failed { kind, .. } => debug!(kind = %kind, "Dispatch failed"),
    }
}
