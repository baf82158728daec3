//! In-process transport
//!
//! Two connected ends backed by bounded tokio channels. Used when the host
//! and surface live in the same process, and throughout the tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, TransportError};
use crate::messages::RawEnvelope;

/// Default per-direction channel capacity
pub const DEFAULT_CAPACITY: usize = 100;

/// One end of an in-process channel pair
#[derive(Debug)]
pub struct InProcessTransport {
    tx: mpsc::Sender<RawEnvelope>,
    rx: mpsc::Receiver<RawEnvelope>,
}

impl InProcessTransport {
    /// Create two connected ends with the default capacity
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    /// Create two connected ends
    #[must_use]
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&mut self, envelope: RawEnvelope) -> Result<(), TransportError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| TransportError::SendFailed("peer dropped".to_string()))
    }

    async fn recv(&mut self) -> Result<RawEnvelope, TransportError> {
        self.rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }
}
