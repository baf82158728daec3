//! Transport Layer
//!
//! The raw bidirectional channel between host and surface. Transports move
//! [`RawEnvelope`] values and know nothing about routing:
//!
//! - [`InProcessTransport`]: tokio channels, for embedded mode and tests
//! - [`StreamTransport`]: length-prefixed frames over any async byte stream
//!   (stdio for the daemon)
//!
//! Every transport is assumed reliable, ordered and message-boundary
//! preserving.

pub mod frame;
pub mod in_process;
pub mod stream;

use async_trait::async_trait;
use thiserror::Error;

pub use frame::{FrameDecoder, FrameEncoder, MAX_FRAME_SIZE};
pub use in_process::InProcessTransport;
pub use stream::StreamTransport;

use crate::messages::RawEnvelope;

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the channel
    #[error("connection closed")]
    ConnectionClosed,

    /// The outbound side is gone
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A frame failed its integrity check
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// A frame header announced an oversized payload
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Announced size
        size: usize,
        /// Configured limit
        max: usize,
    },
}

impl TransportError {
    /// Whether the channel is unusable after this error
    ///
    /// Serialization and checksum failures affect a single frame; the decoder
    /// has already skipped past it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Serialization(_) | Self::ChecksumMismatch { .. }
        )
    }
}

/// A bidirectional envelope channel
#[async_trait]
pub trait Transport: Send {
    /// Send one envelope
    async fn send(&mut self, envelope: RawEnvelope) -> Result<(), TransportError>;

    /// Receive the next envelope
    ///
    /// Must be cancel-safe: dropping the returned future before completion
    /// loses no data.
    async fn recv(&mut self) -> Result<RawEnvelope, TransportError>;
}
