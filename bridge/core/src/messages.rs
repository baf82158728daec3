//! Bridge Messages
//!
//! The wire vocabulary shared by the host process and the sandboxed surface.
//! Every message in either direction is an [`Envelope`]: a discriminant drawn
//! from the closed [`MessageType`] enumeration, a JSON payload, and an optional
//! request correlation id.
//!
//! # Wire Format
//!
//! ```text
//! { "type": "streamChunk", "payload": { "text": "Hel" }, "requestId": "req_3f2a..." }
//! ```
//!
//! Transports carry [`RawEnvelope`] values whose `type` is an unchecked string.
//! Converting to [`Envelope`] is where unknown tags are detected, so a peer
//! speaking a newer protocol revision can never break frame decoding.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Version of the message type enumeration
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Message Types
// ============================================================================

/// Closed set of message discriminants understood by both sides
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    // ============================================
    // Surface -> Host
    // ============================================
    /// Request the current settings
    GetSettings,
    /// Merge new values into the settings
    UpdateSettings,
    /// Write a document to disk
    SaveFile,
    /// Compute text metrics for a document
    AnalyzeText,
    /// Start a streamed generation for a request id
    Generate,
    /// Abort the generation for a request id
    CancelGeneration,

    // ============================================
    // Host -> Surface
    // ============================================
    /// Current settings snapshot
    Settings,
    /// A document was written
    FileSaved,
    /// Text metrics result
    AnalysisResult,
    /// A stream is starting for a request id
    StreamStart,
    /// Incremental stream fragment
    StreamChunk,
    /// Stream completed
    StreamEnd,
    /// Stream was cancelled
    StreamCancelled,
    /// Stream failed
    StreamError,
    /// A request failed
    Error,
}

/// Which way a message type travels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Sent by the surface, handled by the host
    ToHost,
    /// Sent by the host, handled by the surface
    ToSurface,
}

impl MessageType {
    /// Every member of the enumeration
    pub const ALL: &'static [MessageType] = &[
        Self::GetSettings,
        Self::UpdateSettings,
        Self::SaveFile,
        Self::AnalyzeText,
        Self::Generate,
        Self::CancelGeneration,
        Self::Settings,
        Self::FileSaved,
        Self::AnalysisResult,
        Self::StreamStart,
        Self::StreamChunk,
        Self::StreamEnd,
        Self::StreamCancelled,
        Self::StreamError,
        Self::Error,
    ];

    /// Wire tag for this type
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetSettings => "getSettings",
            Self::UpdateSettings => "updateSettings",
            Self::SaveFile => "saveFile",
            Self::AnalyzeText => "analyzeText",
            Self::Generate => "generate",
            Self::CancelGeneration => "cancelGeneration",
            Self::Settings => "settings",
            Self::FileSaved => "fileSaved",
            Self::AnalysisResult => "analysisResult",
            Self::StreamStart => "streamStart",
            Self::StreamChunk => "streamChunk",
            Self::StreamEnd => "streamEnd",
            Self::StreamCancelled => "streamCancelled",
            Self::StreamError => "streamError",
            Self::Error => "error",
        }
    }

    /// Direction this type travels in
    #[must_use]
    pub fn direction(self) -> Direction {
        match self {
            Self::GetSettings
            | Self::UpdateSettings
            | Self::SaveFile
            | Self::AnalyzeText
            | Self::Generate
            | Self::CancelGeneration => Direction::ToHost,
            _ => Direction::ToSurface,
        }
    }

    /// Whether this type drives a streaming session on the surface
    #[must_use]
    pub fn is_stream_signal(self) -> bool {
        matches!(
            self,
            Self::StreamStart
                | Self::StreamChunk
                | Self::StreamEnd
                | Self::StreamCancelled
                | Self::StreamError
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownType(s.to_string()))
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque request correlation id
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new unique request id
    #[must_use]
    pub fn new() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Borrow the id as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// Errors converting or interpreting envelopes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The `type` tag is not a member of [`MessageType`]
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    /// The payload does not match the shape expected for its type
    #[error("invalid payload for '{kind}': {reason}")]
    InvalidPayload {
        /// Message type whose payload was rejected
        kind: MessageType,
        /// Decoder error text
        reason: String,
    },

    /// A typed payload could not be serialized
    #[error("payload serialization failed: {0}")]
    Serialization(String),
}

/// A validated message crossing the host/surface boundary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message discriminant
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// JSON payload (`null` when the type carries none)
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Correlation id tying replies and stream signals to a request
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl Envelope {
    /// Create an envelope with a `null` payload
    #[must_use]
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            payload: serde_json::Value::Null,
            request_id: None,
        }
    }

    /// Create an envelope from a typed payload
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if the payload cannot be
    /// represented as JSON.
    pub fn with_payload<T: Serialize>(kind: MessageType, payload: &T) -> Result<Self, EnvelopeError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| EnvelopeError::Serialization(e.to_string()))?;
        Ok(Self {
            kind,
            payload,
            request_id: None,
        })
    }

    /// Attach a request correlation id
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Attach an optional request correlation id
    #[must_use]
    pub fn with_optional_request_id(mut self, request_id: Option<RequestId>) -> Self {
        self.request_id = request_id;
        self
    }

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

pub(crate) fn decode_payload<T: DeserializeOwned>(
    kind: MessageType,
    payload: &serde_json::Value,
) -> Result<T, EnvelopeError> {
    T::deserialize(payload).map_err(|e| EnvelopeError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

/// An envelope as it appears on the wire, before its type is validated
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    /// Unvalidated type tag
    #[serde(rename = "type")]
    pub kind: String,
    /// JSON payload
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Correlation id
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let kind = raw.kind.parse()?;
        Ok(Self {
            kind,
            payload: raw.payload,
            request_id: raw.request_id,
        })
    }
}

impl From<Envelope> for RawEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            kind: envelope.kind.as_str().to_string(),
            payload: envelope.payload,
            request_id: envelope.request_id,
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// `generate` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePayload {
    /// Prompt text
    pub prompt: String,
    /// Model override (backend default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// `cancelGeneration` payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelGenerationPayload {
    /// Optional reason, for logs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `streamStart` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStartPayload {
    /// Model producing the stream
    pub model: String,
}

/// `streamChunk` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunkPayload {
    /// Incremental text fragment
    pub text: String,
}

/// `streamEnd` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEndPayload {
    /// Complete response text as seen by the producer
    pub content: String,
    /// Number of chunks emitted
    pub token_count: u32,
}

/// `streamError` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamErrorPayload {
    /// Error description
    pub error: String,
}

/// `saveFile` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFilePayload {
    /// Path relative to the document root
    pub path: String,
    /// File contents
    pub contents: String,
}

/// `fileSaved` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSavedPayload {
    /// Path relative to the document root
    pub path: String,
    /// Bytes written
    pub bytes: u64,
}

/// `analyzeText` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeTextPayload {
    /// Text to analyze
    pub text: String,
    /// How many frequent words to report (configured default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_words: Option<usize>,
}

/// One entry of a word frequency table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordFrequency {
    /// Lowercased word
    pub word: String,
    /// Occurrences
    pub count: usize,
}

/// `analysisResult` payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResultPayload {
    /// Word count
    pub words: usize,
    /// Sentence count
    pub sentences: usize,
    /// Character count (Unicode scalar values)
    pub characters: usize,
    /// Mean sentence length in words
    pub average_words_per_sentence: f64,
    /// Most frequent words, highest first
    pub top_words: Vec<WordFrequency>,
}

/// `settings` payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPayload {
    /// Setting values by key
    pub values: BTreeMap<String, serde_json::Value>,
}

/// `updateSettings` payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsPayload {
    /// Values to merge into the settings
    pub values: BTreeMap<String, serde_json::Value>,
}

/// `error` payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Human-readable message
    pub message: String,
    /// Type of the request that failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}
