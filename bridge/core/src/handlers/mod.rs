//! Domain handler groups
//!
//! Each group owns a fixed set of host-bound message types and replies to the
//! surface through its [`Outbox`]:
//!
//! | Group | Owns | Replies |
//! |-------|------|---------|
//! | [`SettingsRoutes`] | `getSettings`, `updateSettings` | `settings` |
//! | [`DocumentRoutes`] | `saveFile`, `analyzeText` | `fileSaved`, `analysisResult` |
//! | [`GenerationRoutes`] | `generate`, `cancelGeneration` | `streamStart`, `streamChunk`, `streamEnd`, `streamError`, `streamCancelled` |
//!
//! A failing handler replies with an `error` envelope (correlated when the
//! request carried an id) and still returns the error so the router counts it.

mod documents;
mod generation;
mod settings;

pub use documents::{analyze_text, DocumentRoutes, DEFAULT_TOP_WORDS};
pub use generation::GenerationRoutes;
pub use settings::{MemorySettingsStore, SettingsRoutes, SettingsStore, REDACTED};

use tracing::debug;

use crate::endpoint::Outbox;
use crate::messages::{ErrorPayload, MessageType};
use crate::router::Request;

/// Send an `error` reply for a failed request, then return the result as is
pub(crate) async fn reply_on_failure(
    outbox: &Outbox,
    request: &Request,
    result: anyhow::Result<()>,
) -> anyhow::Result<()> {
    if let Err(e) = &result {
        let payload = ErrorPayload {
            message: format!("{e:#}"),
            kind: Some(request.kind.as_str().to_string()),
        };
        if let Err(send_err) = outbox.send_error(request.request_id.clone(), payload).await {
            debug!(error = %send_err, "Could not deliver error reply");
        }
    }
    result
}

/// Guard against a handler being mounted for a type it does not serve
pub(crate) fn unexpected(kind: MessageType, group: &str) -> anyhow::Error {
    anyhow::anyhow!("{group} handler cannot serve '{kind}'")
}
