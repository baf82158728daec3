//! Generation routes
//!
//! `generate` starts a producer task that relays backend tokens to the surface:
//!
//! ```text
//! generate ──► streamStart ──► streamChunk* ──► streamEnd | streamError
//!                    ▲
//! cancelGeneration ──┴─ abort producer ──► streamCancelled
//! ```
//!
//! The handler returns as soon as the producer is spawned, so dispatch never
//! waits on a slow backend. Producers are tracked per request id; a second
//! `generate` for an id still in flight replaces the first. The old producer
//! is aborted and joined before the new one starts, so none of its output can
//! follow the new `streamStart`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{reply_on_failure, unexpected};
use crate::backend::{GenerationRequest, GenerativeBackend, StreamingToken};
use crate::endpoint::Outbox;
use crate::messages::{
    CancelGenerationPayload, GeneratePayload, MessageType, RequestId, StreamChunkPayload,
    StreamEndPayload, StreamErrorPayload, StreamStartPayload,
};
use crate::router::{GroupRoutes, Handler, Request, RouteGroup, RouterError};

const OWNED: &[MessageType] = &[MessageType::Generate, MessageType::CancelGeneration];

struct Producer {
    ticket: u64,
    task: JoinHandle<()>,
}

/// `generate` / `cancelGeneration`
#[derive(Clone)]
pub struct GenerationRoutes {
    handler: Arc<GenerationHandler>,
}

impl GenerationRoutes {
    /// Generate with `backend`, using `default_model` when a request names none
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        default_model: impl Into<String>,
        outbox: Outbox,
    ) -> Self {
        Self {
            handler: Arc::new(GenerationHandler {
                backend,
                default_model: default_model.into(),
                outbox,
                producers: Arc::new(DashMap::new()),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Number of producers still running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.handler.producers.len()
    }

    /// Abort every running producer
    pub fn abort_all(&self) {
        let count = self.handler.producers.len();
        self.handler.producers.retain(|_, producer| {
            producer.task.abort();
            false
        });
        if count > 0 {
            info!(count, "Aborted running producers");
        }
    }
}

impl RouteGroup for GenerationRoutes {
    fn name(&self) -> &'static str {
        "generation"
    }

    fn owned_types(&self) -> &'static [MessageType] {
        OWNED
    }

    fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
        let handler: Arc<dyn Handler> = self.handler.clone();
        routes
            .route_shared(MessageType::Generate, Arc::clone(&handler))?
            .route_shared(MessageType::CancelGeneration, handler)?;
        Ok(())
    }
}

struct GenerationHandler {
    backend: Arc<dyn GenerativeBackend>,
    default_model: String,
    outbox: Outbox,
    producers: Arc<DashMap<RequestId, Producer>>,
    next_ticket: AtomicU64,
}

impl GenerationHandler {
    async fn generate(&self, request: &Request) -> anyhow::Result<()> {
        let payload: GeneratePayload = request.payload_as()?;
        anyhow::ensure!(!payload.prompt.trim().is_empty(), "prompt is empty");

        let request_id = request.request_id.clone().unwrap_or_default();
        let generation = GenerationRequest::new(
            payload.prompt,
            payload.model.unwrap_or_else(|| self.default_model.clone()),
        );
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        info!(
            request_id = %request_id,
            backend = self.backend.name(),
            model = %generation.model,
            "Starting generation"
        );

        if let Some((_, previous)) = self.producers.remove(&request_id) {
            warn!(request_id = %request_id, "Replacing in-flight generation");
            previous.task.abort();
            // Cancelled or finished either way; only the join matters.
            let _ = previous.task.await;
        }

        let task = tokio::spawn(produce(
            Arc::clone(&self.backend),
            generation,
            request_id.clone(),
            self.outbox.clone(),
            Arc::clone(&self.producers),
            ticket,
        ));
        self.producers.insert(request_id.clone(), Producer { ticket, task });
        // The producer may already have finished and tried to deregister.
        self.producers.remove_if(&request_id, |_, producer| {
            producer.ticket == ticket && producer.task.is_finished()
        });
        Ok(())
    }

    async fn cancel(&self, request: &Request) -> anyhow::Result<()> {
        let Some(request_id) = request.request_id.clone() else {
            anyhow::bail!("cancelGeneration requires a requestId");
        };
        let payload: CancelGenerationPayload = if request.payload.is_null() {
            CancelGenerationPayload::default()
        } else {
            request.payload_as()?
        };

        match self.producers.remove(&request_id) {
            Some((_, producer)) => {
                producer.task.abort();
                info!(request_id = %request_id, reason = ?payload.reason, "Generation cancelled");
            }
            None => debug!(request_id = %request_id, "Cancel for idle request"),
        }

        self.outbox
            .reply(
                MessageType::StreamCancelled,
                Some(request_id),
                &serde_json::Value::Null,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for GenerationHandler {
    async fn handle(&self, request: Request) -> anyhow::Result<()> {
        let result = match request.kind {
            MessageType::Generate => self.generate(&request).await,
            MessageType::CancelGeneration => self.cancel(&request).await,
            other => Err(unexpected(other, "generation")),
        };
        reply_on_failure(&self.outbox, &request, result).await
    }
}

/// Producer task: relay one backend stream as stream envelopes
async fn produce(
    backend: Arc<dyn GenerativeBackend>,
    generation: GenerationRequest,
    request_id: RequestId,
    outbox: Outbox,
    producers: Arc<DashMap<RequestId, Producer>>,
    ticket: u64,
) {
    if let Err(e) = relay(backend.as_ref(), &generation, &request_id, &outbox).await {
        debug!(request_id = %request_id, error = %e, "Generation relay stopped");
    }
    producers.remove_if(&request_id, |_, producer| producer.ticket == ticket);
}

async fn relay(
    backend: &dyn GenerativeBackend,
    generation: &GenerationRequest,
    request_id: &RequestId,
    outbox: &Outbox,
) -> anyhow::Result<()> {
    let id = Some(request_id.clone());
    outbox
        .reply(
            MessageType::StreamStart,
            id.clone(),
            &StreamStartPayload {
                model: generation.model.clone(),
            },
        )
        .await?;

    let mut tokens = match backend.generate_streaming(generation).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Backend refused generation");
            let error = StreamErrorPayload {
                error: format!("{e:#}"),
            };
            outbox.reply(MessageType::StreamError, id, &error).await?;
            return Ok(());
        }
    };

    let mut token_count: u32 = 0;
    let mut content = String::new();
    while let Some(token) = tokens.recv().await {
        match token {
            StreamingToken::Token(text) => {
                token_count += 1;
                content.push_str(&text);
                outbox
                    .reply(MessageType::StreamChunk, id.clone(), &StreamChunkPayload { text })
                    .await?;
            }
            StreamingToken::Complete { message } => {
                info!(request_id = %request_id, token_count, "Generation complete");
                let end = StreamEndPayload {
                    content: message,
                    token_count,
                };
                outbox.reply(MessageType::StreamEnd, id, &end).await?;
                return Ok(());
            }
            StreamingToken::Error(error) => {
                warn!(request_id = %request_id, error = %error, "Generation failed");
                outbox
                    .reply(MessageType::StreamError, id, &StreamErrorPayload { error })
                    .await?;
                return Ok(());
            }
        }
    }

    let error = StreamErrorPayload {
        error: format!("producer stopped after {token_count} tokens without completing"),
    };
    outbox.reply(MessageType::StreamError, id, &error).await?;
    Ok(())
}
