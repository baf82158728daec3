//! Host composition
//!
//! Builds the host side of the bridge from a resolved [`BridgeConfig`]: the
//! generative backend, the route groups mounted on one router, and the
//! endpoint that pumps it. Every host-bound message type must end up with a
//! handler or composition fails before any traffic is served.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use bridge_core::backend::{GenerativeBackend, OllamaBackend, ScriptedBackend};
use bridge_core::config::{BackendKind, BridgeConfig, GenerationConfig};
use bridge_core::endpoint::{Endpoint, Outbox};
use bridge_core::handlers::{DocumentRoutes, GenerationRoutes, MemorySettingsStore, SettingsRoutes};
use bridge_core::messages::{Direction, MessageType};
use bridge_core::router::Router;

/// A composed host, ready to run
pub struct Host {
    /// Endpoint serving the router
    pub endpoint: Endpoint,
    /// Generation routes, kept for shutdown
    pub generation: GenerationRoutes,
    /// Backend behind `generate`
    pub backend: Arc<dyn GenerativeBackend>,
}

/// Message types the host must serve
pub fn host_bound_types() -> Vec<MessageType> {
    MessageType::ALL
        .iter()
        .copied()
        .filter(|kind| kind.direction() == Direction::ToHost)
        .collect()
}

/// Construct the configured backend
pub fn build_backend(config: &GenerationConfig) -> Result<Arc<dyn GenerativeBackend>> {
    let backend: Arc<dyn GenerativeBackend> = match config.backend {
        BackendKind::Scripted => Arc::new(ScriptedBackend::new(config.token_interval)),
        BackendKind::Ollama => Arc::new(
            OllamaBackend::new(config.ollama_host.clone(), config.ollama_port)
                .context("Failed to create Ollama backend")?,
        ),
    };
    info!(backend = backend.name(), model = %config.model, "Backend ready");
    Ok(backend)
}

/// Initial settings from a JSON object file, or empty
pub fn load_settings(path: Option<&Path>) -> Result<BTreeMap<String, Value>> {
    let Some(path) = path else {
        return Ok(BTreeMap::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    let values: BTreeMap<String, Value> = serde_json::from_str(&text)
        .with_context(|| format!("Settings file {} is not a JSON object", path.display()))?;
    info!(path = %path.display(), keys = values.len(), "Loaded initial settings");
    Ok(values)
}

/// Wire every host route group onto one router behind an endpoint
pub fn compose(config: &BridgeConfig, settings: BTreeMap<String, Value>) -> Result<Host> {
    let backend = build_backend(&config.generation)?;
    compose_with_backend(config, settings, backend)
}

/// [`compose`] with an already constructed backend
pub fn compose_with_backend(
    config: &BridgeConfig,
    settings: BTreeMap<String, Value>,
    backend: Arc<dyn GenerativeBackend>,
) -> Result<Host> {
    let (outbox, outbox_rx) = Outbox::channel(config.endpoint.outbox_capacity);

    let store = Arc::new(MemorySettingsStore::new(settings));
    let generation = GenerationRoutes::new(
        Arc::clone(&backend),
        config.generation.model.clone(),
        outbox.clone(),
    );

    let mut router = Router::new();
    router.mount(&SettingsRoutes::new(
        store,
        config.secret_keys.clone(),
        outbox.clone(),
    ))?;
    router.mount(&DocumentRoutes::new(
        config.documents.root.clone(),
        config.documents.top_words,
        outbox,
    ))?;
    router.mount(&generation)?;
    router
        .verify(&host_bound_types())
        .context("Host router is incomplete")?;

    info!(
        routes = router.handler_count(),
        documents_root = %config.documents.root.display(),
        "Host router composed"
    );

    Ok(Host {
        endpoint: Endpoint::new(Arc::new(router), outbox_rx, config.endpoint),
        generation,
        backend,
    })
}
