//! Settings routes
//!
//! Reads and merges key/value settings. Values stored under a secret key are
//! never sent to the surface; replies carry [`REDACTED`] in their place, and
//! an update that echoes the placeholder back leaves the secret untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;

use super::{reply_on_failure, unexpected};
use crate::endpoint::Outbox;
use crate::messages::{MessageType, SettingsPayload, UpdateSettingsPayload};
use crate::router::{GroupRoutes, Handler, Request, RouteGroup, RouterError};

/// Placeholder sent instead of a secret value
pub const REDACTED: &str = "[redacted]";

const OWNED: &[MessageType] = &[MessageType::GetSettings, MessageType::UpdateSettings];

/// Storage behind the settings routes
pub trait SettingsStore: Send + Sync {
    /// All current values
    ///
    /// # Errors
    ///
    /// Backend-specific read failure.
    fn load(&self) -> anyhow::Result<BTreeMap<String, Value>>;

    /// Merge `values` in (a `null` value removes the key) and return the result
    ///
    /// # Errors
    ///
    /// Backend-specific write failure.
    fn merge(&self, values: BTreeMap<String, Value>) -> anyhow::Result<BTreeMap<String, Value>>;
}

/// In-memory settings
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemorySettingsStore {
    /// Start with `initial`
    #[must_use]
    pub fn new(initial: BTreeMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(initial),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        Ok(self.values.read().clone())
    }

    fn merge(&self, values: BTreeMap<String, Value>) -> anyhow::Result<BTreeMap<String, Value>> {
        let mut current = self.values.write();
        for (key, value) in values {
            if value.is_null() {
                current.remove(&key);
            } else {
                current.insert(key, value);
            }
        }
        Ok(current.clone())
    }
}

/// `getSettings` / `updateSettings`
#[derive(Clone)]
pub struct SettingsRoutes {
    handler: Arc<SettingsHandler>,
}

impl SettingsRoutes {
    /// Serve settings from `store`, hiding `secret_keys`
    pub fn new(store: Arc<dyn SettingsStore>, secret_keys: Vec<String>, outbox: Outbox) -> Self {
        Self {
            handler: Arc::new(SettingsHandler {
                store,
                secret_keys,
                outbox,
            }),
        }
    }
}

impl RouteGroup for SettingsRoutes {
    fn name(&self) -> &'static str {
        "settings"
    }

    fn owned_types(&self) -> &'static [MessageType] {
        OWNED
    }

    fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
        let handler: Arc<dyn Handler> = self.handler.clone();
        routes
            .route_shared(MessageType::GetSettings, Arc::clone(&handler))?
            .route_shared(MessageType::UpdateSettings, handler)?;
        Ok(())
    }
}

struct SettingsHandler {
    store: Arc<dyn SettingsStore>,
    secret_keys: Vec<String>,
    outbox: Outbox,
}

impl SettingsHandler {
    fn is_secret(&self, key: &str) -> bool {
        self.secret_keys.iter().any(|secret| secret == key)
    }

    fn redact(&self, mut values: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        for (key, value) in &mut values {
            if self.is_secret(key) {
                *value = Value::String(REDACTED.to_string());
            }
        }
        values
    }

    async fn reply(&self, request: &Request, values: BTreeMap<String, Value>) -> anyhow::Result<()> {
        let payload = SettingsPayload {
            values: self.redact(values),
        };
        self.outbox
            .reply(MessageType::Settings, request.request_id.clone(), &payload)
            .await?;
        Ok(())
    }

    async fn serve(&self, request: &Request) -> anyhow::Result<()> {
        match request.kind {
            MessageType::GetSettings => {
                let values = self.store.load()?;
                self.reply(request, values).await
            }
            MessageType::UpdateSettings => {
                let update: UpdateSettingsPayload = request.payload_as()?;
                if let Some(key) = update.values.keys().find(|key| key.trim().is_empty()) {
                    anyhow::bail!("invalid setting key {key:?}");
                }
                let changes: BTreeMap<_, _> = update
                    .values
                    .into_iter()
                    .filter(|(key, value)| !(self.is_secret(key) && value == REDACTED))
                    .collect();
                let keys: Vec<&str> = changes.keys().map(String::as_str).collect();
                info!(keys = ?keys, "Updating settings");
                let values = self.store.merge(changes)?;
                self.reply(request, values).await
            }
            other => Err(unexpected(other, "settings")),
        }
    }
}

#[async_trait]
impl Handler for SettingsHandler {
    async fn handle(&self, request: Request) -> anyhow::Result<()> {
        let result = self.serve(&request).await;
        reply_on_failure(&self.outbox, &request, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Envelope, ErrorPayload, RequestId};
    use crate::router::Router;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup(initial: BTreeMap<String, Value>) -> (Router, mpsc::Receiver<Envelope>) {
        let (outbox, rx) = Outbox::channel(8);
        let store = Arc::new(MemorySettingsStore::new(initial));
        let mut router = Router::new();
        router
            .mount(&SettingsRoutes::new(store, vec!["apiKey".to_string()], outbox))
            .unwrap();
        (router, rx)
    }

    fn initial() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("theme".to_string(), json!("dark")),
            ("apiKey".to_string(), json!("sk-live-123")),
        ])
    }

    #[tokio::test]
    async fn test_get_settings_redacts_secrets() {
        let (router, mut rx) = setup(initial());

        let request =
            Envelope::new(MessageType::GetSettings).with_request_id(RequestId::from("req_g"));
        assert!(router.dispatch(request).await.is_handled());

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.kind, MessageType::Settings);
        assert_eq!(reply.request_id, Some(RequestId::from("req_g")));
        let payload: SettingsPayload = reply.payload_as().unwrap();
        assert_eq!(payload.values["theme"], json!("dark"));
        assert_eq!(payload.values["apiKey"], json!(REDACTED));
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_secret_on_echo() {
        let store = Arc::new(MemorySettingsStore::new(initial()));
        let (outbox, mut rx) = Outbox::channel(8);
        let mut router = Router::new();
        router
            .mount(&SettingsRoutes::new(
                store.clone(),
                vec!["apiKey".to_string()],
                outbox,
            ))
            .unwrap();

        let update = UpdateSettingsPayload {
            values: BTreeMap::from([
                ("theme".to_string(), json!("light")),
                ("apiKey".to_string(), json!(REDACTED)),
                ("fontSize".to_string(), json!(14)),
            ]),
        };
        let request = Envelope::with_payload(MessageType::UpdateSettings, &update).unwrap();
        assert!(router.dispatch(request).await.is_handled());

        let stored = store.load().unwrap();
        assert_eq!(stored["theme"], json!("light"));
        assert_eq!(stored["apiKey"], json!("sk-live-123"));
        assert_eq!(stored["fontSize"], json!(14));

        let reply: SettingsPayload = rx.recv().await.unwrap().payload_as().unwrap();
        assert_eq!(reply.values["apiKey"], json!(REDACTED));
    }

    #[test]
    fn test_null_removes_key() {
        let store = MemorySettingsStore::new(initial());
        let merged = store
            .merge(BTreeMap::from([("theme".to_string(), Value::Null)]))
            .unwrap();
        assert!(!merged.contains_key("theme"));
    }

    #[tokio::test]
    async fn test_invalid_update_replies_error() {
        let (router, mut rx) = setup(initial());

        let request = Envelope {
            kind: MessageType::UpdateSettings,
            payload: json!({ "values": { " ": 1 } }),
            request_id: Some(RequestId::from("req_bad")),
        };
        assert!(!router.dispatch(request).await.is_handled());

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.kind, MessageType::Error);
        assert_eq!(reply.request_id, Some(RequestId::from("req_bad")));
        let error: ErrorPayload = reply.payload_as().unwrap();
        assert_eq!(error.kind.as_deref(), Some("updateSettings"));
        assert!(error.message.contains("invalid setting key"));
    }
}
