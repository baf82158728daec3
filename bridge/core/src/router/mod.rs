//! Message Router
//!
//! Maps each inbound [`Envelope`] to exactly one registered [`Handler`].
//!
//! # Architecture
//!
//! ```text
//!  composition root
//!        │  Router::new()
//!        │  router.mount(&SettingsRoutes) ─┐
//!        │  router.mount(&DocumentRoutes) ─┼─► RouteTable { MessageType -> Route }
//!        │  router.mount(&GenerationRoutes)┘
//!        │  router.verify(EXPECTED)?
//!        ▼
//!   Arc<Router> ──► Endpoint::run(transport)
//!                        │ dispatch(envelope)
//!                        ▼
//!                  handler.handle(request)
//! ```
//!
//! # Policies
//!
//! - Registering a second handler for a type is rejected with
//!   [`RouterError::DuplicateRoute`]; the first registration stays active.
//! - Dispatching an unroutable envelope is counted and logged, never raised.
//! - Handler errors and panics are reported per message as
//!   [`DispatchOutcome::Failed`].
//!
//! The router has no global instance. It is built by the composition root,
//! mutated only during startup, then shared as `Arc<Router>`.

mod group;
mod handler;
mod table;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use group::{GroupRoutes, RouteGroup};
pub use handler::{handler_fn, FnHandler, Handler, Request};
pub use table::RouteTable;

use crate::messages::{Envelope, MessageType, RawEnvelope};

/// Owner recorded for routes registered directly on the router
const DIRECT_OWNER: &str = "router";

// ============================================================================
// Errors
// ============================================================================

/// Startup-time routing integrity errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// A type already has a handler
    #[error("duplicate route for '{kind}': owned by '{existing}', rejected from '{attempted}'")]
    DuplicateRoute {
        /// Contested message type
        kind: MessageType,
        /// Owner of the active route
        existing: &'static str,
        /// Owner whose registration was rejected
        attempted: &'static str,
    },

    /// A group registered a type it does not declare
    #[error("group '{group}' registered '{kind}' outside its declared types")]
    UndeclaredRoute {
        /// Offending group
        group: &'static str,
        /// Undeclared message type
        kind: MessageType,
    },

    /// Expected routes are absent
    #[error("{scope} is missing routes: {}", join_kinds(.kinds))]
    MissingRoutes {
        /// What was being verified
        scope: String,
        /// Absent message types
        kinds: Vec<MessageType>,
    },
}

fn join_kinds(kinds: &[MessageType]) -> String {
    kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Dispatch results
// ============================================================================

/// Result of dispatching one envelope
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran to completion
    Handled,
    /// No handler is registered for the type (or the tag is unknown)
    Unroutable {
        /// Type tag as received
        kind: String,
    },
    /// The handler returned an error or panicked
    Failed {
        /// Type whose handler failed
        kind: MessageType,
        /// Error text
        error: String,
    },
}

impl DispatchOutcome {
    /// Whether the handler completed successfully
    #[must_use]
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

/// Lifetime dispatch counters
#[derive(Debug, Default)]
struct DispatchStats {
    dispatched: AtomicU64,
    handled: AtomicU64,
    unroutable: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the dispatch counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Envelopes passed to dispatch
    pub dispatched: u64,
    /// Handler invocations that succeeded
    pub handled: u64,
    /// Envelopes with no handler
    pub unroutable: u64,
    /// Handler invocations that failed
    pub failed: u64,
}

// ============================================================================
// Router
// ============================================================================

/// Routes envelopes to handlers by message type
#[derive(Debug, Default)]
pub struct Router {
    routes: RouteTable,
    stats: DispatchStats,
}

impl Router {
    /// Create an empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler outside of any group
    ///
    /// # Errors
    ///
    /// [`RouterError::DuplicateRoute`] if `kind` already has a handler.
    pub fn register<H: Handler + 'static>(
        &mut self,
        kind: MessageType,
        handler: H,
    ) -> Result<(), RouterError> {
        self.insert(DIRECT_OWNER, kind, Arc::new(handler))
    }

    pub(crate) fn insert(
        &mut self,
        owner: &'static str,
        kind: MessageType,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RouterError> {
        match self.routes.insert(kind, owner, handler) {
            Ok(()) => {
                debug!(kind = %kind, owner, "Route registered");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Route registration rejected");
                Err(e)
            }
        }
    }

    /// Mount a route group
    ///
    /// # Errors
    ///
    /// Any [`RouterError`] raised while the group registers, or
    /// [`RouterError::MissingRoutes`] if the group skipped a declared type.
    /// On error none of the group's routes are installed.
    pub fn mount(&mut self, group: &dyn RouteGroup) -> Result<(), RouterError> {
        let name = group.name();
        let owned = group.owned_types();

        let mut routes = GroupRoutes::new(&self.routes, name, owned);
        group.register_routes(&mut routes)?;

        let missing = routes.missing();
        if !missing.is_empty() {
            let err = RouterError::MissingRoutes {
                scope: format!("group '{name}'"),
                kinds: missing,
            };
            error!(error = %err, "Route group incomplete");
            return Err(err);
        }

        // Staged routes were checked against the table; none of these fail.
        for (kind, handler) in routes.into_staged() {
            self.insert(name, kind, handler)?;
        }

        info!(group = name, routes = owned.len(), "Route group mounted");
        Ok(())
    }

    /// Check that every expected type has a handler
    ///
    /// # Errors
    ///
    /// [`RouterError::MissingRoutes`] naming every absent type.
    pub fn verify(&self, expected: &[MessageType]) -> Result<(), RouterError> {
        let missing: Vec<_> = expected
            .iter()
            .copied()
            .filter(|kind| !self.routes.contains(*kind))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RouterError::MissingRoutes {
                scope: "router".to_string(),
                kinds: missing,
            })
        }
    }

    /// Whether `kind` has a handler
    #[must_use]
    pub fn has_handler(&self, kind: MessageType) -> bool {
        self.routes.contains(kind)
    }

    /// Number of distinct types with a handler
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.routes.len()
    }

    /// Registered types in enumeration order
    #[must_use]
    pub fn registered_types(&self) -> Vec<MessageType> {
        self.routes.kinds()
    }

    /// The underlying route table
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Dispatch a validated envelope, awaiting the handler
    pub async fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let kind = envelope.kind;
        let Some(route) = self.routes.get(kind) else {
            return self.unroutable(kind.as_str());
        };
        let handler = Arc::clone(&route.handler);
        let request = Request {
            kind,
            payload: envelope.payload,
            request_id: envelope.request_id,
        };
        debug!(kind = %kind, owner = route.owner, request_id = ?request.request_id, "Dispatching");

        match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
            Ok(Ok(())) => {
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Handled
            }
            Ok(Err(e)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                let error = format!("{e:#}");
                warn!(kind = %kind, error = %error, "Handler failed");
                DispatchOutcome::Failed { kind, error }
            }
            Err(panic) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                let error = format!("handler panicked: {}", panic_message(panic.as_ref()));
                error!(kind = %kind, error = %error, "Handler panicked");
                DispatchOutcome::Failed { kind, error }
            }
        }
    }

    /// Dispatch a wire envelope whose type tag has not been validated
    pub async fn dispatch_raw(&self, raw: RawEnvelope) -> DispatchOutcome {
        match Envelope::try_from(raw.clone()) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(_) => {
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                self.unroutable(&raw.kind)
            }
        }
    }

    fn unroutable(&self, kind: &str) -> DispatchOutcome {
        self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
        warn!(kind, "Unroutable message");
        DispatchOutcome::Unroutable {
            kind: kind.to_string(),
        }
    }

    /// Current dispatch counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            handled: self.stats.handled.load(Ordering::Relaxed),
            unroutable: self.stats.unroutable.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RequestId;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    type Calls = Arc<Mutex<Vec<(MessageType, serde_json::Value)>>>;

    struct Recording {
        name: &'static str,
        owned: &'static [MessageType],
        calls: Calls,
    }

    impl RouteGroup for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn owned_types(&self) -> &'static [MessageType] {
            self.owned
        }

        fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
            for kind in self.owned {
                let calls = Arc::clone(&self.calls);
                routes.route(
                    *kind,
                    handler_fn(move |req: Request| {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.lock().push((req.kind, req.payload));
                            Ok(())
                        }
                    }),
                )?;
            }
            Ok(())
        }
    }

    fn three_groups(calls: &Calls) -> Router {
        let mut router = Router::new();
        for (name, owned) in [
            ("settings", &[MessageType::GetSettings][..]),
            ("documents", &[MessageType::SaveFile][..]),
            ("generation", &[MessageType::Generate][..]),
        ] {
            router
                .mount(&Recording {
                    name,
                    owned,
                    calls: Arc::clone(calls),
                })
                .unwrap();
        }
        router
    }

    #[tokio::test]
    async fn test_dispatch_invokes_only_matching_handler() {
        let calls = Calls::default();
        let router = three_groups(&calls);
        assert_eq!(router.handler_count(), 3);

        let payload = json!({ "path": "a.md", "contents": "x" });
        let outcome = router
            .dispatch(Envelope {
                kind: MessageType::SaveFile,
                payload: payload.clone(),
                request_id: None,
            })
            .await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(*calls.lock(), vec![(MessageType::SaveFile, payload)]);
    }

    #[tokio::test]
    async fn test_has_handler_after_mount() {
        let calls = Calls::default();
        let router = three_groups(&calls);
        for kind in [
            MessageType::GetSettings,
            MessageType::SaveFile,
            MessageType::Generate,
        ] {
            assert!(router.has_handler(kind));
        }
        assert!(!router.has_handler(MessageType::StreamChunk));
        assert!(router
            .verify(&[MessageType::GetSettings, MessageType::Generate])
            .is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_type_is_unroutable() {
        let calls = Calls::default();
        let router = three_groups(&calls);

        let outcome = router.dispatch(Envelope::new(MessageType::StreamEnd)).await;

        assert_eq!(
            outcome,
            DispatchOutcome::Unroutable {
                kind: "streamEnd".to_string()
            }
        );
        assert!(calls.lock().is_empty());
        assert_eq!(router.stats().unroutable, 1);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_unroutable() {
        let calls = Calls::default();
        let router = three_groups(&calls);

        let outcome = router
            .dispatch_raw(RawEnvelope {
                kind: "selfDestruct".to_string(),
                payload: json!(null),
                request_id: Some(RequestId::from("req_1")),
            })
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Unroutable {
                kind: "selfDestruct".to_string()
            }
        );
        assert!(calls.lock().is_empty());
        assert_eq!(
            router.stats(),
            StatsSnapshot {
                dispatched: 1,
                handled: 0,
                unroutable: 1,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut router = Router::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&hits);
        router
            .register(
                MessageType::Generate,
                handler_fn(move |_| {
                    let hits = Arc::clone(&first);
                    async move {
                        hits.lock().push("first");
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let err = router
            .register(MessageType::Generate, handler_fn(|_| async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateRoute { .. }));
        assert_eq!(router.handler_count(), 1);

        router.dispatch(Envelope::new(MessageType::Generate)).await;
        assert_eq!(*hits.lock(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_duplicate_across_groups_rejected() {
        let calls = Calls::default();
        let mut router = three_groups(&calls);

        let err = router
            .mount(&Recording {
                name: "intruder",
                owned: &[MessageType::Generate],
                calls: Arc::clone(&calls),
            })
            .unwrap_err();

        assert_eq!(
            err,
            RouterError::DuplicateRoute {
                kind: MessageType::Generate,
                existing: "generation",
                attempted: "intruder",
            }
        );
        assert_eq!(router.handler_count(), 3);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_poison_router() {
        let mut router = Router::new();
        router
            .register(
                MessageType::SaveFile,
                handler_fn(|_| async { anyhow::bail!("disk full") }),
            )
            .unwrap();
        router
            .register(MessageType::GetSettings, handler_fn(|_| async { Ok(()) }))
            .unwrap();

        let failed = router.dispatch(Envelope::new(MessageType::SaveFile)).await;
        assert_eq!(
            failed,
            DispatchOutcome::Failed {
                kind: MessageType::SaveFile,
                error: "disk full".to_string()
            }
        );

        let next = router.dispatch(Envelope::new(MessageType::GetSettings)).await;
        assert!(next.is_handled());
        assert_eq!(router.stats().failed, 1);
        assert_eq!(router.stats().handled, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_is_reported() {
        let mut router = Router::new();
        router
            .register(
                MessageType::AnalyzeText,
                handler_fn(|_| async { panic!("boom") }),
            )
            .unwrap();

        let outcome = router.dispatch(Envelope::new(MessageType::AnalyzeText)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                kind: MessageType::AnalyzeText,
                error: "handler panicked: boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_async_handler_awaited() {
        let mut router = Router::new();
        let done = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&done);
        router
            .register(
                MessageType::Generate,
                handler_fn(move |_| {
                    let flag = Arc::clone(&flag);
                    async move {
                        tokio::task::yield_now().await;
                        *flag.lock() = true;
                        Ok(())
                    }
                }),
            )
            .unwrap();

        router.dispatch(Envelope::new(MessageType::Generate)).await;
        assert!(*done.lock());
    }

    #[test]
    fn test_verify_reports_every_missing_route() {
        let router = Router::new();
        let err = router
            .verify(&[MessageType::Generate, MessageType::SaveFile])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "router is missing routes: generate, saveFile"
        );
    }
}
