//! Route groups
//!
//! A domain group owns a fixed, declared set of message types. It registers
//! them through a [`GroupRoutes`] registrar that refuses anything outside the
//! declaration, and [`Router::mount`](super::Router::mount) fails if the group
//! leaves part of its declaration unregistered.
//!
//! Routes are staged in the registrar and reach the route table only once the
//! whole group has registered, so a failed mount leaves the router unchanged.

use std::sync::Arc;

use super::handler::Handler;
use super::table::RouteTable;
use super::RouterError;
use crate::messages::MessageType;

/// A set of handlers registered together at startup
pub trait RouteGroup {
    /// Group name, used as the route owner in logs and errors
    fn name(&self) -> &'static str;

    /// Every type this group registers, and nothing else
    fn owned_types(&self) -> &'static [MessageType];

    /// Register one handler per owned type
    ///
    /// # Errors
    ///
    /// Propagates [`RouterError`] from the registrar.
    fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError>;
}

/// Registrar scoped to one group's declared types
pub struct GroupRoutes<'a> {
    table: &'a RouteTable,
    group: &'static str,
    owned: &'static [MessageType],
    staged: Vec<(MessageType, Arc<dyn Handler>)>,
}

impl<'a> GroupRoutes<'a> {
    pub(super) fn new(
        table: &'a RouteTable,
        group: &'static str,
        owned: &'static [MessageType],
    ) -> Self {
        Self {
            table,
            group,
            owned,
            staged: Vec::with_capacity(owned.len()),
        }
    }

    /// Declared types with no staged handler
    pub(super) fn missing(&self) -> Vec<MessageType> {
        self.owned
            .iter()
            .copied()
            .filter(|kind| !self.is_staged(*kind))
            .collect()
    }

    pub(super) fn into_staged(self) -> Vec<(MessageType, Arc<dyn Handler>)> {
        self.staged
    }

    fn is_staged(&self, kind: MessageType) -> bool {
        self.staged.iter().any(|(staged, _)| *staged == kind)
    }

    /// Register a handler for one of the group's types
    ///
    /// # Errors
    ///
    /// [`RouterError::UndeclaredRoute`] if `kind` is not in the group's
    /// declaration, [`RouterError::DuplicateRoute`] if another group already
    /// owns it.
    pub fn route<H: Handler + 'static>(
        &mut self,
        kind: MessageType,
        handler: H,
    ) -> Result<&mut Self, RouterError> {
        self.route_shared(kind, Arc::new(handler))
    }

    /// Register an already shared handler
    ///
    /// # Errors
    ///
    /// Same as [`GroupRoutes::route`].
    pub fn route_shared(
        &mut self,
        kind: MessageType,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, RouterError> {
        if !self.owned.contains(&kind) {
            tracing::error!(group = self.group, kind = %kind, "Route outside declared ownership");
            return Err(RouterError::UndeclaredRoute {
                group: self.group,
                kind,
            });
        }
        let existing = if self.is_staged(kind) {
            Some(self.group)
        } else {
            self.table.owner(kind)
        };
        if let Some(existing) = existing {
            let err = RouterError::DuplicateRoute {
                kind,
                existing,
                attempted: self.group,
            };
            tracing::error!(error = %err, "Route registration rejected");
            return Err(err);
        }
        self.staged.push((kind, handler));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{handler_fn, Router};

    struct Greedy;

    impl RouteGroup for Greedy {
        fn name(&self) -> &'static str {
            "greedy"
        }

        fn owned_types(&self) -> &'static [MessageType] {
            &[MessageType::GetSettings]
        }

        fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
            routes
                .route(MessageType::GetSettings, handler_fn(|_| async { Ok(()) }))?
                .route(MessageType::SaveFile, handler_fn(|_| async { Ok(()) }))?;
            Ok(())
        }
    }

    struct Lazy;

    impl RouteGroup for Lazy {
        fn name(&self) -> &'static str {
            "lazy"
        }

        fn owned_types(&self) -> &'static [MessageType] {
            &[MessageType::GetSettings, MessageType::UpdateSettings]
        }

        fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
            routes.route(MessageType::GetSettings, handler_fn(|_| async { Ok(()) }))?;
            Ok(())
        }
    }

    struct Settings;

    impl RouteGroup for Settings {
        fn name(&self) -> &'static str {
            "settings"
        }

        fn owned_types(&self) -> &'static [MessageType] {
            &[MessageType::GetSettings, MessageType::UpdateSettings]
        }

        fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
            routes
                .route(MessageType::GetSettings, handler_fn(|_| async { Ok(()) }))?
                .route(MessageType::UpdateSettings, handler_fn(|_| async { Ok(()) }))?;
            Ok(())
        }
    }

    struct Twice;

    impl RouteGroup for Twice {
        fn name(&self) -> &'static str {
            "twice"
        }

        fn owned_types(&self) -> &'static [MessageType] {
            &[MessageType::GetSettings]
        }

        fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
            routes
                .route(MessageType::GetSettings, handler_fn(|_| async { Ok(()) }))?
                .route(MessageType::GetSettings, handler_fn(|_| async { Ok(()) }))?;
            Ok(())
        }
    }

    #[test]
    fn test_undeclared_route_rejected() {
        let mut router = Router::new();
        let err = router.mount(&Greedy).unwrap_err();
        assert_eq!(
            err,
            RouterError::UndeclaredRoute {
                group: "greedy",
                kind: MessageType::SaveFile,
            }
        );
        assert!(!router.has_handler(MessageType::SaveFile));
        assert!(!router.has_handler(MessageType::GetSettings));
        assert_eq!(router.handler_count(), 0);
    }

    #[test]
    fn test_failed_mount_leaves_types_free_for_owner() {
        let mut router = Router::new();
        router.mount(&Greedy).unwrap_err();
        router.mount(&Lazy).unwrap_err();
        assert_eq!(router.handler_count(), 0);
        assert_eq!(router.routes().owner(MessageType::GetSettings), None);

        router.mount(&Settings).unwrap();
        assert_eq!(router.handler_count(), 2);
        assert_eq!(router.routes().owner(MessageType::GetSettings), Some("settings"));
    }

    #[test]
    fn test_same_type_twice_in_group_rejected() {
        let mut router = Router::new();
        let err = router.mount(&Twice).unwrap_err();
        assert_eq!(
            err,
            RouterError::DuplicateRoute {
                kind: MessageType::GetSettings,
                existing: "twice",
                attempted: "twice",
            }
        );
        assert!(router.routes().is_empty());
    }

    #[test]
    fn test_incomplete_group_rejected() {
        let mut router = Router::new();
        let err = router.mount(&Lazy).unwrap_err();
        assert_eq!(
            err,
            RouterError::MissingRoutes {
                scope: "group 'lazy'".to_string(),
                kinds: vec![MessageType::UpdateSettings],
            }
        );
        assert!(!router.has_handler(MessageType::GetSettings));
    }
}
