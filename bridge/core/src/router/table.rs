//! Route table: at most one handler per message type.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::handler::Handler;
use super::RouterError;
use crate::messages::MessageType;

/// A registered handler and the group that owns it
pub(crate) struct Route {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) owner: &'static str,
}

/// Mapping from message type to its single handler
#[derive(Default)]
pub struct RouteTable {
    entries: BTreeMap<MessageType, Route>,
}

impl RouteTable {
    /// Insert a route, rejecting a second handler for the same type
    pub(crate) fn insert(
        &mut self,
        kind: MessageType,
        owner: &'static str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RouterError> {
        match self.entries.entry(kind) {
            Entry::Occupied(existing) => Err(RouterError::DuplicateRoute {
                kind,
                existing: existing.get().owner,
                attempted: owner,
            }),
            Entry::Vacant(slot) => {
                slot.insert(Route { handler, owner });
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, kind: MessageType) -> Option<&Route> {
        self.entries.get(&kind)
    }

    /// Whether a handler exists for `kind`
    #[must_use]
    pub fn contains(&self, kind: MessageType) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Name of the group that registered `kind`
    #[must_use]
    pub fn owner(&self, kind: MessageType) -> Option<&'static str> {
        self.entries.get(&kind).map(|route| route.owner)
    }

    /// Number of distinct types with a handler
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered types in enumeration order
    #[must_use]
    pub fn kinds(&self) -> Vec<MessageType> {
        self.entries.keys().copied().collect()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(kind, route)| (kind.as_str(), route.owner)),
            )
            .finish()
    }
}
