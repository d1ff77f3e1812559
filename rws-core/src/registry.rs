//! Actor registry: readers locate the live actor via a registry keyed by
//! `actor_id`. The only piece of core state that is genuinely shared
//! across tasks, so it is the one place a lock appears; everything it
//! guards is a cheap, cloneable `ActorHandle`, never actor state itself.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::actor::{ActorHandle, ActorId};
use crate::transport::TransportHandle;
use crate::types::StreamRef;

/// Lightweight, caller-facing reference: `{ actor_id, stream_ref,
/// current_transport_id }`. Cheap to clone and pass around; resolving it to
/// a live `ActorHandle` always goes through an `ActorRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub actor_id: ActorId,
    pub stream_ref: Option<StreamRef>,
    pub current_transport_id: Option<TransportHandle>,
}

impl ConnectionHandle {
    pub fn new(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            stream_ref: None,
            current_transport_id: None,
        }
    }
}

/// Table of live actors keyed by `actor_id`. Cloning an `ActorRegistry`
/// shares the same underlying map (`Arc<RwLock<_>>`), matching how the
/// teacher's ingestor registries are handed to every worker that needs to
/// look up a sibling connection.
#[derive(Clone, Default)]
pub struct ActorRegistry {
    inner: Arc<RwLock<HashMap<ActorId, ActorHandle>>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ActorHandle) {
        self.inner.write().insert(handle.actor_id, handle);
    }

    pub fn deregister(&self, actor_id: ActorId) -> Option<ActorHandle> {
        self.inner.write().remove(&actor_id)
    }

    /// Resolves a `ConnectionHandle` to its live `ActorHandle`. `None` means
    /// the actor has already terminated and been deregistered; the handle's
    /// own `current_transport_id` is a fallback only a transport-level
    /// recovery path would use, never this lookup.
    pub fn resolve(&self, handle: ConnectionHandle) -> Option<ActorHandle> {
        self.inner.read().get(&handle.actor_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanal::unbounded_async;

    fn fake_handle(id: u64) -> ActorHandle {
        let (tx, _rx) = unbounded_async();
        ActorHandle::from_parts(ActorId(id), tx)
    }

    #[test]
    fn resolve_finds_registered_actor_and_none_after_deregister() {
        let registry = ActorRegistry::new();
        let handle = fake_handle(1);
        registry.register(handle.clone());

        let conn = ConnectionHandle::new(ActorId(1));
        assert!(registry.resolve(conn).is_some());

        registry.deregister(ActorId(1));
        assert!(registry.resolve(conn).is_none());
    }

    #[test]
    fn unknown_actor_id_resolves_to_none() {
        let registry = ActorRegistry::new();
        let conn = ConnectionHandle::new(ActorId(42));
        assert!(registry.resolve(conn).is_none());
    }

    #[test]
    fn clone_shares_the_same_underlying_table() {
        let registry = ActorRegistry::new();
        let clone = registry.clone();
        clone.register(fake_handle(7));
        assert_eq!(registry.len(), 1);
    }
}
