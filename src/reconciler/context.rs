//! Per-invocation execution context
//!
//! A `ReconcileContext` is threaded through every node call. It carries the
//! external-service handles, the invocation's stash, the identity of the
//! parent being reconciled and the ambient cancellation token. `WithConfig`
//! derives a new context for its branch; nothing is shared mutably across
//! invocations except the tracker.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ReconcileError, Result};
use crate::events::{EventKind, EventRecorder};
use crate::models::{Object, ResourceRef};
use crate::store::ExternalStore;
use crate::tracker::Tracker;

/// External-service handles available to nodes
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn ExternalStore>,
    pub recorder: Arc<dyn EventRecorder>,
    pub tracker: Arc<Tracker>,
}

impl Services {
    pub fn new(
        store: Arc<dyn ExternalStore>,
        recorder: Arc<dyn EventRecorder>,
        tracker: Arc<Tracker>,
    ) -> Self {
        Self {
            store,
            recorder,
            tracker,
        }
    }

    /// Same handles with a different store
    pub fn with_store(&self, store: Arc<dyn ExternalStore>) -> Self {
        Self {
            store,
            ..self.clone()
        }
    }

    /// Same handles with a different event recorder
    pub fn with_recorder(&self, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            recorder,
            ..self.clone()
        }
    }
}

/// Scratch storage shared by sibling nodes within one invocation
///
/// Values are keyed by name and retrieved by type; a lookup with the wrong
/// type behaves like a missing key.
#[derive(Default)]
pub struct Stash {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Stash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous one if it had the same type
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> Option<T> {
        self.entries
            .insert(key.into(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Remove a value; an entry of another type is left in place
    pub fn remove<T: Any + Send + Sync>(&mut self, key: &str) -> Option<T> {
        if !self.entries.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.entries
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Context threaded through one reconciliation
pub struct ReconcileContext<'s> {
    services: Services,
    stash: &'s mut Stash,
    parent: ResourceRef,
    controller_name: Arc<str>,
    cancel: CancellationToken,
}

impl<'s> ReconcileContext<'s> {
    pub fn new(
        services: Services,
        stash: &'s mut Stash,
        parent: ResourceRef,
        controller_name: impl Into<Arc<str>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            services,
            stash,
            parent,
            controller_name: controller_name.into(),
            cancel,
        }
    }

    /// Context for a nested branch running under different services
    ///
    /// The stash, parent identity and cancellation token carry over; the
    /// substitution ends when the derived context is dropped.
    pub fn with_services(&mut self, services: Services) -> ReconcileContext<'_> {
        ReconcileContext {
            services,
            stash: &mut *self.stash,
            parent: self.parent.clone(),
            controller_name: self.controller_name.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn store(&self) -> &dyn ExternalStore {
        self.services.store.as_ref()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.services.tracker
    }

    pub fn stash(&self) -> &Stash {
        self.stash
    }

    pub fn stash_mut(&mut self) -> &mut Stash {
        self.stash
    }

    /// Identity of the parent under reconciliation
    pub fn parent_ref(&self) -> &ResourceRef {
        &self.parent
    }

    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Cancelled` once the ambient token fired
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ReconcileError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Register that the parent depends on `target`
    pub fn track(&self, target: &ResourceRef) {
        self.services.tracker.track(&self.parent, target);
    }

    /// Register a dependency with an explicit lifetime
    pub fn track_with_ttl(&self, target: &ResourceRef, ttl: Duration) {
        self.services
            .tracker
            .track_with_ttl(&self.parent, target, ttl);
    }

    /// Track `target`, then fetch it
    ///
    /// A missing object yields None; the relationship still stands so its
    /// creation re-triggers the parent.
    pub async fn track_and_get(&self, target: &ResourceRef) -> Result<Option<Object>> {
        self.track(target);
        self.services.store.get(target).await
    }

    /// Record an event on `regarding` through the current recorder
    pub async fn record(
        &self,
        regarding: &Object,
        kind: EventKind,
        reason: &str,
        action: &str,
        note: impl Into<String>,
    ) {
        self.services
            .recorder
            .record(regarding, kind, reason, action, Some(note.into()))
            .await;
    }
}
