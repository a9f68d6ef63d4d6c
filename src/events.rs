//! Event recording
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so reconcile nodes can emit standard Kubernetes Events on the parent.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

use crate::models::{Object, ResourceRef};

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        }
    }
}

/// Publishes events about an object
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record an event on `regarding`
    ///
    /// * `reason` - machine-readable reason (e.g. "Created")
    /// * `action` - what the controller was doing (e.g. "Reconcile")
    /// * `note` - optional human-readable message
    async fn record(
        &self,
        regarding: &Object,
        kind: EventKind,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Reference suitable for the `regarding` field of an Event
pub fn object_reference(obj: &Object) -> ObjectReference {
    ObjectReference {
        api_version: obj.types.as_ref().map(|t| t.api_version.clone()),
        kind: obj.types.as_ref().map(|t| t.kind.clone()),
        name: obj.metadata.name.clone(),
        namespace: obj.metadata.namespace.clone(),
        uid: obj.metadata.uid.clone(),
        resource_version: obj.metadata.resource_version.clone(),
        field_path: None,
    }
}

/// Production recorder wrapping `kube::runtime::events::Recorder`
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// The controller name appears as the "reportingComponent" on Events
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        regarding: &Object,
        kind: EventKind,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_: kind.into(),
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self
            .recorder
            .publish(&event, &object_reference(regarding))
            .await
        {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Recorder that drops everything
pub struct NoopRecorder;

#[async_trait]
impl EventRecorder for NoopRecorder {
    async fn record(
        &self,
        _regarding: &Object,
        _kind: EventKind,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// An event captured by `MemoryRecorder`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub regarding: Option<ResourceRef>,
    pub kind: EventKind,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

/// Recorder keeping events in memory, for embedders and tests
#[derive(Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(
        &self,
        regarding: &Object,
        kind: EventKind,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            regarding: ResourceRef::from_object(regarding),
            kind,
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    pub const CREATED: &str = "Created";
    pub const UPDATED: &str = "Updated";
    pub const DELETED: &str = "Deleted";
    pub const CREATION_FAILED: &str = "CreationFailed";
    pub const UPDATE_FAILED: &str = "UpdateFailed";
    pub const DELETE_FAILED: &str = "DeleteFailed";
    pub const STATUS_UPDATED: &str = "StatusUpdated";
    pub const STATUS_UPDATE_FAILED: &str = "StatusUpdateFailed";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const FINALIZER_ADDED: &str = "FinalizerAdded";
    pub const FINALIZER_REMOVED: &str = "FinalizerRemoved";
    pub const FINALIZER_PATCH_FAILED: &str = "FinalizerPatchFailed";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    pub const CREATE: &str = "Create";
    pub const UPDATE: &str = "Update";
    pub const DELETE: &str = "Delete";
    pub const FINALIZE: &str = "Finalize";
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;
    use kube::discovery::ApiResource;

    fn widget() -> Object {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("example.dev", "v1", "Widget"));
        let mut obj = Object::new("w1", &ar).within("default");
        obj.metadata.uid = Some("uid-1".to_string());
        obj
    }

    #[test]
    fn recorders_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopRecorder>();
        assert_send_sync::<MemoryRecorder>();
    }

    #[test]
    fn object_reference_carries_identity() {
        let r = object_reference(&widget());
        assert_eq!(r.api_version.as_deref(), Some("example.dev/v1"));
        assert_eq!(r.kind.as_deref(), Some("Widget"));
        assert_eq!(r.uid.as_deref(), Some("uid-1"));
    }

    #[tokio::test]
    async fn memory_recorder_captures_events() {
        let recorder = MemoryRecorder::new();
        recorder
            .record(
                &widget(),
                EventKind::Normal,
                reasons::CREATED,
                actions::CREATE,
                Some("Created ConfigMap \"w1\"".to_string()),
            )
            .await;

        let created = recorder.with_reason(reasons::CREATED);
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].regarding,
            Some(ResourceRef::new("example.dev", "Widget", "default", "w1"))
        );
        assert!(recorder.with_reason(reasons::DELETED).is_empty());
    }

    #[tokio::test]
    async fn noop_recorder_does_not_panic() {
        NoopRecorder
            .record(&widget(), EventKind::Warning, "Any", actions::RECONCILE, None)
            .await;
    }
}
