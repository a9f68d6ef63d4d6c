//! Reconciliation runtime
//!
//! Drives a parent resource and the child resources it controls toward a
//! desired state, repeatedly and idempotently. A hosting scheduler (for
//! example a kube-runtime `Controller`) calls `ParentController::reconcile`
//! for each parent identity and turns the returned `Requeue` into its next
//! action.
//!
//! Structure:
//! - `reconciler/` - node composition engine and the parent controller
//! - `tracker/` - dependency tracker with TTL expiry
//! - `store/` - external store abstraction (Kubernetes and in-memory)
//! - `models/` - object identity, status and condition helpers
//! - `events.rs` - Kubernetes event recording
//! - `config/` and `logging.rs` - runtime settings and tracing setup

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod reconciler;
pub mod store;
pub mod tracker;

// Re-export commonly used types for convenience
pub use error::{ReconcileError, Result};
pub use events::{EventKind, EventRecorder, KubeEventRecorder, MemoryRecorder, NoopRecorder};
pub use models::{Condition, ConditionSet, ConditionStatus, Object, ObjectExt, ResourceRef};
pub use reconciler::{
    CastMapping, CastParent, ChildHandler, ChildOutcome, ChildReconciler, ParentController,
    ReconcileContext, ReconcileNode, Requeue, Sequence, Services, Stash, SyncHandler,
    SyncReconciler, WithConfig, WithFinalizer,
};
pub use store::{ExternalStore, KindRegistry, KubeStore, ListSelector, MemoryStore};
pub use tracker::Tracker;
