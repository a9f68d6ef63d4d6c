//! ChildReconciler: converge one child object toward a desired state
//!
//! Each invocation computes the desired child from the parent, finds the
//! existing child, then creates, updates, deletes or leaves it alone. The
//! outcome is reflected onto the parent through the handler; that is the
//! only path by which child state reaches parent status.
//!
//! Children are claimed in one of two ways:
//! - owner mode (default): the child carries a controller owner reference
//!   to the parent and garbage collection follows the parent
//! - finalizer mode: no owner reference (e.g. cross-namespace children);
//!   a caller-supplied `ChildMatcher` identifies the child and a finalizer on
//!   the parent guarantees it is deleted before the parent goes away
//!
//! Either way only objects labelled as managed by this controller are
//! considered.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::core::TypeMeta;
use kube::discovery::ApiResource;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::finalizer::{add_finalizer, remove_finalizer};
use super::{ReconcileContext, Requeue};
use crate::error::{ReconcileError, Result};
use crate::events::{EventKind, actions, reasons};
use crate::models::{Object, ObjectExt, ResourceRef, controller_owner_ref};
use crate::store::ListSelector;

/// Label stamped on every child this runtime creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// What happened to the child during this invocation
#[derive(Debug)]
pub enum ChildOutcome<'a> {
    /// The child as the store returned it (created, updated or unchanged)
    Present(&'a Object),
    /// No child exists (none desired, or it was deleted)
    Absent,
    /// Creating, updating or deleting the child failed
    Failed(&'a ReconcileError),
}

/// User logic for one child kind
#[async_trait]
pub trait ChildHandler: Send + Sync {
    /// Kind of the child objects
    fn child_kind(&self) -> ApiResource;

    /// Desired child for the parent; None means no child should exist
    ///
    /// Namespace defaults to the parent's; type information defaults to
    /// `child_kind`.
    async fn desired_child(
        &self,
        ctx: &mut ReconcileContext<'_>,
        parent: &Object,
    ) -> anyhow::Result<Option<Object>>;

    /// Project the outcome onto the parent status
    fn reflect_child_status_on_parent(&self, parent: &mut Object, outcome: ChildOutcome<'_>);

    /// Whether the existing child already matches the desired one
    ///
    /// The default compares every top-level field of the desired object
    /// except `status`, plus the desired labels and annotations, ignoring
    /// anything the server adds.
    fn semantic_equals(&self, desired: &Object, existing: &Object) -> bool {
        default_semantic_equals(desired, existing)
    }

    /// Build the object sent to `update` from the existing and desired child
    ///
    /// The default starts from `existing`, so server-managed metadata (uid,
    /// resourceVersion) is preserved, and overlays the desired fields.
    fn merge_before_update(&self, existing: &Object, desired: &Object) -> Object {
        default_merge(existing, desired)
    }

    /// Representation of the child used in logs
    fn sanitize(&self, child: &Object) -> Value {
        serde_json::to_value(&child.metadata).unwrap_or(Value::Null)
    }
}

/// Whether `child` is the one object that belongs to `parent`
///
/// Arguments are `(parent, child)`. Must single out at most one object per
/// parent; it is the only ownership proof a finalizer-mode child has.
pub type ChildMatcher = Arc<dyn Fn(&Object, &Object) -> bool + Send + Sync>;

struct FinalizerClaim {
    finalizer: String,
    our_child: ChildMatcher,
}

pub struct ChildReconciler {
    name: String,
    handler: Arc<dyn ChildHandler>,
    claim: Option<FinalizerClaim>,
}

impl ChildReconciler {
    pub fn new(name: impl Into<String>, handler: Arc<dyn ChildHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            claim: None,
        }
    }

    /// Claim children with `our_child` instead of an owner reference, and
    /// guard them with `finalizer` on the parent
    pub fn with_finalizer<F>(mut self, finalizer: impl Into<String>, our_child: F) -> Self
    where
        F: Fn(&Object, &Object) -> bool + Send + Sync + 'static,
    {
        self.claim = Some(FinalizerClaim {
            finalizer: finalizer.into(),
            our_child: Arc::new(our_child),
        });
        self
    }

    fn finalizer(&self) -> Option<&str> {
        self.claim.as_ref().map(|claim| claim.finalizer.as_str())
    }

    /// Whether `child` is claimed by `parent` under this node's mode
    fn claims(&self, parent: &Object, child: &Object) -> bool {
        match &self.claim {
            Some(claim) => (claim.our_child)(parent, child),
            None => child.is_controlled_by(parent),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(super) async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        parent: &mut Object,
    ) -> Result<Requeue> {
        let kind = self.handler.child_kind();
        let terminating = parent.is_terminating();

        if let Some(finalizer) = self.finalizer() {
            if terminating && !parent.has_finalizer(finalizer) {
                debug!(node = %self.name, "parent terminating and child already cleaned up");
                return Ok(Requeue::None);
            }
        }

        let desired = if terminating {
            debug!(node = %self.name, "parent terminating, child will be removed");
            None
        } else {
            match self
                .handler
                .desired_child(ctx, parent)
                .await
                .map_err(|e| ReconcileError::from_user(&self.name, e))?
            {
                Some(child) => Some(self.prepare_desired(ctx, parent, child, &kind)?),
                None => None,
            }
        };

        let existing = self.find_existing(ctx, parent, &kind).await?;

        if desired.is_some() {
            if let Some(finalizer) = self.finalizer() {
                add_finalizer(ctx, parent, finalizer).await?;
            }
        }

        let child_exists = match (existing, desired) {
            (None, None) => {
                debug!(node = %self.name, "no child desired, none exists");
                self.handler
                    .reflect_child_status_on_parent(parent, ChildOutcome::Absent);
                false
            }
            (None, Some(desired)) => {
                self.create(ctx, parent, desired).await?;
                true
            }
            (Some(existing), None) => {
                self.delete(ctx, parent, existing).await?;
                false
            }
            (Some(existing), Some(desired)) => {
                if self.handler.semantic_equals(&desired, &existing) {
                    debug!(node = %self.name, child = %self.handler.sanitize(&existing), "child up to date");
                    self.handler
                        .reflect_child_status_on_parent(parent, ChildOutcome::Present(&existing));
                } else {
                    let merged = self.handler.merge_before_update(&existing, &desired);
                    self.update(ctx, parent, merged).await?;
                }
                true
            }
        };

        // Nothing left to guard once the child is gone
        if let Some(finalizer) = self.finalizer() {
            if !child_exists {
                remove_finalizer(ctx, parent, finalizer).await?;
            }
        }

        Ok(Requeue::None)
    }

    /// Fill in the identity and ownership the desired child must carry
    fn prepare_desired(
        &self,
        ctx: &ReconcileContext<'_>,
        parent: &Object,
        mut child: Object,
        kind: &ApiResource,
    ) -> Result<Object> {
        if child.types.is_none() {
            child.types = Some(TypeMeta {
                api_version: kind.api_version.clone(),
                kind: kind.kind.clone(),
            });
        }
        if child.metadata.namespace.is_none() {
            child.metadata.namespace = parent.metadata.namespace.clone();
        }

        child
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(MANAGED_BY_LABEL.to_string(), ctx.controller_name().to_string());

        if self.claim.is_none() {
            let owner = controller_owner_ref(parent).ok_or_else(|| {
                ReconcileError::validation(format!(
                    "node {:?}: parent has no uid, cannot own children",
                    self.name
                ))
            })?;
            let owners = child.metadata.owner_references.get_or_insert_with(Vec::new);
            if !owners.iter().any(|o| o.uid == owner.uid) {
                owners.push(owner);
            }
        }
        Ok(child)
    }

    /// Find the child this node manages, failing if the match is ambiguous
    async fn find_existing(
        &self,
        ctx: &ReconcileContext<'_>,
        parent: &Object,
        kind: &ApiResource,
    ) -> Result<Option<Object>> {
        // Finalizer-mode children may live in any namespace
        let selector = match (&self.claim, &parent.metadata.namespace) {
            (None, Some(namespace)) => ListSelector::in_namespace(namespace),
            _ => ListSelector::default(),
        }
        .with_label(MANAGED_BY_LABEL, ctx.controller_name());

        let mut candidates: Vec<Object> = ctx
            .store()
            .list(kind, &selector)
            .await?
            .into_iter()
            .filter(|child| self.claims(parent, child))
            .collect();

        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.pop()),
            n => Err(ReconcileError::validation(format!(
                "node {:?} found {} {} children for {}, expected at most one",
                self.name,
                n,
                kind.kind,
                ctx.parent_ref()
            ))),
        }
    }

    async fn create(
        &self,
        ctx: &ReconcileContext<'_>,
        parent: &mut Object,
        desired: Object,
    ) -> Result<()> {
        let display = display_name(&desired);
        let kind = kind_of(&desired);

        let err = match ctx.store().create(&desired).await {
            Ok(created) => {
                info!(node = %self.name, child = %self.handler.sanitize(&created), "created child");
                ctx.record(
                    parent,
                    EventKind::Normal,
                    reasons::CREATED,
                    actions::CREATE,
                    format!("Created {} {:?}", kind, created.metadata.name.as_deref().unwrap_or(&display)),
                )
                .await;
                self.handler
                    .reflect_child_status_on_parent(parent, ChildOutcome::Present(&created));
                return Ok(());
            }
            Err(ReconcileError::AlreadyExists { .. }) => {
                self.name_collision(ctx, parent, &desired).await
            }
            Err(err) => err,
        };

        warn!(node = %self.name, child = %self.handler.sanitize(&desired), error = %err, "failed to create child");
        ctx.record(
            parent,
            EventKind::Warning,
            reasons::CREATION_FAILED,
            actions::CREATE,
            format!("Failed to create {} {:?}: {}", kind, display, err),
        )
        .await;
        self.handler
            .reflect_child_status_on_parent(parent, ChildOutcome::Failed(&err));
        Err(err)
    }

    /// Classify a create that hit an existing name
    ///
    /// An object owned by this parent that the list did not return is a
    /// stale read and retried; anything else is never adopted. A failed
    /// lookup is reported as the create failure.
    async fn name_collision(
        &self,
        ctx: &ReconcileContext<'_>,
        parent: &Object,
        desired: &Object,
    ) -> ReconcileError {
        let kind = kind_of(desired);
        let name = display_name(desired);
        let Some(target) = ResourceRef::from_object(desired) else {
            return ReconcileError::AlreadyExists { kind, name };
        };

        let ours = match ctx.store().get(&target).await {
            Ok(Some(other)) => self.claims(parent, &other),
            // Deleted since; the next attempt may succeed
            Ok(None) => true,
            Err(err) => return err,
        };

        if ours {
            ReconcileError::conflict(
                kind,
                name,
                "child exists but was not observed; retrying on next reconcile",
            )
        } else {
            ReconcileError::validation(format!(
                "{} {:?} already exists and is not managed by {}; refusing to adopt it",
                kind,
                name,
                ctx.parent_ref()
            ))
        }
    }

    async fn update(
        &self,
        ctx: &ReconcileContext<'_>,
        parent: &mut Object,
        merged: Object,
    ) -> Result<()> {
        let display = display_name(&merged);
        let kind = kind_of(&merged);

        match ctx.store().update(&merged).await {
            Ok(updated) => {
                info!(node = %self.name, child = %self.handler.sanitize(&updated), "updated child");
                ctx.record(
                    parent,
                    EventKind::Normal,
                    reasons::UPDATED,
                    actions::UPDATE,
                    format!("Updated {} {:?}", kind, display),
                )
                .await;
                self.handler
                    .reflect_child_status_on_parent(parent, ChildOutcome::Present(&updated));
                Ok(())
            }
            Err(err) => {
                warn!(node = %self.name, child = %self.handler.sanitize(&merged), error = %err, "failed to update child");
                ctx.record(
                    parent,
                    EventKind::Warning,
                    reasons::UPDATE_FAILED,
                    actions::UPDATE,
                    format!("Failed to update {} {:?}: {}", kind, display, err),
                )
                .await;
                self.handler
                    .reflect_child_status_on_parent(parent, ChildOutcome::Failed(&err));
                Err(err)
            }
        }
    }

    async fn delete(
        &self,
        ctx: &ReconcileContext<'_>,
        parent: &mut Object,
        existing: Object,
    ) -> Result<()> {
        let display = display_name(&existing);
        let kind = kind_of(&existing);
        let target = ResourceRef::from_object(&existing).ok_or_else(|| {
            ReconcileError::validation(format!("{} child is missing its identity", kind))
        })?;

        match ctx.store().delete(&target).await {
            Ok(()) => {
                info!(node = %self.name, child = %self.handler.sanitize(&existing), "deleted child");
                ctx.record(
                    parent,
                    EventKind::Normal,
                    reasons::DELETED,
                    actions::DELETE,
                    format!("Deleted {} {:?}", kind, display),
                )
                .await;
            }
            Err(err) if err.is_not_found() => {
                debug!(node = %self.name, child = %target, "child already gone");
            }
            Err(err) => {
                warn!(node = %self.name, child = %self.handler.sanitize(&existing), error = %err, "failed to delete child");
                ctx.record(
                    parent,
                    EventKind::Warning,
                    reasons::DELETE_FAILED,
                    actions::DELETE,
                    format!("Failed to delete {} {:?}: {}", kind, display, err),
                )
                .await;
                self.handler
                    .reflect_child_status_on_parent(parent, ChildOutcome::Failed(&err));
                return Err(err);
            }
        }

        self.handler
            .reflect_child_status_on_parent(parent, ChildOutcome::Absent);
        Ok(())
    }
}

fn kind_of(obj: &Object) -> String {
    obj.types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default()
}

fn display_name(obj: &Object) -> String {
    obj.metadata
        .name
        .clone()
        .or_else(|| obj.metadata.generate_name.clone())
        .unwrap_or_default()
}

fn is_subset(wanted: Option<&BTreeMap<String, String>>, have: Option<&BTreeMap<String, String>>) -> bool {
    wanted
        .into_iter()
        .flatten()
        .all(|(k, v)| have.and_then(|h| h.get(k)) == Some(v))
}

/// Desired fields (except status) equal, desired labels and annotations present
pub fn default_semantic_equals(desired: &Object, existing: &Object) -> bool {
    if !is_subset(desired.metadata.labels.as_ref(), existing.metadata.labels.as_ref())
        || !is_subset(
            desired.metadata.annotations.as_ref(),
            existing.metadata.annotations.as_ref(),
        )
    {
        return false;
    }

    let Some(fields) = desired.data.as_object() else {
        return true;
    };
    fields
        .iter()
        .filter(|(key, _)| key.as_str() != "status")
        .all(|(key, value)| existing.data.get(key) == Some(value))
}

/// Overlay desired labels, annotations, owners and fields onto `existing`
pub fn default_merge(existing: &Object, desired: &Object) -> Object {
    let mut merged = existing.clone();

    if let Some(labels) = &desired.metadata.labels {
        merged
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
    }
    if let Some(annotations) = &desired.metadata.annotations {
        merged
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
    }
    if let Some(owners) = &desired.metadata.owner_references {
        let merged_owners = merged.metadata.owner_references.get_or_insert_with(Vec::new);
        for owner in owners {
            if !merged_owners.iter().any(|o| o.uid == owner.uid) {
                merged_owners.push(owner.clone());
            }
        }
    }

    if let Some(fields) = desired.data.as_object() {
        if !merged.data.is_object() {
            merged.data = Value::Object(Default::default());
        }
        if let Some(target) = merged.data.as_object_mut() {
            for (key, value) in fields.iter().filter(|(key, _)| key.as_str() != "status") {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}
