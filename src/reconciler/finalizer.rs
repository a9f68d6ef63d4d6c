//! Finalizer lifecycle
//!
//! While the parent is active the finalizer is added before any nested work
//! runs, so external state is never created without a cleanup guarantee.
//! Once the parent is terminating the nested node runs its finalize path and
//! the finalizer is removed only if that succeeded.
//!
//! Finalizer changes are merge patches touching only `metadata.finalizers`
//! and `metadata.resourceVersion`. A version conflict is returned as-is; the
//! next reconciliation sees the fresh object.

use serde_json::json;
use tracing::{debug, info, warn};

use super::{ReconcileContext, ReconcileNode, Requeue};
use crate::error::{ReconcileError, Result};
use crate::events::{EventKind, actions, reasons};
use crate::models::{Object, ObjectExt, ResourceRef};

pub struct WithFinalizer {
    name: String,
    finalizer: String,
    node: Box<ReconcileNode>,
}

impl WithFinalizer {
    /// `finalizer` must be unique to this controller and stable across releases
    pub fn new(
        name: impl Into<String>,
        finalizer: impl Into<String>,
        node: impl Into<ReconcileNode>,
    ) -> Self {
        Self {
            name: name.into(),
            finalizer: finalizer.into(),
            node: Box::new(node.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    pub(super) async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        parent: &mut Object,
    ) -> Result<Requeue> {
        if !parent.is_terminating() {
            add_finalizer(ctx, parent, &self.finalizer).await?;
            return self.node.reconcile(ctx, parent).await;
        }

        if !parent.has_finalizer(&self.finalizer) {
            debug!(
                node = %self.name,
                finalizer = %self.finalizer,
                "parent terminating without our finalizer, nothing to clean up"
            );
            return Ok(Requeue::None);
        }

        let requeue = self.node.reconcile(ctx, parent).await?;
        remove_finalizer(ctx, parent, &self.finalizer).await?;
        Ok(requeue)
    }
}

/// Ensure `finalizer` is present on the parent; no call if it already is
pub(super) async fn add_finalizer(
    ctx: &ReconcileContext<'_>,
    parent: &mut Object,
    finalizer: &str,
) -> Result<()> {
    if parent.has_finalizer(finalizer) {
        return Ok(());
    }
    let mut finalizers = parent.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    patch_finalizers(ctx, parent, finalizers, reasons::FINALIZER_ADDED).await?;
    info!(parent = %ctx.parent_ref(), finalizer, "added finalizer");
    Ok(())
}

/// Ensure `finalizer` is absent from the parent; no call if it already is
pub(super) async fn remove_finalizer(
    ctx: &ReconcileContext<'_>,
    parent: &mut Object,
    finalizer: &str,
) -> Result<()> {
    if !parent.has_finalizer(finalizer) {
        return Ok(());
    }
    let finalizers: Vec<String> = parent
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    patch_finalizers(ctx, parent, finalizers, reasons::FINALIZER_REMOVED).await?;
    info!(parent = %ctx.parent_ref(), finalizer, "removed finalizer");
    Ok(())
}

async fn patch_finalizers(
    ctx: &ReconcileContext<'_>,
    parent: &mut Object,
    finalizers: Vec<String>,
    reason: &str,
) -> Result<()> {
    let target = ResourceRef::from_object(parent)
        .ok_or_else(|| ReconcileError::validation("parent is missing apiVersion/kind or name"))?;
    let version = parent
        .resource_version()
        .ok_or_else(|| {
            ReconcileError::validation(format!("parent {} has no resourceVersion", target))
        })?
        .to_string();

    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": version,
        }
    });
    let body = serde_json::to_vec(&patch)?;

    let patched = match ctx.store().patch(&target, &body, &version).await {
        Ok(patched) => patched,
        Err(err) => {
            warn!(parent = %target, error = %err, "finalizer patch failed");
            ctx.record(
                parent,
                EventKind::Warning,
                reasons::FINALIZER_PATCH_FAILED,
                actions::FINALIZE,
                format!("Failed to update finalizers: {}", err),
            )
            .await;
            return Err(err);
        }
    };

    // Keep the in-flight status; only metadata moved forward
    parent.metadata.finalizers = patched.metadata.finalizers.clone();
    parent.metadata.resource_version = patched.metadata.resource_version.clone();

    ctx.record(
        parent,
        EventKind::Normal,
        reason,
        actions::FINALIZE,
        format!("Finalizers: [{}]", parent.finalizers().join(", ")),
    )
    .await;
    Ok(())
}
