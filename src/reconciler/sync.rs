//! Sync node: user logic against the parent
//!
//! The normal path runs `SyncHandler::sync`. Once the parent is terminating
//! the finalize path runs instead, or after `sync` when the node is
//! configured to sync during finalization.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ReconcileContext, Requeue};
use crate::error::{ReconcileError, Result};
use crate::models::{Object, ObjectExt};

/// User logic run by a `SyncReconciler`
///
/// Errors are reported as `UserFunction` unless they already are a
/// `ReconcileError`, in which case they propagate as-is.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Normal path, typically computing status
    async fn sync(
        &self,
        ctx: &mut ReconcileContext<'_>,
        parent: &mut Object,
    ) -> anyhow::Result<Requeue>;

    /// Cleanup path while the parent is terminating
    async fn finalize(
        &self,
        _ctx: &mut ReconcileContext<'_>,
        _parent: &mut Object,
    ) -> anyhow::Result<Requeue> {
        Ok(Requeue::None)
    }
}

pub struct SyncReconciler {
    name: String,
    handler: Arc<dyn SyncHandler>,
    sync_during_finalization: bool,
}

impl SyncReconciler {
    pub fn new(name: impl Into<String>, handler: Arc<dyn SyncHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            sync_during_finalization: false,
        }
    }

    /// Also run `sync` (before `finalize`) while the parent is terminating
    pub fn sync_during_finalization(mut self) -> Self {
        self.sync_during_finalization = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(super) async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        parent: &mut Object,
    ) -> Result<Requeue> {
        if !parent.is_terminating() {
            return self
                .handler
                .sync(ctx, parent)
                .await
                .map_err(|e| ReconcileError::from_user(&self.name, e));
        }

        let mut requeue = Requeue::None;
        if self.sync_during_finalization {
            requeue = self
                .handler
                .sync(ctx, parent)
                .await
                .map_err(|e| ReconcileError::from_user(&self.name, e))?;
        }

        debug!(node = %self.name, "parent terminating, running finalize");
        let finalized = self
            .handler
            .finalize(ctx, parent)
            .await
            .map_err(|e| ReconcileError::from_user(&self.name, e))?;
        Ok(requeue.merge(finalized))
    }
}
