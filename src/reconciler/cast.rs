//! CastParent node: run a nested node against a projection of the parent

use std::sync::Arc;

use tracing::debug;

use super::{ReconcileContext, ReconcileNode, Requeue};
use crate::error::{ReconcileError, Result};
use crate::models::Object;

type ProjectFn = dyn Fn(&Object) -> anyhow::Result<Object> + Send + Sync;
type ReflectFn = dyn Fn(&Object, &mut Object) -> anyhow::Result<()> + Send + Sync;

/// How the parent is projected and, optionally, how changes flow back
///
/// Without a reflect-back function the projection is read-only: a nested
/// node that mutates it fails the reconciliation with a validation error.
#[derive(Clone)]
pub struct CastMapping {
    project: Arc<ProjectFn>,
    reflect_back: Option<Arc<ReflectFn>>,
}

impl CastMapping {
    /// Read-only projection
    pub fn read_only<P>(project: P) -> Self
    where
        P: Fn(&Object) -> anyhow::Result<Object> + Send + Sync + 'static,
    {
        Self {
            project: Arc::new(project),
            reflect_back: None,
        }
    }

    /// Projection whose changes are copied back with `reflect_back(projection, parent)`
    pub fn with_reflect<P, R>(project: P, reflect_back: R) -> Self
    where
        P: Fn(&Object) -> anyhow::Result<Object> + Send + Sync + 'static,
        R: Fn(&Object, &mut Object) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            project: Arc::new(project),
            reflect_back: Some(Arc::new(reflect_back)),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.reflect_back.is_none()
    }
}

pub struct CastParent {
    name: String,
    mapping: CastMapping,
    node: Box<ReconcileNode>,
}

impl CastParent {
    pub fn new(name: impl Into<String>, mapping: CastMapping, node: impl Into<ReconcileNode>) -> Self {
        Self {
            name: name.into(),
            mapping,
            node: Box::new(node.into()),
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
        let mut projected =
            (self.mapping.project)(&*parent).map_err(|e| ReconcileError::from_user(&self.name, e))?;

        let requeue = match &self.mapping.reflect_back {
            Some(reflect_back) => {
                let requeue = self.node.reconcile(ctx, &mut projected).await?;
                reflect_back(&projected, &mut *parent)
                    .map_err(|e| ReconcileError::from_user(&self.name, e))?;
                requeue
            }
            None => {
                let before = serde_json::to_value(&projected)?;
                let requeue = self.node.reconcile(ctx, &mut projected).await?;
                if serde_json::to_value(&projected)? != before {
                    return Err(ReconcileError::validation(format!(
                        "node {:?} mutated the read-only projection of {:?}; supply a reflect-back mapping",
                        self.node.name(),
                        self.name
                    )));
                }
                requeue
            }
        };

        debug!(node = %self.name, "projection reconciled");
        Ok(requeue)
    }
}
