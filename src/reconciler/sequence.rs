//! Sequence node: ordered composition

use tracing::debug;

use super::{ReconcileContext, ReconcileNode, Requeue};
use crate::error::Result;
use crate::models::Object;

/// Runs nodes in declared order against the same parent
///
/// The first error stops the sequence and propagates unchanged. A fired
/// cancellation token aborts the remaining nodes with `Cancelled`.
pub struct Sequence {
    name: String,
    nodes: Vec<ReconcileNode>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, nodes: Vec<ReconcileNode>) -> Self {
        Self {
            name: name.into(),
            nodes,
        }
    }

    /// Append a node
    pub fn then(mut self, node: impl Into<ReconcileNode>) -> Self {
        self.nodes.push(node.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(super) async fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        parent: &mut Object,
    ) -> Result<Requeue> {
        let mut requeue = Requeue::None;
        for node in &self.nodes {
            ctx.ensure_active()?;
            debug!(sequence = %self.name, node = node.name(), "running");
            let result = node.reconcile(ctx, parent).await?;
            requeue = requeue.merge(result);
        }
        Ok(requeue)
    }
}
