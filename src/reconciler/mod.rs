//! Reconcile node composition engine
//!
//! A reconciliation is a tree of `ReconcileNode`s run against one parent
//! object:
//! - `Sync` - user function on the normal path, another on the finalize path
//! - `Sequence` - ordered nodes, short-circuiting on the first error
//! - `CastParent` - nested node against a projection of the parent
//! - `WithConfig` - nested node under substituted services
//! - `WithFinalizer` - finalizer lifecycle around a nested node
//! - `Child` - converge exactly one child object toward a desired state
//!
//! `ParentController` drives the root node and persists the parent status.

mod cast;
mod child;
mod context;
mod finalizer;
mod parent;
mod sequence;
mod sync;
mod with_config;

pub use cast::{CastMapping, CastParent};
pub use child::{ChildHandler, ChildMatcher, ChildOutcome, ChildReconciler, MANAGED_BY_LABEL};
pub use context::{ReconcileContext, Services, Stash};
pub use finalizer::WithFinalizer;
pub use parent::{Clock, ParentController};
pub use sequence::Sequence;
pub use sync::{SyncHandler, SyncReconciler};
pub use with_config::{ServicesProvider, WithConfig};

use std::time::Duration;

use futures::future::BoxFuture;
use kube::runtime::controller::Action;

use crate::error::Result;
use crate::models::Object;

/// Whether and when the parent should be reconciled again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Requeue {
    /// Wait for the next change or resync
    #[default]
    None,
    /// Reconcile again after the delay
    After(Duration),
    /// Reconcile again right away
    Immediate,
}

impl Requeue {
    /// Combine two directives, keeping the more urgent one
    ///
    /// `Immediate` beats any `After`, the shorter `After` beats the longer,
    /// and anything beats `None`.
    pub fn merge(self, other: Requeue) -> Requeue {
        match (self, other) {
            (Requeue::Immediate, _) | (_, Requeue::Immediate) => Requeue::Immediate,
            (Requeue::After(a), Requeue::After(b)) => Requeue::After(a.min(b)),
            (Requeue::After(d), Requeue::None) | (Requeue::None, Requeue::After(d)) => {
                Requeue::After(d)
            }
            (Requeue::None, Requeue::None) => Requeue::None,
        }
    }

    /// Translate into a kube-runtime controller action
    pub fn into_action(self) -> Action {
        match self {
            Requeue::None => Action::await_change(),
            Requeue::After(delay) => Action::requeue(delay),
            Requeue::Immediate => Action::requeue(Duration::ZERO),
        }
    }
}

/// A node in the reconciliation tree
pub enum ReconcileNode {
    Sync(SyncReconciler),
    Sequence(Sequence),
    CastParent(CastParent),
    WithConfig(WithConfig),
    WithFinalizer(WithFinalizer),
    Child(ChildReconciler),
}

impl ReconcileNode {
    /// Name used in logs and in wrapped user errors
    pub fn name(&self) -> &str {
        match self {
            ReconcileNode::Sync(n) => n.name(),
            ReconcileNode::Sequence(n) => n.name(),
            ReconcileNode::CastParent(n) => n.name(),
            ReconcileNode::WithConfig(n) => n.name(),
            ReconcileNode::WithFinalizer(n) => n.name(),
            ReconcileNode::Child(n) => n.name(),
        }
    }

    /// Run this node against `parent`
    ///
    /// Mutations to `parent` (status, metadata updated by finalizer patches)
    /// are visible to the nodes that run after it.
    pub fn reconcile<'a, 's: 'a>(
        &'a self,
        ctx: &'a mut ReconcileContext<'s>,
        parent: &'a mut Object,
    ) -> BoxFuture<'a, Result<Requeue>> {
        Box::pin(async move {
            match self {
                ReconcileNode::Sync(n) => n.reconcile(ctx, parent).await,
                ReconcileNode::Sequence(n) => n.reconcile(ctx, parent).await,
                ReconcileNode::CastParent(n) => n.reconcile(ctx, parent).await,
                ReconcileNode::WithConfig(n) => n.reconcile(ctx, parent).await,
                ReconcileNode::WithFinalizer(n) => n.reconcile(ctx, parent).await,
                ReconcileNode::Child(n) => n.reconcile(ctx, parent).await,
            }
        })
    }
}

impl From<SyncReconciler> for ReconcileNode {
    fn from(node: SyncReconciler) -> Self {
        ReconcileNode::Sync(node)
    }
}

impl From<Sequence> for ReconcileNode {
    fn from(node: Sequence) -> Self {
        ReconcileNode::Sequence(node)
    }
}

impl From<CastParent> for ReconcileNode {
    fn from(node: CastParent) -> Self {
        ReconcileNode::CastParent(node)
    }
}

impl From<WithConfig> for ReconcileNode {
    fn from(node: WithConfig) -> Self {
        ReconcileNode::WithConfig(node)
    }
}

impl From<WithFinalizer> for ReconcileNode {
    fn from(node: WithFinalizer) -> Self {
        ReconcileNode::WithFinalizer(node)
    }
}

impl From<ChildReconciler> for ReconcileNode {
    fn from(node: ChildReconciler) -> Self {
        ReconcileNode::Child(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_urgency() {
        let short = Requeue::After(Duration::from_secs(5));
        let long = Requeue::After(Duration::from_secs(60));

        assert_eq!(Requeue::None.merge(Requeue::None), Requeue::None);
        assert_eq!(Requeue::None.merge(long), long);
        assert_eq!(long.merge(short), short);
        assert_eq!(short.merge(long), short);
        assert_eq!(short.merge(Requeue::Immediate), Requeue::Immediate);
        assert_eq!(Requeue::Immediate.merge(Requeue::None), Requeue::Immediate);
    }

    #[test]
    fn test_into_action() {
        assert_eq!(Requeue::None.into_action(), Action::await_change());
        assert_eq!(
            Requeue::After(Duration::from_secs(30)).into_action(),
            Action::requeue(Duration::from_secs(30))
        );
        assert_eq!(
            Requeue::Immediate.into_action(),
            Action::requeue(Duration::ZERO)
        );
    }
}
