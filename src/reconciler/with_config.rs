//! WithConfig node: run a nested node under substituted services

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ReconcileContext, ReconcileNode, Requeue, Services};
use crate::error::{ReconcileError, Result};
use crate::models::Object;

/// Derives the services a branch runs under
///
/// Typical uses: a store bound to credentials read from a Secret the
/// parent references, or a recorder scoped to a tenant.
#[async_trait]
pub trait ServicesProvider: Send + Sync {
    async fn services(
        &self,
        ctx: &ReconcileContext<'_>,
        parent: &Object,
    ) -> anyhow::Result<Services>;
}

pub struct WithConfig {
    name: String,
    provider: Arc<dyn ServicesProvider>,
    node: Box<ReconcileNode>,
}

impl WithConfig {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn ServicesProvider>,
        node: impl Into<ReconcileNode>,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
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
        let services = self
            .provider
            .services(ctx, parent)
            .await
            .map_err(|e| ReconcileError::from_user(&self.name, e))?;

        debug!(node = %self.name, nested = self.node.name(), "running with derived services");
        let mut derived = ctx.with_services(services);
        self.node.reconcile(&mut derived, parent).await
    }
}
