//! ParentController: the top-level driver
//!
//! Fetches the parent, runs the root node with a fresh stash, then
//! normalizes conditions, stamps `observedGeneration` and persists the status
//! if it changed. The hosting scheduler calls `reconcile` and owns retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::discovery::ApiResource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{ReconcileContext, ReconcileNode, Requeue, Services, Stash};
use crate::config::RuntimeSettings;
use crate::error::{ReconcileError, Result};
use crate::events::{EventKind, actions, reasons};
use crate::models::{
    Condition, ConditionSet, Object, ObjectExt, ResourceRef, normalize_conditions,
};

/// Source of the current time for condition transitions
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct ParentController {
    name: String,
    kind: ApiResource,
    root: ReconcileNode,
    services: Services,
    conditions: Option<ConditionSet>,
    clock: Clock,
}

impl ParentController {
    /// `name` is reported on events and labels the children this controller creates
    pub fn new(
        name: impl Into<String>,
        kind: ApiResource,
        root: impl Into<ReconcileNode>,
        services: Services,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            root: root.into(),
            services,
            conditions: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Controller named after `settings.controller_name`
    pub fn from_settings(
        settings: &RuntimeSettings,
        kind: ApiResource,
        root: impl Into<ReconcileNode>,
        services: Services,
    ) -> Self {
        Self::new(settings.controller_name.clone(), kind, root, services)
    }

    /// Seed these condition types as Unknown when missing
    pub fn with_conditions(mut self, conditions: ConditionSet) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ApiResource {
        &self.kind
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Reconcile the parent identified by `target`
    ///
    /// A missing parent is a no-op that also drops the tracking
    /// relationships it owned. When both the root node and the status
    /// update fail, the root node's error is returned.
    #[instrument(skip(self, target, cancel), fields(controller = %self.name, parent = %target))]
    pub async fn reconcile(
        &self,
        target: &ResourceRef,
        cancel: CancellationToken,
    ) -> Result<Requeue> {
        if !target.is_kind(&self.kind) {
            return Err(ReconcileError::validation(format!(
                "{} is not a {} handled by {}",
                target, self.kind.kind, self.name
            )));
        }

        let Some(original) = self.services.store.get(target).await? else {
            debug!("parent not found, nothing to do");
            self.services.tracker.untrack_all(target);
            return Ok(Requeue::None);
        };

        let previous_conditions = original.conditions()?;
        let mut parent = original.clone();
        if let Some(set) = &self.conditions {
            let mut conditions = previous_conditions.clone();
            set.initialize(&mut conditions);
            parent.set_conditions(&conditions)?;
        }

        let mut stash = Stash::new();
        let result = {
            let mut ctx = ReconcileContext::new(
                self.services.clone(),
                &mut stash,
                target.clone(),
                self.name.as_str(),
                cancel,
            );
            self.root.reconcile(&mut ctx, &mut parent).await
        };

        let persisted = self
            .persist_status(&original, &previous_conditions, &mut parent)
            .await;

        match result {
            Ok(requeue) => {
                persisted?;
                debug!(?requeue, "reconciled");
                Ok(requeue)
            }
            Err(err) => {
                warn!(error = %err, category = err.category(), "reconcile failed");
                self.services
                    .recorder
                    .record(
                        &parent,
                        EventKind::Warning,
                        reasons::RECONCILE_FAILED,
                        actions::RECONCILE,
                        Some(err.to_string()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn persist_status(
        &self,
        original: &Object,
        previous_conditions: &[Condition],
        parent: &mut Object,
    ) -> Result<()> {
        let generation = parent.generation();
        let conditions = parent.conditions()?;
        if !conditions.is_empty() || !previous_conditions.is_empty() {
            let normalized =
                normalize_conditions(previous_conditions, conditions, generation, (self.clock)());
            parent.set_conditions(&normalized)?;
        }
        parent.set_observed_generation(generation);

        if parent.status_value() == original.status_value() {
            debug!("status unchanged");
            return Ok(());
        }

        match self.services.store.update_status(parent).await {
            Ok(_) => {
                info!(generation, "status updated");
                self.services
                    .recorder
                    .record(
                        parent,
                        EventKind::Normal,
                        reasons::STATUS_UPDATED,
                        actions::RECONCILE,
                        Some("Updated status".to_string()),
                    )
                    .await;
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                // Finalizer removal let the parent go
                debug!("parent deleted before status update");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "status update failed");
                self.services
                    .recorder
                    .record(
                        parent,
                        EventKind::Warning,
                        reasons::STATUS_UPDATE_FAILED,
                        actions::RECONCILE,
                        Some(format!("Failed to update status: {}", err)),
                    )
                    .await;
                Err(err)
            }
        }
    }
}
