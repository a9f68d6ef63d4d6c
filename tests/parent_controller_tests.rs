//! ParentController tests
//!
//! Fetch, status post-processing, persistence decisions, events and error
//! precedence, plus the end-to-end child creation scenario.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, MessageConfigMap, config_map_kind, fixed_time, widget_kind};
use kube::runtime::controller::Action;
use reconcile_runtime::config::RuntimeSettings;
use reconcile_runtime::events::{EventKind, reasons};
use reconcile_runtime::models::find_condition;
use reconcile_runtime::reconciler::MANAGED_BY_LABEL;
use reconcile_runtime::store::Verb;
use reconcile_runtime::{
    ChildReconciler, ConditionSet, ConditionStatus, Object, ObjectExt, ParentController,
    ReconcileContext, ReconcileError, ReconcileNode, Requeue, ResourceRef, Sequence, SyncHandler,
    SyncReconciler,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn conditions() -> ConditionSet {
    ConditionSet::new("Ready").with_dependent("ConfigReady")
}

/// Marks ConfigReady from a switch the test flips between runs
struct ConfigReadiness {
    ready: AtomicBool,
}

#[async_trait]
impl SyncHandler for ConfigReadiness {
    async fn sync(
        &self,
        _ctx: &mut ReconcileContext<'_>,
        parent: &mut Object,
    ) -> anyhow::Result<Requeue> {
        let set = conditions();
        let mut current = parent.conditions()?;
        if self.ready.load(Ordering::SeqCst) {
            set.mark_true(&mut current, "ConfigReady", "ConfigMapPresent");
        } else {
            set.mark_false(&mut current, "ConfigReady", "ConfigMapMissing", "waiting");
        }
        parent.set_conditions(&current)?;
        Ok(Requeue::After(Duration::from_secs(60)))
    }
}

/// Sync step that always fails after writing a status field
struct Broken;

#[async_trait]
impl SyncHandler for Broken {
    async fn sync(
        &self,
        _ctx: &mut ReconcileContext<'_>,
        parent: &mut Object,
    ) -> anyhow::Result<Requeue> {
        parent
            .status_mut()
            .insert("lastError".to_string(), json!("validation failed"));
        Err(ReconcileError::validation("spec.size must be positive").into())
    }
}

/// Tracks and reads the Secret named in spec.secretName
struct SecretReader;

#[async_trait]
impl SyncHandler for SecretReader {
    async fn sync(
        &self,
        ctx: &mut ReconcileContext<'_>,
        parent: &mut Object,
    ) -> anyhow::Result<Requeue> {
        let name = parent.data["spec"]["secretName"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let secret = ResourceRef::new("", "Secret", "default", name);
        let found = ctx.track_and_get(&secret).await?.is_some();
        parent
            .status_mut()
            .insert("secretFound".to_string(), json!(found));
        Ok(Requeue::None)
    }
}

/// Clock the test can move forward
fn clock() -> (Arc<AtomicI64>, reconcile_runtime::reconciler::Clock) {
    let offset = Arc::new(AtomicI64::new(0));
    let handle = offset.clone();
    (offset, Arc::new(move || fixed_time(handle.load(Ordering::SeqCst))))
}

#[tokio::test]
async fn test_scenario_first_reconcile_creates_child_and_status() {
    let harness = Harness::new();
    let parent = harness.seed_widget("w1", json!({"message": "hello"}));
    let target = ResourceRef::from_object(&parent).unwrap();

    let controller = ParentController::new(
        "widgets",
        widget_kind(),
        ChildReconciler::new("config", Arc::new(MessageConfigMap)),
        harness.services(),
    )
    .with_conditions(ConditionSet::new("Ready"));

    let requeue = controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(requeue, Requeue::None);
    assert_eq!(requeue.into_action(), Action::await_change());

    assert_eq!(harness.store.count(Verb::Create), 1);
    assert_eq!(harness.store.objects_of(&config_map_kind()).len(), 1);

    let stored = harness.store.object(&target).unwrap();
    assert_eq!(stored.observed_generation(), Some(stored.generation()));
    let conditions = stored.conditions().unwrap();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].type_, "Ready");
    assert_eq!(conditions[0].status, ConditionStatus::Unknown);
    assert!(conditions[0].last_transition_time.is_some());

    let created = harness.recorder.with_reason(reasons::CREATED);
    assert_eq!(created.len(), 1);
    assert!(
        created[0]
            .note
            .as_deref()
            .unwrap()
            .starts_with("Created ConfigMap")
    );
    assert_eq!(harness.recorder.with_reason(reasons::STATUS_UPDATED).len(), 1);
}

#[tokio::test]
async fn test_controller_built_from_settings_labels_its_children() {
    let harness = Harness::new();
    let parent = harness.seed_widget("w1", json!({"message": "hello"}));
    let target = ResourceRef::from_object(&parent).unwrap();
    let settings = RuntimeSettings {
        controller_name: "widgets-from-file".to_string(),
        ..Default::default()
    };

    let controller = ParentController::from_settings(
        &settings,
        widget_kind(),
        ChildReconciler::new("config", Arc::new(MessageConfigMap)),
        harness.services(),
    );
    assert_eq!(controller.name(), "widgets-from-file");
    controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap();

    let children = harness.store.objects_of(&config_map_kind());
    assert_eq!(children.len(), 1);
    assert_eq!(
        children[0].metadata.labels.as_ref().unwrap()[MANAGED_BY_LABEL],
        "widgets-from-file"
    );

    // A second pass finds the labelled child instead of creating another
    controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(harness.store.count(Verb::Create), 1);
}

#[tokio::test]
async fn test_missing_parent_is_a_noop_and_drops_its_tracking() {
    let harness = Harness::new();
    let target = ResourceRef::new("example.dev", "Widget", "default", "gone");
    let secret = ResourceRef::new("", "Secret", "default", "creds");
    harness.tracker.track(&target, &secret);

    let controller = ParentController::new(
        "widgets",
        widget_kind(),
        SyncReconciler::new("secret", Arc::new(SecretReader)),
        harness.services(),
    );
    let requeue = controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(requeue, Requeue::None);
    assert_eq!(harness.store.write_count(), 0);
    assert!(harness.tracker.lookup(&secret).is_empty());
}

#[tokio::test]
async fn test_dependencies_are_tracked_even_when_absent() {
    let harness = Harness::new();
    let parent = harness.seed_widget("w1", json!({"secretName": "creds"}));
    let target = ResourceRef::from_object(&parent).unwrap();

    let controller = ParentController::new(
        "widgets",
        widget_kind(),
        SyncReconciler::new("secret", Arc::new(SecretReader)),
        harness.services(),
    );
    controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap();

    let secret = ResourceRef::new("", "Secret", "default", "creds");
    assert!(harness.tracker.lookup(&secret).contains(&target));
    let stored = harness.store.object(&target).unwrap();
    assert_eq!(stored.data["status"]["secretFound"], false);
}

#[tokio::test]
async fn test_transition_time_moves_only_on_change() {
    let harness = Harness::new();
    let parent = harness.seed_widget("w1", json!({}));
    let target = ResourceRef::from_object(&parent).unwrap();
    let handler = Arc::new(ConfigReadiness {
        ready: AtomicBool::new(false),
    });
    let (offset, clock) = clock();

    let controller = ParentController::new(
        "widgets",
        widget_kind(),
        SyncReconciler::new("readiness", handler.clone()),
        harness.services(),
    )
    .with_conditions(conditions())
    .with_clock(clock);

    let config_ready_time = || {
        let stored = harness.store.object(&target).unwrap();
        let conditions = stored.conditions().unwrap();
        find_condition(&conditions, "ConfigReady")
            .unwrap()
            .last_transition_time
    };

    let requeue = controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(requeue, Requeue::After(Duration::from_secs(60)));
    assert_eq!(config_ready_time(), Some(fixed_time(0)));

    // Same status/reason/message: time stays, and nothing is written
    offset.store(100, Ordering::SeqCst);
    harness.store.clear_calls();
    controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(config_ready_time(), Some(fixed_time(0)));
    assert_eq!(harness.store.count(Verb::UpdateStatus), 0);

    // Flip to True: time moves, and the happy condition follows
    offset.store(200, Ordering::SeqCst);
    handler.ready.store(true, Ordering::SeqCst);
    controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(config_ready_time(), Some(fixed_time(200)));
    let stored = harness.store.object(&target).unwrap();
    let conditions = stored.conditions().unwrap();
    assert!(find_condition(&conditions, "Ready").unwrap().is_true());
    assert_eq!(harness.store.count(Verb::UpdateStatus), 1);
}

#[tokio::test]
async fn test_root_error_still_persists_status_and_is_returned() {
    let harness = Harness::new();
    let parent = harness.seed_widget("w1", json!({}));
    let target = ResourceRef::from_object(&parent).unwrap();

    let controller = ParentController::new(
        "widgets",
        widget_kind(),
        SyncReconciler::new("validate", Arc::new(Broken)),
        harness.services(),
    );
    let err = controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Validation(_)));
    let stored = harness.store.object(&target).unwrap();
    assert_eq!(stored.data["status"]["lastError"], "validation failed");

    let failed = harness.recorder.with_reason(reasons::RECONCILE_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, EventKind::Warning);
}

#[tokio::test]
async fn test_status_update_failure_is_returned_when_root_succeeds() {
    let harness = Harness::new();
    let parent = harness.seed_widget("w1", json!({}));
    let target = ResourceRef::from_object(&parent).unwrap();
    harness
        .store
        .fail_next(Verb::UpdateStatus, ReconcileError::store("etcd timeout"));

    let controller = ParentController::new(
        "widgets",
        widget_kind(),
        Sequence::new("root", vec![]),
        harness.services(),
    );
    let err = controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Store { .. }));
    assert_eq!(harness.recorder.with_reason(reasons::STATUS_UPDATE_FAILED).len(), 1);
}

#[tokio::test]
async fn test_root_error_wins_over_status_error() {
    let harness = Harness::new();
    let parent = harness.seed_widget("w1", json!({}));
    let target = ResourceRef::from_object(&parent).unwrap();
    harness
        .store
        .fail_next(Verb::UpdateStatus, ReconcileError::store("etcd timeout"));

    let controller = ParentController::new(
        "widgets",
        widget_kind(),
        SyncReconciler::new("validate", Arc::new(Broken)),
        harness.services(),
    );
    let err = controller
        .reconcile(&target, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Validation(_)));
    assert_eq!(harness.recorder.with_reason(reasons::STATUS_UPDATE_FAILED).len(), 1);
    assert_eq!(harness.recorder.with_reason(reasons::RECONCILE_FAILED).len(), 1);
}

#[tokio::test]
async fn test_rejects_foreign_kind() {
    let harness = Harness::new();
    let node: ReconcileNode = Sequence::new("root", vec![]).into();
    let controller = ParentController::new("widgets", widget_kind(), node, harness.services());

    let err = controller
        .reconcile(
            &ResourceRef::new("", "ConfigMap", "default", "w1"),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Validation(_)));
    assert_eq!(harness.store.calls().len(), 0);
}

#[tokio::test]
async fn test_cancelled_token_aborts_before_nodes_run() {
    let harness = Harness::new();
    let parent = harness.seed_widget("w1", json!({"message": "hello"}));
    let target = ResourceRef::from_object(&parent).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let controller = ParentController::new(
        "widgets",
        widget_kind(),
        Sequence::new("root", vec![])
            .then(ChildReconciler::new("config", Arc::new(MessageConfigMap))),
        harness.services(),
    );
    let err = controller.reconcile(&target, cancel).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled));
    assert_eq!(harness.store.count(Verb::Create), 0);
}
