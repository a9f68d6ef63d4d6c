//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use reconcile_runtime::models::metadata_time;
use reconcile_runtime::{
    ChildHandler, ChildOutcome, MemoryRecorder, MemoryStore, Object, ObjectExt, ReconcileContext,
    ReconcileNode, Requeue, ResourceRef, Result, Services, Stash, Tracker,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

pub const CONTROLLER: &str = "widget-controller";

pub fn widget_kind() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("example.dev", "v1", "Widget"))
}

pub fn config_map_kind() -> ApiResource {
    ApiResource::erase::<ConfigMap>(&())
}

pub fn fixed_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// In-memory services plus handles for assertions
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub recorder: Arc<MemoryRecorder>,
    pub tracker: Arc<Tracker>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            recorder: Arc::new(MemoryRecorder::new()),
            tracker: Arc::new(Tracker::new(Duration::from_secs(600))),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(self.store.clone(), self.recorder.clone(), self.tracker.clone())
    }

    /// Seed a Widget with the given spec
    pub fn seed_widget(&self, name: &str, spec: Value) -> Object {
        let mut widget = Object::new(name, &widget_kind()).within("default");
        widget.data = json!({ "spec": spec });
        self.store.seed(widget).unwrap()
    }

    /// Seed a Widget that is being deleted while holding `finalizers`
    pub fn seed_terminating_widget(&self, name: &str, finalizers: &[&str]) -> Object {
        let mut widget = Object::new(name, &widget_kind()).within("default");
        widget.data = json!({ "spec": {} });
        widget.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        widget.metadata.deletion_timestamp = Some(metadata_time(Utc::now()).unwrap());
        self.store.seed(widget).unwrap()
    }

    /// Run a node once against `parent`, as the parent controller would
    pub async fn run(&self, node: &ReconcileNode, parent: &mut Object) -> Result<Requeue> {
        self.run_with_token(node, parent, CancellationToken::new())
            .await
    }

    pub async fn run_with_token(
        &self,
        node: &ReconcileNode,
        parent: &mut Object,
        cancel: CancellationToken,
    ) -> Result<Requeue> {
        let mut stash = Stash::new();
        let target = ResourceRef::from_object(parent).unwrap();
        let mut ctx =
            ReconcileContext::new(self.services(), &mut stash, target, CONTROLLER, cancel);
        node.reconcile(&mut ctx, parent).await
    }
}

/// ConfigMap child named after the parent, carrying `spec.message`
pub struct MessageConfigMap;

#[async_trait]
impl ChildHandler for MessageConfigMap {
    fn child_kind(&self) -> ApiResource {
        config_map_kind()
    }

    async fn desired_child(
        &self,
        _ctx: &mut ReconcileContext<'_>,
        parent: &Object,
    ) -> anyhow::Result<Option<Object>> {
        let Some(message) = parent
            .data
            .pointer("/spec/message")
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };
        let name = parent.metadata.name.clone().unwrap_or_default();
        let mut child = Object::new(&name, &config_map_kind());
        child.data = json!({ "data": { "message": message } });
        Ok(Some(child))
    }

    fn reflect_child_status_on_parent(&self, parent: &mut Object, outcome: ChildOutcome<'_>) {
        let status = parent.status_mut();
        match outcome {
            ChildOutcome::Present(child) => {
                status.insert(
                    "configMapRef".to_string(),
                    json!({
                        "name": child.metadata.name,
                        "resourceVersion": child.metadata.resource_version,
                    }),
                );
                status.remove("childError");
            }
            ChildOutcome::Absent => {
                status.remove("configMapRef");
                status.remove("childError");
            }
            ChildOutcome::Failed(err) => {
                status.insert("childError".to_string(), json!(err.to_string()));
            }
        }
    }
}
