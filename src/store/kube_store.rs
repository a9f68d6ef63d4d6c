//! Kubernetes API server backed store
//!
//! Objects are addressed by `ResourceRef`, which carries no version or plural.
//! `KindRegistry` maps each `(group, kind)` the runtime manages to the
//! `ApiResource` used to build requests. Register every parent and child kind
//! up front; an unregistered kind is a configuration error.

use std::collections::HashMap;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use tracing::debug;

use super::{ExternalStore, ListSelector};
use crate::error::{ReconcileError, Result};
use crate::models::{Object, ResourceRef, group_of};

/// Lookup table from group/kind to the API resource serving it
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<(String, String), ApiResource>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ar: ApiResource) {
        self.kinds.insert((ar.group.clone(), ar.kind.clone()), ar);
    }

    pub fn with(mut self, ar: ApiResource) -> Self {
        self.register(ar);
        self
    }

    pub fn resolve(&self, group: &str, kind: &str) -> Option<&ApiResource> {
        self.kinds.get(&(group.to_string(), kind.to_string()))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Store backed by a `kube::Client`
pub struct KubeStore {
    client: Client,
    kinds: KindRegistry,
}

impl KubeStore {
    pub fn new(client: Client, kinds: KindRegistry) -> Self {
        Self { client, kinds }
    }

    /// Connect with the default kubeconfig loading strategy
    ///
    /// In-cluster config first, then `KUBECONFIG`, then `~/.kube/config`.
    pub async fn infer(kinds: KindRegistry) -> anyhow::Result<Self> {
        let config = Config::infer().await?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client, kinds))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, group: &str, kind: &str, namespace: Option<&str>) -> Result<Api<Object>> {
        let ar = self.kinds.resolve(group, kind).ok_or_else(|| {
            ReconcileError::validation(format!(
                "kind {}.{} is not registered with the store",
                kind, group
            ))
        })?;
        Ok(match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        })
    }

    fn api_for(&self, target: &ResourceRef) -> Result<Api<Object>> {
        self.api(&target.group, &target.kind, target.namespace())
    }

    fn api_for_object(&self, obj: &Object) -> Result<(Api<Object>, ResourceRef)> {
        let target = ResourceRef::from_object(obj).ok_or_else(|| {
            ReconcileError::validation("object is missing apiVersion/kind or name")
        })?;
        Ok((self.api_for(&target)?, target))
    }
}

/// Group, kind and namespace of an object that may not have a name yet
///
/// Objects being created can rely on `generateName`.
fn scope_of_new(obj: &Object) -> Result<(&str, &str, Option<&str>)> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| ReconcileError::validation("object is missing apiVersion/kind"))?;
    if obj.metadata.name.is_none() && obj.metadata.generate_name.is_none() {
        return Err(ReconcileError::validation(format!(
            "{} object has neither name nor generateName",
            types.kind
        )));
    }
    Ok((
        group_of(&types.api_version),
        &types.kind,
        obj.metadata.namespace.as_deref(),
    ))
}

#[async_trait]
impl ExternalStore for KubeStore {
    async fn get(&self, target: &ResourceRef) -> Result<Option<Object>> {
        let api = self.api_for(target)?;
        api.get_opt(&target.name)
            .await
            .map_err(|e| ReconcileError::from(e).for_object(&target.kind, &target.name))
    }

    async fn list(&self, kind: &ApiResource, selector: &ListSelector) -> Result<Vec<Object>> {
        let api = self.api(&kind.group, &kind.kind, selector.namespace.as_deref())?;
        let mut params = ListParams::default();
        let labels = selector.label_selector();
        if !labels.is_empty() {
            params = params.labels(&labels);
        }
        let list = api.list(&params).await?;
        Ok(list.items)
    }

    async fn create(&self, obj: &Object) -> Result<Object> {
        let (group, kind, namespace) = scope_of_new(obj)?;
        let api = self.api(group, kind, namespace)?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .or(obj.metadata.generate_name.as_deref())
            .unwrap_or_default();
        debug!(kind, name, ?namespace, "creating");
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| ReconcileError::from(e).for_object(kind, name))
    }

    async fn update(&self, obj: &Object) -> Result<Object> {
        let (api, target) = self.api_for_object(obj)?;
        debug!(object = %target, "updating");
        api.replace(&target.name, &PostParams::default(), obj)
            .await
            .map_err(|e| ReconcileError::from(e).for_object(&target.kind, &target.name))
    }

    async fn update_status(&self, obj: &Object) -> Result<Object> {
        let (api, target) = self.api_for_object(obj)?;
        debug!(object = %target, "updating status");
        let body = serde_json::to_vec(obj)?;
        api.replace_status(&target.name, &PostParams::default(), body)
            .await
            .map_err(|e| ReconcileError::from(e).for_object(&target.kind, &target.name))
    }

    async fn patch(
        &self,
        target: &ResourceRef,
        merge_patch: &[u8],
        expected_version: &str,
    ) -> Result<Object> {
        let api = self.api_for(target)?;
        let mut patch: Value = serde_json::from_slice(merge_patch)?;
        // The API server rejects the patch with 409 if the version moved on
        if let Some(body) = patch.as_object_mut() {
            let metadata = body
                .entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(metadata) = metadata.as_object_mut() {
                metadata.insert(
                    "resourceVersion".to_string(),
                    Value::String(expected_version.to_string()),
                );
            }
        }
        debug!(object = %target, "patching");
        api.patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ReconcileError::from(e).for_object(&target.kind, &target.name))
    }

    async fn delete(&self, target: &ResourceRef) -> Result<()> {
        let api = self.api_for(target)?;
        debug!(object = %target, "deleting");
        match api.delete(&target.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match ReconcileError::from(e) {
                err if err.is_not_found() => {
                    debug!(object = %target, "already deleted");
                    Ok(())
                }
                err => Err(err.for_object(&target.kind, &target.name)),
            },
        }
    }
}
