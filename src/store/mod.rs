//! External store abstraction
//!
//! The runtime never talks to an API server directly; every read and write
//! goes through `ExternalStore`. `KubeStore` is the production
//! implementation, `MemoryStore` an in-process one with the same
//! optimistic-concurrency and finalizer semantics.

mod kube_store;
mod memory;

pub use kube_store::{KindRegistry, KubeStore};
pub use memory::{MemoryStore, StoreCall, Verb};

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::discovery::ApiResource;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::models::{Object, ResourceRef};

/// Namespace and label constraints for `list`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSelector {
    /// None lists across all namespaces
    pub namespace: Option<String>,
    /// Every label must match exactly
    pub labels: BTreeMap<String, String>,
}

impl ListSelector {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Label selector in API server syntax (`a=1,b=2`)
    pub fn label_selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn matches(&self, obj: &Object) -> bool {
        if let Some(ns) = &self.namespace {
            if obj.metadata.namespace.as_deref().unwrap_or_default() != ns {
                return false;
            }
        }
        let labels = obj.metadata.labels.as_ref();
        self.labels
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

/// Read/write access to the resource store
///
/// Writes are version-qualified: `update`, `update_status` and `patch`
/// reject a stale `resourceVersion` with `ReconcileError::Conflict`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExternalStore: Send + Sync {
    /// Fetch an object; Ok(None) when it does not exist
    async fn get(&self, target: &ResourceRef) -> Result<Option<Object>>;

    async fn list(&self, kind: &ApiResource, selector: &ListSelector) -> Result<Vec<Object>>;

    /// Create an object; the object must carry type information
    async fn create(&self, obj: &Object) -> Result<Object>;

    /// Replace an object (spec and metadata), rejecting version mismatches
    async fn update(&self, obj: &Object) -> Result<Object>;

    /// Replace the status subresource, rejecting version mismatches
    async fn update_status(&self, obj: &Object) -> Result<Object>;

    /// Apply a JSON merge patch if the object is still at `expected_version`
    async fn patch(
        &self,
        target: &ResourceRef,
        merge_patch: &[u8],
        expected_version: &str,
    ) -> Result<Object>;

    /// Delete an object
    ///
    /// A missing object may surface as `NotFound`; callers treat that as
    /// already deleted.
    async fn delete(&self, target: &ResourceRef) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    #[test]
    fn test_label_selector_syntax() {
        let sel = ListSelector::in_namespace("default")
            .with_label("b", "2")
            .with_label("a", "1");
        assert_eq!(sel.label_selector(), "a=1,b=2");
    }

    #[test]
    fn test_selector_matches() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"));
        let mut obj = Object::new("cm", &ar).within("default");
        obj.metadata.labels = Some(BTreeMap::from([("app".to_string(), "web".to_string())]));

        assert!(ListSelector::in_namespace("default").matches(&obj));
        assert!(!ListSelector::in_namespace("other").matches(&obj));
        assert!(ListSelector::default().with_label("app", "web").matches(&obj));
        assert!(!ListSelector::default().with_label("app", "db").matches(&obj));
    }
}
