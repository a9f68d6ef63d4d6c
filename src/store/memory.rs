//! In-process store
//!
//! Behaves like an API server for the parts the runtime relies on:
//! monotonically increasing resourceVersions, version-checked writes,
//! generation bumps on spec changes, label-selected lists and
//! finalizer-gated deletion. Every call is logged so callers can assert on
//! exactly which writes happened, and failures can be injected per verb.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use kube::discovery::ApiResource;
use serde_json::Value;

use super::{ExternalStore, ListSelector};
use crate::error::{ReconcileError, Result};
use crate::models::{Object, ObjectExt, ResourceRef, metadata_time};

/// Store operation kinds, used for the call log and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Patch,
    Delete,
}

/// One logged store call
#[derive(Debug, Clone)]
pub struct StoreCall {
    pub verb: Verb,
    /// For `List`, the name is empty and the namespace is the selector's
    pub target: ResourceRef,
    /// Object sent for writes, parsed patch for `Patch`
    pub body: Option<Value>,
}

/// Thread-safe in-memory object store
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<ResourceRef, Object>>,
    calls: Mutex<Vec<StoreCall>>,
    failures: Mutex<HashMap<Verb, VecDeque<ReconcileError>>>,
    counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing the call log
    ///
    /// Fills in uid, resourceVersion and generation when absent.
    pub fn seed(&self, mut obj: Object) -> Result<Object> {
        let target = identity(&obj)?;
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("uid-{}", self.next()));
        }
        if obj.metadata.generation.is_none() {
            obj.metadata.generation = Some(1);
        }
        obj.metadata.resource_version = Some(self.next().to_string());
        self.objects.write().unwrap().insert(target, obj.clone());
        Ok(obj)
    }

    /// Read an object without logging a call
    pub fn object(&self, target: &ResourceRef) -> Option<Object> {
        self.objects.read().unwrap().get(target).cloned()
    }

    /// All stored objects of a kind, without logging a call
    pub fn objects_of(&self, kind: &ApiResource) -> Vec<Object> {
        self.objects
            .read()
            .unwrap()
            .iter()
            .filter(|(r, _)| r.is_kind(kind))
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Make the next call of `verb` fail with `err`
    pub fn fail_next(&self, verb: Verb, err: ReconcileError) {
        self.failures
            .lock()
            .unwrap()
            .entry(verb)
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, verb: Verb) -> Vec<StoreCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.verb == verb)
            .cloned()
            .collect()
    }

    pub fn count(&self, verb: Verb) -> usize {
        self.calls_of(verb).len()
    }

    /// Number of mutating calls (everything but get/list)
    pub fn write_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !matches!(c.verb, Verb::Get | Verb::List))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn begin(&self, verb: Verb, target: &ResourceRef, body: Option<Value>) -> Result<()> {
        self.calls.lock().unwrap().push(StoreCall {
            verb,
            target: target.clone(),
            body,
        });
        let injected = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&verb)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Store `obj`, or drop it once it is terminating with no finalizers left
    fn commit(&self, objects: &mut BTreeMap<ResourceRef, Object>, target: ResourceRef, obj: &Object) {
        if obj.is_terminating() && obj.finalizers().is_empty() {
            objects.remove(&target);
        } else {
            objects.insert(target, obj.clone());
        }
    }

    fn check_version(target: &ResourceRef, stored: &Object, expected: Option<&str>) -> Result<()> {
        match expected {
            Some(expected) if !expected.is_empty() && Some(expected) != stored.resource_version() => {
                Err(ReconcileError::conflict(
                    &target.kind,
                    &target.name,
                    format!(
                        "expected resourceVersion {}, found {}",
                        expected,
                        stored.resource_version().unwrap_or_default()
                    ),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn identity(obj: &Object) -> Result<ResourceRef> {
    ResourceRef::from_object(obj)
        .ok_or_else(|| ReconcileError::validation("object is missing apiVersion/kind or name"))
}

/// Everything in `data` except status
fn spec_of(obj: &Object) -> Value {
    let mut data = obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn bump_generation_if_changed(stored: &Object, updated: &mut Object) {
    let generation = stored.generation();
    updated.metadata.generation = if spec_of(stored) != spec_of(updated) {
        Some(generation + 1)
    } else {
        Some(generation)
    };
}

#[async_trait]
impl ExternalStore for MemoryStore {
    async fn get(&self, target: &ResourceRef) -> Result<Option<Object>> {
        self.begin(Verb::Get, target, None)?;
        Ok(self.object(target))
    }

    async fn list(&self, kind: &ApiResource, selector: &ListSelector) -> Result<Vec<Object>> {
        let target = ResourceRef::new(
            kind.group.clone(),
            kind.kind.clone(),
            selector.namespace.clone().unwrap_or_default(),
            "",
        );
        self.begin(Verb::List, &target, None)?;
        Ok(self
            .objects_of(kind)
            .into_iter()
            .filter(|o| selector.matches(o))
            .collect())
    }

    async fn create(&self, obj: &Object) -> Result<Object> {
        let mut created = obj.clone();
        if created.metadata.name.is_none() {
            if let Some(prefix) = &created.metadata.generate_name {
                created.metadata.name = Some(format!("{}{}", prefix, self.next()));
            }
        }
        let target = identity(&created)?;
        self.begin(Verb::Create, &target, Some(serde_json::to_value(&created)?))?;

        let mut objects = self.objects.write().unwrap();
        if objects.contains_key(&target) {
            return Err(ReconcileError::AlreadyExists {
                kind: target.kind,
                name: target.name,
            });
        }
        created.metadata.uid = Some(format!("uid-{}", self.next()));
        created.metadata.generation = Some(1);
        created.metadata.resource_version = Some(self.next().to_string());
        created.metadata.creation_timestamp = Some(metadata_time(Utc::now())?);
        created.metadata.deletion_timestamp = None;
        objects.insert(target, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &Object) -> Result<Object> {
        let target = identity(obj)?;
        self.begin(Verb::Update, &target, Some(serde_json::to_value(obj)?))?;

        let mut objects = self.objects.write().unwrap();
        let stored = objects
            .get(&target)
            .ok_or_else(|| ReconcileError::not_found(&target.kind, &target.name))?;
        Self::check_version(&target, stored, obj.resource_version())?;

        let mut updated = obj.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.creation_timestamp = stored.metadata.creation_timestamp.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        // status is only written through the status subresource
        match stored.status_value() {
            Some(status) => updated.set_status(status)?,
            None => {
                if let Some(data) = updated.data.as_object_mut() {
                    data.remove("status");
                }
            }
        }
        bump_generation_if_changed(stored, &mut updated);
        updated.metadata.resource_version = Some(self.next().to_string());

        self.commit(&mut objects, target, &updated);
        Ok(updated)
    }

    async fn update_status(&self, obj: &Object) -> Result<Object> {
        let target = identity(obj)?;
        self.begin(Verb::UpdateStatus, &target, Some(serde_json::to_value(obj)?))?;

        let mut objects = self.objects.write().unwrap();
        let stored = objects
            .get(&target)
            .ok_or_else(|| ReconcileError::not_found(&target.kind, &target.name))?;
        Self::check_version(&target, stored, obj.resource_version())?;

        let mut updated = stored.clone();
        match obj.status_value() {
            Some(status) => updated.set_status(status)?,
            None => {
                if let Some(data) = updated.data.as_object_mut() {
                    data.remove("status");
                }
            }
        }
        updated.metadata.resource_version = Some(self.next().to_string());
        objects.insert(target, updated.clone());
        Ok(updated)
    }

    async fn patch(
        &self,
        target: &ResourceRef,
        merge_patch: &[u8],
        expected_version: &str,
    ) -> Result<Object> {
        let patch: Value = serde_json::from_slice(merge_patch)?;
        self.begin(Verb::Patch, target, Some(patch.clone()))?;

        let mut objects = self.objects.write().unwrap();
        let stored = objects
            .get(target)
            .ok_or_else(|| ReconcileError::not_found(&target.kind, &target.name))?;
        Self::check_version(target, stored, Some(expected_version))?;

        let mut value = serde_json::to_value(stored)?;
        json_patch::merge(&mut value, &patch);
        let mut patched: Object = serde_json::from_value(value)?;
        patched.types = stored.types.clone();
        patched.metadata.name = stored.metadata.name.clone();
        patched.metadata.namespace = stored.metadata.namespace.clone();
        patched.metadata.uid = stored.metadata.uid.clone();
        patched.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        bump_generation_if_changed(stored, &mut patched);
        patched.metadata.resource_version = Some(self.next().to_string());

        self.commit(&mut objects, target.clone(), &patched);
        Ok(patched)
    }

    async fn delete(&self, target: &ResourceRef) -> Result<()> {
        self.begin(Verb::Delete, target, None)?;

        let mut objects = self.objects.write().unwrap();
        let stored = objects
            .get(target)
            .ok_or_else(|| ReconcileError::not_found(&target.kind, &target.name))?;

        if stored.finalizers().is_empty() {
            objects.remove(target);
            return Ok(());
        }
        if !stored.is_terminating() {
            let mut terminating = stored.clone();
            terminating.metadata.deletion_timestamp = Some(metadata_time(Utc::now())?);
            terminating.metadata.resource_version = Some(self.next().to_string());
            objects.insert(target.clone(), terminating);
        }
        Ok(())
    }
}
