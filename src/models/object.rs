//! Helpers over the dynamic object representation
//!
//! Every object the runtime touches is a `DynamicObject`: typed metadata
//! plus untyped `data` holding `spec` and `status`. `ObjectExt` gives the
//! engine the handful of accessors it needs without pinning user types.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::api::DynamicObject;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::condition::Condition;
use crate::error::Result;

/// Any object handled by the runtime
pub type Object = DynamicObject;

/// Accessors for lifecycle metadata and the status subresource
pub trait ObjectExt {
    /// `deletionTimestamp` is set
    fn is_terminating(&self) -> bool;

    fn finalizers(&self) -> &[String];

    fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers().iter().any(|f| f == name)
    }

    fn generation(&self) -> i64;

    fn resource_version(&self) -> Option<&str>;

    /// Raw `status` value, if any
    fn status_value(&self) -> Option<&Value>;

    /// Mutable `status` object, created on first use
    fn status_mut(&mut self) -> &mut Map<String, Value>;

    /// Deserialize `spec` into a user type
    fn spec<T: DeserializeOwned>(&self) -> Result<Option<T>>;

    /// Deserialize `status` into a user type
    fn status<T: DeserializeOwned>(&self) -> Result<Option<T>>;

    /// Replace `status` with a serialized user type
    fn set_status<T: Serialize>(&mut self, status: &T) -> Result<()>;

    fn conditions(&self) -> Result<Vec<Condition>>;

    fn set_conditions(&mut self, conditions: &[Condition]) -> Result<()>;

    fn observed_generation(&self) -> Option<i64>;

    fn set_observed_generation(&mut self, generation: i64);

    /// Whether `parent` is the controller owner of this object
    fn is_controlled_by(&self, parent: &Object) -> bool;
}

impl ObjectExt for Object {
    fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    fn finalizers(&self) -> &[String] {
        self.metadata.finalizers.as_deref().unwrap_or_default()
    }

    fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    fn status_value(&self) -> Option<&Value> {
        self.data.get("status").filter(|s| !s.is_null())
    }

    fn status_mut(&mut self) -> &mut Map<String, Value> {
        let status = ensure_object(&mut self.data)
            .entry("status")
            .or_insert(Value::Null);
        ensure_object(status)
    }

    fn spec<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.data.get("spec") {
            Some(spec) if !spec.is_null() => Ok(Some(serde_json::from_value(spec.clone())?)),
            _ => Ok(None),
        }
    }

    fn status<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.status_value() {
            Some(status) => Ok(Some(serde_json::from_value(status.clone())?)),
            None => Ok(None),
        }
    }

    fn set_status<T: Serialize>(&mut self, status: &T) -> Result<()> {
        let value = serde_json::to_value(status)?;
        ensure_object(&mut self.data).insert("status".to_string(), value);
        Ok(())
    }

    fn conditions(&self) -> Result<Vec<Condition>> {
        match self.status_value().and_then(|s| s.get("conditions")) {
            Some(conditions) if !conditions.is_null() => {
                Ok(serde_json::from_value(conditions.clone())?)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn set_conditions(&mut self, conditions: &[Condition]) -> Result<()> {
        let value = serde_json::to_value(conditions)?;
        self.status_mut().insert("conditions".to_string(), value);
        Ok(())
    }

    fn observed_generation(&self) -> Option<i64> {
        self.status_value()
            .and_then(|s| s.get("observedGeneration"))
            .and_then(Value::as_i64)
    }

    fn set_observed_generation(&mut self, generation: i64) {
        self.status_mut()
            .insert("observedGeneration".to_string(), Value::from(generation));
    }

    fn is_controlled_by(&self, parent: &Object) -> bool {
        let Some(uid) = parent.metadata.uid.as_deref() else {
            return false;
        };
        self.metadata
            .owner_references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|o| o.controller == Some(true) && o.uid == uid)
    }
}

/// Build a controller owner reference pointing at `parent`
///
/// Returns None when the parent lacks type information, a name or a uid,
/// which is only the case for objects that never came from a store.
pub fn controller_owner_ref(parent: &Object) -> Option<OwnerReference> {
    let types = parent.types.as_ref()?;
    Some(OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name: parent.metadata.name.clone()?,
        uid: parent.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Convert a wall-clock instant into a metadata timestamp
///
/// Goes through the RFC 3339 wire form so it does not depend on the time
/// library backing `Time`.
pub fn metadata_time(t: DateTime<Utc>) -> Result<Time> {
    let wire = Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true));
    Ok(serde_json::from_value(wire)?)
}

/// Replace anything that is not a JSON object with an empty one
fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            ensure_object(other)
        }
    }
}
