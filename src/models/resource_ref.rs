//! Resource identity
//!
//! `ResourceRef` is the hashable identity of any object instance. It is the
//! key of the dependency tracker and the argument of every store call.

use std::fmt;
use std::str::FromStr;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};

/// Identity of an object: group, kind, namespace and name
///
/// The API version is deliberately not part of the identity; the same object
/// served at two versions is one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// API group, empty for the core group
    pub group: String,
    pub kind: String,
    /// Empty for cluster-scoped objects
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build a reference for a named object of a known kind
    pub fn for_kind(ar: &ApiResource, namespace: Option<&str>, name: &str) -> Self {
        Self::new(
            ar.group.clone(),
            ar.kind.clone(),
            namespace.unwrap_or_default(),
            name,
        )
    }

    /// Derive the identity of an object from its type and object metadata
    ///
    /// Returns None when the object carries no type information or no name.
    pub fn from_object(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        let name = obj.metadata.name.clone()?;
        Some(Self {
            group: group_of(&types.api_version).to_string(),
            kind: types.kind.clone(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name,
        })
    }

    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }

    /// Whether this reference names an object of the given kind
    pub fn is_kind(&self, ar: &ApiResource) -> bool {
        self.group == ar.group && self.kind == ar.kind
    }
}

/// Extract the group from an apiVersion string (`apps/v1` → `apps`, `v1` → ``)
pub fn group_of(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}.{}", self.kind, self.group)?;
        }
        if self.namespace.is_empty() {
            write!(f, "/{}", self.name)
        } else {
            write!(f, "/{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ResourceRef {
    type Err = String;

    /// Parse the `Display` form: `Kind[.group]/[namespace/]name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        let gk = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("Invalid resource reference: {}", s))?;
        let (kind, group) = gk.split_once('.').unwrap_or((gk, ""));

        let (namespace, name) = match (parts.next(), parts.next()) {
            (Some(name), None) => ("", name),
            (Some(ns), Some(name)) => (ns, name),
            _ => return Err(format!("Invalid resource reference: {}", s)),
        };
        if name.is_empty() {
            return Err(format!("Invalid resource reference: {}", s));
        }

        Ok(Self::new(group, kind, namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    #[test]
    fn test_display_namespaced() {
        let r = ResourceRef::new("apps", "Deployment", "default", "web");
        assert_eq!(r.to_string(), "Deployment.apps/default/web");
    }

    #[test]
    fn test_display_core_cluster_scoped() {
        let r = ResourceRef::new("", "Namespace", "", "team-a");
        assert_eq!(r.to_string(), "Namespace/team-a");
    }

    #[test]
    fn test_parse_round_trips_display() {
        for s in ["Deployment.apps/default/web", "Namespace/team-a", "ConfigMap/ns/cm"] {
            let parsed: ResourceRef = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("".parse::<ResourceRef>().is_err());
        assert!("ConfigMap".parse::<ResourceRef>().is_err());
    }

    #[test]
    fn test_from_object() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"));
        let obj = DynamicObject::new("web", &ar).within("prod");
        let r = ResourceRef::from_object(&obj).unwrap();
        assert_eq!(r, ResourceRef::new("apps", "Deployment", "prod", "web"));
        assert!(r.is_kind(&ar));
    }

    #[test]
    fn test_group_of() {
        assert_eq!(group_of("apps/v1"), "apps");
        assert_eq!(group_of("v1"), "");
    }
}
