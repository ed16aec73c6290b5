//! Object coordinates and small helpers shared by translators

use std::fmt;

use kube::{Resource, ResourceExt};
use serde::Serialize;

/// Where a translated object came from: group, kind, namespace and name.
///
/// Carried alongside every lookup so indexes can resolve relative names
/// (same-namespace secrets) and check cross-namespace permissions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectSource {
    /// API group (empty for core resources)
    pub group: String,
    /// Resource kind
    pub kind: String,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectSource {
    /// Create a new source descriptor
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

    /// Build the source descriptor of a typed Kubernetes object
    pub fn of<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            group: K::group(&()).to_string(),
            kind: K::kind(&()).to_string(),
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }

    /// `namespace/name`
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        } else {
            write!(
                f,
                "{}.{} {}/{}",
                self.kind, self.group, self.namespace, self.name
            )
        }
    }
}

/// Canonical in-cluster hostname of a Service
pub fn service_hostname(namespace: &str, name: &str) -> String {
    format!("{name}.{namespace}.svc.cluster.local")
}

/// Data-plane cluster name for a kgateway Backend
pub fn backend_cluster_name(namespace: &str, name: &str) -> String {
    format!("backend_{namespace}_{name}")
}
