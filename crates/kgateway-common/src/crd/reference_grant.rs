//! Minimal Gateway API ReferenceGrant
//!
//! Only the fields needed for cross-namespace checks are modelled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ReferenceGrant spec: objects in `from` may reference objects in `to`
/// in the grant's namespace
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "ReferenceGrant",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantSpec {
    /// Permitted referrers
    pub from: Vec<ReferenceGrantFrom>,
    /// Permitted referents
    pub to: Vec<ReferenceGrantTo>,
}

/// A referrer group/kind in a namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantFrom {
    /// Referrer API group
    pub group: String,
    /// Referrer kind
    pub kind: String,
    /// Referrer namespace
    pub namespace: String,
}

/// A referent group/kind, optionally a single name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGrantTo {
    /// Referent API group
    pub group: String,
    /// Referent kind
    pub kind: String,
    /// Referent name; unset permits every name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ReferenceGrantSpec {
    /// Whether this grant lets `from` reference `to_kind/to_name`
    pub fn permits(
        &self,
        from_group: &str,
        from_kind: &str,
        from_namespace: &str,
        to_group: &str,
        to_kind: &str,
        to_name: &str,
    ) -> bool {
        let from_ok = self.from.iter().any(|f| {
            f.group == from_group && f.kind == from_kind && f.namespace == from_namespace
        });
        let to_ok = self.to.iter().any(|t| {
            t.group == to_group
                && t.kind == to_kind
                && t.name.as_deref().map_or(true, |n| n == to_name)
        });
        from_ok && to_ok
    }
}
