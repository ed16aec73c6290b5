//! GatewayExtension CRD: an out-of-process service the proxy calls
//! (external auth, external processing, rate limiting).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BackendRef, Condition};

/// GatewayExtension spec
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.kgateway.dev",
    version = "v1alpha1",
    kind = "GatewayExtension",
    namespaced,
    status = "GatewayExtensionStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayExtensionSpec {
    /// Which filter this extension backs
    #[serde(rename = "type")]
    pub type_: ExtensionType,

    /// gRPC service implementing the extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_service: Option<GrpcService>,

    /// Rate limit domain (RateLimit only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Extension kinds
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ExtensionType {
    /// envoy.filters.http.ext_authz
    ExtAuth,
    /// envoy.filters.http.ext_proc
    ExtProc,
    /// envoy.filters.http.ratelimit
    RateLimit,
}

impl std::fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExtAuth => write!(f, "ExtAuth"),
            Self::ExtProc => write!(f, "ExtProc"),
            Self::RateLimit => write!(f, "RateLimit"),
        }
    }
}

/// gRPC service reference
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcService {
    /// Backing service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_ref: Option<BackendRef>,

    /// `:authority` override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

/// GatewayExtension status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayExtensionStatus {
    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
