//! HTTPListenerPolicy CRD: listener-wide settings, currently access logging

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BackendRef, Condition, LocalPolicyTargetReference};

/// HTTPListenerPolicy spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.kgateway.dev",
    version = "v1alpha1",
    kind = "HTTPListenerPolicy",
    namespaced,
    status = "PolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPListenerPolicySpec {
    /// Gateways this policy applies to
    pub target_refs: Vec<LocalPolicyTargetReference>,

    /// Access log sinks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_log: Vec<AccessLog>,
}

/// One access log sink; exactly one of fileSink or grpcService
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessLog {
    /// Write to a file (e.g. /dev/stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sink: Option<FileSink>,

    /// Stream to a gRPC access log service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_service: Option<GrpcAccessLogService>,

    /// Which requests are logged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<AccessLogFilter>,
}

/// File sink; at most one of stringFormat or jsonFormat
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSink {
    /// Output path
    pub path: String,
    /// Envoy format string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_format: Option<String>,
    /// Field name to Envoy command operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_format: Option<BTreeMap<String, String>>,
}

/// gRPC access log service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcAccessLogService {
    /// Log name reported to the service
    pub log_name: String,
    /// Backing service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_ref: Option<BackendRef>,
}

/// Access log filter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogFilter {
    /// Only log responses within this status range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<StatusCodeFilter>,
    /// Skip health check requests
    #[serde(default)]
    pub exclude_health_checks: bool,
}

/// Inclusive status code range
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCodeFilter {
    /// Lowest status logged
    pub min: u16,
    /// Highest status logged
    pub max: u16,
}

/// Status shared by policy kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::parse_resource;

    #[test]
    fn access_log_yaml() {
        let policy: HTTPListenerPolicy = parse_resource(
            r#"
apiVersion: gateway.kgateway.dev/v1alpha1
kind: HTTPListenerPolicy
metadata:
  name: logs
  namespace: gw
spec:
  targetRefs:
    - group: gateway.networking.k8s.io
      kind: Gateway
      name: edge
  accessLog:
    - fileSink:
        path: /dev/stdout
        jsonFormat:
          method: "%REQ(:METHOD)%"
      filter:
        statusCode:
          min: 400
          max: 599
    - grpcService:
        logName: edge
        backendRef:
          name: otel
          port: 4317
"#,
        )
        .expect("parse");
        assert_eq!(policy.spec.access_log.len(), 2);
        let file = policy.spec.access_log[0].file_sink.as_ref().unwrap();
        assert_eq!(
            file.json_format.as_ref().unwrap()["method"],
            "%REQ(:METHOD)%"
        );
        assert_eq!(
            policy.spec.access_log[0].filter.as_ref().unwrap().status_code,
            Some(StatusCodeFilter { min: 400, max: 599 })
        );
    }
}
