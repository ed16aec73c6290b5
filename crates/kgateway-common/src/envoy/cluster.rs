//! Cluster output types
//!
//! Field names follow the Envoy v3 JSON mapping so a cluster serializes to
//! what `envoy --config-yaml` would accept.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Type URL of the TLS upstream transport socket
pub const UPSTREAM_TLS_CONTEXT_TYPE: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

/// Type URL of the plaintext transport socket
pub const RAW_BUFFER_TYPE: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.raw_buffer.v3.RawBuffer";

/// Name of the fallback transport socket match
pub const PLAINTEXT_MATCH: &str = "plaintext";

/// Service discovery type
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    /// Resolve DNS continuously and use every returned address
    #[default]
    StrictDns,
    /// Endpoints listed explicitly
    Static,
    /// Endpoints from EDS
    Eds,
}

/// Address family used for DNS lookups
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DnsLookupFamily {
    /// IPv4 only
    #[default]
    V4Only,
    /// IPv6 only
    V6Only,
    /// Let the resolver decide
    Auto,
}

/// An upstream cluster
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cluster name
    pub name: String,
    /// Discovery type
    #[serde(rename = "type")]
    pub discovery_type: DiscoveryType,
    /// DNS lookup family
    pub dns_lookup_family: DnsLookupFamily,
    /// Endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_assignment: Option<ClusterLoadAssignment>,
    /// TLS selection by endpoint metadata
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transport_socket_matches: Vec<TransportSocketMatch>,
}

/// Endpoints of a cluster grouped by priority
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoadAssignment {
    /// Owning cluster
    pub cluster_name: String,
    /// Priority groups
    pub endpoints: Vec<LocalityLbEndpoints>,
}

/// Endpoints sharing a priority
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalityLbEndpoints {
    /// 0 is preferred
    pub priority: u32,
    /// Members
    pub lb_endpoints: Vec<LbEndpoint>,
}

/// One upstream host
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LbEndpoint {
    /// Address
    pub endpoint: Endpoint,
    /// Per-host metadata
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl LbEndpoint {
    /// Metadata value under `namespace.key`
    pub fn metadata_value(&self, namespace: &str, key: &str) -> Option<&str> {
        self.metadata
            .filter_metadata
            .get(namespace)
            .and_then(|values| values.get(key))
            .map(String::as_str)
    }
}

/// Endpoint address
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Socket address
    pub address: Address,
    /// Hostname used for auto host rewrite and SNI
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
}

/// Network address
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// TCP address
    pub socket_address: SocketAddress,
}

/// Host and port
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SocketAddress {
    /// Hostname or IP
    pub address: String,
    /// Port
    pub port_value: u32,
}

/// Filter metadata: namespace to string map
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Values keyed by namespace then key
    #[serde(default)]
    pub filter_metadata: BTreeMap<String, BTreeMap<String, String>>,
}

impl Metadata {
    /// No namespaces present
    pub fn is_empty(&self) -> bool {
        self.filter_metadata.is_empty()
    }
}

/// Select a transport socket by endpoint metadata
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransportSocketMatch {
    /// Match name (e.g. `tls_api.openai.com`)
    pub name: String,
    /// Metadata the endpoint must carry under `envoy.transport_socket_match`
    #[serde(rename = "match")]
    pub match_: BTreeMap<String, String>,
    /// Socket to use on match
    pub transport_socket: TransportSocket,
}

/// Transport socket
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransportSocket {
    /// Socket extension name
    pub name: String,
    /// Extension config
    pub typed_config: TransportSocketConfig,
}

/// Transport socket configs, tagged by type URL
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "@type")]
pub enum TransportSocketConfig {
    /// TLS to the upstream
    #[serde(rename = "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext")]
    UpstreamTls(UpstreamTlsContext),
    /// Plaintext
    #[serde(rename = "type.googleapis.com/envoy.extensions.transport_sockets.raw_buffer.v3.RawBuffer")]
    RawBuffer(RawBuffer),
}

/// Upstream TLS settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTlsContext {
    /// SNI sent to the upstream
    pub sni: String,
    /// Override SNI with the request host
    #[serde(default)]
    pub auto_host_sni: bool,
}

/// Empty raw buffer config
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawBuffer {}

impl TransportSocketMatch {
    /// TLS match for `host`, selected by `{tls: host}` metadata
    pub fn tls(tls: UpstreamTlsContext) -> Self {
        Self {
            name: format!("tls_{}", tls.sni),
            match_: BTreeMap::from([("tls".to_string(), tls.sni.clone())]),
            transport_socket: TransportSocket {
                name: "envoy.transport_sockets.tls".to_string(),
                typed_config: TransportSocketConfig::UpstreamTls(tls),
            },
        }
    }

    /// Fallback match with an empty selector
    pub fn plaintext() -> Self {
        Self {
            name: PLAINTEXT_MATCH.to_string(),
            match_: BTreeMap::new(),
            transport_socket: TransportSocket {
                name: "envoy.transport_sockets.raw_buffer".to_string(),
                typed_config: TransportSocketConfig::RawBuffer(RawBuffer {}),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plaintext_fallback_wire_shape() {
        let value = serde_json::to_value(TransportSocketMatch::plaintext()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "plaintext",
                "match": {},
                "transportSocket": {
                    "name": "envoy.transport_sockets.raw_buffer",
                    "typedConfig": { "@type": RAW_BUFFER_TYPE }
                }
            })
        );
    }

    #[test]
    fn tls_match_wire_shape() {
        let m = TransportSocketMatch::tls(UpstreamTlsContext {
            sni: "api.openai.com".into(),
            auto_host_sni: true,
        });
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["name"], "tls_api.openai.com");
        assert_eq!(value["match"], json!({"tls": "api.openai.com"}));
        assert_eq!(
            value["transportSocket"]["typedConfig"]["@type"],
            UPSTREAM_TLS_CONTEXT_TYPE
        );
        assert_eq!(value["transportSocket"]["typedConfig"]["sni"], "api.openai.com");
        assert_eq!(value["transportSocket"]["typedConfig"]["autoHostSni"], true);
    }

    #[test]
    fn cluster_enums_use_envoy_names() {
        let cluster = Cluster {
            name: "backend_ai_openai".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&cluster).unwrap();
        assert_eq!(value["type"], "STRICT_DNS");
        assert_eq!(value["dnsLookupFamily"], "V4_ONLY");
        assert!(value.get("transportSocketMatches").is_none());
    }

    #[test]
    fn metadata_lookup() {
        let mut ep = LbEndpoint::default();
        ep.metadata.filter_metadata.insert(
            "io.solo.transformation".into(),
            BTreeMap::from([("model".to_string(), "gpt-4o".to_string())]),
        );
        assert_eq!(
            ep.metadata_value("io.solo.transformation", "model"),
            Some("gpt-4o")
        );
        assert_eq!(ep.metadata_value("io.solo.transformation", "auth_token"), None);
    }
}
