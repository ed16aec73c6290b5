//! Data-plane configuration types
//!
//! Plain serde mirrors of the Envoy resources this control plane emits. The
//! xDS wire encoding lives outside this workspace.

mod cluster;
mod transformation;

pub use cluster::{
    Address, Cluster, ClusterLoadAssignment, DiscoveryType, DnsLookupFamily, Endpoint, LbEndpoint,
    LocalityLbEndpoints, Metadata, RawBuffer, SocketAddress, TransportSocket,
    TransportSocketConfig, TransportSocketMatch, UpstreamTlsContext, PLAINTEXT_MATCH,
    RAW_BUFFER_TYPE, UPSTREAM_TLS_CONTEXT_TYPE,
};
pub use transformation::{InjaTemplate, ParseBodyBehavior, TransformationTemplate};

/// Host metadata namespace read by the transformation filter
pub const TRANSFORMATION_NAMESPACE: &str = "io.solo.transformation";

/// Host metadata namespace read by transport socket matching
pub const TRANSPORT_SOCKET_MATCH_NAMESPACE: &str = "envoy.transport_socket_match";

/// Dynamic metadata namespace written by the AI external processor
pub const AI_DYNAMIC_NAMESPACE: &str = "ai.kgateway.io";
