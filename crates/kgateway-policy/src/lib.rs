//! Policy translation for the kgateway control plane
//!
//! - [`translate`]: TrafficPolicy to [`TrafficPolicyIr`], all problems reported together
//! - [`merge`]: folding several policies on one target into an [`EffectivePolicy`]
//! - [`attachment`]: concurrent store of policies per target
//! - [`extension`]: GatewayExtension and backend reference resolution
//! - [`jwt`]: JWT providers, JWKS sources and claim-based authorization
//! - [`listener`]: HTTPListenerPolicy access logging

#![warn(missing_docs)]

pub mod attachment;
pub mod extension;
pub mod ir;
pub mod jwt;
pub mod listener;
pub mod merge;
pub mod translate;

pub use attachment::{AttachmentStore, PolicyTarget};
pub use extension::{BackendDescriptor, BackendKind, ExtensionIr, ExtensionResolver, RefGrantMode};
pub use ir::TrafficPolicyIr;
pub use jwt::{jwks_sources, JwtIr, RbacIr};
pub use listener::{translate_access_logs, AccessLogIr, AccessLogSink, LogFormat};
pub use merge::{
    is_mergeable, merge_policies, merge_traffic_policy, AttachedPolicy, EffectivePolicy,
    MergeOptions, MergeStrategy, PolicyOrigins,
};
pub use translate::PolicyTranslator;
