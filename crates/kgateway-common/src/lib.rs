//! Common types for kgateway: CRDs, data-plane output types, errors, and
//! the lookup indexes translators read from

#![warn(missing_docs)]

pub mod crd;
pub mod envoy;
pub mod error;
pub mod index;
pub mod kube_utils;
pub mod telemetry;
pub mod yaml;

pub use error::{Error, ErrorCategory};
pub use kube_utils::ObjectSource;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace where kgateway system resources live by default
pub const KGATEWAY_SYSTEM_NAMESPACE: &str = "kgateway-system";

/// Secret data key holding a provider credential
pub const AUTHORIZATION_KEY: &str = "Authorization";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "kgateway-controller";
