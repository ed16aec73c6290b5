//! kgateway controller
//!
//! Wires the translation crates to the cluster:
//! - [`backend`]: AI Backend reconciler and the translated [`ClusterCache`]
//! - [`policy`]: TrafficPolicy reconciler feeding the attachment store
//! - [`jwks`]: remote JWKS refresh driven by the policies in the cluster
//! - [`runner`]: reflector and controller futures

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod jwks;
pub mod policy;
pub mod runner;
pub mod status;

pub use backend::ClusterCache;
pub use config::ControllerConfig;
pub use error::ReconcileError;
pub use status::{KubeStatusWriter, StatusWriter};
