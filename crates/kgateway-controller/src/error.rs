//! Reconciler errors
//!
//! Translation problems are not errors here: they are written to the
//! object's status and the reconcile succeeds. Only failures to talk to the
//! API server surface as [`ReconcileError`].

use thiserror::Error;

/// Failure inside a reconcile pass
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// API server call failed
    #[error("kubernetes error: {0}")]
    Kube(String),

    /// Object is missing a field the reconciler needs
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl ReconcileError {
    /// Create a kubernetes error with context
    pub fn kube(context: impl std::fmt::Display, err: kube::Error) -> Self {
        Self::Kube(format!("{context}: {err}"))
    }
}
