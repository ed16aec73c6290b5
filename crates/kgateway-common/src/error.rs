//! Error types for the kgateway control plane
//!
//! Errors are structured with fields so that status conditions and logs can
//! say which object failed and why. Translation functions collect every
//! failure for an object and return them together as [`Error::Aggregate`].

use thiserror::Error;

/// Broad failure category, used to decide how a reconcile reacts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The object itself is wrong; excluded until it changes
    Validation,
    /// A referenced object is missing; recoverable once it appears
    DependencyMissing,
    /// A cross-namespace reference is not permitted
    Permission,
    /// A bug or unexpected shape inside the translator
    Internal,
    /// The Kubernetes API failed
    Kubernetes,
}

/// Main error type for translation and reconciliation
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Backend failed validation (e.g. mixed provider variants in a pool)
    #[error("invalid backend {backend}: {message}")]
    BackendInvalid {
        /// `namespace/name` of the backend
        backend: String,
        /// Description of what's invalid
        message: String,
    },

    /// Policy failed validation
    #[error("invalid policy {policy}: {message}")]
    PolicyInvalid {
        /// `namespace/name` of the policy
        policy: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g. "spec.hashPolicies")
        field: Option<String>,
    },

    /// Referenced secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretMissing {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
    },

    /// Secret exists but the expected key is empty or unusable
    #[error("secret {namespace}/{name} key {key} is malformed: {message}")]
    SecretMalformed {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Data key that was read
        key: String,
        /// What is wrong with the value
        message: String,
    },

    /// Referenced backend does not exist
    #[error("{kind} {namespace}/{name} not found")]
    BackendNotFound {
        /// Kind of the referenced backend (e.g. Service)
        kind: String,
        /// Namespace of the referenced backend
        namespace: String,
        /// Name of the referenced backend
        name: String,
    },

    /// A reference that must be present was not set
    #[error("backend reference missing [{context}]")]
    BackendRefMissing {
        /// Where the reference was expected (e.g. "GatewayExtension default/ext-auth")
        context: String,
    },

    /// Cross-namespace reference not permitted by any ReferenceGrant
    #[error("reference from namespace {from_namespace} to {kind} {to_namespace}/{name} is not permitted")]
    CrossNamespaceDenied {
        /// Namespace of the referencing object
        from_namespace: String,
        /// Namespace of the referenced object
        to_namespace: String,
        /// Kind of the referenced object
        kind: String,
        /// Name of the referenced object
        name: String,
    },

    /// The translator met a shape it does not know how to handle
    #[error("unexpected type [{context}]: {message}")]
    BuilderUnexpectedType {
        /// Where it happened (e.g. "ai-cluster")
        context: String,
        /// Description of what was found
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Several independent failures for the same object
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<Error>),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a backend validation error
    pub fn backend_invalid(backend: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BackendInvalid {
            backend: backend.into(),
            message: msg.into(),
        }
    }

    /// Create a policy validation error
    pub fn policy_invalid(policy: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PolicyInvalid {
            policy: policy.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a policy validation error with a field path
    pub fn policy_invalid_field(
        policy: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::PolicyInvalid {
            policy: policy.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a missing secret error
    pub fn secret_missing(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::SecretMissing {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a malformed secret error
    pub fn secret_malformed(
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::SecretMalformed {
            namespace: namespace.into(),
            name: name.into(),
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a backend-not-found error
    pub fn backend_not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::BackendNotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a missing-reference error
    pub fn backend_ref_missing(context: impl Into<String>) -> Self {
        Self::BackendRefMissing {
            context: context.into(),
        }
    }

    /// Create a cross-namespace denial
    pub fn cross_namespace_denied(
        from_namespace: impl Into<String>,
        to_namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::CrossNamespaceDenied {
            from_namespace: from_namespace.into(),
            to_namespace: to_namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an unexpected-type error
    pub fn unexpected_type(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BuilderUnexpectedType {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Join a list of errors.
    ///
    /// Empty input is success, a single error is returned as-is, and nested
    /// aggregates are flattened so every leaf failure is reported once.
    pub fn join(errors: Vec<Error>) -> Result<(), Error> {
        let mut flat = Vec::with_capacity(errors.len());
        for err in errors {
            match err {
                Error::Aggregate(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(Error::Aggregate(flat)),
        }
    }

    /// Leaf errors contained in this error (itself, unless it is an aggregate)
    pub fn leaves(&self) -> Vec<&Error> {
        match self {
            Error::Aggregate(inner) => inner.iter().flat_map(Error::leaves).collect(),
            other => vec![other],
        }
    }

    /// Failure category; an aggregate takes the category of its first member
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Kube { .. } => ErrorCategory::Kubernetes,
            Error::BackendInvalid { .. }
            | Error::PolicyInvalid { .. }
            | Error::Serialization { .. } => ErrorCategory::Validation,
            Error::SecretMissing { .. }
            | Error::SecretMalformed { .. }
            | Error::BackendNotFound { .. }
            | Error::BackendRefMissing { .. } => ErrorCategory::DependencyMissing,
            Error::CrossNamespaceDenied { .. } => ErrorCategory::Permission,
            Error::BuilderUnexpectedType { .. } => ErrorCategory::Internal,
            Error::Aggregate(inner) => inner
                .first()
                .map(Error::category)
                .unwrap_or(ErrorCategory::Internal),
        }
    }

    /// Short CamelCase reason used in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "KubernetesError",
            Error::BackendInvalid { .. } => "BackendInvalid",
            Error::PolicyInvalid { .. } => "PolicyInvalid",
            Error::SecretMissing { .. } => "SecretMissing",
            Error::SecretMalformed { .. } => "SecretMalformed",
            Error::BackendNotFound { .. } => "BackendNotFound",
            Error::BackendRefMissing { .. } => "BackendRefMissing",
            Error::CrossNamespaceDenied { .. } => "CrossNamespaceDenied",
            Error::BuilderUnexpectedType { .. } => "BuilderUnexpectedType",
            Error::Serialization { .. } => "SerializationError",
            Error::Aggregate(inner) => inner.first().map(Error::reason).unwrap_or("Unknown"),
        }
    }

    /// Check if this error is worth retrying without the object changing
    ///
    /// Missing dependencies and permissions can resolve on their own when
    /// another object appears. Validation and internal errors need a fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Aggregate(inner) => inner.iter().any(Error::is_retryable),
            other => matches!(
                other.category(),
                ErrorCategory::DependencyMissing | ErrorCategory::Permission
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_of_nothing_is_ok() {
        assert!(Error::join(vec![]).is_ok());
    }

    #[test]
    fn join_of_one_returns_it_unwrapped() {
        let err = Error::join(vec![Error::secret_missing("default", "openai")]).unwrap_err();
        assert!(matches!(err, Error::SecretMissing { .. }));
    }

    #[test]
    fn join_flattens_nested_aggregates() {
        let inner = Error::Aggregate(vec![
            Error::secret_missing("ns", "a"),
            Error::secret_missing("ns", "b"),
        ]);
        let err = Error::join(vec![inner, Error::backend_invalid("ns/x", "bad")]).unwrap_err();
        assert_eq!(err.leaves().len(), 3);
        let msg = err.to_string();
        assert!(msg.contains("ns/a"));
        assert!(msg.contains("ns/b"));
        assert!(msg.contains("invalid backend ns/x: bad"));
        assert_eq!(msg.matches("; ").count(), 2);
    }

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(
            Error::backend_invalid("b", "m").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            Error::policy_invalid("p", "m").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            Error::secret_missing("n", "s").category(),
            ErrorCategory::DependencyMissing
        );
        assert_eq!(
            Error::backend_ref_missing("ext").category(),
            ErrorCategory::DependencyMissing
        );
        assert_eq!(
            Error::cross_namespace_denied("a", "b", "Service", "svc").category(),
            ErrorCategory::Permission
        );
        assert_eq!(
            Error::unexpected_type("ai-cluster", "m").category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn retryability() {
        assert!(Error::secret_missing("n", "s").is_retryable());
        assert!(Error::backend_not_found("Service", "n", "s").is_retryable());
        assert!(Error::cross_namespace_denied("a", "b", "Service", "svc").is_retryable());
        assert!(!Error::backend_invalid("b", "mixed").is_retryable());
        assert!(!Error::unexpected_type("c", "m").is_retryable());
        assert!(Error::Aggregate(vec![
            Error::backend_invalid("b", "m"),
            Error::secret_missing("n", "s"),
        ])
        .is_retryable());
    }

    #[test]
    fn reasons_are_stable() {
        assert_eq!(Error::secret_missing("n", "s").reason(), "SecretMissing");
        assert_eq!(
            Error::secret_malformed("n", "s", "Authorization", "empty").reason(),
            "SecretMalformed"
        );
        assert_eq!(
            Error::Aggregate(vec![Error::backend_invalid("b", "m")]).reason(),
            "BackendInvalid"
        );
    }

    #[test]
    fn policy_invalid_with_field() {
        let err = Error::policy_invalid_field("default/tp", "spec.hashPolicies", "route only");
        match &err {
            Error::PolicyInvalid { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.hashPolicies"))
            }
            _ => panic!("Expected PolicyInvalid variant"),
        }
        assert!(err.to_string().contains("default/tp"));
    }
}
