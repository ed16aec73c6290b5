//! Resolution of policy references to concrete backends
//!
//! Policies point at GatewayExtensions by name, and extensions (or access
//! log sinks) point at Services or Backends. Both hops end in a
//! [`BackendDescriptor`] that can be embedded in data-plane configuration.

use std::fmt;
use std::sync::Arc;

use kgateway_common::crd::{
    BackendRef, ExtensionType, GatewayExtension, LocalObjectReference, KGATEWAY_GROUP,
};
use kgateway_common::index::{BackendIndex, ExtensionIndex, ReferenceGrantIndex};
use kgateway_common::kube_utils::{backend_cluster_name, service_hostname};
use kgateway_common::{Error, ObjectSource, Result};
use serde::Serialize;
use tracing::debug;

const SERVICE_KIND: &str = "Service";
const BACKEND_KIND: &str = "Backend";
const GATEWAY_EXTENSION_KIND: &str = "GatewayExtension";

/// Whether cross-namespace references need a ReferenceGrant
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefGrantMode {
    /// References into another namespace need a permitting grant
    #[default]
    Validate,
    /// Every reference is allowed
    Skip,
}

/// What a backend reference resolved to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BackendKind {
    /// A core Service
    Service,
    /// A kgateway Backend
    Backend,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => write!(f, "{SERVICE_KIND}"),
            Self::Backend => write!(f, "{BACKEND_KIND}"),
        }
    }
}

/// A resolved backend, ready to embed in data-plane config
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    /// Referenced kind
    pub kind: BackendKind,
    /// `<namespace>/<hostname>`; Backends use their cluster name as hostname
    pub service: String,
    /// Target port, 0 when the backend defines its own
    pub port: u16,
}

/// A GatewayExtension resolved for use by a policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionIr {
    /// `namespace/name` of the extension
    pub name: String,
    /// Extension type
    pub kind: ExtensionType,
    /// gRPC backend serving the extension
    pub backend: BackendDescriptor,
    /// `:authority` override for gRPC calls
    pub authority: Option<String>,
    /// Rate-limit domain
    pub domain: Option<String>,
}

/// Resolves extension and backend references against the indexes
#[derive(Clone)]
pub struct ExtensionResolver {
    backends: Arc<dyn BackendIndex>,
    extensions: Arc<dyn ExtensionIndex>,
    grants: Arc<dyn ReferenceGrantIndex>,
    mode: RefGrantMode,
}

impl ExtensionResolver {
    /// Create a resolver
    pub fn new(
        backends: Arc<dyn BackendIndex>,
        extensions: Arc<dyn ExtensionIndex>,
        grants: Arc<dyn ReferenceGrantIndex>,
        mode: RefGrantMode,
    ) -> Self {
        Self {
            backends,
            extensions,
            grants,
            mode,
        }
    }

    /// Resolve a backend reference made by `owner`.
    ///
    /// Fails with `BackendRefMissing` when no reference is given,
    /// `CrossNamespaceDenied` when the target namespace has not granted
    /// access (only when validating grants) and `BackendNotFound` when the
    /// target does not exist.
    pub fn resolve(
        &self,
        owner: &ObjectSource,
        backend_ref: Option<&BackendRef>,
    ) -> Result<BackendDescriptor> {
        let backend_ref =
            backend_ref.ok_or_else(|| Error::backend_ref_missing(owner.to_string()))?;
        let namespace = backend_ref.namespace_or(&owner.namespace);
        let name = backend_ref.name.as_str();

        let (group, kind) = match backend_ref.kind_or_default() {
            SERVICE_KIND => ("", BackendKind::Service),
            BACKEND_KIND => (KGATEWAY_GROUP, BackendKind::Backend),
            other => {
                return Err(Error::unexpected_type(
                    "backend-ref",
                    format!("{owner} references unsupported kind {other}"),
                ))
            }
        };

        if self.mode == RefGrantMode::Validate
            && !self
                .grants
                .permits(owner, group, &kind.to_string(), namespace, name)
        {
            return Err(Error::cross_namespace_denied(
                owner.namespace.as_str(),
                namespace,
                kind.to_string(),
                name,
            ));
        }

        let descriptor = match kind {
            BackendKind::Service => {
                let service = self
                    .backends
                    .get_service(namespace, name)
                    .ok_or_else(|| Error::backend_not_found(SERVICE_KIND, namespace, name))?;
                let port = match backend_ref.port {
                    Some(port) => port,
                    None => first_service_port(&service).ok_or_else(|| {
                        Error::backend_invalid(
                            format!("{namespace}/{name}"),
                            "no port in reference and the service exposes none",
                        )
                    })?,
                };
                BackendDescriptor {
                    kind,
                    service: format!("{namespace}/{}", service_hostname(namespace, name)),
                    port,
                }
            }
            BackendKind::Backend => {
                self.backends
                    .get_backend(namespace, name)
                    .ok_or_else(|| Error::backend_not_found(BACKEND_KIND, namespace, name))?;
                BackendDescriptor {
                    kind,
                    service: format!("{namespace}/{}", backend_cluster_name(namespace, name)),
                    port: backend_ref.port.unwrap_or(0),
                }
            }
        };

        debug!(owner = %owner, service = %descriptor.service, port = descriptor.port, "Resolved backend reference");
        Ok(descriptor)
    }

    /// Resolve a policy's reference to a GatewayExtension of type `expected`.
    ///
    /// The extension lives in the policy's namespace; its gRPC backend is
    /// resolved with the extension as owner.
    pub fn resolve_extension(
        &self,
        policy: &ObjectSource,
        extension_ref: &LocalObjectReference,
        expected: ExtensionType,
    ) -> Result<ExtensionIr> {
        let extension = self
            .extensions
            .get_extension(&policy.namespace, &extension_ref.name)
            .ok_or_else(|| {
                Error::backend_not_found(
                    GATEWAY_EXTENSION_KIND,
                    policy.namespace.as_str(),
                    extension_ref.name.as_str(),
                )
            })?;

        let source = ObjectSource::of(extension.as_ref());
        if extension.spec.type_ != expected {
            return Err(Error::policy_invalid(
                policy.namespaced_name(),
                format!(
                    "{source} has type {}, expected {expected}",
                    extension.spec.type_
                ),
            ));
        }

        let grpc = extension.spec.grpc_service.as_ref().ok_or_else(|| {
            Error::backend_ref_missing(format!("{source} has no grpcService"))
        })?;
        let backend = self.resolve(&source, grpc.backend_ref.as_ref())?;

        Ok(ExtensionIr {
            name: source.namespaced_name(),
            kind: expected,
            backend,
            authority: grpc.authority.clone(),
            domain: extension_domain(&extension),
        })
    }
}

fn extension_domain(extension: &GatewayExtension) -> Option<String> {
    extension.spec.domain.clone().filter(|d| !d.is_empty())
}

fn first_service_port(service: &k8s_openapi::api::core::v1::Service) -> Option<u16> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .first()
        .and_then(|p| u16::try_from(p.port).ok())
}
