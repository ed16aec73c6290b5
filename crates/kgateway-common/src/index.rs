//! Read-only lookup indexes consumed by the translators
//!
//! The translators never talk to the API server. They read from indexes
//! that an external watch layer keeps current: kube-rs reflector stores in
//! the controller, [`MemoryIndex`] in tests and offline tooling.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;

use crate::crd::{Backend, GatewayExtension, ReferenceGrant};
use crate::error::Error;
use crate::Result;
use crate::kube_utils::ObjectSource;

/// Secret lookups relative to an owning object
pub trait SecretIndex: Send + Sync {
    /// Secret `name` in the owner's namespace
    fn get_secret(&self, owner: &ObjectSource, name: &str) -> Option<Arc<Secret>>;
}

/// Lookups of objects a policy or route can reference as a backend
pub trait BackendIndex: Send + Sync {
    /// Core Service by namespace/name
    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>>;

    /// kgateway Backend by namespace/name
    fn get_backend(&self, namespace: &str, name: &str) -> Option<Arc<Backend>>;
}

/// GatewayExtension lookups
pub trait ExtensionIndex: Send + Sync {
    /// GatewayExtension by namespace/name
    fn get_extension(&self, namespace: &str, name: &str) -> Option<Arc<GatewayExtension>>;
}

/// ReferenceGrant lookups for cross-namespace checks
pub trait ReferenceGrantIndex: Send + Sync {
    /// Grants living in `namespace`
    fn grants_in(&self, namespace: &str) -> Vec<Arc<ReferenceGrant>>;

    /// Whether `from` may reference `to_group/to_kind to_namespace/to_name`
    fn permits(
        &self,
        from: &ObjectSource,
        to_group: &str,
        to_kind: &str,
        to_namespace: &str,
        to_name: &str,
    ) -> bool {
        if from.namespace == to_namespace {
            return true;
        }
        self.grants_in(to_namespace).iter().any(|grant| {
            grant.spec.permits(
                &from.group,
                &from.kind,
                &from.namespace,
                to_group,
                to_kind,
                to_name,
            )
        })
    }
}

/// Read several keys from a secret in the owner's namespace.
///
/// Every key must be present, non-empty and valid UTF-8. All failing keys
/// are reported in one aggregated error.
pub fn read_secret_keys(
    secrets: &dyn SecretIndex,
    owner: &ObjectSource,
    name: &str,
    keys: &[&str],
) -> Result<BTreeMap<String, String>> {
    let secret = secrets
        .get_secret(owner, name)
        .ok_or_else(|| Error::secret_missing(owner.namespace.as_str(), name))?;

    let mut values = BTreeMap::new();
    let mut errors = Vec::new();
    for key in keys {
        match secret_value(&secret, key) {
            Ok(value) => {
                values.insert((*key).to_string(), value);
            }
            Err(msg) => errors.push(Error::secret_malformed(
                owner.namespace.as_str(),
                name,
                *key,
                msg,
            )),
        }
    }
    Error::join(errors)?;
    Ok(values)
}

fn secret_value(secret: &Secret, key: &str) -> std::result::Result<String, String> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|b| b.0.as_slice())
        .ok_or_else(|| "key not present".to_string())?;
    if bytes.is_empty() {
        return Err("value is empty".to_string());
    }
    let value = std::str::from_utf8(bytes).map_err(|e| format!("value is not UTF-8: {e}"))?;
    Ok(value.to_string())
}

// =============================================================================
// In-memory index
// =============================================================================

/// Key for index lookup: (namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl IndexKey {
    /// Create a new key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn of<K: kube::Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Concurrent in-memory index backed by DashMap
#[derive(Debug, Default)]
pub struct MemoryIndex {
    secrets: DashMap<IndexKey, Arc<Secret>>,
    services: DashMap<IndexKey, Arc<Service>>,
    backends: DashMap<IndexKey, Arc<Backend>>,
    extensions: DashMap<IndexKey, Arc<GatewayExtension>>,
    grants: DashMap<IndexKey, Arc<ReferenceGrant>>,
}

impl MemoryIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a secret
    pub fn upsert_secret(&self, secret: Secret) {
        self.secrets.insert(IndexKey::of(&secret), Arc::new(secret));
    }

    /// Insert or replace a service
    pub fn upsert_service(&self, service: Service) {
        self.services
            .insert(IndexKey::of(&service), Arc::new(service));
    }

    /// Insert or replace a backend
    pub fn upsert_backend(&self, backend: Backend) {
        self.backends
            .insert(IndexKey::of(&backend), Arc::new(backend));
    }

    /// Insert or replace a gateway extension
    pub fn upsert_extension(&self, extension: GatewayExtension) {
        self.extensions
            .insert(IndexKey::of(&extension), Arc::new(extension));
    }

    /// Insert or replace a reference grant
    pub fn upsert_grant(&self, grant: ReferenceGrant) {
        self.grants.insert(IndexKey::of(&grant), Arc::new(grant));
    }

    /// Remove a secret
    pub fn remove_secret(&self, namespace: &str, name: &str) -> bool {
        self.secrets
            .remove(&IndexKey::new(namespace, name))
            .is_some()
    }
}

impl SecretIndex for MemoryIndex {
    fn get_secret(&self, owner: &ObjectSource, name: &str) -> Option<Arc<Secret>> {
        self.secrets
            .get(&IndexKey::new(owner.namespace.as_str(), name))
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl BackendIndex for MemoryIndex {
    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services
            .get(&IndexKey::new(namespace, name))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn get_backend(&self, namespace: &str, name: &str) -> Option<Arc<Backend>> {
        self.backends
            .get(&IndexKey::new(namespace, name))
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl ExtensionIndex for MemoryIndex {
    fn get_extension(&self, namespace: &str, name: &str) -> Option<Arc<GatewayExtension>> {
        self.extensions
            .get(&IndexKey::new(namespace, name))
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl ReferenceGrantIndex for MemoryIndex {
    fn grants_in(&self, namespace: &str) -> Vec<Arc<ReferenceGrant>> {
        self.grants
            .iter()
            .filter(|entry| entry.key().namespace == namespace)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

// =============================================================================
// Reflector-backed index
// =============================================================================

/// Indexes over kube-rs reflector stores
#[derive(Clone)]
pub struct ReflectorIndex {
    /// Secrets
    pub secrets: Store<Secret>,
    /// Services
    pub services: Store<Service>,
    /// Backends
    pub backends: Store<Backend>,
    /// Gateway extensions
    pub extensions: Store<GatewayExtension>,
    /// Reference grants
    pub grants: Store<ReferenceGrant>,
}

impl SecretIndex for Store<Secret> {
    fn get_secret(&self, owner: &ObjectSource, name: &str) -> Option<Arc<Secret>> {
        self.get(&ObjectRef::new(name).within(&owner.namespace))
    }
}

impl SecretIndex for ReflectorIndex {
    fn get_secret(&self, owner: &ObjectSource, name: &str) -> Option<Arc<Secret>> {
        self.secrets.get_secret(owner, name)
    }
}

impl BackendIndex for ReflectorIndex {
    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services.get(&ObjectRef::new(name).within(namespace))
    }

    fn get_backend(&self, namespace: &str, name: &str) -> Option<Arc<Backend>> {
        self.backends.get(&ObjectRef::new(name).within(namespace))
    }
}

impl ExtensionIndex for ReflectorIndex {
    fn get_extension(&self, namespace: &str, name: &str) -> Option<Arc<GatewayExtension>> {
        self.extensions.get(&ObjectRef::new(name).within(namespace))
    }
}

impl ReferenceGrantIndex for ReflectorIndex {
    fn grants_in(&self, namespace: &str) -> Vec<Arc<ReferenceGrant>> {
        self.grants
            .state()
            .into_iter()
            .filter(|grant| grant.namespace().as_deref() == Some(namespace))
            .collect()
    }
}
