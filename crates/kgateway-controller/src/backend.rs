//! Backend reconciliation
//!
//! Translates AI Backends into clusters and request templates, keeps the
//! results in a [`ClusterCache`] for the xDS server, and reports the outcome
//! as an `Accepted` condition.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kgateway_ai::{translate_backend, AiBackendConfig};
use kgateway_common::crd::{Backend, BackendStatus};
use kgateway_common::envoy::Cluster;
use kgateway_common::index::{BackendIndex, IndexKey, SecretIndex};
use kgateway_common::{Error, ObjectSource};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use crate::error::ReconcileError;
use crate::status::{accepted_condition, merge_condition, StatusWriter};

/// Requeue interval when a missing dependency may appear later
const REQUEUE_DEPENDENCY_SECS: u64 = 30;
/// Requeue interval after an API error
const REQUEUE_ERROR_SECS: u64 = 5;

/// Translated AI backends keyed by backend namespace/name
#[derive(Debug, Default)]
pub struct ClusterCache {
    entries: DashMap<IndexKey, Arc<AiBackendConfig>>,
}

impl ClusterCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the translation of a backend
    pub fn insert(&self, namespace: &str, name: &str, config: AiBackendConfig) {
        self.entries
            .insert(IndexKey::new(namespace, name), Arc::new(config));
    }

    /// Drop a backend's translation
    pub fn remove(&self, namespace: &str, name: &str) -> bool {
        self.entries.remove(&IndexKey::new(namespace, name)).is_some()
    }

    /// Translation of a backend
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<AiBackendConfig>> {
        self.entries
            .get(&IndexKey::new(namespace, name))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Every cluster, sorted by name
    pub fn clusters(&self) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = self
            .entries
            .iter()
            .map(|entry| entry.value().cluster.clone())
            .collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        clusters
    }

    /// Drop translations whose backend no longer exists
    pub fn prune(&self, backends: &dyn BackendIndex) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| backends.get_backend(&key.namespace, &key.name).is_some());
        before - self.entries.len()
    }

    /// Number of cached backends
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared state for the Backend reconciler
pub struct BackendContext {
    /// Secrets for credential resolution
    pub secrets: Arc<dyn SecretIndex>,
    /// Live backends, for pruning the cache
    pub backends: Arc<dyn BackendIndex>,
    /// Status writes
    pub status: Arc<dyn StatusWriter>,
    /// Translated output
    pub cache: Arc<ClusterCache>,
}

/// Translate one Backend and record the outcome
#[instrument(skip(backend, ctx), fields(backend = %backend.name_any()))]
pub async fn reconcile(
    backend: Arc<Backend>,
    ctx: Arc<BackendContext>,
) -> Result<Action, ReconcileError> {
    let source = ObjectSource::of(backend.as_ref());
    let namespace = backend
        .namespace()
        .ok_or_else(|| ReconcileError::InvalidObject(format!("{source} has no namespace")))?;
    let name = backend.name_any();

    let pruned = ctx.cache.prune(ctx.backends.as_ref());
    if pruned > 0 {
        info!(pruned, "Dropped clusters of deleted backends");
    }

    let outcome = backend
        .spec
        .validate()
        .map_err(|msg| Error::backend_invalid(source.namespaced_name(), msg))
        .and_then(|()| translate_backend(&backend, ctx.secrets.as_ref()));

    let (condition, action) = match outcome {
        Ok(config) => {
            info!(cluster = %config.cluster.name, "Backend translated");
            ctx.cache.insert(&namespace, &name, config);
            (
                accepted_condition(Ok(()), backend.metadata.generation),
                Action::await_change(),
            )
        }
        Err(e) => {
            warn!(error = %e, reason = e.reason(), "Backend rejected");
            ctx.cache.remove(&namespace, &name);
            let action = if e.is_retryable() {
                Action::requeue(Duration::from_secs(REQUEUE_DEPENDENCY_SECS))
            } else {
                Action::await_change()
            };
            (accepted_condition(Err(&e), backend.metadata.generation), action)
        }
    };

    let current = backend
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    if let Some(conditions) = merge_condition(current, condition) {
        ctx.status
            .backend_status(&namespace, &name, &BackendStatus { conditions })
            .await?;
    }

    Ok(action)
}

/// Requeue after API errors
pub fn error_policy(backend: Arc<Backend>, error: &ReconcileError, _ctx: Arc<BackendContext>) -> Action {
    error!(?error, backend = %backend.name_any(), "Backend reconciliation failed");
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}
