//! Status conditions and the status write seam

use async_trait::async_trait;
use kgateway_common::crd::{
    Backend, BackendStatus, Condition, ConditionStatus, PolicyStatus, TrafficPolicy,
};
use kgateway_common::{Error, FIELD_MANAGER};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::ReconcileError;

/// Condition type written by every reconciler
pub const ACCEPTED: &str = "Accepted";

/// `Accepted` condition for a translation outcome.
///
/// Failures use the error's reason so status shows the category at a glance.
pub fn accepted_condition(outcome: Result<(), &Error>, generation: Option<i64>) -> Condition {
    let condition = match outcome {
        Ok(()) => Condition::new(ACCEPTED, ConditionStatus::True, ACCEPTED, "translated successfully"),
        Err(e) => Condition::new(ACCEPTED, ConditionStatus::False, e.reason(), e.to_string()),
    };
    condition.with_generation(generation)
}

/// Conditions with `desired` replacing any condition of the same type.
///
/// Returns `None` when an equivalent condition is already present, so
/// callers can skip the write and keep the original transition time.
pub fn merge_condition(current: &[Condition], desired: Condition) -> Option<Vec<Condition>> {
    if current
        .iter()
        .any(|c| c.same_state(&desired) && c.observed_generation == desired.observed_generation)
    {
        return None;
    }
    let mut conditions: Vec<Condition> = current
        .iter()
        .filter(|c| c.type_ != desired.type_)
        .cloned()
        .collect();
    conditions.push(desired);
    Some(conditions)
}

/// Writes status subresources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replace a Backend's status
    async fn backend_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BackendStatus,
    ) -> Result<(), ReconcileError>;

    /// Replace a TrafficPolicy's status
    async fn traffic_policy_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PolicyStatus,
    ) -> Result<(), ReconcileError>;
}

/// [`StatusWriter`] backed by the API server
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    /// Create a writer using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn backend_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BackendStatus,
    ) -> Result<(), ReconcileError> {
        let api: Api<Backend> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| ReconcileError::kube(format!("patch Backend {namespace}/{name} status"), e))?;
        debug!(backend = %name, namespace = %namespace, "Updated Backend status");
        Ok(())
    }

    async fn traffic_policy_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PolicyStatus,
    ) -> Result<(), ReconcileError> {
        let api: Api<TrafficPolicy> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                ReconcileError::kube(format!("patch TrafficPolicy {namespace}/{name} status"), e)
            })?;
        debug!(policy = %name, namespace = %namespace, "Updated TrafficPolicy status");
        Ok(())
    }
}
