//! TrafficPolicy reconciliation
//!
//! Translates each policy, attaches the result to its targets and reports
//! the outcome. Rejected policies are detached so they never contribute to
//! an effective policy.

use std::sync::Arc;
use std::time::Duration;

use kgateway_common::crd::{PolicyStatus, TrafficPolicy};
use kgateway_common::ObjectSource;
use kgateway_policy::{AttachmentStore, PolicyTarget, PolicyTranslator};
use kube::runtime::controller::Action;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use crate::error::ReconcileError;
use crate::status::{accepted_condition, merge_condition, StatusWriter};

/// Requeue interval when a referenced object may appear later
const REQUEUE_DEPENDENCY_SECS: u64 = 30;
/// Requeue interval after an API error
const REQUEUE_ERROR_SECS: u64 = 5;

/// Shared state for the TrafficPolicy reconciler
pub struct PolicyContext {
    /// Policy translation
    pub translator: PolicyTranslator,
    /// Translated policies per target
    pub attachments: Arc<AttachmentStore>,
    /// Live policies, for pruning detached ones
    pub policies: Store<TrafficPolicy>,
    /// Status writes
    pub status: Arc<dyn StatusWriter>,
}

/// Translate and attach one TrafficPolicy
#[instrument(skip(policy, ctx), fields(policy = %policy.name_any()))]
pub async fn reconcile(
    policy: Arc<TrafficPolicy>,
    ctx: Arc<PolicyContext>,
) -> Result<Action, ReconcileError> {
    let source = ObjectSource::of(policy.as_ref());
    let namespace = policy
        .namespace()
        .ok_or_else(|| ReconcileError::InvalidObject(format!("{source} has no namespace")))?;
    let name = policy.name_any();

    let pruned = ctx.attachments.prune(|s| {
        ctx.policies
            .get(&ObjectRef::new(&s.name).within(&s.namespace))
            .is_some()
    });
    if pruned > 0 {
        info!(pruned, "Detached deleted policies");
    }

    let (condition, action) = match ctx.translator.translate(&policy) {
        Ok(ir) => {
            let targets = PolicyTarget::of_policy(&policy);
            ctx.attachments.upsert(&policy, targets, ir);
            (
                accepted_condition(Ok(()), policy.metadata.generation),
                Action::await_change(),
            )
        }
        Err(e) => {
            warn!(error = %e, reason = e.reason(), "TrafficPolicy rejected");
            ctx.attachments.remove(&source);
            let action = if e.is_retryable() {
                Action::requeue(Duration::from_secs(REQUEUE_DEPENDENCY_SECS))
            } else {
                Action::await_change()
            };
            (accepted_condition(Err(&e), policy.metadata.generation), action)
        }
    };

    let current = policy
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    if let Some(conditions) = merge_condition(current, condition) {
        ctx.status
            .traffic_policy_status(&namespace, &name, &PolicyStatus { conditions })
            .await?;
    }

    Ok(action)
}

/// Requeue after API errors
pub fn error_policy(
    policy: Arc<TrafficPolicy>,
    error: &ReconcileError,
    _ctx: Arc<PolicyContext>,
) -> Action {
    error!(?error, policy = %policy.name_any(), "TrafficPolicy reconciliation failed");
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}
