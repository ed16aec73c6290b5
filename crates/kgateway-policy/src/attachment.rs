//! Policy attachment store
//!
//! Concurrent storage of translated TrafficPolicies keyed by the target they
//! attach to, using DashMap for lock-free reads. The effective policy of a
//! target is computed on read by merging everything attached to it.

use std::collections::BTreeMap;
use std::fmt;

use dashmap::DashMap;
use kgateway_common::crd::{LocalPolicyTargetReference, TrafficPolicy};
use kgateway_common::ObjectSource;
use tracing::{debug, info};

use crate::ir::TrafficPolicyIr;
use crate::merge::{merge_policies, AttachedPolicy, EffectivePolicy, MergeOptions};

/// An object a policy attaches to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyTarget {
    /// API group
    pub group: String,
    /// Kind (Gateway, HTTPRoute, ...)
    pub kind: String,
    /// Namespace, always the policy's own
    pub namespace: String,
    /// Name
    pub name: String,
    /// Listener or rule name, when the policy narrows to one
    pub section_name: Option<String>,
}

impl PolicyTarget {
    /// Target of a local reference from a policy in `namespace`
    pub fn from_ref(namespace: &str, target: &LocalPolicyTargetReference) -> Self {
        Self {
            group: target.group.clone(),
            kind: target.kind.clone(),
            namespace: namespace.to_string(),
            name: target.name.clone(),
            section_name: target.section_name.clone(),
        }
    }

    /// Every target named by a policy's `targetRefs`.
    ///
    /// Selector-based targets depend on route labels and are resolved by the
    /// caller.
    pub fn of_policy(policy: &TrafficPolicy) -> Vec<Self> {
        let source = ObjectSource::of(policy);
        policy
            .spec
            .target_refs
            .iter()
            .map(|t| Self::from_ref(&source.namespace, t))
            .collect()
    }
}

impl fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)?;
        if let Some(section) = &self.section_name {
            write!(f, ":{section}")?;
        }
        Ok(())
    }
}

/// Concurrent store of attached policies
#[derive(Debug, Default)]
pub struct AttachmentStore {
    /// Attached policies per target, keyed by policy
    by_target: DashMap<PolicyTarget, BTreeMap<ObjectSource, AttachedPolicy>>,
    /// Targets each policy is attached to
    by_policy: DashMap<ObjectSource, Vec<PolicyTarget>>,
    opts: MergeOptions,
}

impl AttachmentStore {
    /// Create an empty store merging with `opts`
    pub fn new(opts: MergeOptions) -> Self {
        Self {
            by_target: DashMap::new(),
            by_policy: DashMap::new(),
            opts,
        }
    }

    /// Attach a translated policy to `targets`, replacing any previous
    /// attachment of the same policy
    pub fn upsert(&self, policy: &TrafficPolicy, targets: Vec<PolicyTarget>, ir: TrafficPolicyIr) {
        let attached = AttachedPolicy::new(policy, ir);
        let source = attached.source.clone();
        self.detach(&source);

        for target in &targets {
            self.by_target
                .entry(target.clone())
                .or_default()
                .insert(source.clone(), attached.clone());
        }
        info!(policy = %source, targets = targets.len(), "Policy attached");
        self.by_policy.insert(source, targets);
    }

    /// Remove a policy from every target; returns whether it was attached
    pub fn remove(&self, policy: &ObjectSource) -> bool {
        let removed = self.detach(policy);
        if removed {
            info!(policy = %policy, "Policy detached");
        }
        removed
    }

    fn detach(&self, policy: &ObjectSource) -> bool {
        let Some((_, targets)) = self.by_policy.remove(policy) else {
            return false;
        };
        for target in targets {
            let now_empty = match self.by_target.get_mut(&target) {
                Some(mut attached) => {
                    attached.remove(policy);
                    attached.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.by_target.remove_if(&target, |_, attached| attached.is_empty());
            }
        }
        true
    }

    /// Detach every policy for which `live` returns false
    pub fn prune(&self, live: impl Fn(&ObjectSource) -> bool) -> usize {
        let stale: Vec<ObjectSource> = self
            .by_policy
            .iter()
            .map(|e| e.key().clone())
            .filter(|source| !live(source))
            .collect();
        for source in &stale {
            self.remove(source);
        }
        stale.len()
    }

    /// Policies attached to `target`, in no particular order
    pub fn attached(&self, target: &PolicyTarget) -> Vec<ObjectSource> {
        self.by_target
            .get(target)
            .map(|attached| attached.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Merged policy for `target`, or `None` if nothing attaches to it
    pub fn effective(&self, target: &PolicyTarget) -> Option<EffectivePolicy> {
        let policies: Vec<AttachedPolicy> = self
            .by_target
            .get(target)?
            .values()
            .cloned()
            .collect();
        debug!(target = %target, policies = policies.len(), "Computing effective policy");
        Some(merge_policies(policies, &self.opts))
    }

    /// Every target with at least one policy
    pub fn targets(&self) -> Vec<PolicyTarget> {
        let mut targets: Vec<_> = self.by_target.iter().map(|e| e.key().clone()).collect();
        targets.sort();
        targets
    }

    /// Number of attached policies
    pub fn len(&self) -> usize {
        self.by_policy.len()
    }

    /// Whether no policy is attached
    pub fn is_empty(&self) -> bool {
        self.by_policy.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BufferIr;
    use crate::merge::MergeStrategy;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kgateway_common::crd::{TrafficPolicySpec, GATEWAY_API_GROUP};
    use kube::api::ObjectMeta;

    fn route(name: &str) -> LocalPolicyTargetReference {
        LocalPolicyTargetReference {
            group: GATEWAY_API_GROUP.into(),
            kind: "HTTPRoute".into(),
            name: name.into(),
            section_name: None,
        }
    }

    fn policy(name: &str, created_secs: i64, routes: &[&str]) -> TrafficPolicy {
        TrafficPolicy {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("apps".into()),
                creation_timestamp: Some(Time(
                    chrono::DateTime::from_timestamp(created_secs, 0).unwrap(),
                )),
                ..Default::default()
            },
            spec: TrafficPolicySpec {
                target_refs: routes.iter().map(|r| route(r)).collect(),
                ..Default::default()
            },
            status: None,
        }
    }

    fn buffer(bytes: u32) -> TrafficPolicyIr {
        TrafficPolicyIr {
            buffer: Some(BufferIr {
                max_request_bytes: bytes,
            }),
            ..Default::default()
        }
    }

    fn attach(store: &AttachmentStore, p: &TrafficPolicy, ir: TrafficPolicyIr) {
        store.upsert(p, PolicyTarget::of_policy(p), ir);
    }

    #[test]
    fn target_display() {
        let mut t = PolicyTarget::from_ref("apps", &route("r"));
        assert_eq!(t.to_string(), "HTTPRoute/apps/r");
        t.section_name = Some("rule-1".into());
        assert_eq!(t.to_string(), "HTTPRoute/apps/r:rule-1");
    }

    #[test]
    fn effective_merges_in_creation_order() {
        let store = AttachmentStore::new(MergeOptions::new(MergeStrategy::AugmentedDeepMerge));
        let newer = policy("newer", 200, &["r"]);
        let older = policy("older", 100, &["r"]);
        attach(&store, &newer, buffer(2));
        attach(&store, &older, buffer(1));

        let target = PolicyTarget::from_ref("apps", &route("r"));
        let effective = store.effective(&target).unwrap();
        assert_eq!(effective.ir.buffer.unwrap().max_request_bytes, 1);
        assert_eq!(effective.origins["buffer"].name, "older");
        assert_eq!(store.attached(&target).len(), 2);
    }

    #[test]
    fn upsert_replaces_previous_targets() {
        let store = AttachmentStore::default();
        attach(&store, &policy("p", 1, &["a", "b"]), buffer(1));
        attach(&store, &policy("p", 1, &["b"]), buffer(2));

        let a = PolicyTarget::from_ref("apps", &route("a"));
        let b = PolicyTarget::from_ref("apps", &route("b"));
        assert!(store.effective(&a).is_none());
        assert_eq!(
            store.effective(&b).unwrap().ir.buffer.unwrap().max_request_bytes,
            2
        );
        assert_eq!(store.targets(), vec![b]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_detaches_everywhere() {
        let store = AttachmentStore::default();
        let p = policy("p", 1, &["a", "b"]);
        attach(&store, &p, buffer(1));

        assert!(store.remove(&ObjectSource::of(&p)));
        assert!(!store.remove(&ObjectSource::of(&p)));
        assert!(store.targets().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn prune_keeps_live_policies() {
        let store = AttachmentStore::default();
        attach(&store, &policy("keep", 1, &["a"]), buffer(1));
        attach(&store, &policy("drop", 2, &["a"]), buffer(2));

        assert_eq!(store.prune(|source| source.name == "keep"), 1);
        let a = PolicyTarget::from_ref("apps", &route("a"));
        assert_eq!(store.attached(&a).len(), 1);
        assert_eq!(store.attached(&a)[0].name, "keep");
    }
}
