//! Merging of TrafficPolicies attached to the same target
//!
//! Policies are folded one at a time into an accumulator. Every sub-policy
//! has its own merge function guarded by [`is_mergeable`]; the field-level
//! result is recorded in an origin map so status and debugging output can
//! name the policy that produced each setting.
//!
//! Merge order is decided by the caller. [`merge_policies`] sorts by creation
//! timestamp, then namespaced name.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kgateway_common::crd::TrafficPolicy;
use kgateway_common::ObjectSource;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ir::TrafficPolicyIr;

/// Field path to the policy that set it
pub type PolicyOrigins = BTreeMap<String, ObjectSource>;

/// How a later policy combines with what has already been merged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum MergeStrategy {
    /// Fill only unset fields; earlier policies win
    AugmentedDeepMerge,
    /// Fill only unset fields; an overriding caller passes the child first
    OverridableDeepMerge,
    /// Replace whole sub-policies; later policies win
    #[default]
    AugmentedShallowMerge,
    /// Replace whole sub-policies; an overriding caller passes the child last
    OverridableShallowMerge,
    /// Any unrecognized value
    #[serde(other)]
    Unknown,
}

impl MergeStrategy {
    /// Whether only unset fields may be written
    pub fn is_deep(self) -> bool {
        matches!(self, Self::AugmentedDeepMerge | Self::OverridableDeepMerge)
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AugmentedDeepMerge => "AugmentedDeepMerge",
            Self::OverridableDeepMerge => "OverridableDeepMerge",
            Self::AugmentedShallowMerge => "AugmentedShallowMerge",
            Self::OverridableShallowMerge => "OverridableShallowMerge",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Options for a merge pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOptions {
    /// Strategy applied to every field
    pub strategy: MergeStrategy,
}

impl MergeOptions {
    /// Options with the given strategy
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }
}

/// Whether `p2`'s field may be merged into `p1`'s under `opts`.
///
/// Nothing to merge when `p2` is unset; deep strategies never overwrite a
/// field `p1` already has.
pub fn is_mergeable<T>(p1: &Option<T>, p2: &Option<T>, opts: &MergeOptions) -> bool {
    if p2.is_none() {
        return false;
    }
    !(opts.strategy.is_deep() && p1.is_some())
}

/// Where the incoming policy came from
struct Incoming<'a> {
    source: &'a ObjectSource,
    origins: Option<&'a PolicyOrigins>,
}

impl Incoming<'_> {
    fn origin_of(&self, field: &str) -> ObjectSource {
        self.origins
            .and_then(|o| o.get(field))
            .unwrap_or(self.source)
            .clone()
    }
}

fn merge_field<T: Clone>(
    field: &str,
    p1: &mut Option<T>,
    p2: &Option<T>,
    incoming: &Incoming<'_>,
    opts: &MergeOptions,
    out_origins: &mut PolicyOrigins,
) {
    if !is_mergeable(p1, p2, opts) {
        return;
    }
    match opts.strategy {
        MergeStrategy::AugmentedDeepMerge
        | MergeStrategy::OverridableDeepMerge
        | MergeStrategy::AugmentedShallowMerge
        | MergeStrategy::OverridableShallowMerge => {
            *p1 = p2.clone();
            out_origins.insert(field.to_string(), incoming.origin_of(field));
        }
        MergeStrategy::Unknown => {
            warn!(field, source = %incoming.source, "Unsupported merge strategy, skipping field");
        }
    }
}

macro_rules! field_merger {
    ($(#[$doc:meta])* $fn_name:ident, $key:literal, $($field:ident).+) => {
        $(#[$doc])*
        pub fn $fn_name(
            p1: &mut TrafficPolicyIr,
            p2: &TrafficPolicyIr,
            p2_ref: &ObjectSource,
            p2_origins: Option<&PolicyOrigins>,
            opts: &MergeOptions,
            out_origins: &mut PolicyOrigins,
        ) {
            let incoming = Incoming { source: p2_ref, origins: p2_origins };
            merge_field($key, &mut p1.$($field).+, &p2.$($field).+, &incoming, opts, out_origins);
        }
    };
}

field_merger!(
    /// Merge external auth
    merge_ext_auth, "extAuth", ext_auth
);
field_merger!(
    /// Merge external processing
    merge_ext_proc, "extProc", ext_proc
);
field_merger!(
    /// Merge the local token bucket
    merge_local_rate_limit, "rateLimit.local", local_rate_limit
);
field_merger!(
    /// Merge global rate limiting
    merge_global_rate_limit, "rateLimit.global", global_rate_limit
);
field_merger!(
    /// Merge CORS
    merge_cors, "cors", cors
);
field_merger!(
    /// Merge CSRF
    merge_csrf, "csrf", csrf
);
field_merger!(
    /// Merge the request half of a transformation
    merge_transformation_request, "transformation.request", transformation.request
);
field_merger!(
    /// Merge the response half of a transformation
    merge_transformation_response, "transformation.response", transformation.response
);
field_merger!(
    /// Merge hash policies as one unit
    merge_hash_policies, "hashPolicies", hash_policies
);
field_merger!(
    /// Merge auto host rewrite
    merge_auto_host_rewrite, "autoHostRewrite", auto_host_rewrite
);
field_merger!(
    /// Merge request buffering
    merge_buffer, "buffer", buffer
);
field_merger!(
    /// Merge JWT validation
    merge_jwt, "jwt", jwt
);
field_merger!(
    /// Merge JWT authorization
    merge_jwt_authorization, "jwtAuthorization", jwt_authorization
);

type FieldMerger = fn(
    &mut TrafficPolicyIr,
    &TrafficPolicyIr,
    &ObjectSource,
    Option<&PolicyOrigins>,
    &MergeOptions,
    &mut PolicyOrigins,
);

const FIELD_MERGERS: [FieldMerger; 13] = [
    merge_ext_auth,
    merge_ext_proc,
    merge_local_rate_limit,
    merge_global_rate_limit,
    merge_cors,
    merge_csrf,
    merge_transformation_request,
    merge_transformation_response,
    merge_hash_policies,
    merge_auto_host_rewrite,
    merge_buffer,
    merge_jwt,
    merge_jwt_authorization,
];

/// Merge every sub-policy of `p2` into `p1`.
///
/// `p2_ref` names the incoming policy; when `p2` is itself a merge result
/// its `p2_origins` take precedence for fields they cover.
pub fn merge_traffic_policy(
    p1: &mut TrafficPolicyIr,
    p2: &TrafficPolicyIr,
    p2_ref: &ObjectSource,
    p2_origins: Option<&PolicyOrigins>,
    opts: &MergeOptions,
    out_origins: &mut PolicyOrigins,
) {
    for merge in FIELD_MERGERS {
        merge(p1, p2, p2_ref, p2_origins, opts, out_origins);
    }
}

/// A translated policy ready to merge
#[derive(Clone, Debug)]
pub struct AttachedPolicy {
    /// Policy coordinates
    pub source: ObjectSource,
    /// Creation timestamp, used for ordering
    pub created: Option<DateTime<Utc>>,
    /// Translated policy
    pub ir: TrafficPolicyIr,
}

impl AttachedPolicy {
    /// Pair a translated IR with the policy it came from
    pub fn new(policy: &TrafficPolicy, ir: TrafficPolicyIr) -> Self {
        Self {
            source: ObjectSource::of(policy),
            created: policy.metadata.creation_timestamp.as_ref().map(|t| t.0),
            ir,
        }
    }

    fn order_key(&self) -> (Option<DateTime<Utc>>, String) {
        (self.created, self.source.namespaced_name())
    }
}

/// Result of merging every policy on a target
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EffectivePolicy {
    /// Merged sub-policies
    pub ir: TrafficPolicyIr,
    /// Field path to the policy that set it
    pub origins: PolicyOrigins,
}

impl EffectivePolicy {
    /// Fold another merge result into this one
    pub fn merge_from(&mut self, other: &EffectivePolicy, other_ref: &ObjectSource, opts: &MergeOptions) {
        merge_traffic_policy(
            &mut self.ir,
            &other.ir,
            other_ref,
            Some(&other.origins),
            opts,
            &mut self.origins,
        );
    }
}

/// Merge policies attached to one target in creation order.
///
/// Policies without a timestamp sort first; ties break on namespaced name.
pub fn merge_policies(mut policies: Vec<AttachedPolicy>, opts: &MergeOptions) -> EffectivePolicy {
    policies.sort_by_key(AttachedPolicy::order_key);

    let mut effective = EffectivePolicy::default();
    for policy in &policies {
        merge_traffic_policy(
            &mut effective.ir,
            &policy.ir,
            &policy.source,
            None,
            opts,
            &mut effective.origins,
        );
    }
    debug!(
        policies = policies.len(),
        fields = effective.origins.len(),
        strategy = %opts.strategy,
        "Merged policies"
    );
    effective
}
