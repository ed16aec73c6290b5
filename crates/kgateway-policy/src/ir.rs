//! Translated form of a TrafficPolicy
//!
//! Every sub-policy is optional and independent. References to other
//! objects are already resolved, so two IRs compare equal exactly when they
//! would produce the same data-plane configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use kgateway_common::crd::{
    CorsPolicy, CsrfPolicy, HashPolicy, RateLimitDescriptor, StringMatcher, Transform,
};
use serde::Serialize;

use crate::extension::ExtensionIr;
use crate::jwt::{JwtIr, RbacIr};

/// Envoy rejects token buckets refilled faster than this
pub const MIN_FILL_INTERVAL: Duration = Duration::from_millis(50);

/// External authorization
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuthIr {
    /// Authorization service; absent when disabled
    pub extension: Option<ExtensionIr>,
    /// Turn off external auth inherited from a broader attachment
    pub disabled: bool,
    /// Buffer up to this many body bytes for the auth request
    pub max_request_bytes: Option<u32>,
    /// Extra context sent with every check
    pub context_extensions: BTreeMap<String, String>,
}

impl ExtAuthIr {
    /// Exactly one of an extension or `disabled`
    pub fn validate(&self) -> Result<(), String> {
        match (&self.extension, self.disabled) {
            (Some(_), true) => Err("disable cannot be combined with extensionRef".to_string()),
            (None, false) => Err("extensionRef is required unless disable is set".to_string()),
            _ => Ok(()),
        }
    }
}

/// External processing
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtProcIr {
    /// Processing service; absent when disabled
    pub extension: Option<ExtensionIr>,
    /// Turn off processing inherited from a broader attachment
    pub disabled: bool,
}

impl ExtProcIr {
    /// Exactly one of an extension or `disabled`
    pub fn validate(&self) -> Result<(), String> {
        match (&self.extension, self.disabled) {
            (Some(_), true) => Err("disable cannot be combined with extensionRef".to_string()),
            (None, false) => Err("extensionRef is required unless disable is set".to_string()),
            _ => Ok(()),
        }
    }
}

/// Token bucket enforced in the proxy
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRateLimitIr {
    /// Bucket capacity
    pub max_tokens: u32,
    /// Tokens added per interval
    pub tokens_per_fill: u32,
    /// Refill interval
    pub fill_interval: Duration,
}

impl LocalRateLimitIr {
    /// Bucket must hold and receive tokens, at a rate Envoy accepts
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("maxTokens must be positive".to_string());
        }
        if self.tokens_per_fill == 0 {
            return Err("tokensPerFill must be positive".to_string());
        }
        if self.fill_interval < MIN_FILL_INTERVAL {
            return Err(format!(
                "fillInterval must be at least {}ms",
                MIN_FILL_INTERVAL.as_millis()
            ));
        }
        Ok(())
    }
}

/// Rate limiting delegated to a rate-limit service
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRateLimitIr {
    /// Rate-limit service
    pub extension: ExtensionIr,
    /// Domain sent with every request
    pub domain: String,
    /// Descriptors sent per request
    pub descriptors: Vec<RateLimitDescriptor>,
}

impl GlobalRateLimitIr {
    /// Needs a domain and non-empty descriptors
    pub fn validate(&self) -> Result<(), String> {
        if self.domain.is_empty() {
            return Err(format!(
                "rate limit extension {} has no domain",
                self.extension.name
            ));
        }
        if self.descriptors.is_empty() {
            return Err("at least one descriptor is required".to_string());
        }
        if self.descriptors.iter().any(|d| d.entries.is_empty()) {
            return Err("descriptors need at least one entry".to_string());
        }
        Ok(())
    }
}

/// CORS, carried as configured
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsIr {
    /// Source policy
    pub policy: CorsPolicy,
}

impl CorsIr {
    /// Origins required; credentials cannot be combined with `*`
    pub fn validate(&self) -> Result<(), String> {
        if self.policy.allow_origins.is_empty() {
            return Err("at least one allowOrigin is required".to_string());
        }
        if self.policy.allow_credentials && self.policy.allow_origins.iter().any(|o| o == "*") {
            return Err("allowCredentials cannot be used with allowOrigins \"*\"".to_string());
        }
        Ok(())
    }
}

/// CSRF protection
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfIr {
    /// Percentage of requests enforced
    pub filter_enabled: u32,
    /// Percentage of requests evaluated without enforcement
    pub shadow_enabled: Option<u32>,
    /// Extra accepted origins
    pub additional_origins: Vec<StringMatcher>,
}

impl From<&CsrfPolicy> for CsrfIr {
    fn from(policy: &CsrfPolicy) -> Self {
        Self {
            filter_enabled: policy.percentage_enabled.unwrap_or(100),
            shadow_enabled: policy.percentage_shadowed,
            additional_origins: policy.additional_origins.clone(),
        }
    }
}

impl CsrfIr {
    /// Percentages are within 0..=100
    pub fn validate(&self) -> Result<(), String> {
        if self.filter_enabled > 100 || self.shadow_enabled.is_some_and(|p| p > 100) {
            return Err("percentages must be between 0 and 100".to_string());
        }
        Ok(())
    }
}

/// Request and response rewrites, merged independently
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationIr {
    /// Request rewrite
    pub request: Option<Transform>,
    /// Response rewrite
    pub response: Option<Transform>,
}

impl TransformationIr {
    /// Whether neither direction is set
    pub fn is_empty(&self) -> bool {
        self.request.is_none() && self.response.is_none()
    }

    /// Header names must be non-empty and set at most once
    pub fn validate(&self) -> Result<(), String> {
        for (direction, transform) in [("request", &self.request), ("response", &self.response)] {
            let Some(t) = transform else { continue };
            let mut seen = BTreeSet::new();
            for h in &t.set {
                if h.name.is_empty() {
                    return Err(format!("{direction}.set has an empty header name"));
                }
                if !seen.insert(h.name.to_ascii_lowercase()) {
                    return Err(format!("{direction}.set sets {} twice", h.name));
                }
            }
            if t.add.iter().any(|h| h.name.is_empty()) || t.remove.iter().any(String::is_empty) {
                return Err(format!("{direction} has an empty header name"));
            }
        }
        Ok(())
    }
}

/// Consistent-hash inputs for route load balancing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HashPolicyIr {
    /// Inputs, evaluated in order
    pub policies: Vec<HashPolicy>,
}

impl HashPolicyIr {
    /// Each input names exactly one source
    pub fn validate(&self) -> Result<(), String> {
        match self.policies.iter().position(|p| p.inputs() != 1) {
            Some(i) => Err(format!(
                "hashPolicies[{i}] needs exactly one of header, cookie or sourceIP"
            )),
            None => Ok(()),
        }
    }
}

/// Request buffering limit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferIr {
    /// Maximum request bytes
    pub max_request_bytes: u32,
}

impl BufferIr {
    /// Limit must be positive
    pub fn validate(&self) -> Result<(), String> {
        if self.max_request_bytes == 0 {
            return Err("maxRequestSize must be positive".to_string());
        }
        Ok(())
    }
}

/// Parse a byte size such as `64Ki`, `1Mi`, `2G` or `4096`
pub fn parse_byte_size(size: &str) -> Result<u64, String> {
    let size = size.trim();
    let (digits, multiplier) = [
        ("Ki", 1u64 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
    ]
    .iter()
    .find_map(|(suffix, mul)| size.strip_suffix(suffix).map(|d| (d, *mul)))
    .unwrap_or((size, 1));

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| {
            format!("invalid size: {size}, use a number with an optional Ki, Mi, Gi, k, M or G suffix")
        })
}

/// Every translated sub-policy of a TrafficPolicy
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicyIr {
    /// External authorization
    pub ext_auth: Option<ExtAuthIr>,
    /// External processing
    pub ext_proc: Option<ExtProcIr>,
    /// Local token bucket
    pub local_rate_limit: Option<LocalRateLimitIr>,
    /// Rate-limit service
    pub global_rate_limit: Option<GlobalRateLimitIr>,
    /// CORS
    pub cors: Option<CorsIr>,
    /// CSRF
    pub csrf: Option<CsrfIr>,
    /// Header/body rewrites
    pub transformation: TransformationIr,
    /// Consistent-hash inputs
    pub hash_policies: Option<HashPolicyIr>,
    /// Rewrite Host to the upstream's hostname
    pub auto_host_rewrite: Option<bool>,
    /// Request buffering
    pub buffer: Option<BufferIr>,
    /// JWT validation
    pub jwt: Option<JwtIr>,
    /// Claim-based authorization
    pub jwt_authorization: Option<RbacIr>,
}

impl TrafficPolicyIr {
    /// Whether no sub-policy is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Validate every set sub-policy, returning `(field, message)` pairs
    pub fn validate(&self) -> Vec<(&'static str, String)> {
        let checks: [(&'static str, Option<Result<(), String>>); 11] = [
            ("spec.extAuth", self.ext_auth.as_ref().map(ExtAuthIr::validate)),
            ("spec.extProc", self.ext_proc.as_ref().map(ExtProcIr::validate)),
            (
                "spec.rateLimit.local",
                self.local_rate_limit.as_ref().map(LocalRateLimitIr::validate),
            ),
            (
                "spec.rateLimit.global",
                self.global_rate_limit.as_ref().map(GlobalRateLimitIr::validate),
            ),
            ("spec.cors", self.cors.as_ref().map(CorsIr::validate)),
            ("spec.csrf", self.csrf.as_ref().map(CsrfIr::validate)),
            ("spec.transformation", Some(self.transformation.validate())),
            (
                "spec.hashPolicies",
                self.hash_policies.as_ref().map(HashPolicyIr::validate),
            ),
            ("spec.buffer", self.buffer.as_ref().map(BufferIr::validate)),
            ("spec.jwt", self.jwt.as_ref().map(JwtIr::validate)),
            (
                "spec.jwtAuthorization",
                self.jwt_authorization.as_ref().map(RbacIr::validate),
            ),
        ];

        checks
            .into_iter()
            .filter_map(|(field, result)| match result {
                Some(Err(msg)) => Some((field, msg)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgateway_common::crd::HeaderTransformation;

    #[test]
    fn byte_sizes() {
        assert_eq!(parse_byte_size("4096").unwrap(), 4096);
        assert_eq!(parse_byte_size("64Ki").unwrap(), 65_536);
        assert_eq!(parse_byte_size("1Mi").unwrap(), 1_048_576);
        assert_eq!(parse_byte_size("2k").unwrap(), 2_000);
        assert_eq!(parse_byte_size(" 1G ").unwrap(), 1_000_000_000);
        assert!(parse_byte_size("Mi").is_err());
        assert!(parse_byte_size("1Ti").is_err());
        assert!(parse_byte_size("-1").is_err());
    }

    #[test]
    fn ext_auth_needs_extension_or_disable() {
        let mut ir = ExtAuthIr::default();
        assert!(ir.validate().is_err());
        ir.disabled = true;
        assert!(ir.validate().is_ok());
    }

    #[test]
    fn token_bucket_limits() {
        let mut ir = LocalRateLimitIr {
            max_tokens: 10,
            tokens_per_fill: 1,
            fill_interval: Duration::from_secs(1),
        };
        assert!(ir.validate().is_ok());
        ir.fill_interval = Duration::from_millis(10);
        assert!(ir.validate().is_err());
        ir.fill_interval = Duration::from_secs(1);
        ir.max_tokens = 0;
        assert!(ir.validate().is_err());
    }

    #[test]
    fn cors_wildcard_with_credentials() {
        let ir = CorsIr {
            policy: CorsPolicy {
                allow_origins: vec!["*".into()],
                allow_credentials: true,
                ..Default::default()
            },
        };
        assert!(ir.validate().is_err());
    }

    #[test]
    fn csrf_defaults_to_full_enforcement() {
        let ir = CsrfIr::from(&CsrfPolicy::default());
        assert_eq!(ir.filter_enabled, 100);
        assert!(ir.validate().is_ok());
        let ir = CsrfIr::from(&CsrfPolicy {
            percentage_shadowed: Some(101),
            ..Default::default()
        });
        assert!(ir.validate().is_err());
    }

    #[test]
    fn duplicate_set_header() {
        let header = |name: &str| HeaderTransformation {
            name: name.into(),
            value: "v".into(),
        };
        let ir = TransformationIr {
            request: Some(Transform {
                set: vec![header("X-A"), header("x-a")],
                ..Default::default()
            }),
            response: None,
        };
        assert!(ir.validate().unwrap_err().contains("twice"));
    }

    #[test]
    fn policy_validation_names_fields() {
        let ir = TrafficPolicyIr {
            ext_proc: Some(ExtProcIr::default()),
            buffer: Some(BufferIr {
                max_request_bytes: 0,
            }),
            ..Default::default()
        };
        let fields: Vec<_> = ir.validate().into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, ["spec.extProc", "spec.buffer"]);
        assert!(!ir.is_empty());
        assert!(TrafficPolicyIr::default().is_empty());
    }
}
