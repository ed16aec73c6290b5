//! Custom Resource Definitions for kgateway
//!
//! All kinds live in `gateway.kgateway.dev/v1alpha1` except the minimal
//! `ReferenceGrant`, which mirrors the Gateway API type.

mod backend;
mod gateway_extension;
mod listener_policy;
mod reference_grant;
mod traffic_policy;
mod types;

pub use backend::{
    AIBackend, AnthropicConfig, AuthTokenKind, AuthTokenSource, AzureOpenAIConfig, Backend,
    BackendSpec, BackendStatus, GeminiConfig, HostOverride, LLMProvider, MistralConfig,
    MultiPoolConfig, OpenAIConfig, Priority, ProviderKind, Publisher, SingleAuthToken,
    SupportedLLMProvider, VertexAIConfig,
};
pub use gateway_extension::{
    ExtensionType, GatewayExtension, GatewayExtensionSpec, GatewayExtensionStatus, GrpcService,
};
pub use listener_policy::{
    AccessLog, AccessLogFilter, FileSink, GrpcAccessLogService, HTTPListenerPolicy,
    HTTPListenerPolicySpec, PolicyStatus, StatusCodeFilter,
};
pub use reference_grant::{
    ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo,
};
pub use traffic_policy::{
    BodyParseBehavior, BodyTransformation, Buffer, CorsPolicy, CsrfPolicy, ExtAuthPolicy,
    ExtProcPolicy, HashPolicy, HeaderTransformation, JwtAuthorization, JwtAuthorizationAction,
    JwtClaimMatch, JwtClaimMatcher, JwtClaimToHeader, JwtHeaderSource, JwtPrincipalRule,
    JwtProvider, JwtTokenSource, JwtValidation, JwksSource, LocalJwks, LocalRateLimitPolicy,
    RateLimit, RateLimitDescriptor, RateLimitDescriptorEntry, RateLimitPolicy, RemoteJwks,
    StringMatcher, TokenBucket, TrafficPolicy, TrafficPolicySpec, Transform, TransformationPolicy,
};
pub use types::{
    BackendRef, Condition, ConditionStatus, LocalObjectReference, LocalPolicyTargetReference,
    LocalPolicyTargetSelector, GATEWAY_API_GROUP, KGATEWAY_GROUP,
};

use std::time::Duration;

/// Parse a Gateway API style duration such as `30s`, `5m` or `1h30m`.
///
/// Supported units are `ms`, `s`, `m` and `h`. A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_ms: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("duration {input} is missing a unit"))?;
        if digits == 0 {
            return Err(format!("duration {input} has a unit without a value"));
        }
        let (magnitude, tail) = rest.split_at(digits);
        let magnitude: u64 = magnitude
            .parse()
            .map_err(|e| format!("invalid duration {input}: {e}"))?;
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let mul = match unit {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            other => {
                return Err(format!(
                    "invalid duration unit {other} in {input} (expected ms, s, m or h)"
                ))
            }
        };
        total_ms = magnitude
            .checked_mul(mul)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(|| format!("duration {input} overflows"))?;
        rest = next;
    }
    Ok(Duration::from_millis(total_ms))
}
