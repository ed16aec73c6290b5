//! TrafficPolicy CRD
//!
//! A TrafficPolicy attaches to Gateways, listeners or HTTPRoutes and carries
//! independent, optional sub-policies. Several policies can select the same
//! target; the policy crate merges them into one effective policy.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::listener_policy::PolicyStatus;
use super::types::{LocalObjectReference, LocalPolicyTargetReference, LocalPolicyTargetSelector};

/// Route kind that hash policies and host rewrite require
const HTTP_ROUTE_KIND: &str = "HTTPRoute";

/// TrafficPolicy spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.kgateway.dev",
    version = "v1alpha1",
    kind = "TrafficPolicy",
    namespaced,
    status = "PolicyStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicySpec {
    /// Targets by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_refs: Vec<LocalPolicyTargetReference>,

    /// Targets by label
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_selectors: Vec<LocalPolicyTargetSelector>,

    /// External authorization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_auth: Option<ExtAuthPolicy>,

    /// External processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_proc: Option<ExtProcPolicy>,

    /// Local and/or global rate limiting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,

    /// CORS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsPolicy>,

    /// CSRF
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf: Option<CsrfPolicy>,

    /// Header and body transformations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<TransformationPolicy>,

    /// Consistent-hash inputs (HTTPRoute targets only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hash_policies: Vec<HashPolicy>,

    /// Rewrite Host to the upstream hostname (HTTPRoute targets only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_host_rewrite: Option<bool>,

    /// Request buffering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<Buffer>,

    /// JWT validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtValidation>,

    /// JWT claim-based authorization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_authorization: Option<JwtAuthorization>,
}

// =============================================================================
// External auth / processing / rate limit
// =============================================================================

/// External authorization via a GatewayExtension
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuthPolicy {
    /// GatewayExtension of type ExtAuth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_ref: Option<LocalObjectReference>,

    /// Disable external auth inherited from a parent attachment
    #[serde(default)]
    pub disable: bool,

    /// Forward up to this many body bytes to the auth service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_request_bytes: Option<u32>,

    /// Extra key/values passed to the auth service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_extensions: BTreeMap<String, String>,
}

/// External processing via a GatewayExtension
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtProcPolicy {
    /// GatewayExtension of type ExtProc
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_ref: Option<LocalObjectReference>,

    /// Disable external processing inherited from a parent attachment
    #[serde(default)]
    pub disable: bool,
}

/// Rate limit configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    /// Token bucket enforced in the proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalRateLimitPolicy>,

    /// Descriptors sent to a rate limit service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<RateLimitPolicy>,
}

/// Local rate limit
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalRateLimitPolicy {
    /// Bucket parameters
    pub token_bucket: TokenBucket,
}

/// Token bucket parameters
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenBucket {
    /// Bucket capacity
    pub max_tokens: u32,
    /// Tokens added per interval (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_fill: Option<u32>,
    /// Refill interval (e.g. `1s`)
    pub fill_interval: String,
}

/// Global rate limit
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    /// GatewayExtension of type RateLimit
    pub extension_ref: LocalObjectReference,
    /// Descriptors to send
    pub descriptors: Vec<RateLimitDescriptor>,
}

/// One rate limit descriptor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDescriptor {
    /// Ordered entries
    pub entries: Vec<RateLimitDescriptorEntry>,
}

/// A descriptor entry; exactly one shape
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitDescriptorEntry {
    /// Static key/value
    Generic {
        /// Descriptor key
        key: String,
        /// Descriptor value
        value: String,
    },
    /// Value of a request header
    Header {
        /// Header name
        name: String,
    },
    /// Downstream remote address
    RemoteAddress {},
    /// Request path
    Path {},
}

// =============================================================================
// CORS / CSRF
// =============================================================================

/// CORS policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Allowed origins (`*` wildcards allowed)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<String>,
    /// Allowed methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    /// Allowed request headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
    /// Response headers exposed to the browser
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    /// Preflight cache lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
    /// Allow credentials
    #[serde(default)]
    pub allow_credentials: bool,
}

/// String match used by CSRF additional origins
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StringMatcher {
    /// Exact match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// Suffix match
    Suffix(String),
    /// Substring match
    Contains(String),
    /// RE2 regex
    SafeRegex(String),
}

/// CSRF policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsrfPolicy {
    /// Percentage of requests enforced (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_enabled: Option<u32>,
    /// Percentage of requests evaluated but not enforced (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_shadowed: Option<u32>,
    /// Origins accepted in addition to the destination
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_origins: Vec<StringMatcher>,
}

// =============================================================================
// Transformation / hashing / buffering
// =============================================================================

/// Request and response transformations
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationPolicy {
    /// Applied to the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Transform>,
    /// Applied to the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Transform>,
}

/// A transformation applied in one direction
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    /// Headers to overwrite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<HeaderTransformation>,
    /// Headers to append
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<HeaderTransformation>,
    /// Headers to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
    /// Body rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyTransformation>,
}

/// Header name plus an Inja template value
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderTransformation {
    /// Header name
    pub name: String,
    /// Template producing the value
    pub value: String,
}

/// How the body is parsed before templating
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BodyParseBehavior {
    /// Treat the body as an opaque string
    #[default]
    AsString,
    /// Parse the body as JSON so templates can address fields
    AsJson,
}

/// Body rewrite
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BodyTransformation {
    /// Parse mode
    #[serde(default)]
    pub parse_as: BodyParseBehavior,
    /// Template producing the new body; unset keeps the body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Input to consistent hashing; exactly one of header, cookie or sourceIP
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HashPolicy {
    /// Hash on a header value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Hash on a cookie value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    /// Hash on the client address
    #[serde(default, rename = "sourceIP")]
    pub source_ip: bool,
    /// Stop evaluating further hash policies if this one produced a value
    #[serde(default)]
    pub terminal: bool,
}

impl HashPolicy {
    /// Number of hash inputs set; valid policies have exactly one
    pub fn inputs(&self) -> usize {
        usize::from(self.header.is_some())
            + usize::from(self.cookie.is_some())
            + usize::from(self.source_ip)
    }
}

/// Request buffering
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Buffer {
    /// Maximum buffered request size (e.g. `64Ki`, `1Mi`, `4096`)
    pub max_request_size: String,
}

// =============================================================================
// JWT
// =============================================================================

/// JWT validation: provider name to provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtValidation {
    /// Providers keyed by name
    pub providers: BTreeMap<String, JwtProvider>,
}

/// One JWT issuer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtProvider {
    /// Expected `iss` claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Accepted `aud` values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
    /// Where to read the token (defaults to `Authorization: Bearer`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_source: Option<JwtTokenSource>,
    /// Claims copied to request headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims_to_headers: Vec<JwtClaimToHeader>,
    /// Keep the token in the request after validation
    #[serde(default)]
    pub keep_token: bool,
    /// Key material
    pub jwks: JwksSource,
}

/// Token locations
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtTokenSource {
    /// Headers, with optional value prefix
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<JwtHeaderSource>,
    /// Query parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<String>,
}

/// Header carrying a token
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtHeaderSource {
    /// Header name
    pub header: String,
    /// Prefix stripped before validation (e.g. `Bearer `)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Copy a claim into a header
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtClaimToHeader {
    /// Claim name (nested claims use `.`)
    pub name: String,
    /// Header to write
    pub header: String,
    /// Append instead of overwrite
    #[serde(default)]
    pub append: bool,
}

/// JWKS source: exactly one of local or remote
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwksSource {
    /// Key set available without a network fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalJwks>,
    /// Key set fetched over HTTP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteJwks>,
}

/// Local key set: exactly one of inline, file or secretRef
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalJwks {
    /// JWKS JSON document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
    /// Path readable by the proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Secret holding the document under the `jwks` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
}

/// Remote key set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJwks {
    /// JWKS URL
    pub url: String,
    /// How long a fetched key set is trusted (e.g. `5m`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_duration: Option<String>,
}

/// Claim-based authorization
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthorization {
    /// Restrict matching to these providers' payloads; empty means any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<String>,
    /// Rules; any matching rule applies the action
    pub rules: Vec<JwtPrincipalRule>,
    /// Action taken when a rule matches
    #[serde(default)]
    pub action: JwtAuthorizationAction,
}

/// Conjunction of claim matches
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtPrincipalRule {
    /// All must match
    pub claims: Vec<JwtClaimMatch>,
}

/// One claim match
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtClaimMatch {
    /// Claim name (nested claims use `.`)
    pub name: String,
    /// Expected value
    pub value: String,
    /// How the value is compared
    #[serde(default)]
    pub matcher: JwtClaimMatcher,
}

/// Claim comparison
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum JwtClaimMatcher {
    /// String equality
    #[default]
    Exact,
    /// `true` / `false`
    Boolean,
    /// List claim contains the value
    Contains,
}

/// Authorization action
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum JwtAuthorizationAction {
    /// Allow matching requests, deny the rest
    #[default]
    Allow,
    /// Deny matching requests
    Deny,
}

// =============================================================================
// Validation
// =============================================================================

impl TrafficPolicySpec {
    /// Whether every target is an HTTPRoute
    pub fn targets_only_routes(&self) -> bool {
        self.target_refs.iter().all(|t| t.kind == HTTP_ROUTE_KIND)
            && self
                .target_selectors
                .iter()
                .all(|s| s.kind == HTTP_ROUTE_KIND)
    }

    /// Admission-equivalent validation, returning every problem as
    /// `(field, message)` pairs
    pub fn validate(&self) -> Vec<(String, String)> {
        let mut problems = Vec::new();

        if self.target_refs.is_empty() && self.target_selectors.is_empty() {
            problems.push((
                "spec.targetRefs".to_string(),
                "at least one targetRef or targetSelector is required".to_string(),
            ));
        }

        if !self.targets_only_routes() {
            if !self.hash_policies.is_empty() {
                problems.push((
                    "spec.hashPolicies".to_string(),
                    "hashPolicies can only target HTTPRoute".to_string(),
                ));
            }
            if self.auto_host_rewrite.is_some() {
                problems.push((
                    "spec.autoHostRewrite".to_string(),
                    "autoHostRewrite can only target HTTPRoute".to_string(),
                ));
            }
        }

        for (i, hash) in self.hash_policies.iter().enumerate() {
            if hash.inputs() != 1 {
                problems.push((
                    format!("spec.hashPolicies[{i}]"),
                    "exactly one of header, cookie or sourceIP must be set".to_string(),
                ));
            }
        }

        if let Some(jwt) = &self.jwt {
            if jwt.providers.is_empty() {
                problems.push((
                    "spec.jwt.providers".to_string(),
                    "at least one provider is required".to_string(),
                ));
            }
            for (name, provider) in &jwt.providers {
                if let Err(msg) = provider.jwks.validate() {
                    problems.push((format!("spec.jwt.providers[{name}].jwks"), msg));
                }
            }
        }

        if let Some(authz) = &self.jwt_authorization {
            if authz.rules.is_empty() {
                problems.push((
                    "spec.jwtAuthorization.rules".to_string(),
                    "at least one rule is required".to_string(),
                ));
            }
            if let Some(jwt) = &self.jwt {
                for provider in &authz.providers {
                    if !jwt.providers.contains_key(provider) {
                        problems.push((
                            "spec.jwtAuthorization.providers".to_string(),
                            format!("provider {provider} is not defined in spec.jwt"),
                        ));
                    }
                }
            }
        }

        problems
    }
}

impl JwksSource {
    /// Exactly one of local/remote, and for local exactly one source
    pub fn validate(&self) -> Result<(), String> {
        match (&self.local, &self.remote) {
            (Some(local), None) => {
                let set = usize::from(local.inline.is_some())
                    + usize::from(local.file.is_some())
                    + usize::from(local.secret_ref.is_some());
                if set != 1 {
                    return Err("exactly one of inline, file or secretRef is required".to_string());
                }
                Ok(())
            }
            (None, Some(remote)) => {
                if remote.url.is_empty() {
                    return Err("remote.url is required".to_string());
                }
                Ok(())
            }
            _ => Err("exactly one of local or remote is required".to_string()),
        }
    }
}
