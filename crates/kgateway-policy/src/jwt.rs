//! JWT validation and claim-based authorization
//!
//! Providers become [`JwtProviderIr`]s with their key material resolved.
//! Authorization rules become RBAC principals matching the verified token
//! payload that the JWT filter stores under [`JWT_AUTHN_FILTER`] metadata,
//! keyed by provider name.

use std::collections::BTreeMap;
use std::time::Duration;

use kgateway_common::crd::{
    parse_duration, JwksSource as JwksSourceSpec, JwtAuthorization, JwtAuthorizationAction,
    JwtClaimMatcher, JwtClaimToHeader, JwtHeaderSource, JwtProvider, JwtValidation, RemoteJwks,
    TrafficPolicy,
};
use kgateway_common::index::{read_secret_keys, SecretIndex};
use kgateway_common::{Error, ObjectSource, Result};
use kgateway_jwks::{JwkSet, JwksSource};
use serde::Serialize;
use tracing::warn;

/// Filter whose dynamic metadata carries verified token payloads
pub const JWT_AUTHN_FILTER: &str = "envoy.filters.http.jwt_authn";

/// Secret data key holding a JWKS document
pub const JWKS_SECRET_KEY: &str = "jwks";

/// Where a provider's keys come from
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JwksIr {
    /// Keys embedded in the policy or read from a secret
    Inline(JwkSet),
    /// Keys read by the proxy from a local file
    File(String),
    /// Keys fetched from a URL and cached for `ttl`
    Remote {
        /// JWKS URL
        url: String,
        /// Cache duration
        ttl: Duration,
    },
}

/// One JWT provider with resolved key material
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtProviderIr {
    /// Required `iss`
    pub issuer: Option<String>,
    /// Accepted `aud` values
    pub audiences: Vec<String>,
    /// Headers to read the token from; empty means `Authorization: Bearer`
    pub from_headers: Vec<JwtHeaderSource>,
    /// Query parameters to read the token from
    pub from_params: Vec<String>,
    /// Claims copied to request headers
    pub claims_to_headers: Vec<JwtClaimToHeader>,
    /// Keep the token on the upstream request
    pub forward: bool,
    /// Metadata key the verified payload is stored under
    pub payload_in_metadata: String,
    /// Key material
    pub jwks: JwksIr,
}

/// JWT validation for a policy
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct JwtIr {
    /// Providers by name
    pub providers: BTreeMap<String, JwtProviderIr>,
}

impl JwtIr {
    /// Structural checks on translated providers
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.providers.is_empty() {
            return Err("at least one provider is required".to_string());
        }
        for (name, provider) in &self.providers {
            if let JwksIr::Remote { url, ttl } = &provider.jwks {
                if url.is_empty() {
                    return Err(format!("provider {name} has an empty JWKS url"));
                }
                if ttl.is_zero() {
                    return Err(format!("provider {name} has a zero JWKS cache duration"));
                }
            }
            if provider.from_headers.iter().any(|h| h.header.is_empty()) {
                return Err(format!("provider {name} has an empty token header"));
            }
        }
        Ok(())
    }
}

/// What a claim value is compared with
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueMatcher {
    /// String equality
    StringExact(String),
    /// Boolean equality
    Bool(bool),
    /// List membership
    ListContains(String),
}

/// Match on a value in a filter's dynamic metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataMatcher {
    /// Filter namespace
    pub filter: String,
    /// Path into the filter's metadata
    pub path: Vec<String>,
    /// Expected value
    pub value: ValueMatcher,
}

/// Every matcher must hold
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RbacPrincipal {
    /// Provider whose payload is matched
    pub provider: String,
    /// Claim matchers
    pub and_ids: Vec<MetadataMatcher>,
}

/// Allow or deny
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RbacAction {
    /// Only matching requests pass
    Allow,
    /// Matching requests are rejected
    Deny,
}

/// Claim-based authorization; any principal matching triggers the action
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RbacIr {
    /// Action on match
    pub action: RbacAction,
    /// Principals, OR'ed
    pub principals: Vec<RbacPrincipal>,
}

impl RbacIr {
    /// Structural checks
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.principals.is_empty() {
            return Err("at least one principal is required".to_string());
        }
        if self.principals.iter().any(|p| p.and_ids.is_empty()) {
            return Err("every rule needs at least one claim".to_string());
        }
        Ok(())
    }
}

/// Translate JWT providers, reporting every provider that fails
pub fn translate_jwt(
    policy: &ObjectSource,
    jwt: &JwtValidation,
    secrets: &dyn SecretIndex,
    default_ttl: Duration,
) -> Result<JwtIr> {
    let mut ir = JwtIr::default();
    let mut errors = Vec::new();

    for (name, provider) in &jwt.providers {
        match translate_provider(policy, name, provider, secrets, default_ttl) {
            Ok(p) => {
                ir.providers.insert(name.clone(), p);
            }
            Err(e) => errors.push(e),
        }
    }

    Error::join(errors)?;
    Ok(ir)
}

fn translate_provider(
    policy: &ObjectSource,
    name: &str,
    provider: &JwtProvider,
    secrets: &dyn SecretIndex,
    default_ttl: Duration,
) -> Result<JwtProviderIr> {
    let (from_headers, from_params) = provider
        .token_source
        .as_ref()
        .map(|s| (s.headers.clone(), s.query_params.clone()))
        .unwrap_or_default();

    Ok(JwtProviderIr {
        issuer: provider.issuer.clone(),
        audiences: provider.audiences.clone(),
        from_headers,
        from_params,
        claims_to_headers: provider.claims_to_headers.clone(),
        forward: provider.keep_token,
        payload_in_metadata: name.to_string(),
        jwks: translate_jwks(policy, name, &provider.jwks, secrets, default_ttl)?,
    })
}

fn translate_jwks(
    policy: &ObjectSource,
    provider: &str,
    jwks: &JwksSourceSpec,
    secrets: &dyn SecretIndex,
    default_ttl: Duration,
) -> Result<JwksIr> {
    let field = format!("spec.jwt.providers[{provider}].jwks");
    let invalid = |msg: String| Error::policy_invalid_field(policy.namespaced_name(), &field, msg);
    jwks.validate().map_err(invalid)?;

    if let Some(remote) = &jwks.remote {
        let ttl = remote_ttl(remote, default_ttl).map_err(invalid)?;
        return Ok(JwksIr::Remote {
            url: remote.url.clone(),
            ttl,
        });
    }

    let Some(local) = &jwks.local else {
        return Err(invalid("exactly one of local or remote is required".to_string()));
    };
    if let Some(inline) = &local.inline {
        let keys = JwkSet::from_json(inline).map_err(|e| invalid(e.to_string()))?;
        return Ok(JwksIr::Inline(keys));
    }
    if let Some(file) = &local.file {
        return Ok(JwksIr::File(file.clone()));
    }
    if let Some(secret) = &local.secret_ref {
        let mut values = read_secret_keys(secrets, policy, &secret.name, &[JWKS_SECRET_KEY])?;
        let doc = values.remove(JWKS_SECRET_KEY).unwrap_or_default();
        let keys = JwkSet::from_json(&doc).map_err(|e| {
            Error::secret_malformed(
                policy.namespace.as_str(),
                secret.name.as_str(),
                JWKS_SECRET_KEY,
                e.to_string(),
            )
        })?;
        return Ok(JwksIr::Inline(keys));
    }
    Err(invalid(
        "exactly one of inline, file or secretRef is required".to_string(),
    ))
}

fn remote_ttl(remote: &RemoteJwks, default_ttl: Duration) -> std::result::Result<Duration, String> {
    let Some(raw) = &remote.cache_duration else {
        return Ok(default_ttl);
    };
    let ttl = parse_duration(raw)?;
    if ttl.is_zero() {
        return Err("cacheDuration must be positive".to_string());
    }
    Ok(ttl)
}

/// Translate claim rules into RBAC principals.
///
/// Each rule is tried against every allowed provider: the listed ones, or
/// every provider of the policy's JWT validation when none are listed.
pub fn translate_authorization(
    policy: &ObjectSource,
    authz: &JwtAuthorization,
    jwt: Option<&JwtValidation>,
) -> Result<RbacIr> {
    let invalid = |field: &str, msg: String| {
        Error::policy_invalid_field(policy.namespaced_name(), field, msg)
    };
    let jwt = jwt.ok_or_else(|| {
        invalid(
            "spec.jwtAuthorization",
            "jwtAuthorization requires spec.jwt".to_string(),
        )
    })?;

    let providers: Vec<&str> = if authz.providers.is_empty() {
        jwt.providers.keys().map(String::as_str).collect()
    } else {
        authz.providers.iter().map(String::as_str).collect()
    };
    let mut errors = Vec::new();
    for provider in &providers {
        if !jwt.providers.contains_key(*provider) {
            errors.push(invalid(
                "spec.jwtAuthorization.providers",
                format!("provider {provider} is not defined in spec.jwt"),
            ));
        }
    }

    let mut principals = Vec::new();
    for (i, rule) in authz.rules.iter().enumerate() {
        let mut claims = Vec::with_capacity(rule.claims.len());
        for (j, claim) in rule.claims.iter().enumerate() {
            let value = match claim.matcher {
                JwtClaimMatcher::Exact => ValueMatcher::StringExact(claim.value.clone()),
                JwtClaimMatcher::Contains => ValueMatcher::ListContains(claim.value.clone()),
                JwtClaimMatcher::Boolean => match claim.value.as_str() {
                    "true" => ValueMatcher::Bool(true),
                    "false" => ValueMatcher::Bool(false),
                    other => {
                        errors.push(invalid(
                            &format!("spec.jwtAuthorization.rules[{i}].claims[{j}].value"),
                            format!("{other} is not a boolean"),
                        ));
                        continue;
                    }
                },
            };
            claims.push((claim_path(&claim.name), value));
        }

        for provider in &providers {
            principals.push(RbacPrincipal {
                provider: provider.to_string(),
                and_ids: claims
                    .iter()
                    .map(|(path, value)| MetadataMatcher {
                        filter: JWT_AUTHN_FILTER.to_string(),
                        path: std::iter::once(provider.to_string())
                            .chain(path.iter().cloned())
                            .collect(),
                        value: value.clone(),
                    })
                    .collect(),
            });
        }
    }

    Error::join(errors)?;
    Ok(RbacIr {
        action: match authz.action {
            JwtAuthorizationAction::Allow => RbacAction::Allow,
            JwtAuthorizationAction::Deny => RbacAction::Deny,
        },
        principals,
    })
}

/// Nested claims are addressed with dots, e.g. `realm_access.roles`
fn claim_path(name: &str) -> Vec<String> {
    name.split('.').map(str::to_string).collect()
}

/// Remote JWKS URLs referenced by a set of policies.
///
/// Each URL appears once. A missing or unusable `cacheDuration` falls back
/// to `default_ttl`; a URL listed with several durations keeps the shortest.
pub fn jwks_sources<'a>(
    policies: impl IntoIterator<Item = &'a TrafficPolicy>,
    default_ttl: Duration,
) -> Vec<JwksSource> {
    let mut by_url: BTreeMap<String, Duration> = BTreeMap::new();

    for policy in policies {
        let Some(jwt) = &policy.spec.jwt else {
            continue;
        };
        for (name, provider) in &jwt.providers {
            let Some(remote) = &provider.jwks.remote else {
                continue;
            };
            if remote.url.is_empty() {
                continue;
            }
            let ttl = remote_ttl(remote, default_ttl).unwrap_or_else(|e| {
                warn!(
                    policy = %ObjectSource::of(policy),
                    provider = %name,
                    error = %e,
                    "Invalid JWKS cache duration, using default"
                );
                default_ttl
            });
            by_url
                .entry(remote.url.clone())
                .and_modify(|current| *current = (*current).min(ttl))
                .or_insert(ttl);
        }
    }

    by_url
        .into_iter()
        .map(|(url, ttl)| JwksSource::new(url, ttl))
        .collect()
}
