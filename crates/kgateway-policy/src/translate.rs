//! TrafficPolicy to IR translation
//!
//! Each sub-policy translates on its own; every failure is collected so a
//! policy's status lists all of its problems at once.

use std::sync::Arc;
use std::time::Duration;

use kgateway_common::crd::{
    parse_duration, ExtAuthPolicy, ExtProcPolicy, ExtensionType, LocalRateLimitPolicy,
    RateLimitPolicy, TrafficPolicy,
};
use kgateway_common::index::SecretIndex;
use kgateway_common::{Error, ObjectSource, Result};
use tracing::debug;

use crate::extension::ExtensionResolver;
use crate::ir::{
    parse_byte_size, BufferIr, CorsIr, CsrfIr, ExtAuthIr, ExtProcIr, GlobalRateLimitIr,
    HashPolicyIr, LocalRateLimitIr, TrafficPolicyIr, TransformationIr,
};
use crate::jwt::{translate_authorization, translate_jwt};

/// Translates TrafficPolicies against the current indexes
#[derive(Clone)]
pub struct PolicyTranslator {
    resolver: ExtensionResolver,
    secrets: Arc<dyn SecretIndex>,
    default_jwks_ttl: Duration,
}

impl PolicyTranslator {
    /// Create a translator; `default_jwks_ttl` applies to remote JWKS
    /// without a cache duration
    pub fn new(
        resolver: ExtensionResolver,
        secrets: Arc<dyn SecretIndex>,
        default_jwks_ttl: Duration,
    ) -> Self {
        Self {
            resolver,
            secrets,
            default_jwks_ttl,
        }
    }

    /// Translate a policy, returning every problem found
    pub fn translate(&self, policy: &TrafficPolicy) -> Result<TrafficPolicyIr> {
        let source = ObjectSource::of(policy);
        let name = source.namespaced_name();
        let spec = &policy.spec;

        let mut errors: Vec<Error> = spec
            .validate()
            .into_iter()
            .map(|(field, msg)| Error::policy_invalid_field(name.as_str(), field, msg))
            .collect();
        let mut ir = TrafficPolicyIr::default();

        if let Some(p) = &spec.ext_auth {
            ir.ext_auth = collect(self.ext_auth(&source, p), &mut errors);
        }
        if let Some(p) = &spec.ext_proc {
            ir.ext_proc = collect(self.ext_proc(&source, p), &mut errors);
        }
        if let Some(rate_limit) = &spec.rate_limit {
            if let Some(p) = &rate_limit.local {
                ir.local_rate_limit = collect(local_rate_limit(&source, p), &mut errors);
            }
            if let Some(p) = &rate_limit.global {
                ir.global_rate_limit = collect(self.global_rate_limit(&source, p), &mut errors);
            }
        }
        ir.cors = spec.cors.clone().map(|policy| CorsIr { policy });
        ir.csrf = spec.csrf.as_ref().map(CsrfIr::from);
        if let Some(t) = &spec.transformation {
            ir.transformation = TransformationIr {
                request: t.request.clone(),
                response: t.response.clone(),
            };
        }
        if !spec.hash_policies.is_empty() {
            ir.hash_policies = Some(HashPolicyIr {
                policies: spec.hash_policies.clone(),
            });
        }
        ir.auto_host_rewrite = spec.auto_host_rewrite;
        if let Some(buffer) = &spec.buffer {
            ir.buffer = collect(buffer_ir(&source, &buffer.max_request_size), &mut errors);
        }
        if let Some(jwt) = &spec.jwt {
            ir.jwt = collect(
                translate_jwt(&source, jwt, self.secrets.as_ref(), self.default_jwks_ttl),
                &mut errors,
            );
        }
        if let Some(authz) = &spec.jwt_authorization {
            ir.jwt_authorization = collect(
                translate_authorization(&source, authz, spec.jwt.as_ref()),
                &mut errors,
            );
        }

        errors.extend(
            ir.validate()
                .into_iter()
                .map(|(field, msg)| Error::policy_invalid_field(name.as_str(), field, msg)),
        );

        Error::join(errors)?;
        debug!(policy = %name, "Translated TrafficPolicy");
        Ok(ir)
    }

    fn ext_auth(&self, source: &ObjectSource, p: &ExtAuthPolicy) -> Result<ExtAuthIr> {
        let extension = match &p.extension_ref {
            Some(r) => Some(
                self.resolver
                    .resolve_extension(source, r, ExtensionType::ExtAuth)?,
            ),
            None => None,
        };
        Ok(ExtAuthIr {
            extension,
            disabled: p.disable,
            max_request_bytes: p.max_request_bytes,
            context_extensions: p.context_extensions.clone(),
        })
    }

    fn ext_proc(&self, source: &ObjectSource, p: &ExtProcPolicy) -> Result<ExtProcIr> {
        let extension = match &p.extension_ref {
            Some(r) => Some(
                self.resolver
                    .resolve_extension(source, r, ExtensionType::ExtProc)?,
            ),
            None => None,
        };
        Ok(ExtProcIr {
            extension,
            disabled: p.disable,
        })
    }

    fn global_rate_limit(
        &self,
        source: &ObjectSource,
        p: &RateLimitPolicy,
    ) -> Result<GlobalRateLimitIr> {
        let extension =
            self.resolver
                .resolve_extension(source, &p.extension_ref, ExtensionType::RateLimit)?;
        Ok(GlobalRateLimitIr {
            domain: extension.domain.clone().unwrap_or_default(),
            extension,
            descriptors: p.descriptors.clone(),
        })
    }
}

fn local_rate_limit(source: &ObjectSource, p: &LocalRateLimitPolicy) -> Result<LocalRateLimitIr> {
    let bucket = &p.token_bucket;
    let fill_interval = parse_duration(&bucket.fill_interval).map_err(|msg| {
        Error::policy_invalid_field(
            source.namespaced_name(),
            "spec.rateLimit.local.tokenBucket.fillInterval",
            msg,
        )
    })?;
    Ok(LocalRateLimitIr {
        max_tokens: bucket.max_tokens,
        tokens_per_fill: bucket.tokens_per_fill.unwrap_or(1),
        fill_interval,
    })
}

fn buffer_ir(source: &ObjectSource, size: &str) -> Result<BufferIr> {
    let invalid = |msg: String| {
        Error::policy_invalid_field(source.namespaced_name(), "spec.buffer.maxRequestSize", msg)
    };
    let bytes = parse_byte_size(size).map_err(invalid)?;
    let max_request_bytes = u32::try_from(bytes)
        .map_err(|_| invalid(format!("{size} exceeds the 4GiB buffer limit")))?;
    Ok(BufferIr { max_request_bytes })
}

fn collect<T>(result: Result<T>, errors: &mut Vec<Error>) -> Option<T> {
    result.map_err(|e| errors.push(e)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::tests::{extension, resolver, service};
    use crate::extension::RefGrantMode;
    use kgateway_common::crd::{
        Buffer, LocalObjectReference, LocalPolicyTargetReference, RateLimit,
        RateLimitDescriptor, RateLimitDescriptorEntry, TokenBucket, GATEWAY_API_GROUP,
    };
    use kgateway_common::index::MemoryIndex;
    use kgateway_common::yaml::parse_resource;

    fn translator(index: &Arc<MemoryIndex>) -> PolicyTranslator {
        PolicyTranslator::new(
            resolver(index, RefGrantMode::Validate),
            index.clone(),
            Duration::from_secs(300),
        )
    }

    fn index() -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::new());
        index.upsert_service(service("apps", "authz", Some(8080)));
        index.upsert_service(service("apps", "ratelimit", Some(8081)));
        index.upsert_extension(extension("apps", "ext-auth", ExtensionType::ExtAuth, "authz"));
        index.upsert_extension(extension("apps", "rl", ExtensionType::RateLimit, "ratelimit"));
        index
    }

    fn route_policy(spec_yaml: &str) -> TrafficPolicy {
        let doc = format!(
            r#"
apiVersion: gateway.kgateway.dev/v1alpha1
kind: TrafficPolicy
metadata:
  name: p
  namespace: apps
spec:
  targetRefs:
    - group: gateway.networking.k8s.io
      kind: HTTPRoute
      name: r
{spec_yaml}"#
        );
        parse_resource(&doc).unwrap()
    }

    #[test]
    fn translates_from_yaml() {
        let policy = route_policy(
            r#"
  extAuth:
    extensionRef:
      name: ext-auth
    contextExtensions:
      tenant: a
  rateLimit:
    local:
      tokenBucket:
        maxTokens: 10
        fillInterval: 1s
  buffer:
    maxRequestSize: 64Ki
  autoHostRewrite: true
"#,
        );
        let ir = translator(&index()).translate(&policy).unwrap();

        let ext_auth = ir.ext_auth.unwrap();
        assert_eq!(ext_auth.extension.unwrap().backend.port, 9000);
        assert_eq!(ext_auth.context_extensions["tenant"], "a");
        assert_eq!(
            ir.local_rate_limit,
            Some(LocalRateLimitIr {
                max_tokens: 10,
                tokens_per_fill: 1,
                fill_interval: Duration::from_secs(1),
            })
        );
        assert_eq!(ir.buffer, Some(BufferIr { max_request_bytes: 65_536 }));
        assert_eq!(ir.auto_host_rewrite, Some(true));
    }

    #[test]
    fn global_rate_limit_takes_extension_domain() {
        let mut policy = route_policy("");
        policy.spec.rate_limit = Some(RateLimit {
            local: None,
            global: Some(RateLimitPolicy {
                extension_ref: LocalObjectReference { name: "rl".into() },
                descriptors: vec![RateLimitDescriptor {
                    entries: vec![RateLimitDescriptorEntry::RemoteAddress {}],
                }],
            }),
        });
        let ir = translator(&index()).translate(&policy).unwrap();
        assert_eq!(ir.global_rate_limit.unwrap().domain, "api");
    }

    #[test]
    fn all_errors_are_reported() {
        let mut policy = route_policy("");
        policy.spec.target_refs = vec![LocalPolicyTargetReference {
            group: GATEWAY_API_GROUP.into(),
            kind: "Gateway".into(),
            name: "gw".into(),
            section_name: None,
        }];
        policy.spec.auto_host_rewrite = Some(true);
        policy.spec.ext_proc = Some(ExtProcPolicy {
            extension_ref: Some(LocalObjectReference {
                name: "missing".into(),
            }),
            disable: false,
        });
        policy.spec.rate_limit = Some(RateLimit {
            local: Some(LocalRateLimitPolicy {
                token_bucket: TokenBucket {
                    max_tokens: 1,
                    tokens_per_fill: None,
                    fill_interval: "soon".into(),
                },
            }),
            global: None,
        });
        policy.spec.buffer = Some(Buffer {
            max_request_size: "8Gi".into(),
        });

        let err = translator(&index()).translate(&policy).unwrap_err();
        let reasons: Vec<_> = err.leaves().iter().map(|e| e.reason()).collect();
        assert_eq!(
            reasons,
            ["PolicyInvalid", "BackendNotFound", "PolicyInvalid", "PolicyInvalid"]
        );
    }

    #[test]
    fn wrong_extension_type() {
        let policy = route_policy(
            r#"
  extProc:
    extensionRef:
      name: ext-auth
"#,
        );
        let err = translator(&index()).translate(&policy).unwrap_err();
        assert!(err.to_string().contains("expected ExtProc"));
    }

    #[test]
    fn disabled_ext_auth_needs_no_extension() {
        let policy = route_policy(
            r#"
  extAuth:
    disable: true
"#,
        );
        let ir = translator(&index()).translate(&policy).unwrap();
        assert!(ir.ext_auth.unwrap().disabled);
    }
}
