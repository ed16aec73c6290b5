//! AI backend to cluster translation
//!
//! A single LLM becomes one priority-0 endpoint. A multipool becomes one
//! priority group per declared priority, in order. Endpoints on port 443
//! get a transport socket match keyed by SNI, and every cluster ends with a
//! plaintext fallback.

use std::collections::{BTreeMap, BTreeSet};

use kgateway_common::crd::{AIBackend, Backend, LLMProvider, Priority};
use kgateway_common::envoy::{
    Cluster, ClusterLoadAssignment, DiscoveryType, DnsLookupFamily, LbEndpoint,
    LocalityLbEndpoints, TransportSocketMatch,
};
use kgateway_common::index::SecretIndex;
use kgateway_common::kube_utils::backend_cluster_name;
use kgateway_common::{Error, ObjectSource, Result};
use tracing::debug;

use crate::provider::{build_endpoint, ProviderEndpoint};

/// Context label used for unexpected-shape errors
const CONTEXT: &str = "ai-cluster";

/// Cluster name for a backend
pub fn cluster_name(source: &ObjectSource) -> String {
    backend_cluster_name(&source.namespace, &source.name)
}

/// Translate an AI backend into a strict-DNS cluster
pub fn build_cluster(backend: &Backend, secrets: &dyn SecretIndex) -> Result<Cluster> {
    let source = ObjectSource::of(backend);
    let ai = backend.spec.ai.as_ref().ok_or_else(|| {
        Error::unexpected_type(CONTEXT, format!("{source} has no ai configuration"))
    })?;

    let groups = match (&ai.llm, &ai.multipool) {
        (Some(llm), None) => vec![vec![build_endpoint(llm, &source, secrets)?]],
        (None, Some(pool)) => build_pool(ai, &pool.priorities, &source, secrets)?,
        _ => {
            return Err(Error::backend_invalid(
                source.namespaced_name(),
                "exactly one of llm or multipool must be set",
            ))
        }
    };

    let name = cluster_name(&source);
    let mut tls_matches: BTreeMap<String, TransportSocketMatch> = BTreeMap::new();
    let mut endpoints = Vec::with_capacity(groups.len());
    for (priority, group) in groups.into_iter().enumerate() {
        let mut lb_endpoints: Vec<LbEndpoint> = Vec::with_capacity(group.len());
        for ProviderEndpoint { endpoint, tls } in group {
            if let Some(tls) = tls {
                let m = TransportSocketMatch::tls(tls);
                tls_matches.entry(m.name.clone()).or_insert(m);
            }
            lb_endpoints.push(endpoint);
        }
        endpoints.push(LocalityLbEndpoints {
            priority: u32::try_from(priority).map_err(|_| {
                Error::backend_invalid(source.namespaced_name(), "too many priorities")
            })?,
            lb_endpoints,
        });
    }

    let mut transport_socket_matches: Vec<TransportSocketMatch> =
        tls_matches.into_values().collect();
    transport_socket_matches.push(TransportSocketMatch::plaintext());

    debug!(
        backend = %source.namespaced_name(),
        cluster = %name,
        priorities = endpoints.len(),
        tls_hosts = transport_socket_matches.len() - 1,
        "built AI cluster"
    );

    Ok(Cluster {
        name: name.clone(),
        discovery_type: DiscoveryType::StrictDns,
        dns_lookup_family: DnsLookupFamily::V4Only,
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: name,
            endpoints,
        }),
        transport_socket_matches,
    })
}

fn build_pool(
    ai: &AIBackend,
    priorities: &[Priority],
    source: &ObjectSource,
    secrets: &dyn SecretIndex,
) -> Result<Vec<Vec<ProviderEndpoint>>> {
    if priorities.is_empty() {
        return Err(Error::backend_invalid(
            source.namespaced_name(),
            "multipool has no priorities",
        ));
    }

    let kinds: BTreeSet<_> = ai.providers().iter().map(|p| p.provider.kind()).collect();
    if kinds.len() > 1 {
        let names: Vec<String> = kinds.iter().map(ToString::to_string).collect();
        return Err(Error::backend_invalid(
            source.namespaced_name(),
            format!(
                "multipool providers must share one kind, found {}",
                names.join(", ")
            ),
        ));
    }

    let mut groups = Vec::with_capacity(priorities.len());
    let mut errors = Vec::new();
    for (index, priority) in priorities.iter().enumerate() {
        if priority.pool.is_empty() {
            errors.push(Error::backend_invalid(
                source.namespaced_name(),
                format!("multipool priority {index} has no providers"),
            ));
            continue;
        }
        let group: Vec<ProviderEndpoint> = priority
            .pool
            .iter()
            .filter_map(|llm: &LLMProvider| match build_endpoint(llm, source, secrets) {
                Ok(ep) => Some(ep),
                Err(e) => {
                    errors.push(e);
                    None
                }
            })
            .collect();
        groups.push(group);
    }
    Error::join(errors)?;
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kgateway_common::crd::{
        AnthropicConfig, BackendSpec, HostOverride, MultiPoolConfig, OpenAIConfig,
        SingleAuthToken, SupportedLLMProvider,
    };
    use kgateway_common::envoy::{
        TransportSocketConfig, PLAINTEXT_MATCH, TRANSFORMATION_NAMESPACE,
        TRANSPORT_SOCKET_MATCH_NAMESPACE,
    };
    use kgateway_common::index::MemoryIndex;
    use kube::api::ObjectMeta;

    fn backend(ai: AIBackend) -> Backend {
        let mut b = Backend::new("llm", BackendSpec { ai: Some(ai) });
        b.metadata.namespace = Some("ai".into());
        b
    }

    fn openai(token: &str, host: Option<&str>) -> LLMProvider {
        LLMProvider {
            provider: SupportedLLMProvider::OpenAI(OpenAIConfig {
                auth_token: SingleAuthToken::inline(token),
                model: Some("gpt-4o".into()),
            }),
            host_override: host.map(|h| HostOverride {
                host: h.into(),
                port: 0,
            }),
        }
    }

    fn anthropic(secret: &str) -> LLMProvider {
        LLMProvider {
            provider: SupportedLLMProvider::Anthropic(AnthropicConfig {
                auth_token: SingleAuthToken::secret_ref(secret),
                model: Some("claude-3".into()),
                api_version: None,
            }),
            host_override: None,
        }
    }

    fn single(llm: LLMProvider) -> AIBackend {
        AIBackend {
            llm: Some(llm),
            multipool: None,
        }
    }

    fn pool(priorities: Vec<Vec<LLMProvider>>) -> AIBackend {
        AIBackend {
            llm: None,
            multipool: Some(MultiPoolConfig {
                priorities: priorities
                    .into_iter()
                    .map(|pool| Priority { pool })
                    .collect(),
            }),
        }
    }

    fn secret(name: &str, value: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ai".into()),
                ..Default::default()
            },
            data: Some(
                [(
                    "Authorization".to_string(),
                    ByteString(value.as_bytes().to_vec()),
                )]
                .into(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn single_openai_inline_token() {
        let cluster = build_cluster(
            &backend(single(openai("sk-test", None))),
            &MemoryIndex::new(),
        )
        .unwrap();

        assert_eq!(cluster.name, "backend_ai_llm");
        assert_eq!(cluster.discovery_type, DiscoveryType::StrictDns);
        assert_eq!(cluster.dns_lookup_family, DnsLookupFamily::V4Only);

        let la = cluster.load_assignment.as_ref().unwrap();
        assert_eq!(la.cluster_name, cluster.name);
        assert_eq!(la.endpoints.len(), 1);
        assert_eq!(la.endpoints[0].priority, 0);
        assert_eq!(la.endpoints[0].lb_endpoints.len(), 1);

        let ep = &la.endpoints[0].lb_endpoints[0];
        assert_eq!(ep.endpoint.address.socket_address.address, "api.openai.com");
        assert_eq!(ep.endpoint.address.socket_address.port_value, 443);
        assert_eq!(
            ep.metadata.filter_metadata[TRANSFORMATION_NAMESPACE],
            BTreeMap::from([
                ("auth_token".to_string(), "sk-test".to_string()),
                ("model".to_string(), "gpt-4o".to_string()),
            ])
        );

        let names: Vec<_> = cluster
            .transport_socket_matches
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["tls_api.openai.com", "plaintext"]);
    }

    #[test]
    fn anthropic_secret_with_bearer_prefix() {
        let index = MemoryIndex::new();
        index.upsert_secret(secret("k", "Bearer abc"));
        let cluster = build_cluster(&backend(single(anthropic("k"))), &index).unwrap();
        let ep = &cluster.load_assignment.as_ref().unwrap().endpoints[0].lb_endpoints[0];
        assert_eq!(
            ep.metadata_value(TRANSFORMATION_NAMESPACE, "auth_token"),
            Some("abc")
        );
    }

    #[test]
    fn multipool_priorities_in_declaration_order() {
        let ai = pool(vec![
            vec![
                openai("a", Some("b.example.com")),
                openai("b", Some("a.example.com")),
            ],
            vec![openai("c", None)],
            vec![openai("d", Some("a.example.com"))],
        ]);
        let cluster = build_cluster(&backend(ai), &MemoryIndex::new()).unwrap();
        let la = cluster.load_assignment.as_ref().unwrap();

        let priorities: Vec<u32> = la.endpoints.iter().map(|g| g.priority).collect();
        assert_eq!(priorities, vec![0, 1, 2]);
        assert_eq!(la.endpoints[0].lb_endpoints.len(), 2);
        assert_eq!(
            la.endpoints[0].lb_endpoints[1].metadata_value(TRANSFORMATION_NAMESPACE, "auth_token"),
            Some("b")
        );

        // One match per distinct TLS host, sorted, then plaintext
        let names: Vec<_> = cluster
            .transport_socket_matches
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "tls_a.example.com",
                "tls_api.openai.com",
                "tls_b.example.com",
                "plaintext"
            ]
        );

        for group in &la.endpoints {
            for ep in &group.lb_endpoints {
                let host = &ep.endpoint.address.socket_address.address;
                assert_eq!(
                    ep.metadata_value(TRANSPORT_SOCKET_MATCH_NAMESPACE, "tls"),
                    Some(host.as_str())
                );
                let m = cluster
                    .transport_socket_matches
                    .iter()
                    .filter(|m| m.name == format!("tls_{host}"))
                    .collect::<Vec<_>>();
                assert_eq!(m.len(), 1);
                match &m[0].transport_socket.typed_config {
                    TransportSocketConfig::UpstreamTls(tls) => assert_eq!(&tls.sni, host),
                    other => panic!("unexpected transport socket {other:?}"),
                }
            }
        }
    }

    #[test]
    fn multipool_mixed_variants_rejected() {
        let index = MemoryIndex::new();
        index.upsert_secret(secret("k", "abc"));
        let ai = pool(vec![vec![openai("a", None)], vec![anthropic("k")]]);
        let err = build_cluster(&backend(ai), &index).unwrap_err();
        assert!(matches!(err, Error::BackendInvalid { .. }), "{err}");
    }

    #[test]
    fn multipool_reports_every_missing_secret() {
        let ai = pool(vec![vec![anthropic("one")], vec![anthropic("two")]]);
        let err = build_cluster(&backend(ai), &MemoryIndex::new()).unwrap_err();
        let leaves = err.leaves();
        assert_eq!(leaves.len(), 2);
        assert!(leaves
            .iter()
            .all(|e| matches!(e, Error::SecretMissing { .. })));
    }

    #[test]
    fn plaintext_only_when_no_tls() {
        let mut llm = openai("a", Some("10.0.0.5"));
        llm.host_override.as_mut().unwrap().port = 8000;
        let cluster = build_cluster(&backend(single(llm)), &MemoryIndex::new()).unwrap();
        assert_eq!(cluster.transport_socket_matches.len(), 1);
        assert_eq!(cluster.transport_socket_matches[0].name, PLAINTEXT_MATCH);
    }

    #[test]
    fn non_ai_backend_is_unexpected() {
        let b = Backend::new("plain", BackendSpec { ai: None });
        let err = build_cluster(&b, &MemoryIndex::new()).unwrap_err();
        assert!(matches!(err, Error::BuilderUnexpectedType { .. }));
    }

    #[test]
    fn llm_and_multipool_together_rejected() {
        let mut ai = pool(vec![vec![openai("a", None)]]);
        ai.llm = Some(openai("b", None));
        let err = build_cluster(&backend(ai), &MemoryIndex::new()).unwrap_err();
        assert!(matches!(err, Error::BackendInvalid { .. }));
    }
}
