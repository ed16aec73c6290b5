//! AI backend translation
//!
//! Turns a `Backend` with an `ai` spec into:
//! - a strict-DNS [`Cluster`] with one priority group per failover level,
//!   per-endpoint credentials in host metadata and TLS matches per host
//! - a [`TransformationTemplate`] rewriting OpenAI-shaped requests into the
//!   provider's native path, auth header and model

#![warn(missing_docs)]

pub mod cluster;
pub mod provider;
pub mod secrets;
pub mod template;
pub mod transform;

use kgateway_common::crd::Backend;
use kgateway_common::envoy::{Cluster, TransformationTemplate};
use kgateway_common::index::SecretIndex;
use kgateway_common::{Error, Result};

pub use cluster::{build_cluster, cluster_name};
pub use secrets::resolve_token;
pub use template::{DynamicMetadata, RenderedRequest, TemplateError, TemplatePreview};
pub use transform::build_transformation;

/// Everything the data plane needs for one AI backend
#[derive(Clone, Debug, PartialEq)]
pub struct AiBackendConfig {
    /// Upstream cluster
    pub cluster: Cluster,
    /// Request rewrite for routes targeting the backend
    pub transformation: TransformationTemplate,
}

/// Translate a backend into its cluster and request template.
///
/// Failures from both builders are reported together.
pub fn translate_backend(backend: &Backend, secrets: &dyn SecretIndex) -> Result<AiBackendConfig> {
    match (build_cluster(backend, secrets), build_transformation(backend)) {
        (Ok(cluster), Ok(transformation)) => Ok(AiBackendConfig {
            cluster,
            transformation,
        }),
        (cluster, transformation) => {
            let errors = [cluster.err(), transformation.err()]
                .into_iter()
                .flatten()
                .collect();
            Err(Error::join(errors).err().unwrap_or_else(|| {
                Error::unexpected_type("ai-backend", "translation failed without an error")
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgateway_common::crd::{
        AIBackend, BackendSpec, LLMProvider, MistralConfig, MultiPoolConfig, OpenAIConfig,
        Priority, SingleAuthToken, SupportedLLMProvider,
    };
    use kgateway_common::index::MemoryIndex;

    #[test]
    fn translate_single_mistral() {
        let mut b = Backend::new(
            "mistral",
            BackendSpec {
                ai: Some(AIBackend {
                    llm: Some(LLMProvider {
                        provider: SupportedLLMProvider::Mistral(MistralConfig {
                            auth_token: SingleAuthToken::inline("m"),
                            model: Some("mistral-large".into()),
                        }),
                        host_override: None,
                    }),
                    multipool: None,
                }),
            },
        );
        b.metadata.namespace = Some("default".into());
        let out = translate_backend(&b, &MemoryIndex::new()).unwrap();
        assert_eq!(out.cluster.name, "backend_default_mistral");
        assert_eq!(
            out.transformation.header(":path"),
            Some("/v1/chat/completions")
        );
        let ep = &out.cluster.load_assignment.as_ref().unwrap().endpoints[0].lb_endpoints[0];
        assert_eq!(ep.endpoint.address.socket_address.address, "api.mistral.ai");
    }

    #[test]
    fn translate_reports_cluster_failure() {
        let entry = |secret: &str| LLMProvider {
            provider: SupportedLLMProvider::OpenAI(OpenAIConfig {
                auth_token: SingleAuthToken::secret_ref(secret),
                model: None,
            }),
            host_override: None,
        };
        let b = Backend::new(
            "pool",
            BackendSpec {
                ai: Some(AIBackend {
                    llm: None,
                    multipool: Some(MultiPoolConfig {
                        priorities: vec![Priority {
                            pool: vec![entry("missing")],
                        }],
                    }),
                }),
            },
        );
        let err = translate_backend(&b, &MemoryIndex::new()).unwrap_err();
        assert_eq!(err.reason(), "SecretMissing");
    }
}
