//! Per-provider endpoint construction
//!
//! Each LLM provider becomes one upstream endpoint. The endpoint carries the
//! resolved credential and request parameters as host metadata so that one
//! transformation template can serve every endpoint of a pool.

use std::collections::BTreeMap;

use kgateway_common::crd::{LLMProvider, Publisher, SupportedLLMProvider};
use kgateway_common::envoy::{
    Address, Endpoint, LbEndpoint, Metadata, SocketAddress, UpstreamTlsContext,
    TRANSFORMATION_NAMESPACE, TRANSPORT_SOCKET_MATCH_NAMESPACE,
};
use kgateway_common::index::SecretIndex;
use kgateway_common::{ObjectSource, Result};
use tracing::warn;

use crate::secrets::resolve_token;

/// Port that triggers TLS origination
pub const TLS_PORT: u16 = 443;

/// Host metadata keys read by the transformation templates
pub mod keys {
    /// Resolved credential (empty for passthrough)
    pub const AUTH_TOKEN: &str = "auth_token";
    /// Model override
    pub const MODEL: &str = "model";
    /// API version
    pub const API_VERSION: &str = "api_version";
    /// Vertex AI region
    pub const LOCATION: &str = "location";
    /// Vertex AI project
    pub const PROJECT: &str = "project";
    /// Vertex AI publisher
    pub const PUBLISHER: &str = "publisher";
    /// Vertex AI custom model path
    pub const MODEL_PATH: &str = "model_path";
}

const OPENAI_HOST: &str = "api.openai.com";
const ANTHROPIC_HOST: &str = "api.anthropic.com";
const MISTRAL_HOST: &str = "api.mistral.ai";
const GEMINI_HOST: &str = "generativelanguage.googleapis.com";
const DEFAULT_PUBLISHER: &str = "google";

/// An endpoint plus the TLS identity it needs, if any
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderEndpoint {
    /// The upstream endpoint
    pub endpoint: LbEndpoint,
    /// TLS settings for port 443 endpoints
    pub tls: Option<UpstreamTlsContext>,
}

/// Default `(host, port)` for a provider
pub fn default_address(provider: &SupportedLLMProvider) -> (String, u16) {
    let host = match provider {
        SupportedLLMProvider::OpenAI(_) => OPENAI_HOST.to_string(),
        SupportedLLMProvider::Anthropic(_) => ANTHROPIC_HOST.to_string(),
        SupportedLLMProvider::Mistral(_) => MISTRAL_HOST.to_string(),
        SupportedLLMProvider::Gemini(_) => GEMINI_HOST.to_string(),
        SupportedLLMProvider::AzureOpenAI(c) => c.endpoint.clone(),
        SupportedLLMProvider::VertexAI(c) => format!("{}-aiplatform.googleapis.com", c.location),
    };
    (host, TLS_PORT)
}

/// Build the endpoint for one provider entry
pub fn build_endpoint(
    llm: &LLMProvider,
    owner: &ObjectSource,
    secrets: &dyn SecretIndex,
) -> Result<ProviderEndpoint> {
    let provider = &llm.provider;
    let token = resolve_token(provider.auth_token(), owner, secrets)?;

    let (mut host, mut port) = default_address(provider);
    if let Some(over) = &llm.host_override {
        if !over.host.is_empty() {
            host = over.host.clone();
        }
        if over.port != 0 {
            port = over.port;
        }
    }

    let mut values = BTreeMap::from([(keys::AUTH_TOKEN.to_string(), token)]);
    let mut set = |key: &str, value: &str| {
        if !value.is_empty() {
            values.insert(key.to_string(), value.to_string());
        }
    };
    match provider {
        SupportedLLMProvider::OpenAI(c) => set(keys::MODEL, c.model.as_deref().unwrap_or("")),
        SupportedLLMProvider::Mistral(c) => set(keys::MODEL, c.model.as_deref().unwrap_or("")),
        SupportedLLMProvider::Anthropic(c) => {
            set(keys::MODEL, c.model.as_deref().unwrap_or(""));
            set(keys::API_VERSION, c.api_version.as_deref().unwrap_or(""));
        }
        SupportedLLMProvider::AzureOpenAI(c) => {
            set(keys::MODEL, &c.deployment_name);
            set(keys::API_VERSION, &c.api_version);
        }
        SupportedLLMProvider::Gemini(c) => {
            set(keys::MODEL, &c.model);
            set(keys::API_VERSION, &c.api_version);
        }
        SupportedLLMProvider::VertexAI(c) => {
            set(keys::MODEL, &c.model);
            set(keys::API_VERSION, &c.api_version);
            set(keys::LOCATION, &c.location);
            set(keys::PROJECT, &c.project_id);
            set(keys::PUBLISHER, publisher_segment(c.publisher, owner));
            set(keys::MODEL_PATH, c.model_path.as_deref().unwrap_or(""));
        }
    }

    let mut metadata = Metadata::default();
    metadata
        .filter_metadata
        .insert(TRANSFORMATION_NAMESPACE.to_string(), values);

    let tls = (port == TLS_PORT).then(|| {
        metadata.filter_metadata.insert(
            TRANSPORT_SOCKET_MATCH_NAMESPACE.to_string(),
            BTreeMap::from([("tls".to_string(), host.clone())]),
        );
        UpstreamTlsContext {
            sni: host.clone(),
            auto_host_sni: true,
        }
    });

    Ok(ProviderEndpoint {
        endpoint: LbEndpoint {
            endpoint: Endpoint {
                address: Address {
                    socket_address: SocketAddress {
                        address: host.clone(),
                        port_value: u32::from(port),
                    },
                },
                hostname: host,
            },
            metadata,
        },
        tls,
    })
}

fn publisher_segment(publisher: Publisher, owner: &ObjectSource) -> &'static str {
    publisher.path_segment().unwrap_or_else(|| {
        warn!(
            backend = %owner.namespaced_name(),
            default = DEFAULT_PUBLISHER,
            "unrecognized Vertex AI publisher, using default"
        );
        DEFAULT_PUBLISHER
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgateway_common::crd::{
        AzureOpenAIConfig, HostOverride, OpenAIConfig, SingleAuthToken, VertexAIConfig,
    };
    use kgateway_common::index::MemoryIndex;

    fn owner() -> ObjectSource {
        ObjectSource::new("gateway.kgateway.dev", "Backend", "ai", "llm")
    }

    fn openai(model: Option<&str>) -> LLMProvider {
        LLMProvider {
            provider: SupportedLLMProvider::OpenAI(OpenAIConfig {
                auth_token: SingleAuthToken::inline("sk-test"),
                model: model.map(String::from),
            }),
            host_override: None,
        }
    }

    fn vertex(publisher: Publisher) -> LLMProvider {
        LLMProvider {
            provider: SupportedLLMProvider::VertexAI(VertexAIConfig {
                auth_token: SingleAuthToken::passthrough(),
                model: "gemini-1.5-pro".into(),
                api_version: "v1".into(),
                project_id: "proj".into(),
                location: "us-central1".into(),
                model_path: None,
                publisher,
            }),
            host_override: None,
        }
    }

    #[test]
    fn openai_defaults_with_tls() {
        let ep = build_endpoint(&openai(Some("gpt-4o")), &owner(), &MemoryIndex::new()).unwrap();
        let addr = &ep.endpoint.endpoint.address.socket_address;
        assert_eq!(addr.address, "api.openai.com");
        assert_eq!(addr.port_value, 443);
        assert_eq!(ep.tls.as_ref().unwrap().sni, "api.openai.com");
        assert!(ep.tls.as_ref().unwrap().auto_host_sni);
        assert_eq!(
            ep.endpoint.metadata_value(TRANSFORMATION_NAMESPACE, keys::AUTH_TOKEN),
            Some("sk-test")
        );
        assert_eq!(
            ep.endpoint.metadata_value(TRANSFORMATION_NAMESPACE, keys::MODEL),
            Some("gpt-4o")
        );
        assert_eq!(
            ep.endpoint.metadata_value(TRANSPORT_SOCKET_MATCH_NAMESPACE, "tls"),
            Some("api.openai.com")
        );
    }

    #[test]
    fn empty_model_is_not_recorded() {
        let ep = build_endpoint(&openai(None), &owner(), &MemoryIndex::new()).unwrap();
        assert_eq!(
            ep.endpoint.metadata_value(TRANSFORMATION_NAMESPACE, keys::MODEL),
            None
        );
    }

    #[test]
    fn host_override_to_plaintext_port_drops_tls() {
        let mut llm = openai(None);
        llm.host_override = Some(HostOverride {
            host: "llm-proxy.internal".into(),
            port: 8080,
        });
        let ep = build_endpoint(&llm, &owner(), &MemoryIndex::new()).unwrap();
        let addr = &ep.endpoint.endpoint.address.socket_address;
        assert_eq!(addr.address, "llm-proxy.internal");
        assert_eq!(addr.port_value, 8080);
        assert!(ep.tls.is_none());
        assert!(!ep
            .endpoint
            .metadata
            .filter_metadata
            .contains_key(TRANSPORT_SOCKET_MATCH_NAMESPACE));
    }

    #[test]
    fn host_override_keeps_default_port_when_zero() {
        let mut llm = openai(None);
        llm.host_override = Some(HostOverride {
            host: "eu.api.openai.com".into(),
            port: 0,
        });
        let ep = build_endpoint(&llm, &owner(), &MemoryIndex::new()).unwrap();
        assert_eq!(ep.tls.unwrap().sni, "eu.api.openai.com");
    }

    #[test]
    fn azure_uses_configured_endpoint() {
        let llm = LLMProvider {
            provider: SupportedLLMProvider::AzureOpenAI(AzureOpenAIConfig {
                auth_token: SingleAuthToken::inline("az"),
                endpoint: "x.openai.azure.com".into(),
                deployment_name: "gpt".into(),
                api_version: "2024-02-15".into(),
            }),
            host_override: None,
        };
        let ep = build_endpoint(&llm, &owner(), &MemoryIndex::new()).unwrap();
        assert_eq!(ep.endpoint.endpoint.address.socket_address.address, "x.openai.azure.com");
        assert_eq!(
            ep.endpoint.metadata_value(TRANSFORMATION_NAMESPACE, keys::API_VERSION),
            Some("2024-02-15")
        );
        assert_eq!(
            ep.endpoint.metadata_value(TRANSFORMATION_NAMESPACE, keys::MODEL),
            Some("gpt")
        );
    }

    #[test]
    fn vertex_metadata_and_host() {
        let ep = build_endpoint(&vertex(Publisher::Anthropic), &owner(), &MemoryIndex::new())
            .unwrap();
        assert_eq!(
            ep.endpoint.endpoint.address.socket_address.address,
            "us-central1-aiplatform.googleapis.com"
        );
        let md = |k: &str| ep.endpoint.metadata_value(TRANSFORMATION_NAMESPACE, k);
        assert_eq!(md(keys::AUTH_TOKEN), Some(""));
        assert_eq!(md(keys::PROJECT), Some("proj"));
        assert_eq!(md(keys::LOCATION), Some("us-central1"));
        assert_eq!(md(keys::PUBLISHER), Some("anthropic"));
        assert_eq!(md(keys::API_VERSION), Some("v1"));
    }

    #[test]
    fn unknown_publisher_defaults_to_google() {
        let ep =
            build_endpoint(&vertex(Publisher::Unknown), &owner(), &MemoryIndex::new()).unwrap();
        assert_eq!(
            ep.endpoint.metadata_value(TRANSFORMATION_NAMESPACE, keys::PUBLISHER),
            Some("google")
        );
    }
}
