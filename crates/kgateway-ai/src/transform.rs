//! Request transformation for AI backends
//!
//! Clients send OpenAI-shaped chat requests. The template built here rewrites
//! the path, auth header and model per provider. Values that differ between
//! endpoints (token, model, API version, project, ...) are read from host
//! metadata at request time, so a multipool shares one template.

use kgateway_common::crd::{Backend, SupportedLLMProvider};
use kgateway_common::envoy::{ParseBodyBehavior, TransformationTemplate};
use kgateway_common::{Error, ObjectSource, Result};

/// Context label used for unexpected-shape errors
const CONTEXT: &str = "ai-transformation";

/// Request path pseudo-header
pub const PATH_HEADER: &str = ":path";

/// Per-request token: endpoint credential, else the one lifted from the request
const TOKEN: &str = concat!(
    r#"{% if host_metadata("auth_token") != "" %}{{ host_metadata("auth_token") }}"#,
    r#"{% else %}{{ dynamic_metadata("auth_token", "ai.kgateway.io") }}{% endif %}"#,
);

/// Model: endpoint override, else whatever the client sent
const MODEL: &str = concat!(
    r#"{% if host_metadata("model") != "" %}{{ host_metadata("model") }}"#,
    r#"{% else %}{{ model }}{% endif %}"#,
);

const IF_STREAMING: &str =
    r#"{% if dynamic_metadata("route_type", "ai.kgateway.io") == "CHAT_STREAMING" %}"#;

const OPENAI_PATH: &str = "/v1/chat/completions";
const ANTHROPIC_PATH: &str = "/v1/messages";

/// Build the request template for an AI backend.
///
/// A multipool uses its first entry; every entry has the same provider kind.
pub fn build_transformation(backend: &Backend) -> Result<TransformationTemplate> {
    let source = ObjectSource::of(backend);
    let ai = backend.spec.ai.as_ref().ok_or_else(|| {
        Error::unexpected_type(CONTEXT, format!("{source} has no ai configuration"))
    })?;
    let representative = ai.providers().into_iter().next().ok_or_else(|| {
        Error::backend_invalid(source.namespaced_name(), "backend has no providers")
    })?;

    Ok(provider_template(&representative.provider))
}

/// Template for one provider kind
pub fn provider_template(provider: &SupportedLLMProvider) -> TransformationTemplate {
    let template = TransformationTemplate {
        parse_body_behavior: ParseBodyBehavior::ParseAsJson,
        ..Default::default()
    };
    let bearer = format!("Bearer {TOKEN}");

    match provider {
        SupportedLLMProvider::OpenAI(_) | SupportedLLMProvider::Mistral(_) => template
            .with_header("Authorization", bearer)
            .with_header(PATH_HEADER, OPENAI_PATH)
            .with_json_key("model", MODEL),
        SupportedLLMProvider::Anthropic(c) => {
            let template = template
                .with_header("x-api-key", TOKEN)
                .with_header(PATH_HEADER, ANTHROPIC_PATH)
                .with_json_key("model", MODEL);
            if c.api_version.is_some() {
                template.with_header("anthropic-version", r#"{{ host_metadata("api_version") }}"#)
            } else {
                template
            }
        }
        SupportedLLMProvider::AzureOpenAI(_) => template
            .with_header("api-key", TOKEN)
            .with_header(
                PATH_HEADER,
                concat!(
                    r#"/openai/deployments/{{ host_metadata("model") }}/chat/completions"#,
                    r#"?api-version={{ host_metadata("api_version") }}"#,
                ),
            ),
        SupportedLLMProvider::Gemini(_) => template.with_header("key", TOKEN).with_header(
            PATH_HEADER,
            format!(
                concat!(
                    r#"/{{{{ host_metadata("api_version") }}}}/models/{{{{ host_metadata("model") }}}}"#,
                    "{if_streaming}:streamGenerateContent?key={token}&alt=sse",
                    "{{% else %}}:generateContent?key={token}{{% endif %}}",
                ),
                if_streaming = IF_STREAMING,
                token = TOKEN,
            ),
        ),
        SupportedLLMProvider::VertexAI(_) => template
            .with_header("Authorization", bearer)
            .with_header(
                PATH_HEADER,
                format!(
                    concat!(
                        r#"/{{{{ host_metadata("api_version") }}}}"#,
                        r#"/projects/{{{{ host_metadata("project") }}}}"#,
                        r#"/locations/{{{{ host_metadata("location") }}}}"#,
                        r#"/publishers/{{{{ host_metadata("publisher") }}}}/"#,
                        r#"{{% if host_metadata("model_path") != "" %}}{{{{ host_metadata("model_path") }}}}"#,
                        r#"{{% else %}}models/{{{{ host_metadata("model") }}}}{{% endif %}}"#,
                        "{if_streaming}:streamGenerateContent?alt=sse",
                        "{{% else %}}:generateContent{{% endif %}}",
                    ),
                    if_streaming = IF_STREAMING,
                ),
            ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgateway_common::crd::{
        AIBackend, AnthropicConfig, BackendSpec, GeminiConfig, LLMProvider, MultiPoolConfig,
        OpenAIConfig, Priority, Publisher, SingleAuthToken, VertexAIConfig,
    };

    fn backend(provider: SupportedLLMProvider) -> Backend {
        let mut b = Backend::new(
            "llm",
            BackendSpec {
                ai: Some(AIBackend {
                    llm: Some(LLMProvider {
                        provider,
                        host_override: None,
                    }),
                    multipool: None,
                }),
            },
        );
        b.metadata.namespace = Some("ai".into());
        b
    }

    #[test]
    fn openai_template() {
        let t = build_transformation(&backend(SupportedLLMProvider::OpenAI(OpenAIConfig {
            auth_token: SingleAuthToken::inline("sk-test"),
            model: Some("gpt-4o".into()),
        })))
        .unwrap();
        assert_eq!(t.header(PATH_HEADER), Some("/v1/chat/completions"));
        assert_eq!(t.header("Authorization"), Some(format!("Bearer {TOKEN}").as_str()));
        assert_eq!(t.merge_json_keys["model"].text, MODEL);
        assert_eq!(t.parse_body_behavior, ParseBodyBehavior::ParseAsJson);
    }

    #[test]
    fn token_expression_falls_back_to_dynamic_metadata() {
        assert_eq!(
            TOKEN,
            r#"{% if host_metadata("auth_token") != "" %}{{ host_metadata("auth_token") }}{% else %}{{ dynamic_metadata("auth_token", "ai.kgateway.io") }}{% endif %}"#
        );
    }

    #[test]
    fn anthropic_uses_x_api_key_and_optional_version() {
        let mut config = AnthropicConfig {
            auth_token: SingleAuthToken::secret_ref("k"),
            model: None,
            api_version: None,
        };
        let t = provider_template(&SupportedLLMProvider::Anthropic(config.clone()));
        assert_eq!(t.header("x-api-key"), Some(TOKEN));
        assert_eq!(t.header(PATH_HEADER), Some("/v1/messages"));
        assert_eq!(t.header("anthropic-version"), None);

        config.api_version = Some("2023-06-01".into());
        let t = provider_template(&SupportedLLMProvider::Anthropic(config));
        assert!(t.header("anthropic-version").is_some());
    }

    #[test]
    fn gemini_path_has_both_modes() {
        let t = provider_template(&SupportedLLMProvider::Gemini(GeminiConfig {
            auth_token: SingleAuthToken::inline("g"),
            model: "gemini-1.5".into(),
            api_version: "v1beta".into(),
        }));
        let path = t.header(PATH_HEADER).unwrap();
        assert!(path.starts_with(r#"/{{ host_metadata("api_version") }}/models/"#));
        assert!(path.contains(":streamGenerateContent?key="));
        assert!(path.contains("&alt=sse{% else %}:generateContent?key="));
        assert!(path.contains(r#"== "CHAT_STREAMING""#));
        assert_eq!(t.header("key"), Some(TOKEN));
        assert!(t.merge_json_keys.is_empty());
    }

    #[test]
    fn vertex_path_supports_model_path() {
        let t = provider_template(&SupportedLLMProvider::VertexAI(VertexAIConfig {
            auth_token: SingleAuthToken::passthrough(),
            model: "gemini".into(),
            api_version: "v1".into(),
            project_id: "p".into(),
            location: "l".into(),
            model_path: Some("custom/path".into()),
            publisher: Publisher::Google,
        }));
        let path = t.header(PATH_HEADER).unwrap();
        assert!(path.contains(r#"/publishers/{{ host_metadata("publisher") }}/"#));
        assert!(path.contains(r#"{{ host_metadata("model_path") }}"#));
        assert!(path.contains(":streamGenerateContent?alt=sse{% else %}:generateContent{% endif %}"));
    }

    #[test]
    fn multipool_uses_first_entry() {
        let entry = |token: &str| LLMProvider {
            provider: SupportedLLMProvider::OpenAI(OpenAIConfig {
                auth_token: SingleAuthToken::inline(token),
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
                        priorities: vec![
                            Priority {
                                pool: vec![entry("a")],
                            },
                            Priority {
                                pool: vec![entry("b")],
                            },
                        ],
                    }),
                }),
            },
        );
        let t = build_transformation(&b).unwrap();
        assert_eq!(t.header(PATH_HEADER), Some(OPENAI_PATH));
    }

    #[test]
    fn non_ai_backend_is_unexpected() {
        let b = Backend::new("plain", BackendSpec { ai: None });
        assert!(matches!(
            build_transformation(&b),
            Err(Error::BuilderUnexpectedType { .. })
        ));
    }
}
