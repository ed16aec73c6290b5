//! Backend CRD for AI/LLM upstreams
//!
//! A Backend describes either a single LLM provider or a prioritized pool of
//! providers of the same kind. The AI translator turns it into one data-plane
//! cluster plus a request-rewrite template.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, LocalObjectReference};

/// Backend defines an upstream the gateway can route to.
///
/// Example:
/// ```yaml
/// apiVersion: gateway.kgateway.dev/v1alpha1
/// kind: Backend
/// metadata:
///   name: openai
///   namespace: ai
/// spec:
///   ai:
///     llm:
///       provider:
///         openai:
///           authToken:
///             kind: SecretRef
///             secretRef:
///               name: openai-secret
///           model: gpt-4o
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.kgateway.dev",
    version = "v1alpha1",
    kind = "Backend",
    namespaced,
    status = "BackendStatus",
    printcolumn = r#"{"name":"Accepted","type":"string","jsonPath":".status.conditions[?(@.type==\"Accepted\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    /// AI/LLM backend configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<AIBackend>,
}

/// AI backend: exactly one of `llm` or `multipool`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AIBackend {
    /// A single provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LLMProvider>,

    /// Prioritized pools of providers (index 0 is preferred)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipool: Option<MultiPoolConfig>,
}

/// One LLM provider plus an optional address override
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LLMProvider {
    /// Provider-specific configuration
    pub provider: SupportedLLMProvider,

    /// Replace the provider's default host and/or port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_override: Option<HostOverride>,
}

/// Host/port override; empty host or zero port keep the default
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostOverride {
    /// Hostname to connect to
    #[serde(default)]
    pub host: String,
    /// Port to connect to
    #[serde(default)]
    pub port: u16,
}

/// Ordered failover pools
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiPoolConfig {
    /// Priorities in failover order
    pub priorities: Vec<Priority>,
}

/// Providers sharing one failover priority
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Priority {
    /// Providers in this priority
    pub pool: Vec<LLMProvider>,
}

/// The supported providers; exactly one is set
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub enum SupportedLLMProvider {
    /// OpenAI
    #[serde(rename = "openai")]
    OpenAI(OpenAIConfig),
    /// Azure OpenAI
    #[serde(rename = "azureopenai")]
    AzureOpenAI(AzureOpenAIConfig),
    /// Anthropic
    #[serde(rename = "anthropic")]
    Anthropic(AnthropicConfig),
    /// Google Gemini
    #[serde(rename = "gemini")]
    Gemini(GeminiConfig),
    /// Google Vertex AI
    #[serde(rename = "vertexai")]
    VertexAI(VertexAIConfig),
    /// Mistral
    #[serde(rename = "mistral")]
    Mistral(MistralConfig),
}

/// Provider variant tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    /// OpenAI
    OpenAI,
    /// Azure OpenAI
    AzureOpenAI,
    /// Anthropic
    Anthropic,
    /// Google Gemini
    Gemini,
    /// Google Vertex AI
    VertexAI,
    /// Mistral
    Mistral,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OpenAI => "openai",
            Self::AzureOpenAI => "azureopenai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::VertexAI => "vertexai",
            Self::Mistral => "mistral",
        };
        f.write_str(name)
    }
}

impl SupportedLLMProvider {
    /// Variant tag
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::OpenAI(_) => ProviderKind::OpenAI,
            Self::AzureOpenAI(_) => ProviderKind::AzureOpenAI,
            Self::Anthropic(_) => ProviderKind::Anthropic,
            Self::Gemini(_) => ProviderKind::Gemini,
            Self::VertexAI(_) => ProviderKind::VertexAI,
            Self::Mistral(_) => ProviderKind::Mistral,
        }
    }

    /// The selected provider's own auth token
    pub fn auth_token(&self) -> &SingleAuthToken {
        match self {
            Self::OpenAI(c) => &c.auth_token,
            Self::AzureOpenAI(c) => &c.auth_token,
            Self::Anthropic(c) => &c.auth_token,
            Self::Gemini(c) => &c.auth_token,
            Self::VertexAI(c) => &c.auth_token,
            Self::Mistral(c) => &c.auth_token,
        }
    }

    fn validate(&self) -> Result<(), String> {
        self.auth_token()
            .source()
            .map_err(|e| format!("{}: {e}", self.kind()))?;
        match self {
            Self::AzureOpenAI(c) => {
                require("azureopenai.endpoint", &c.endpoint)?;
                require("azureopenai.deploymentName", &c.deployment_name)?;
                require("azureopenai.apiVersion", &c.api_version)
            }
            Self::Gemini(c) => {
                require("gemini.model", &c.model)?;
                require("gemini.apiVersion", &c.api_version)
            }
            Self::VertexAI(c) => {
                require("vertexai.model", &c.model)?;
                require("vertexai.apiVersion", &c.api_version)?;
                require("vertexai.projectId", &c.project_id)?;
                require("vertexai.location", &c.location)
            }
            Self::OpenAI(_) | Self::Anthropic(_) | Self::Mistral(_) => Ok(()),
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} is required"));
    }
    Ok(())
}

/// Auth token kinds
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AuthTokenKind {
    /// Token carried inline
    Inline,
    /// Token read from a secret in the backend's namespace
    SecretRef,
    /// Token supplied by the incoming request
    Passthrough,
}

/// Credential for a provider: a tag plus the matching field
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SingleAuthToken {
    /// Which of the fields below is meaningful
    pub kind: AuthTokenKind,

    /// Inline token (kind = Inline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,

    /// Secret holding the token under the `Authorization` key (kind = SecretRef)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
}

/// Validated form of [`SingleAuthToken`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthTokenSource<'a> {
    /// Token carried inline
    Inline(&'a str),
    /// Name of a secret in the backend's namespace
    SecretRef(&'a str),
    /// No token bound at translation time
    Passthrough,
}

impl SingleAuthToken {
    /// Inline token helper
    pub fn inline(token: impl Into<String>) -> Self {
        Self {
            kind: AuthTokenKind::Inline,
            inline: Some(token.into()),
            secret_ref: None,
        }
    }

    /// Secret reference helper
    pub fn secret_ref(name: impl Into<String>) -> Self {
        Self {
            kind: AuthTokenKind::SecretRef,
            inline: None,
            secret_ref: Some(LocalObjectReference { name: name.into() }),
        }
    }

    /// Passthrough helper
    pub fn passthrough() -> Self {
        Self {
            kind: AuthTokenKind::Passthrough,
            inline: None,
            secret_ref: None,
        }
    }

    /// Check that the tag agrees with the populated field and return the variant
    pub fn source(&self) -> Result<AuthTokenSource<'_>, String> {
        match (self.kind, &self.inline, &self.secret_ref) {
            (AuthTokenKind::Inline, Some(token), None) => Ok(AuthTokenSource::Inline(token)),
            (AuthTokenKind::SecretRef, None, Some(r)) if !r.name.is_empty() => {
                Ok(AuthTokenSource::SecretRef(&r.name))
            }
            (AuthTokenKind::Passthrough, None, None) => Ok(AuthTokenSource::Passthrough),
            (kind, _, _) => Err(format!(
                "authToken kind {kind:?} does not match the populated fields"
            )),
        }
    }
}

/// OpenAI configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenAIConfig {
    /// Credential
    pub auth_token: SingleAuthToken,
    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Mistral configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MistralConfig {
    /// Credential
    pub auth_token: SingleAuthToken,
    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Anthropic configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnthropicConfig {
    /// Credential
    pub auth_token: SingleAuthToken,
    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Value for the `anthropic-version` header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Azure OpenAI configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureOpenAIConfig {
    /// Credential
    pub auth_token: SingleAuthToken,
    /// Resource endpoint host (e.g. my-resource.openai.azure.com)
    pub endpoint: String,
    /// Deployment name, used as the model path segment
    pub deployment_name: String,
    /// `api-version` query parameter
    pub api_version: String,
}

/// Gemini configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeminiConfig {
    /// Credential
    pub auth_token: SingleAuthToken,
    /// Model name
    pub model: String,
    /// API version path segment (e.g. v1beta)
    pub api_version: String,
}

/// Vertex AI configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VertexAIConfig {
    /// Credential
    pub auth_token: SingleAuthToken,
    /// Model name
    pub model: String,
    /// API version path segment (e.g. v1)
    pub api_version: String,
    /// GCP project
    pub project_id: String,
    /// GCP region
    pub location: String,
    /// Custom model path replacing `models/<model>` in the request path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    /// Model publisher
    #[serde(default)]
    pub publisher: Publisher,
}

/// Vertex AI model publisher
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Publisher {
    /// Google first-party models
    #[default]
    Google,
    /// Anthropic models on Vertex
    Anthropic,
    /// Meta models on Vertex
    Meta,
    /// A value this version does not know
    #[serde(other)]
    Unknown,
}

impl Publisher {
    /// Path segment for a known publisher
    pub fn path_segment(&self) -> Option<&'static str> {
        match self {
            Self::Google => Some("google"),
            Self::Anthropic => Some("anthropic"),
            Self::Meta => Some("meta"),
            Self::Unknown => None,
        }
    }
}

/// Backend status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    /// Conditions (Accepted)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl AIBackend {
    /// All provider entries in declaration order
    pub fn providers(&self) -> Vec<&LLMProvider> {
        match (&self.llm, &self.multipool) {
            (Some(llm), _) => vec![llm],
            (None, Some(pool)) => pool
                .priorities
                .iter()
                .flat_map(|p| p.pool.iter())
                .collect(),
            (None, None) => vec![],
        }
    }

    /// Validate the exactly-one-of and same-variant rules
    pub fn validate(&self) -> Result<(), String> {
        match (&self.llm, &self.multipool) {
            (Some(_), Some(_)) => {
                return Err("exactly one of llm or multipool may be set".to_string())
            }
            (None, None) => return Err("one of llm or multipool is required".to_string()),
            (None, Some(pool)) => {
                if pool.priorities.is_empty() {
                    return Err("multipool requires at least one priority".to_string());
                }
                for (index, priority) in pool.priorities.iter().enumerate() {
                    if priority.pool.is_empty() {
                        return Err(format!("multipool priority {index} has no providers"));
                    }
                }
            }
            (Some(_), None) => {}
        }

        let providers = self.providers();
        if let Some(first) = providers.first() {
            let kind = first.provider.kind();
            if let Some(other) = providers.iter().find(|p| p.provider.kind() != kind) {
                return Err(format!(
                    "all multipool providers must be the same kind, found {kind} and {}",
                    other.provider.kind()
                ));
            }
        }

        for provider in providers {
            provider.provider.validate()?;
        }
        Ok(())
    }
}

impl BackendSpec {
    /// Admission-equivalent validation
    pub fn validate(&self) -> Result<(), String> {
        match &self.ai {
            Some(ai) => ai.validate(),
            None => Err("spec.ai is required".to_string()),
        }
    }
}
