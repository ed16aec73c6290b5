//! Dry-run rendering of transformation templates
//!
//! Evaluates a [`TransformationTemplate`] the way the proxy would for one
//! endpoint and one request, using minijinja with the two metadata
//! primitives registered as functions:
//! - `host_metadata(key)` reads the endpoint's `io.solo.transformation` bag
//! - `dynamic_metadata(key, namespace)` reads per-request metadata
//!
//! The parsed request body is the template context, so `{{ model }}`
//! resolves to the client's `model` field.

use std::collections::BTreeMap;
use std::sync::Arc;

use kgateway_common::envoy::{
    LbEndpoint, TransformationTemplate, AI_DYNAMIC_NAMESPACE, TRANSFORMATION_NAMESPACE,
};
use minijinja::Environment;
use serde_json::Value;
use thiserror::Error;

/// Per-request metadata keyed by namespace then key
pub type DynamicMetadata = BTreeMap<String, BTreeMap<String, String>>;

/// Template rendering failure
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A header or body template failed to render
    #[error("failed to render template for {target}: {message}")]
    Render {
        /// Header name or `body.<key>`
        target: String,
        /// Engine error
        message: String,
    },
}

/// Request as the upstream would see it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedRequest {
    /// Rendered headers, pseudo-headers included
    pub headers: BTreeMap<String, String>,
    /// Body after JSON key merges
    pub body: Value,
}

/// Renders transformation templates outside the proxy
pub struct TemplatePreview {
    env: Environment<'static>,
}

impl TemplatePreview {
    /// Prepare an environment bound to one endpoint and one request's metadata
    pub fn new(endpoint: &LbEndpoint, dynamic: &DynamicMetadata) -> Self {
        let host: Arc<BTreeMap<String, String>> = Arc::new(
            endpoint
                .metadata
                .filter_metadata
                .get(TRANSFORMATION_NAMESPACE)
                .cloned()
                .unwrap_or_default(),
        );
        let dynamic: Arc<DynamicMetadata> = Arc::new(dynamic.clone());

        let mut env = Environment::new();
        env.add_function("host_metadata", move |key: String| -> String {
            host.get(&key).cloned().unwrap_or_default()
        });
        env.add_function(
            "dynamic_metadata",
            move |key: String, namespace: Option<String>| -> String {
                let namespace = namespace.unwrap_or_else(|| AI_DYNAMIC_NAMESPACE.to_string());
                dynamic
                    .get(&namespace)
                    .and_then(|values| values.get(&key))
                    .cloned()
                    .unwrap_or_default()
            },
        );
        Self { env }
    }

    /// Render every header and body key of `template` against `body`
    pub fn render(
        &self,
        template: &TransformationTemplate,
        body: &Value,
    ) -> Result<RenderedRequest, TemplateError> {
        let mut headers = BTreeMap::new();
        for (name, source) in &template.headers {
            headers.insert(name.clone(), self.render_one(name, &source.text, body)?);
        }

        let mut rendered_body = body.clone();
        for (key, source) in &template.merge_json_keys {
            let value = self.render_one(&format!("body.{key}"), &source.text, body)?;
            if let Value::Object(fields) = &mut rendered_body {
                fields.insert(key.clone(), Value::String(value));
            }
        }

        Ok(RenderedRequest {
            headers,
            body: rendered_body,
        })
    }

    fn render_one(&self, target: &str, source: &str, body: &Value) -> Result<String, TemplateError> {
        self.env
            .render_str(source, body)
            .map_err(|e| TemplateError::Render {
                target: target.to_string(),
                message: e.to_string(),
            })
    }
}
