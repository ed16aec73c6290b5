//! Request transformation template output
//!
//! Templates are Inja strings evaluated by the proxy's transformation
//! filter. Besides the usual body accessors, the filter exposes
//! `host_metadata("key")` and `dynamic_metadata("key", "namespace")`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An Inja template string
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InjaTemplate {
    /// Template source
    pub text: String,
}

impl InjaTemplate {
    /// Wrap template source
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// How the body is presented to templates
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseBodyBehavior {
    /// Parse as JSON so `{{ field }}` resolves body fields
    #[default]
    ParseAsJson,
    /// Do not parse the body
    DontParse,
}

/// A transformation template applied to a request
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationTemplate {
    /// Headers (including pseudo-headers such as `:path`) to set
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, InjaTemplate>,

    /// Top-level JSON body keys to overwrite
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub merge_json_keys: BTreeMap<String, InjaTemplate>,

    /// Body parsing mode
    #[serde(default)]
    pub parse_body_behavior: ParseBodyBehavior,
}

impl TransformationTemplate {
    /// Set a header template
    pub fn with_header(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.headers.insert(name.into(), InjaTemplate::new(text));
        self
    }

    /// Set a body key template
    pub fn with_json_key(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.merge_json_keys.insert(key.into(), InjaTemplate::new(text));
        self
    }

    /// Header template source, if set
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|t| t.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_lookup() {
        let t = TransformationTemplate::default()
            .with_header(":path", "/v1/messages")
            .with_json_key("model", "{{ model }}");
        assert_eq!(t.header(":path"), Some("/v1/messages"));
        assert_eq!(t.header("x-api-key"), None);
        assert_eq!(t.merge_json_keys["model"].text, "{{ model }}");
    }

    #[test]
    fn wire_shape() {
        let t = TransformationTemplate::default().with_header(":path", "/v1/chat/completions");
        let value = serde_json::to_value(&t).unwrap();
        assert_eq!(value["headers"][":path"]["text"], "/v1/chat/completions");
        assert_eq!(value["parseBodyBehavior"], "PARSE_AS_JSON");
        assert!(value.get("mergeJsonKeys").is_none());
    }
}
