//! YAML parsing helpers
//!
//! Manifests are parsed into `serde_json::Value` first and then into typed
//! resources, so the same serde attributes drive both YAML and JSON input.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Error type for YAML parsing
#[derive(Debug, Error)]
#[error("yaml error: {0}")]
pub struct YamlError(String);

/// Parse a YAML string into a serde_json::Value.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    serde_yaml::from_str(input).map_err(|e| YamlError(e.to_string()))
}

/// Parse a YAML manifest straight into a typed resource
pub fn parse_resource<T: DeserializeOwned>(input: &str) -> Result<T, YamlError> {
    let value = parse_yaml(input)?;
    serde_json::from_value(value).map_err(|e| YamlError(e.to_string()))
}
