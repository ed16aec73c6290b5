//! JSON Web Key Set model and the cache snapshot built from it
//!
//! Keys keep every member they arrive with, so a keyset written to the
//! durable store and read back compares equal to the one fetched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JwksError, Result};

/// A JSON Web Key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC")
    pub kty: String,

    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Algorithm (e.g., "RS256", "ES256")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public key use (e.g., "sig")
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    // RSA key components
    /// RSA modulus (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    // EC key components
    /// EC curve name (e.g., "P-256")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Members not modelled above (x5c, x5t, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Jwk {
    /// Check if this key can be used for signature verification
    pub fn is_signing_key(&self) -> bool {
        self.use_.as_deref() != Some("enc")
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Array of JSON Web Keys
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Parse a keyset from its JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| JwksError::serialization(format!("invalid JWKS document: {e}")))
    }

    /// Canonical JSON for this keyset
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| JwksError::serialization(e.to_string()))
    }

    /// Look up a key by id
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// Every known keyset, keyed by source URL.
///
/// Serialized as `{"<url>": <keyset>, ...}` in URL order, so equal caches
/// always encode to the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwksSnapshot {
    /// Keysets by URL
    pub keysets: BTreeMap<String, JwkSet>,
}

impl JwksSnapshot {
    /// Build a snapshot from a cache
    pub fn new(keysets: BTreeMap<String, JwkSet>) -> Self {
        Self { keysets }
    }

    /// Encode to the persisted JSON form
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| JwksError::serialization(e.to_string()))
    }

    /// Decode the persisted JSON form
    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| JwksError::serialization(format!("invalid JWKS snapshot: {e}")))
    }

    /// Whether no keyset is known
    pub fn is_empty(&self) -> bool {
        self.keysets.is_empty()
    }

    /// Keyset for a URL
    pub fn get(&self, url: &str) -> Option<&JwkSet> {
        self.keysets.get(url)
    }
}
