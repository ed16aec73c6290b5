//! HTTP seam for retrieving keysets

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::{JwksError, Result};
use crate::keyset::JwkSet;

/// Default request timeout for JWKS fetches
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves the keyset published at a URL
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JwksClient: Send + Sync {
    /// GET the URL and parse the body as a keyset
    async fn fetch(&self, url: &str) -> Result<JwkSet>;
}

/// [`JwksClient`] backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpJwksClient {
    client: reqwest::Client,
}

impl HttpJwksClient {
    /// Create a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JwksError::fetch_failed("*", format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JwksClient for HttpJwksClient {
    async fn fetch(&self, url: &str) -> Result<JwkSet> {
        debug!(url = %url, "Fetching JWKS");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| JwksError::fetch_failed(url, format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(JwksError::fetch_failed(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| JwksError::fetch_failed(url, format!("invalid JSON: {e}")))
    }
}
