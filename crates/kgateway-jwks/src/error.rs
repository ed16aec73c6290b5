//! Error types for JWKS fetching and persistence

use thiserror::Error;

/// JWKS error types
#[derive(Debug, Error)]
pub enum JwksError {
    /// A source URL did not parse
    #[error("invalid JWKS url {url}: {message}")]
    InvalidUrl {
        /// The URL as configured
        url: String,
        /// Parser message
        message: String,
    },

    /// Fetching a keyset failed (transport, status or body)
    #[error("JWKS fetch error for {url}: {message}")]
    FetchFailed {
        /// Source URL
        url: String,
        /// Error message
        message: String,
    },

    /// Reading the durable snapshot failed
    #[error("failed to read JWKS store {namespace}/{name}: {message}")]
    StoreReadFailed {
        /// Store namespace
        namespace: String,
        /// Store object name
        name: String,
        /// Error message
        message: String,
    },

    /// Writing the durable snapshot failed
    #[error("failed to write JWKS store {namespace}/{name}: {message}")]
    StoreWriteFailed {
        /// Store namespace
        namespace: String,
        /// Store object name
        name: String,
        /// Error message
        message: String,
    },

    /// Snapshot encoding or decoding failed
    #[error("JWKS serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

    /// Several errors reported together
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Aggregate(Vec<JwksError>),
}

impl JwksError {
    /// Create an invalid-url error
    pub fn invalid_url(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a fetch error
    pub fn fetch_failed(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FetchFailed {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a store read error
    pub fn store_read(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::StoreReadFailed {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a store write error
    pub fn store_write(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::StoreWriteFailed {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Collapse a list of errors: none is success, one is returned as-is
    pub fn join(mut errors: Vec<JwksError>) -> std::result::Result<(), JwksError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(JwksError::Aggregate(errors)),
        }
    }
}

/// Result type for JWKS operations
pub type Result<T> = std::result::Result<T, JwksError>;
