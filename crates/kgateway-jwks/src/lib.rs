//! JWKS handling for the kgateway control plane
//!
//! - [`fetcher`]: keeps remote keysets fresh and publishes cache snapshots
//! - [`scheduler`]: due-time heap with bounded retry
//! - [`persistence`]: durable copy of the cache across restarts
//! - [`store`]: key-value storage seam (ConfigMap or in-memory)

#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod fetcher;
pub mod keyset;
pub mod persistence;
pub mod scheduler;
pub mod store;

pub use client::{HttpJwksClient, JwksClient, DEFAULT_FETCH_TIMEOUT};
pub use error::{JwksError, Result};
pub use fetcher::{JwksFetcher, SnapshotReceiver, FETCH_INTERVAL};
pub use keyset::{Jwk, JwkSet, JwksSnapshot};
pub use persistence::JwksPersistence;
pub use scheduler::{JwksSource, MAX_RETRIES, RETRY_BASE};
pub use store::{ConfigMapStore, ConfigStore, MemoryStore};
