//! Durable copy of the JWKS cache
//!
//! The snapshot is loaded once at startup to seed the fetcher and written
//! again after every published change. Failures are logged and never
//! stop the controller; the in-memory cache stays authoritative.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::JwksError;
use crate::fetcher::SnapshotReceiver;
use crate::keyset::JwksSnapshot;
use crate::store::ConfigStore;

/// Reads and writes the snapshot at one store location
pub struct JwksPersistence {
    store: Arc<dyn ConfigStore>,
    namespace: String,
    name: String,
}

impl JwksPersistence {
    /// Persist to `namespace/name` in `store`
    pub fn new(
        store: Arc<dyn ConfigStore>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Read the stored snapshot.
    ///
    /// Missing, unreadable and malformed payloads all yield an empty snapshot.
    pub async fn load(&self) -> JwksSnapshot {
        let payload = match self.store.read(&self.namespace, &self.name).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!(namespace = %self.namespace, name = %self.name, "No persisted JWKS, starting empty");
                return JwksSnapshot::default();
            }
            Err(e) => {
                warn!(error = %e, "Failed to read persisted JWKS, starting empty");
                return JwksSnapshot::default();
            }
        };

        match JwksSnapshot::decode(&payload) {
            Ok(snapshot) => {
                info!(keysets = snapshot.keysets.len(), "Loaded persisted JWKS");
                snapshot
            }
            Err(e) => {
                error!(
                    namespace = %self.namespace,
                    name = %self.name,
                    error = %e,
                    "Persisted JWKS is malformed, starting empty"
                );
                JwksSnapshot::default()
            }
        }
    }

    /// Write a snapshot
    pub async fn save(&self, snapshot: &JwksSnapshot) -> Result<(), JwksError> {
        let payload = snapshot.encode()?;
        self.store.write(&self.namespace, &self.name, &payload).await?;
        debug!(keysets = snapshot.keysets.len(), "Persisted JWKS snapshot");
        Ok(())
    }

    /// Save every snapshot received until cancelled or the fetcher goes away
    pub async fn run(&self, mut updates: SnapshotReceiver, cancel: CancellationToken) {
        loop {
            let snapshot = tokio::select! {
                _ = cancel.cancelled() => break,
                next = updates.recv() => match next {
                    Some(snapshot) => snapshot,
                    None => break,
                },
            };
            if let Err(e) = self.save(&snapshot).await {
                warn!(error = %e, "Failed to persist JWKS snapshot");
            }
        }
        debug!("JWKS persistence stopped");
    }
}
