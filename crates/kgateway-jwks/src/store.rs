//! Durable key-value stores for the JWKS snapshot

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tracing::debug;

use kgateway_common::FIELD_MANAGER;

use crate::error::{JwksError, Result};

/// ConfigMap data key holding the snapshot
pub const JWKS_DATA_KEY: &str = "jwks";

/// Opaque durable storage addressed by namespace and name
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a payload; `None` if nothing is stored
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<String>>;

    /// Create or replace a payload
    async fn write(&self, namespace: &str, name: &str, payload: &str) -> Result<()>;

    /// Remove a payload; removing nothing is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Store backed by ConfigMaps, payload under [`JWKS_DATA_KEY`]
#[derive(Clone)]
pub struct ConfigMapStore {
    client: Client,
}

impl ConfigMapStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ConfigStore for ConfigMapStore {
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        let cm = self
            .api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| JwksError::store_read(namespace, name, e.to_string()))?;
        Ok(cm
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(JWKS_DATA_KEY)))
    }

    async fn write(&self, namespace: &str, name: &str, payload: &str) -> Result<()> {
        let cm = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": {
                    "app.kubernetes.io/managed-by": "kgateway"
                }
            },
            "data": { JWKS_DATA_KEY: payload }
        });

        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api(namespace)
            .patch(name, &params, &Patch::Apply(&cm))
            .await
            .map_err(|e| JwksError::store_write(namespace, name, e.to_string()))?;

        debug!(namespace = %namespace, name = %name, bytes = payload.len(), "Wrote JWKS ConfigMap");
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(JwksError::store_write(namespace, name, e.to_string())),
        }
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn write(&self, namespace: &str, name: &str, payload: &str) -> Result<()> {
        self.entries
            .lock()
            .insert((namespace.to_string(), name.to_string()), payload.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.entries
            .lock()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}
