//! Remote JWKS wiring
//!
//! Keeps the fetcher's source list in step with the TrafficPolicies in the
//! cluster and persists fetched keysets to a ConfigMap so a restarted
//! controller serves keys before its first fetch completes.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kgateway_common::crd::TrafficPolicy;
use kgateway_jwks::{ConfigMapStore, HttpJwksClient, JwksFetcher, JwksPersistence};
use kgateway_policy::jwks_sources;
use kube::runtime::watcher::Event;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;

/// Pushes the remote JWKS URLs of a set of policies to a fetcher
pub struct JwksSourceSync {
    fetcher: Arc<JwksFetcher>,
    default_ttl: Duration,
}

impl JwksSourceSync {
    /// Sync into `fetcher`; `default_ttl` applies without a cacheDuration
    pub fn new(fetcher: Arc<JwksFetcher>, default_ttl: Duration) -> Self {
        Self {
            fetcher,
            default_ttl,
        }
    }

    /// Replace the fetcher's sources with those referenced by `policies`.
    ///
    /// Returns the number of sources registered. Invalid URLs are logged and
    /// skipped.
    pub async fn sync(&self, policies: &[Arc<TrafficPolicy>]) -> usize {
        let sources = jwks_sources(policies.iter().map(Arc::as_ref), self.default_ttl);
        let count = sources.len();
        if let Err(e) = self.fetcher.update_sources(sources).await {
            warn!(error = %e, "Some JWKS sources were rejected");
        }
        debug!(sources = count, "Synced JWKS sources");
        count
    }

    /// Watch TrafficPolicies and resync on every change until cancelled
    pub async fn watch(&self, api: Api<TrafficPolicy>, cancel: CancellationToken) {
        let (store, writer) = reflector::store();
        let stream = reflector(writer, watcher(api, watcher::Config::default())).default_backoff();
        tokio::pin!(stream);

        info!("Watching TrafficPolicies for JWKS sources");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => match event {
                    // Wait for the initial list to finish before syncing so
                    // sources of not-yet-listed policies are not dropped.
                    Some(Ok(Event::Init | Event::InitApply(_))) => {}
                    Some(Ok(_)) => {
                        self.sync(&store.state()).await;
                    }
                    Some(Err(e)) => warn!(error = %e, "TrafficPolicy watch error"),
                    None => break,
                },
            }
        }
        info!("TrafficPolicy JWKS watch stopped");
    }
}

/// Start the JWKS fetcher, its persistence and the policy watch.
///
/// The persisted snapshot is loaded and seeded before anything else runs.
pub async fn start_jwks(
    client: Client,
    config: &ControllerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<(Arc<JwksFetcher>, Vec<JoinHandle<()>>)> {
    let http = HttpJwksClient::new(config.jwks_fetch_timeout())?;
    let fetcher = Arc::new(JwksFetcher::new(Arc::new(http)));

    let persistence = Arc::new(JwksPersistence::new(
        Arc::new(ConfigMapStore::new(client.clone())),
        config.namespace.clone(),
        config.jwks_configmap.clone(),
    ));
    fetcher.seed(persistence.load().await).await;
    let updates = fetcher.subscribe().await;

    let sync = JwksSourceSync::new(fetcher.clone(), config.default_jwks_ttl());
    let policies: Api<TrafficPolicy> = Api::all(client);

    let mut tasks = Vec::with_capacity(3);
    tasks.push(tokio::spawn({
        let cancel = cancel.clone();
        async move { persistence.run(updates, cancel).await }
    }));
    tasks.push(tokio::spawn({
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        async move { fetcher.run(cancel).await }
    }));
    tasks.push(tokio::spawn(async move { sync.watch(policies, cancel).await }));

    info!(
        configmap = %config.jwks_configmap,
        namespace = %config.namespace,
        "JWKS fetcher started"
    );
    Ok((fetcher, tasks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kgateway_common::yaml::parse_resource;
    use kgateway_jwks::{JwkSet, JwksClient, JwksError};

    struct OfflineClient;

    #[async_trait]
    impl JwksClient for OfflineClient {
        async fn fetch(&self, url: &str) -> kgateway_jwks::Result<JwkSet> {
            Err(JwksError::fetch_failed(url, "offline"))
        }
    }

    fn policy(name: &str, url: &str, cache: &str) -> Arc<TrafficPolicy> {
        Arc::new(
            parse_resource(&format!(
                r#"
apiVersion: gateway.kgateway.dev/v1alpha1
kind: TrafficPolicy
metadata:
  name: {name}
  namespace: apps
spec:
  jwt:
    providers:
      idp:
        issuer: https://idp
        jwks:
          remote:
            url: {url}
            cacheDuration: {cache}
"#
            ))
            .unwrap(),
        )
    }

    fn sync() -> (Arc<JwksFetcher>, JwksSourceSync) {
        let fetcher = Arc::new(JwksFetcher::new(Arc::new(OfflineClient)));
        let sync = JwksSourceSync::new(fetcher.clone(), Duration::from_secs(300));
        (fetcher, sync)
    }

    #[tokio::test]
    async fn sync_registers_each_url_once() {
        let (fetcher, sync) = sync();
        let policies = vec![
            policy("a", "https://idp/jwks", "1h"),
            policy("b", "https://idp/jwks", "5m"),
            policy("c", "https://other/jwks", "10m"),
        ];

        assert_eq!(sync.sync(&policies).await, 2);
        let sources = fetcher.sources().await;
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].url, "https://idp/jwks");
        assert_eq!(sources[0].ttl, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn sync_drops_unreferenced_urls() {
        let (fetcher, sync) = sync();
        sync.sync(&[policy("a", "https://idp/jwks", "1h")]).await;
        sync.sync(&[policy("b", "https://other/jwks", "1h")]).await;

        let urls: Vec<_> = fetcher.sources().await.into_iter().map(|s| s.url).collect();
        assert_eq!(urls, ["https://other/jwks"]);
    }

    #[tokio::test]
    async fn invalid_url_does_not_block_others() {
        let (fetcher, sync) = sync();
        let policies = vec![
            policy("a", "not a url", "1h"),
            policy("b", "https://idp/jwks", "1h"),
        ];

        sync.sync(&policies).await;
        let urls: Vec<_> = fetcher.sources().await.into_iter().map(|s| s.url).collect();
        assert_eq!(urls, ["https://idp/jwks"]);
    }
}
