//! Periodic JWKS fetcher
//!
//! Keeps the latest keyset for every configured URL. All state sits behind
//! one async mutex; HTTP requests run with the lock released and their
//! results are applied only if the source is still registered.
//!
//! Every change to the cache is published to subscribers as a full
//! [`JwksSnapshot`], sent under the lock so subscribers observe cache
//! history in order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::JwksClient;
use crate::error::{JwksError, Result};
use crate::keyset::{JwkSet, JwksSnapshot};
use crate::scheduler::{after_failure, JwksSource, Scheduler, SourceDescriptor};

/// How often due sources are checked
pub const FETCH_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshots buffered per subscriber before publishing waits on it
pub const SUBSCRIBER_BUFFER: usize = 16;

/// Receiving end handed out by [`JwksFetcher::subscribe`]
pub type SnapshotReceiver = mpsc::Receiver<Arc<JwksSnapshot>>;

#[derive(Default)]
struct FetcherState {
    sources: BTreeMap<String, Arc<SourceDescriptor>>,
    keys: BTreeMap<String, JwkSet>,
    scheduler: Scheduler,
    subscribers: Vec<mpsc::Sender<Arc<JwksSnapshot>>>,
}

impl FetcherState {
    fn install(&mut self, source: JwksSource, now: Instant) {
        let descriptor = SourceDescriptor::new(source);
        self.scheduler.push(descriptor.clone(), now, 0);
        self.sources.insert(descriptor.url().to_string(), descriptor);
    }

    /// Unregister a source; true if a cached keyset went with it
    fn remove(&mut self, url: &str) -> bool {
        if let Some(descriptor) = self.sources.remove(url) {
            descriptor.mark_deleted();
        }
        self.keys.remove(url).is_some()
    }

    fn snapshot(&self) -> Arc<JwksSnapshot> {
        Arc::new(JwksSnapshot::new(self.keys.clone()))
    }

    async fn publish(&mut self) {
        let snapshot = self.snapshot();
        let mut live = Vec::with_capacity(self.subscribers.len());
        for tx in self.subscribers.drain(..) {
            if tx.send(snapshot.clone()).await.is_ok() {
                live.push(tx);
            } else {
                debug!("Dropping closed JWKS subscriber");
            }
        }
        self.subscribers = live;
        debug!(
            keysets = snapshot.keysets.len(),
            subscribers = self.subscribers.len(),
            "Published JWKS snapshot"
        );
    }
}

/// Fetches and caches remote keysets
pub struct JwksFetcher {
    client: Arc<dyn JwksClient>,
    state: Mutex<FetcherState>,
}

impl JwksFetcher {
    /// Create a fetcher with no sources
    pub fn new(client: Arc<dyn JwksClient>) -> Self {
        Self {
            client,
            state: Mutex::new(FetcherState::default()),
        }
    }

    /// Load keysets known from a previous run.
    ///
    /// Seeded keysets serve until their source is fetched; those without a
    /// source are dropped by the next [`update_sources`](Self::update_sources).
    pub async fn seed(&self, snapshot: JwksSnapshot) {
        let mut state = self.state.lock().await;
        let count = snapshot.keysets.len();
        for (url, keyset) in snapshot.keysets {
            state.keys.entry(url).or_insert(keyset);
        }
        info!(keysets = count, "Seeded JWKS cache");
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> SnapshotReceiver {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.state.lock().await.subscribers.push(tx);
        rx
    }

    /// Replace the set of sources.
    ///
    /// New URLs are fetched on the next tick. A URL whose TTL changed is
    /// re-registered and refetched. URLs no longer listed lose their cached
    /// keyset, and a snapshot is published if any keyset was dropped.
    /// Invalid URLs are skipped and reported together; everything else
    /// still takes effect.
    pub async fn update_sources(&self, updates: Vec<JwksSource>) -> Result<()> {
        let mut desired: BTreeMap<String, Duration> = BTreeMap::new();
        for source in updates {
            desired
                .entry(source.url)
                .and_modify(|ttl| *ttl = (*ttl).min(source.ttl))
                .or_insert(source.ttl);
        }

        let now = Instant::now();
        let mut errors = Vec::new();
        let mut state = self.state.lock().await;

        for (url, ttl) in &desired {
            match state.sources.get(url).map(|d| d.ttl()) {
                Some(current) if current == *ttl => {}
                Some(current) => {
                    debug!(url = %url, old_ttl = ?current, new_ttl = ?ttl, "JWKS source TTL changed");
                    state.remove(url);
                    state.install(JwksSource::new(url.clone(), *ttl), now);
                }
                None => match url::Url::parse(url) {
                    Ok(_) => {
                        debug!(url = %url, ttl = ?ttl, "Adding JWKS source");
                        state.install(JwksSource::new(url.clone(), *ttl), now);
                    }
                    Err(e) => errors.push(JwksError::invalid_url(url.clone(), e.to_string())),
                },
            }
        }

        let stale: Vec<String> = state
            .sources
            .keys()
            .chain(state.keys.keys())
            .filter(|url| !desired.contains_key(*url))
            .cloned()
            .collect();
        let mut changed = false;
        for url in stale {
            debug!(url = %url, "Removing JWKS source");
            changed |= state.remove(&url);
        }

        if changed {
            state.publish().await;
        }

        JwksError::join(errors)
    }

    /// Fetch every source that is due, then publish if any keyset changed
    pub async fn tick(&self) {
        let now = Instant::now();
        let mut changed = false;

        loop {
            let Some(entry) = self.state.lock().await.scheduler.pop_due(now) else {
                break;
            };
            let url = entry.descriptor.url().to_string();
            let result = self.client.fetch(&url).await;

            let mut state = self.state.lock().await;
            if entry.descriptor.is_deleted() {
                debug!(url = %url, "Discarding fetch for removed JWKS source");
                continue;
            }

            let done = Instant::now();
            let ttl = entry.descriptor.ttl();
            match result {
                Ok(keyset) => {
                    if state.keys.get(&url) != Some(&keyset) {
                        info!(url = %url, key_count = keyset.keys.len(), "JWKS updated");
                        state.keys.insert(url.clone(), keyset);
                        changed = true;
                    }
                    state.scheduler.push(entry.descriptor, done + ttl, 0);
                }
                Err(e) => {
                    let (due_at, retry) = after_failure(done, entry.retry, ttl);
                    warn!(
                        url = %url,
                        error = %e,
                        retry,
                        next_attempt_in = ?(due_at - done),
                        "JWKS fetch failed"
                    );
                    state.scheduler.push(entry.descriptor, due_at, retry);
                }
            }
        }

        if changed {
            self.state.lock().await.publish().await;
        }
    }

    /// Tick every [`FETCH_INTERVAL`] until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(FETCH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("JWKS fetcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.tick() => {}
            }
        }

        info!("JWKS fetcher stopped");
    }

    /// Current cache contents
    pub async fn snapshot(&self) -> JwksSnapshot {
        JwksSnapshot::new(self.state.lock().await.keys.clone())
    }

    /// Cached keyset for a URL
    pub async fn keyset(&self, url: &str) -> Option<JwkSet> {
        self.state.lock().await.keys.get(url).cloned()
    }

    /// Registered sources
    pub async fn sources(&self) -> Vec<JwksSource> {
        self.state
            .lock()
            .await
            .sources
            .values()
            .map(|d| d.source.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockJwksClient;
    use crate::keyset::tests::rsa_keyset;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const URL: &str = "https://idp/.well-known/jwks";
    const HOUR: Duration = Duration::from_secs(3600);

    fn fetcher(mock: MockJwksClient) -> JwksFetcher {
        JwksFetcher::new(Arc::new(mock))
    }

    /// Offset and retry count of the live scheduler entry for `url`
    async fn next_fetch(f: &JwksFetcher, url: &str, since: Instant) -> Option<(Duration, u32)> {
        let state = f.state.lock().await;
        let pending = state.scheduler.pending(url);
        assert!(pending.len() <= 1, "{url} scheduled {} times", pending.len());
        pending.first().map(|e| (e.due_at - since, e.retry))
    }

    fn always_ok() -> MockJwksClient {
        let mut mock = MockJwksClient::new();
        mock.expect_fetch().returning(|url| Ok(rsa_keyset(url)));
        mock
    }

    #[tokio::test(start_paused = true)]
    async fn new_sources_are_due_immediately() {
        let f = fetcher(always_ok());
        let start = Instant::now();
        f.update_sources(vec![JwksSource::new(URL, HOUR)]).await.unwrap();
        assert_eq!(next_fetch(&f, URL, start).await, Some((Duration::ZERO, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mock = MockJwksClient::new();
        mock.expect_fetch().returning(move |url| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(JwksError::fetch_failed(url, "HTTP 503"))
            } else {
                Ok(rsa_keyset("k1"))
            }
        });
        let f = fetcher(mock);
        let mut rx = f.subscribe().await;
        let start = Instant::now();
        f.update_sources(vec![JwksSource::new(URL, HOUR)]).await.unwrap();

        f.tick().await;
        assert_eq!(next_fetch(&f, URL, start).await, Some((Duration::from_secs(5), 1)));

        // Nothing happens before the retry is due
        tokio::time::advance(Duration::from_secs(4)).await;
        f.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        f.tick().await;
        assert_eq!(next_fetch(&f, URL, start).await, Some((Duration::from_secs(15), 2)));

        tokio::time::advance(Duration::from_secs(10)).await;
        f.tick().await;
        assert_eq!(next_fetch(&f, URL, start).await, Some((Duration::from_secs(30), 3)));
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(15)).await;
        f.tick().await;
        assert_eq!(
            next_fetch(&f, URL, start).await,
            Some((Duration::from_secs(30) + HOUR, 0))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.get(URL), Some(&rsa_keyset("k1")));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_give_way_to_ttl() {
        let mut mock = MockJwksClient::new();
        mock.expect_fetch()
            .returning(|url| Err(JwksError::fetch_failed(url, "connection refused")));
        let f = fetcher(mock);
        f.update_sources(vec![JwksSource::new(URL, HOUR)]).await.unwrap();

        for k in 0..5u32 {
            f.tick().await;
            let now = Instant::now();
            let (due_in, retry) = next_fetch(&f, URL, now).await.unwrap();
            assert_eq!(retry, k + 1);
            assert_eq!(due_in, Duration::from_secs(5 * u64::from(k + 1)));
            tokio::time::advance(due_in).await;
        }

        f.tick().await;
        let now = Instant::now();
        assert_eq!(next_fetch(&f, URL, now).await, Some((HOUR, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_keyset_is_not_republished() {
        let f = fetcher(always_ok());
        let mut rx = f.subscribe().await;
        f.update_sources(vec![JwksSource::new(URL, Duration::from_secs(60))])
            .await
            .unwrap();

        f.tick().await;
        assert!(rx.try_recv().is_ok());

        tokio::time::advance(Duration::from_secs(60)).await;
        f.tick().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(f.keyset(URL).await, Some(rsa_keyset(URL)));
    }

    #[tokio::test(start_paused = true)]
    async fn one_publish_per_tick() {
        let f = fetcher(always_ok());
        let mut rx = f.subscribe().await;
        f.update_sources(vec![
            JwksSource::new("https://a/jwks", HOUR),
            JwksSource::new("https://b/jwks", HOUR),
        ])
        .await
        .unwrap();

        f.tick().await;
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.keysets.len(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_all_clears_and_publishes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mock = MockJwksClient::new();
        mock.expect_fetch().returning(move |url| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(rsa_keyset(url))
        });
        let f = fetcher(mock);
        let mut rx = f.subscribe().await;
        f.update_sources(vec![
            JwksSource::new("https://a/jwks", Duration::from_secs(10)),
            JwksSource::new("https://b/jwks", Duration::from_secs(10)),
        ])
        .await
        .unwrap();
        f.tick().await;
        rx.try_recv().unwrap();

        f.update_sources(vec![]).await.unwrap();
        let snapshot = rx.try_recv().unwrap();
        assert!(snapshot.is_empty());
        assert!(rx.try_recv().is_err());
        assert!(f.sources().await.is_empty());
        assert!(f.snapshot().await.is_empty());

        // Tombstoned entries no-op when they come due
        tokio::time::advance(Duration::from_secs(10)).await;
        f.tick().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(f.state.lock().await.scheduler.is_empty());

        // A second removal changes nothing and publishes nothing
        f.update_sources(vec![]).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_change_reschedules() {
        let f = fetcher(always_ok());
        f.update_sources(vec![JwksSource::new(URL, HOUR)]).await.unwrap();
        f.tick().await;
        assert!(f.keyset(URL).await.is_some());

        let start = Instant::now();
        let ttl = Duration::from_secs(60);
        f.update_sources(vec![JwksSource::new(URL, ttl)]).await.unwrap();
        assert_eq!(next_fetch(&f, URL, start).await, Some((Duration::ZERO, 0)));
        assert_eq!(f.sources().await, vec![JwksSource::new(URL, ttl)]);
        assert!(f.keyset(URL).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_urls_are_reported_and_others_apply() {
        let f = fetcher(always_ok());
        let err = f
            .update_sources(vec![
                JwksSource::new("not a url", HOUR),
                JwksSource::new(URL, HOUR),
                JwksSource::new("also bad", HOUR),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, JwksError::Aggregate(ref errs) if errs.len() == 2));
        assert_eq!(f.sources().await, vec![JwksSource::new(URL, HOUR)]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_urls_keep_shortest_ttl() {
        let f = fetcher(always_ok());
        f.update_sources(vec![
            JwksSource::new(URL, HOUR),
            JwksSource::new(URL, Duration::from_secs(30)),
        ])
        .await
        .unwrap();
        assert_eq!(
            f.sources().await,
            vec![JwksSource::new(URL, Duration::from_secs(30))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_keys_without_source_are_pruned() {
        let f = fetcher(always_ok());
        let mut rx = f.subscribe().await;
        f.seed(JwksSnapshot::new(BTreeMap::from([
            (URL.to_string(), rsa_keyset("persisted")),
            ("https://gone/jwks".to_string(), rsa_keyset("gone")),
        ])))
        .await;

        f.update_sources(vec![JwksSource::new(URL, HOUR)]).await.unwrap();
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.keysets.len(), 1);
        assert_eq!(snapshot.get(URL), Some(&rsa_keyset("persisted")));
    }

    /// Client that blocks each fetch until released
    struct GatedClient {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl JwksClient for GatedClient {
        async fn fetch(&self, url: &str) -> Result<JwkSet> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(rsa_keyset(url))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_for_source_removed_mid_flight_is_discarded() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let f = Arc::new(JwksFetcher::new(Arc::new(GatedClient {
            started: started.clone(),
            release: release.clone(),
        })));
        let mut rx = f.subscribe().await;
        f.update_sources(vec![JwksSource::new(URL, HOUR)]).await.unwrap();

        let tick = tokio::spawn({
            let f = f.clone();
            async move { f.tick().await }
        });
        started.notified().await;

        // The lock is free while the request is in flight
        f.update_sources(vec![]).await.unwrap();
        release.notify_one();
        tick.await.unwrap();

        assert!(f.keyset(URL).await.is_none());
        assert!(f.state.lock().await.scheduler.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_subscribers_are_dropped() {
        let f = fetcher(always_ok());
        let rx = f.subscribe().await;
        drop(rx);
        let mut live = f.subscribe().await;
        f.update_sources(vec![JwksSource::new(URL, HOUR)]).await.unwrap();
        f.tick().await;
        assert!(live.try_recv().is_ok());
        assert_eq!(f.state.lock().await.subscribers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let f = Arc::new(fetcher(always_ok()));
        f.update_sources(vec![JwksSource::new(URL, HOUR)]).await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let f = f.clone();
            let cancel = cancel.clone();
            async move { f.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.keyset(URL).await.is_some());

        cancel.cancel();
        task.await.unwrap();
    }
}
