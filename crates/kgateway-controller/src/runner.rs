//! Controller runner - builds the reflector and controller futures
//!
//! Each `build_*` function returns boxed futures that the caller composes.
//! Shared reflector stores back the lookup indexes used during translation.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Secret, Service};
use kgateway_common::crd::{Backend, GatewayExtension, ReferenceGrant, TrafficPolicy};
use kgateway_common::index::ReflectorIndex;
use kgateway_policy::{AttachmentStore, ExtensionResolver, PolicyTranslator};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{self, BackendContext, ClusterCache};
use crate::config::ControllerConfig;
use crate::policy::{self, PolicyContext};
use crate::status::StatusWriter;

/// Watcher timeout (seconds); must stay below the client read timeout (30s)
/// so idle watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A boxed future driving one watch loop
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Mirror every `K` into a store until `cancel` fires
fn reflect<K>(api: Api<K>, kind: &'static str, cancel: CancellationToken) -> (Store<K>, ControllerFuture)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (store, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config()))
        .default_backoff()
        .touched_objects()
        .for_each(move |result| {
            if let Err(e) = result {
                warn!(kind, error = %e, "Reflector watch error");
            }
            std::future::ready(())
        });

    let fut = async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = stream => {}
        }
        debug!(kind, "Reflector stopped");
    };
    (store, Box::pin(fut))
}

/// Build the reflectors behind [`ReflectorIndex`]
pub fn build_indexes(client: Client, cancel: CancellationToken) -> (ReflectorIndex, Vec<ControllerFuture>) {
    let (secrets, secrets_fut) = reflect(Api::<Secret>::all(client.clone()), "Secret", cancel.clone());
    let (services, services_fut) =
        reflect(Api::<Service>::all(client.clone()), "Service", cancel.clone());
    let (backends, backends_fut) =
        reflect(Api::<Backend>::all(client.clone()), "Backend", cancel.clone());
    let (extensions, extensions_fut) = reflect(
        Api::<GatewayExtension>::all(client.clone()),
        "GatewayExtension",
        cancel.clone(),
    );
    let (grants, grants_fut) = reflect(Api::<ReferenceGrant>::all(client), "ReferenceGrant", cancel);

    info!("- Lookup indexes (Secret, Service, Backend, GatewayExtension, ReferenceGrant)");

    let index = ReflectorIndex {
        secrets,
        services,
        backends,
        extensions,
        grants,
    };
    (
        index,
        vec![secrets_fut, services_fut, backends_fut, extensions_fut, grants_fut],
    )
}

/// Objects in the same namespace as a changed dependency
fn same_namespace<K, D>(store: &Store<K>, dependency: &D) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
    D: ResourceExt,
{
    let Some(namespace) = dependency.namespace() else {
        return Vec::new();
    };
    store
        .state()
        .iter()
        .filter(|obj| obj.namespace().as_deref() == Some(namespace.as_str()))
        .map(|obj| ObjectRef::from_obj(obj.as_ref()))
        .collect()
}

/// Build the Backend controller; backends are re-translated when a secret
/// in their namespace changes
pub fn build_backend_controller(
    client: Client,
    index: &ReflectorIndex,
    status: Arc<dyn StatusWriter>,
    cache: Arc<ClusterCache>,
) -> ControllerFuture {
    let ctx = Arc::new(BackendContext {
        secrets: Arc::new(index.clone()),
        backends: Arc::new(index.clone()),
        status,
        cache,
    });

    let controller = Controller::new(Api::<Backend>::all(client.clone()), watcher_config());
    let backends = controller.store();

    info!("- Backend controller");

    Box::pin(
        controller
            .watches(Api::<Secret>::all(client), watcher_config(), move |secret| {
                same_namespace(&backends, &secret)
            })
            .shutdown_on_signal()
            .run(backend::reconcile, backend::error_policy, ctx)
            .for_each(log_reconcile_result("Backend")),
    )
}

/// Build the TrafficPolicy controller; policies are re-translated when a
/// GatewayExtension in their namespace changes
pub fn build_policy_controller(
    client: Client,
    index: &ReflectorIndex,
    config: &ControllerConfig,
    status: Arc<dyn StatusWriter>,
    attachments: Arc<AttachmentStore>,
) -> ControllerFuture {
    let shared = Arc::new(index.clone());
    let translator = PolicyTranslator::new(
        ExtensionResolver::new(
            shared.clone(),
            shared.clone(),
            shared.clone(),
            config.ref_grant_mode(),
        ),
        shared,
        config.default_jwks_ttl(),
    );

    let controller = Controller::new(Api::<TrafficPolicy>::all(client.clone()), watcher_config());
    let policies = controller.store();
    let ctx = Arc::new(PolicyContext {
        translator,
        attachments,
        policies: policies.clone(),
        status,
    });

    info!("- TrafficPolicy controller");

    Box::pin(
        controller
            .watches(
                Api::<GatewayExtension>::all(client),
                watcher_config(),
                move |extension| same_namespace(&policies, &extension),
            )
            .shutdown_on_signal()
            .run(policy::reconcile, policy::error_policy, ctx)
            .for_each(log_reconcile_result("TrafficPolicy")),
    )
}

fn log_reconcile_result<T: Debug, E: Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgateway_common::crd::BackendSpec;
    use kube::api::ObjectMeta;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher::Event;

    fn backend(ns: &str, name: &str) -> Backend {
        let mut b = Backend::new(name, BackendSpec { ai: None });
        b.metadata.namespace = Some(ns.into());
        b
    }

    #[test]
    fn dependency_maps_to_same_namespace_objects() {
        let mut writer: Writer<Backend> = Writer::default();
        for b in [backend("ai", "a"), backend("ai", "b"), backend("other", "c")] {
            writer.apply_watcher_event(&Event::Apply(b));
        }
        let store = writer.as_reader();

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("openai".into()),
                namespace: Some("ai".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut names: Vec<_> = same_namespace(&store, &secret)
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, ["a", "b"]);

        let cluster_scoped = Secret::default();
        assert!(same_namespace(&store, &cluster_scoped).is_empty());
    }
}
