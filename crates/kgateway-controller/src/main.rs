//! kgateway controller - translates AI backends and traffic policies

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kgateway_common::telemetry::{init_telemetry, TelemetryConfig};
use kgateway_controller::jwks::start_jwks;
use kgateway_controller::runner::{
    build_backend_controller, build_indexes, build_policy_controller,
};
use kgateway_controller::{ClusterCache, ControllerConfig, KubeStatusWriter, StatusWriter};
use kgateway_policy::{AttachmentStore, MergeOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControllerConfig::parse();

    init_telemetry(TelemetryConfig {
        service_name: "kgateway-controller".to_string(),
        format: config.log_format,
    })?;

    info!(
        namespace = %config.namespace,
        ref_grants = ?config.ref_grant_mode(),
        "Starting kgateway controller"
    );

    let client = Client::try_default().await?;
    let cancel = CancellationToken::new();

    let (_fetcher, jwks_tasks) = start_jwks(client.clone(), &config, cancel.clone()).await?;

    let (index, reflectors) = build_indexes(client.clone(), cancel.clone());
    let reflector_tasks: Vec<_> = reflectors.into_iter().map(tokio::spawn).collect();

    let status: Arc<dyn StatusWriter> = Arc::new(KubeStatusWriter::new(client.clone()));
    let clusters = Arc::new(ClusterCache::new());
    let attachments = Arc::new(AttachmentStore::new(MergeOptions::default()));

    info!("Starting controllers");
    let controllers = vec![
        build_backend_controller(client.clone(), &index, status.clone(), clusters.clone()),
        build_policy_controller(client, &index, &config, status, attachments.clone()),
    ];

    // Controllers stop on SIGTERM/SIGINT; everything else follows.
    futures::future::join_all(controllers).await;

    info!(
        clusters = clusters.len(),
        policies = attachments.len(),
        "Controllers stopped, shutting down"
    );
    cancel.cancel();
    for task in jwks_tasks.into_iter().chain(reflector_tasks) {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task failed during shutdown");
        }
    }

    Ok(())
}
