//! Inference Operator - reconciliation for model-serving API deployments
//!
//! Runs the reconciler and instance telemetry crons against the cluster and
//! serves health and metrics endpoints.

use anyhow::{Context, Result};
use inference_operator::api;
use operator_lib::{
    capacity::CapacitySnapshotter,
    cluster::{ClusterClient, KubeCluster},
    cron::{cron_error_handler, Cron},
    health::{components, HealthRegistry},
    observability::{OperatorMetrics, StructuredLogger},
    reconciler::Reconciler,
    telemetry::{instance_telemetry, LogTelemetry, TelemetrySink},
    OperatorConfig,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = OperatorConfig::load().context("Failed to load operator configuration")?;
    info!(
        namespace = %config.namespace,
        gateway = %config.api_gateway,
        instance_type = %config.instance.instance_type,
        "Operator configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::RECONCILER).await;
    health_registry.register(components::TELEMETRY).await;
    health_registry.register(components::CLUSTER).await;

    let metrics = OperatorMetrics::new();
    let logger = StructuredLogger::new(&config.namespace);
    logger.log_startup(OPERATOR_VERSION, config.api_port);

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state.clone()));

    let cluster: Arc<dyn ClusterClient> = match KubeCluster::try_default(&config.namespace).await {
        Ok(cluster) => Arc::new(cluster),
        Err(e) => {
            health_registry
                .record_failure(components::CLUSTER, e.to_string())
                .await;
            return Err(e).context("Failed to create Kubernetes client");
        }
    };
    app_state.attach_snapshotter(CapacitySnapshotter::new(cluster.clone(), config.capacity()));
    health_registry.record_success(components::CLUSTER).await;
    health_registry.set_ready(true).await;

    let telemetry: Arc<dyn TelemetrySink> = Arc::new(LogTelemetry::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let reconciler = Arc::new(Reconciler::new(cluster.clone(), &config));
    let reconcile_cron = Cron::new(
        components::RECONCILER,
        config.cron.reconcile_interval(),
        cron_error_handler(components::RECONCILER, telemetry.clone(), logger.clone()),
    )
    .with_health(health_registry.clone());
    let reconcile_handle = tokio::spawn(reconcile_cron.run(
        move || {
            let reconciler = reconciler.clone();
            async move { reconciler.tick().await }
        },
        shutdown_tx.subscribe(),
    ));

    let telemetry_cron = Cron::new(
        components::TELEMETRY,
        config.cron.telemetry_interval(),
        cron_error_handler(components::TELEMETRY, telemetry.clone(), logger.clone()),
    )
    .with_health(health_registry.clone());
    let telemetry_handle = tokio::spawn(telemetry_cron.run(
        move || {
            let cluster = cluster.clone();
            let telemetry = telemetry.clone();
            async move { instance_telemetry(cluster.as_ref(), telemetry.as_ref()).await }
        },
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    if shutdown_tx.send(()).is_err() {
        warn!("No crons were running at shutdown");
    }
    for handle in [reconcile_handle, telemetry_handle] {
        if let Err(e) = handle.await {
            warn!(error = %e, "Cron task ended abnormally");
        }
    }
    api_handle.abort();

    Ok(())
}
