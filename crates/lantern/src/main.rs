//! Lantern - live cluster state for the 3D visualisation frontend
//!
//! Watches nodes and pods, polls their resource usage and streams the
//! resulting event feed to every connected WebSocket client.

use anyhow::{Context, Result};
use lantern::{api, config};
use lantern_lib::{
    health::{components, HealthRegistry},
    observability::{PipelineMetrics, StructuredLogger},
    ClusterAggregator, ClusterApi, KubeClusterApi, MetricsPoller, PipelineBuilder,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LANTERN_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting lantern");

    let config = config::LanternConfig::load()?;
    info!(
        port = config.api_port,
        metrics_interval_secs = config.metrics_interval_secs,
        resubscribe = config.resubscribe,
        "Lantern configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::AGGREGATOR).await;
    health_registry.register(components::POLLER).await;
    health_registry.register(components::HUB).await;

    // Register collectors so the first scrape sees every series
    let _metrics = PipelineMetrics::new();
    let logger = StructuredLogger::new("lantern");

    let cluster: Arc<dyn ClusterApi> = Arc::new(
        KubeClusterApi::try_default()
            .await
            .context("Failed to create Kubernetes client")?,
    );

    let aggregator = ClusterAggregator::new(cluster.clone(), config.watch_config())
        .with_health(health_registry.clone());
    let poller = MetricsPoller::new(cluster.clone(), config.poller_config())
        .with_health(health_registry.clone());

    let pipeline = PipelineBuilder::new()
        .hub_config(config.hub_config())
        .event_buffer(config.event_buffer)
        .producer(aggregator)
        .producer(poller)
        .health(health_registry.clone())
        .start()
        .await
        .context("Failed to start synchronisation pipeline")?;

    let app_state = Arc::new(api::AppState::new(
        health_registry,
        pipeline.hub().clone(),
        cluster,
        logger.clone(),
    ));

    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state, async {
        let _ = server_stopped.await;
    }));
    logger.log_startup(LANTERN_VERSION, config.api_port);

    tokio::select! {
        served = &mut api_handle => {
            pipeline.shutdown().await;
            served.context("API server task failed")??;
            anyhow::bail!("API server exited unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
        }
    }

    logger.log_shutdown("SIGINT received");

    // Closing the hub closes every subscriber socket before the server stops
    pipeline.shutdown().await;
    let _ = stop_server.send(());
    api_handle.await.context("API server task failed")??;

    info!("Shutdown complete");
    Ok(())
}
