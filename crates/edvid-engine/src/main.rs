//! EduVid engine binary.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use edvid_engine::{EngineConfig, Orchestrator, Services};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("edvid=info".parse().unwrap()))
        .init();

    info!("Starting edvid-engine");

    // Metrics recorder (scrape endpoint on the default port)
    if let Err(e) = PrometheusBuilder::new().install() {
        error!("Failed to install metrics recorder: {}", e);
    }

    let config = EngineConfig::from_env();
    info!("Engine config: {:?}", config);

    // Asset directories
    for dir in [config.audio_dir(), config.visuals_dir(), config.videos_dir.clone()] {
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!("Failed to create {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    }

    let services = match Services::new(config).await {
        Ok(services) => Arc::new(services),
        Err(e) => {
            error!("Failed to build services: {}", e);
            std::process::exit(1);
        }
    };

    // Restore jobs persisted by a previous run
    if let Err(e) = services.store.load().await {
        error!("Failed to load job snapshot: {}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Background snapshot/retention sweeper
    let sweeper = edvid_store::spawn_sweeper(Arc::clone(&services.store), shutdown_rx.clone());

    // Signal handler
    let queue = Arc::clone(&services.queue);
    let signal_task = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        queue.close();
        shutdown_tx.send(true).ok();
    });

    let orchestrator = Orchestrator::new(services);
    orchestrator.run(shutdown_rx).await;

    signal_task.abort();
    sweeper.await.ok();

    info!("Engine shutdown complete");
}
