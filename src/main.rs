//! ApacheWeb Kubernetes Operator
//!
//! Main entry point for the operator. Loads configuration, sets up the
//! Kubernetes client and runs the ApacheWeb reconciliation loop.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use apacheweb_operator::{
    config::OperatorConfig,
    controllers::{self, Context},
    metrics,
    platform::KubePlatform,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting ApacheWeb Operator");

    let config = OperatorConfig::load()?;
    info!(
        metrics_port = config.metrics_port,
        image = %config.image,
        concurrency = config.concurrency,
        "Loaded operator configuration"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Create shared context
    let metrics_port = config.metrics_port;
    let platform = Arc::new(KubePlatform::new(client.clone(), config.field_manager.clone()));
    let context = Arc::new(Context::new(platform, config));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let controller = controllers::run_apache_web_controller(client, context);

    // Handle graceful shutdown
    tokio::select! {
        _ = controller => {
            info!("ApacheWeb controller stopped");
        }
        result = metrics_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
                Err(e) => error!(error = %e, "Metrics server task panicked"),
                Ok(Ok(())) => error!("Metrics server exited unexpectedly"),
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    info!("ApacheWeb Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
