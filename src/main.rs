// RabbitMQ Exporter - Prometheus exporter for RabbitMQ management statistics
//
// Polls the management API of one or more RabbitMQ nodes and republishes their
// object counts and queued-message totals as labeled gauges.
//
// # Features
// - Connections, channels, queues, consumers and exchanges per node
// - Total messages across all queues per node
// - Independent polling interval per node
// - Gauges labeled with the node name reported by the broker
// - Systemd-friendly JSON logging
//
// # Usage
// rabbitmq-exporter
//
// Reads `config.json` from the working directory and serves
// http://0.0.0.0:<port>/metrics

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rabbitmq_exporter::config::{ExporterConfig, CONFIG_PATH};
use rabbitmq_exporter::http;
use rabbitmq_exporter::scheduler::{PollScheduler, PollTarget};
use rabbitmq_exporter::source::HttpBrokerSource;
use rabbitmq_exporter::storage::MetricStore;

/// Application entry point
///
/// This function:
/// 1. Initializes logging
/// 2. Loads the node list from the configuration file
/// 3. Creates the metric store and one broker source per node
/// 4. Starts the poll scheduler
/// 5. Serves the metrics endpoint until Ctrl+C / SIGTERM
#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("=== RabbitMQ Exporter Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ExporterConfig::load(CONFIG_PATH).context("Failed to load exporter configuration")?;
    let port = config.listen_port()?;

    let store = Arc::new(MetricStore::new().context("Failed to register gauges")?);

    // One HTTP client for all nodes
    let client = reqwest::Client::new();
    let targets: Vec<PollTarget> = config
        .nodes
        .iter()
        .map(|node| {
            PollTarget::new(
                Box::new(HttpBrokerSource::new(client.clone(), node)),
                config.effective_interval(node),
            )
        })
        .collect();

    let shutdown = CancellationToken::new();
    let scheduler = PollScheduler::new(Arc::clone(&store), shutdown.clone());
    let scheduler_handle = tokio::spawn(scheduler.start(targets));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("=== RabbitMQ Exporter Started Successfully ===");
    info!("Starting RabbitMQ exporter on port: {}", port);
    info!("Press Ctrl+C to stop");

    axum::serve(listener, http::app(store))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Metrics server failed")?;

    // Server is down, make sure the poll loops follow
    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        error!("Poll scheduler panicked: {}", e);
    }

    info!("=== RabbitMQ Exporter Stopped ===");
    Ok(())
}

/// Initializes the logging subsystem
///
/// Sets up structured logging with:
/// - Timestamp for each log entry
/// - Log level (INFO, WARN, ERROR, etc.)
/// - Target module name
/// - Colored output when running in terminal
/// - JSON output when running as systemd service
///
/// # Log Levels
/// Default: INFO
/// Can be overridden with RUST_LOG environment variable
///
/// # Examples
/// ```bash
/// RUST_LOG=debug rabbitmq-exporter               # Enable debug logging
/// RUST_LOG=rabbitmq_exporter=warn rabbitmq-exporter  # Only warnings and errors
/// ```
fn init_logging() {
    // Systemd sets INVOCATION_ID for the services it starts
    let is_systemd = env::var("INVOCATION_ID").is_ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if is_systemd {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Resolves on Ctrl+C or SIGTERM and cancels the poll loops
async fn shutdown_signal(shutdown: CancellationToken) {
    let _shutdown_guard = shutdown.drop_guard();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
