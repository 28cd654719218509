//! Weighted Balancer - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tokio::signal;
use tokio::sync::watch;
use weighted_balancer::{
    BackendPool, BackendSelector, Listener, api, config::BalancerConfig, metrics,
};

#[derive(Parser, Debug)]
#[command(name = "weighted-balancer")]
#[command(about = "Projected-load TCP load balancer", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the port used to reach backends
    #[arg(long)]
    backend_port: Option<u16>,

    /// Serve the admin API on this port
    #[arg(long)]
    admin_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting Weighted Balancer");

    // Load configuration
    let mut config = BalancerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(port) = cli.backend_port {
        config.backend_port = Some(port);
    }
    if let Some(port) = cli.admin_port {
        config.admin_port = Some(port);
    }

    config.validate()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        backends = config.backends.len(),
        backend_port = ?config.backend_port,
        buffer_size = config.buffer_size,
        max_sessions = config.max_sessions,
        policy = ?config.connection_policy,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // Backend connections and the client listener are the only fatal failures
    let endpoints = config.endpoints();
    let pool = BackendPool::connect(endpoints.clone(), config.connection_policy)
        .await
        .context("Failed to connect to backends")?;

    let selector = BackendSelector::new(config.weight_table()?, Instant::now());
    let listener = Listener::bind(&config, selector, pool)
        .await
        .context("Failed to start listener")?;

    // Admin API
    let (stop_tx, stop_rx) = watch::channel(false);
    let admin_handle = match config.admin_port {
        Some(port) => {
            let state = api::AppState {
                endpoints: endpoints.into(),
                loads: listener.subscribe_loads(),
                prometheus_handle,
            };
            let app = api::create_router(state);

            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            tracing::info!(addr = %addr, "Starting admin API server");

            let admin_listener = tokio::net::TcpListener::bind(addr)
                .await
                .context("Failed to bind admin API server")?;

            Some(tokio::spawn(async move {
                let mut stop_rx = stop_rx;
                let result = axum::serve(admin_listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop_rx.wait_for(|stopped| *stopped).await;
                    })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Admin API server error");
                }
            }))
        }
        None => None,
    };

    listener.run(shutdown_signal()).await;

    tracing::info!("Shutting down...");

    let _ = stop_tx.send(true);
    if let Some(handle) = admin_handle
        && let Err(e) = handle.await
    {
        tracing::error!(error = %e, "Admin API task failed");
    }

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
