//! Portcullis nonce service - main entry point
//!
//! Runs one nonce service instance behind the nonce RPC listener.

use anyhow::{Context, Result};
use clap::Parser;
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use portcullis_config::Config;
use portcullis_nonce::{serve_metrics, NonceMetrics, NonceServer, NonceService};

/// Portcullis nonce service
#[derive(Parser, Debug)]
#[command(name = "portcullis-nonce")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "PORTCULLIS_CONFIG")]
    config: Option<String>,

    /// Override the listen address from the configuration
    #[arg(short = 'l', long = "listen")]
    listen: Option<String>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long = "json-logs")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration file: {}", path);
            Config::from_file(path).context("Failed to load configuration file")?
        }
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    if let Some(listen) = cli.listen {
        config.nonce.listen_address = listen;
    }

    let report = config
        .validate()
        .context("Configuration validation failed")?;
    for warning in &report.warnings {
        warn!("{}", warning.message);
    }

    if cli.test {
        info!("Configuration test successful");
        return Ok(());
    }

    run_server(config).await
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn run_server(config: Config) -> Result<()> {
    let registry = Registry::new();
    let metrics = NonceMetrics::new(&registry).context("Failed to register nonce metrics")?;
    let service = NonceService::from_config(&config.nonce, metrics)
        .context("Failed to create nonce service")?;
    let server = NonceServer::new(Arc::new(service));

    if let Some(address) = &config.nonce.metrics_address {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind metrics address {}", address))?;
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(listener, registry).await {
                error!(error = %e, "Metrics endpoint failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.nonce.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.nonce.listen_address))?;

    tokio::select! {
        result = server.serve(listener) => {
            result.context("Nonce server failed")?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping nonce service");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
