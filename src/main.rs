use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{BackendKind, LogFormat, LoggingConfig, TurnstileConfig};
use turnstile::http::{HttpServer, ThrottleState};
use turnstile::mesh::Cluster;
use turnstile::ratelimit::{DistributedRateLimiter, RateLimitBackend, RateLimiter, Sweeper};

/// Fixed-window rate limit decision service.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Override the counter store
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Override the log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(backend) = args.backend {
        config.rate_limiting.backend = backend;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    info!("Starting Turnstile Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(http_addr = %config.server.http_addr, backend = ?config.rate_limiting.backend, "Configuration loaded");

    let policies = config.rate_limiting.policy_table()?;
    info!(policies = policies.policies.len(), routes = policies.routes.len(), "Policies loaded");

    // Initialize the counter store
    let mut cluster: Option<Arc<Cluster>> = None;
    let backend: Arc<dyn RateLimitBackend> = match config.rate_limiting.backend {
        BackendKind::Local => Arc::new(RateLimiter::new()),
        BackendKind::Distributed => {
            let mesh = Arc::new(Cluster::start(config.mesh.to_cluster_config()).await?);
            cluster = Some(mesh.clone());
            Arc::new(DistributedRateLimiter::new(mesh))
        }
    };
    info!(backend = backend.name(), "Rate limiter initialized");

    let sweeper = Sweeper::spawn(backend.clone(), config.rate_limiting.sweep_interval());

    let state = ThrottleState::new(backend, policies);
    let server = HttpServer::new(config.server.http_addr, state);

    // Run the server with graceful shutdown on Ctrl+C
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.stop().await;
    if let Some(cluster) = cluster {
        match Arc::try_unwrap(cluster) {
            Ok(cluster) => cluster.shutdown().await?,
            Err(_) => tracing::warn!("Cluster still referenced at shutdown; skipping graceful leave"),
        }
    }

    served?;
    info!("Turnstile Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
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
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
