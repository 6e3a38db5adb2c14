use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodgate::config::FloodgateConfig;
use floodgate::http::{with_admission, AdmissionState, HttpServer, KeySource};
use floodgate::ratelimit::{sweeper, CounterStore};

/// Command line arguments. Flags override the configuration file and environment.
#[derive(Parser, Debug)]
#[command(name = "floodgate")]
#[command(about = "Per-client request admission control", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Requests allowed per client per window
    #[arg(long)]
    requests: Option<u64>,

    /// Window length in seconds
    #[arg(long)]
    window: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Floodgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = FloodgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(requests) = args.requests {
        config.rate_limiting.requests = requests;
    }
    if let Some(window) = args.window {
        config.rate_limiting.window_secs = window;
    }
    // Refuse to start with a policy that cannot be enforced.
    config.validate()?;

    let rl = &config.rate_limiting;
    info!(
        listen_addr = %config.server.listen_addr,
        requests = rl.requests,
        window_secs = rl.window_secs,
        trusted_proxy_header = ?rl.trusted_proxy_header,
        "Configuration loaded"
    );

    let store = Arc::new(CounterStore::new(rl.policy()?));
    let sweeper = sweeper::spawn(store.clone(), rl.sweeper());
    let state = AdmissionState::new(store, KeySource::from_header(rl.trusted_header()?));

    let router = with_admission(Router::new().route("/health", get(health)), state);
    let server = HttpServer::new(config.server.listen_addr, router);

    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.abort();
    info!("Floodgate stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
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
