//! Tapgate daemon
//!
//! Runs the agent-authentication gateway:
//! - Reads configuration from the environment
//! - Serves the gate-and-proxy router on the configured port
//! - Sweeps the nonce table on an interval

use clap::Parser;
use std::sync::Arc;
use tapgate_lib::replay::SWEEP_INTERVAL;
use tapgate_lib::{Gateway, GatewayConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tapgate-server")]
#[command(author, version, about = "Agent authentication gateway", long_about = None)]
struct Args {
    /// Listen port (overrides LISTEN_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::from_env();
    if let Some(port) = args.port {
        config.listen_port = port;
    }

    let default_level = if config.debug {
        "debug"
    } else {
        args.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        registry = %config.registry_url,
        api_upstream = %config.api_upstream_url,
        app_upstream = %config.app_upstream_url,
        "starting gateway"
    );

    let gateway = Arc::new(Gateway::new(config.clone())?);
    gateway.replay_guard().spawn_sweeper(SWEEP_INTERVAL);

    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!("gateway listening on 0.0.0.0:{}", config.listen_port);
    axum::serve(listener, gateway.router()).await?;

    Ok(())
}
