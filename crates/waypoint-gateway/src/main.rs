//! Waypoint gateway binary.
//!
//! Startup:
//! 1. Initialise logging from `WAYPOINT_LOG_LEVEL` / `RUST_LOG`
//! 2. Load configuration (file, then `WAYPOINT_*` overrides) and validate it
//! 3. Load routes and start the proxy and admin listeners
//! 4. Run until Ctrl+C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use waypoint_gateway::{GatewayConfig, GatewayService, VERSION};
use waypoint_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(about = "HTTP gateway with per-route retry, circuit breaking, rate limiting and timeouts")]
#[command(version)]
struct Args {
    /// Gateway configuration file (TOML)
    #[arg(short, long, env = "WAYPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Route definitions file (JSON or TOML); overrides `routes.file`
    #[arg(short, long)]
    routes: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _telemetry = init_telemetry(TelemetryConfig::from_env("waypoint"))
        .context("failed to initialise logging")?;

    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            warn!("No config file given, using defaults");
            GatewayConfig::default()
        }
    };
    config.apply_env_overrides();
    if let Some(routes) = args.routes {
        config.routes.file = Some(routes);
    }
    config.validate().context("invalid configuration")?;

    info!(
        version = VERSION,
        proxy = %config.http_addr(),
        admin = %config.admin_addr(),
        routes = ?config.routes.file,
        "Waypoint configured"
    );

    let service = GatewayService::new(config)?;
    service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
