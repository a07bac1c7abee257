//! ETA Daemon - Main entry point
//!
//! Keeps the sensor assignments of one ETA controller current and serves
//! them, their values and the active error list over REST and WebSocket.

mod api;
mod config;
mod server;
mod state;
mod store;
mod ws;

use anyhow::{Context, Result};
use clap::Parser;
use eta_core::RecordedResponses;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "etad")]
#[command(about = "ETA heating controller sensor daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "etad.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single rediscovery and exit
    #[arg(long)]
    scan_once: bool,

    /// Answer requests from a recorded-responses file instead of the device
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("etad v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        host = %config.device.host,
        port = config.device.port,
        parallel = %config.discovery.max_parallel_requests,
        legacy = config.device.force_legacy_mode,
        "Configuration loaded"
    );

    let replay = match &args.replay {
        Some(path) => Some(
            RecordedResponses::from_file(path)
                .with_context(|| format!("Failed to load recorded responses from {}", path.display()))?,
        ),
        None => None,
    };

    let state = state::AppState::new(config.clone(), replay).await?;

    if args.scan_once {
        info!("Running single discovery scan");
        let summary = state.rediscover().await?;
        let sensors = state.sensors().await;
        println!(
            "Discovered {} sensors on {} (API {}), {} added, {} orphaned:",
            sensors.len(),
            state.host(),
            state.scanner.client().capabilities().reported(),
            summary.added.len(),
            summary.orphaned.len()
        );
        for sensor in sensors {
            let a = &sensor.assignment;
            print!("  - {} [{:?}] {}", a.label, a.kind, a.id);
            if let Some(unit) = &sensor.display_unit {
                print!(" ({})", unit);
            }
            if !sensor.verified {
                print!(" unverified range");
            }
            println!();
        }
        if !summary.failures.is_empty() {
            println!("{} endpoints failed:", summary.failures.len());
            for failure in &summary.failures {
                println!("  - {} ({:?}): {}", failure.uri, failure.stage, failure.error);
            }
        }
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
