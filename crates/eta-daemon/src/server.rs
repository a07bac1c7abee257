//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use eta_discovery::RefreshMode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(api::get_status))
        .route("/api/config", get(api::get_config))
        .route("/api/sensors", get(api::list_sensors))
        .route("/api/sensors/{id}", get(api::get_sensor))
        .route("/api/sensors/{id}/write", post(api::write_sensor))
        .route("/api/scan", post(api::trigger_scan))
        .route("/api/errors", get(api::list_errors))
        .route("/api/errors/resend", post(api::resend_errors))
        .route("/api/orphans", get(api::list_orphans))
        .route("/api/orphans/{id}", delete(api::forget_orphan))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server with the scan and error poll loops in the background
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state.clone());

    let scans = state.clone();
    tokio::spawn(async move { scan_loop(scans).await });

    let monitor = state.monitor.clone();
    tokio::spawn(async move { monitor.run().await });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Initial scan, then periodic scans in the configured mode
async fn scan_loop(state: Arc<AppState>) {
    let first = if state.sensors().await.is_empty() {
        RefreshMode::Rediscover
    } else {
        RefreshMode::Values
    };
    if let Err(e) = state.scan(first).await {
        warn!(error = %e, "Initial scan failed");
    }

    let secs = state.config.discovery.scan_interval_secs;
    if secs == 0 {
        info!("Periodic scans disabled");
        return;
    }

    let mode = state.config.discovery.refresh_mode;
    let mut ticker = interval(Duration::from_secs(secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = state.scan(mode).await {
            warn!(error = %e, mode = ?mode, "Periodic scan failed");
        }
    }
}
