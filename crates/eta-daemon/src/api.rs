//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use eta_client::ClientError;
use eta_core::{SensorId, WriteValue};
use eta_discovery::RefreshMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::state::{AppState, RefreshError, WriteError};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Controller, assignment and error overview
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status().await)
}

/// List all active sensors with their current values
pub async fn list_sensors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sensors().await)
}

pub async fn get_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.sensor(&SensorId(id)).await {
        Some(sensor) => Json(sensor).into_response(),
        None => (StatusCode::NOT_FOUND, Json(ApiError::new("Sensor not found"))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct ScanQuery {
    /// `values` or `rediscover`, defaults to a full rediscovery
    #[serde(default)]
    mode: Option<RefreshMode>,
}

/// Run a scan and return its summary
pub async fn trigger_scan(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScanQuery>,
) -> impl IntoResponse {
    let mode = query.mode.unwrap_or(RefreshMode::Rediscover);
    info!(mode = ?mode, "Manual scan triggered");

    match state.scan(mode).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            let status = match &e {
                RefreshError::Scan(_) => StatusCode::BAD_GATEWAY,
                RefreshError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ApiError::new(format!("Scan failed: {}", e)))).into_response()
        }
    }
}

/// Write a user value to a writable or switch sensor
pub async fn write_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(value): Json<WriteValue>,
) -> impl IntoResponse {
    let id = SensorId(id);
    info!(sensor = %id, value = ?value, "Write requested");

    match state.write(&id, &value).await {
        Ok(value) => Json(serde_json::json!({
            "status": "written",
            "id": id,
            "value": value
        }))
        .into_response(),
        Err(e) => {
            warn!(sensor = %id, error = %e, "Write failed");
            let status = match &e {
                WriteError::NotFound(_) => StatusCode::NOT_FOUND,
                WriteError::Domain(_) | WriteError::Client(ClientError::RejectedByDevice { .. }) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                WriteError::Client(ClientError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
                WriteError::Client(_) => StatusCode::BAD_GATEWAY,
            };
            (status, Json(ApiError::new(e.to_string()))).into_response()
        }
    }
}

/// Currently active controller errors
pub async fn list_errors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "summary": state.monitor.summary().await,
        "errors": state.monitor.active().await
    }))
}

/// Emit "detected" again for every active error
pub async fn resend_errors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let events = state.monitor.resend_all().await;
    Json(serde_json::json!({
        "status": "resent",
        "count": events.len()
    }))
}

/// Assignments whose endpoint disappeared or was relabeled
pub async fn list_orphans(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orphans().await)
}

pub async fn forget_orphan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    info!(sensor = %id, "Forget orphan requested");

    match state.forget(&SensorId(id.clone())).await {
        Ok(Some(_)) => Json(serde_json::json!({
            "status": "forgotten",
            "id": id
        }))
        .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(ApiError::new("Orphan not found"))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Failed to save assignments: {}", e))),
        )
            .into_response(),
    }
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}
