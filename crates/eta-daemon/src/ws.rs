//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use eta_core::{ActiveError, ErrorEvent};
use eta_discovery::{DiscoveryEvent, RefreshMode};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, DaemonEvent, ScanSummary, StatusView};

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "status")]
    Status(StatusView),
    #[serde(rename = "scan_started")]
    ScanStarted { mode: RefreshMode },
    #[serde(rename = "scan_completed")]
    ScanCompleted {
        mode: RefreshMode,
        sensors: usize,
        failed: usize,
    },
    #[serde(rename = "scan_failed")]
    ScanFailed { mode: RefreshMode, error: String },
    #[serde(rename = "error_detected")]
    ErrorDetected(ActiveError),
    #[serde(rename = "error_cleared")]
    ErrorCleared(ActiveError),
    #[serde(rename = "assignments_changed")]
    AssignmentsChanged(ScanSummary),
    #[serde(rename = "pong")]
    Pong,
}

impl From<DaemonEvent> for WsMessage {
    fn from(event: DaemonEvent) -> Self {
        match event {
            DaemonEvent::Discovery(DiscoveryEvent::ScanStarted { mode }) => WsMessage::ScanStarted { mode },
            DaemonEvent::Discovery(DiscoveryEvent::ScanCompleted { mode, sensors, failed }) => {
                WsMessage::ScanCompleted { mode, sensors, failed }
            }
            DaemonEvent::Discovery(DiscoveryEvent::ScanFailed { mode, error }) => {
                WsMessage::ScanFailed { mode, error }
            }
            DaemonEvent::Error(ErrorEvent::Detected(e)) => WsMessage::ErrorDetected(e),
            DaemonEvent::Error(ErrorEvent::Cleared(e)) => WsMessage::ErrorCleared(e),
            DaemonEvent::AssignmentsChanged(summary) => WsMessage::AssignmentsChanged(summary),
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    // Send current status on connect
    let hello = WsMessage::Status(state.status().await);
    if let Ok(json) = serde_json::to_string(&hello) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let msg = WsMessage::from(event);
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Event channel lagged");
                    }
                    Err(e) => {
                        debug!(error = %e, "Event channel error");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" {
                            if let Ok(pong) = serde_json::to_string(&WsMessage::Pong) {
                                if sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn error() -> ActiveError {
        ActiveError {
            message: "Flue gas sensor Interrupted".to_string(),
            priority: "Error".to_string(),
            time: NaiveDate::from_ymd_opt(2026, 1, 5).and_then(|d| d.and_hms_opt(11, 32, 0)),
            text: "Sensor or cable broken".to_string(),
            fub: "Kessel".to_string(),
            host: "192.168.0.25".to_string(),
            port: 8080,
        }
    }

    #[test]
    fn test_message_format() {
        let msg = WsMessage::from(DaemonEvent::Discovery(DiscoveryEvent::ScanCompleted {
            mode: RefreshMode::Values,
            sensors: 12,
            failed: 1,
        }));
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "scan_completed",
                "data": {"mode": "values", "sensors": 12, "failed": 1}
            })
        );

        let json = serde_json::to_value(WsMessage::from(DaemonEvent::Error(ErrorEvent::Cleared(error())))).unwrap();
        assert_eq!(json["type"], "error_cleared");
        assert_eq!(json["data"]["msg"], "Flue gas sensor Interrupted");
        assert_eq!(json["data"]["fub"], "Kessel");

        let json = serde_json::to_value(WsMessage::from(DaemonEvent::Discovery(DiscoveryEvent::ScanFailed {
            mode: RefreshMode::Rediscover,
            error: "HTTP 404 from /user/menu".to_string(),
        })))
        .unwrap();
        assert_eq!(json["type"], "scan_failed");
        assert_eq!(json["data"]["mode"], "rediscover");

        assert_eq!(serde_json::to_string(&WsMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
    }
}
