//! Error monitor edge triggering

use async_trait::async_trait;
use eta_client::{ClientConfig, ClientError, EtaClient, Transport};
use eta_core::ErrorEvent;
use eta_discovery::ErrorMonitor;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BOILER_ERROR: &str = r#"<error msg="Flue gas sensor Interrupted" priority="Error" time="2026-01-05 11:32:00">Sensor or cable broken</error>"#;
const PRESSURE_ERROR: &str = r#"<error msg="Water pressure too low" priority="Warning" time="2026-01-05 12:10:00">Top up heating water</error>"#;

/// Serves a scripted sequence of error lists, one per poll
struct ScriptedErrors {
    polls: Mutex<VecDeque<Vec<&'static str>>>,
    delays: Mutex<VecDeque<Duration>>,
}

impl ScriptedErrors {
    fn new(polls: Vec<Vec<&'static str>>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
            delays: Mutex::new(VecDeque::new()),
        }
    }

    /// Delay the n-th error list response by the n-th duration
    fn with_delays(self, delays: Vec<Duration>) -> Self {
        *self.delays.lock().unwrap() = delays.into();
        self
    }
}

#[async_trait]
impl Transport for ScriptedErrors {
    async fn get(&self, path: &str) -> Result<String, ClientError> {
        match path {
            "/user/api" => Ok(r#"<eta><api version="1.2"/></eta>"#.to_string()),
            "/user/errors" => {
                let errors = self.polls.lock().unwrap().pop_front().ok_or(ClientError::Http {
                    path: path.to_string(),
                    status: 503,
                })?;
                let delay = self.delays.lock().unwrap().pop_front();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(format!(
                    r#"<eta><errors uri="/user/errors"><fub uri="/112/10021" name="Kessel">{}</fub></errors></eta>"#,
                    errors.concat()
                ))
            }
            _ => Err(ClientError::Http {
                path: path.to_string(),
                status: 404,
            }),
        }
    }

    async fn post(&self, path: &str, _form: &[(&'static str, String)]) -> Result<String, ClientError> {
        Err(ClientError::Http {
            path: path.to_string(),
            status: 405,
        })
    }
}

async fn monitor(polls: Vec<Vec<&'static str>>) -> ErrorMonitor {
    monitor_with(ScriptedErrors::new(polls)).await
}

async fn monitor_with(transport: ScriptedErrors) -> ErrorMonitor {
    let config = ClientConfig {
        host: "10.0.0.9".to_string(),
        port: 8080,
        ..Default::default()
    };
    let client = EtaClient::with_transport(Arc::new(transport), &config)
        .await
        .unwrap();
    ErrorMonitor::new(client, Duration::from_secs(120))
}

#[tokio::test]
async fn test_edge_triggered_sequence() {
    let monitor = monitor(vec![vec![], vec![BOILER_ERROR], vec![BOILER_ERROR], vec![]]).await;

    assert!(monitor.poll_once().await.unwrap().is_empty());

    let detected = monitor.poll_once().await.unwrap();
    assert_eq!(detected.len(), 1);
    assert!(matches!(&detected[0], ErrorEvent::Detected(e) if e.message == "Flue gas sensor Interrupted"));
    assert_eq!(detected[0].error().host, "10.0.0.9");
    assert_eq!(detected[0].error().port, 8080);

    assert!(monitor.poll_once().await.unwrap().is_empty());

    let cleared = monitor.poll_once().await.unwrap();
    assert_eq!(cleared.len(), 1);
    assert!(matches!(&cleared[0], ErrorEvent::Cleared(e) if e.fub == "Kessel"));
}

#[tokio::test]
async fn test_events_are_broadcast() {
    let monitor = monitor(vec![vec![BOILER_ERROR], vec![PRESSURE_ERROR]]).await;
    let mut rx = monitor.subscribe();

    monitor.poll_once().await.unwrap();
    monitor.poll_once().await.unwrap();

    assert_eq!(rx.recv().await.unwrap().name(), "error_detected");
    // cleared before detected within one poll
    assert_eq!(rx.recv().await.unwrap().name(), "error_cleared");
    let last = rx.recv().await.unwrap();
    assert_eq!(last.name(), "error_detected");
    assert_eq!(last.error().message, "Water pressure too low");
}

#[tokio::test]
async fn test_resend_and_summary() {
    let monitor = monitor(vec![vec![BOILER_ERROR, PRESSURE_ERROR]]).await;
    monitor.poll_once().await.unwrap();

    let resent = monitor.resend_all().await;
    assert_eq!(resent.len(), 2);
    assert!(resent.iter().all(|e| matches!(e, ErrorEvent::Detected(_))));

    let summary = monitor.summary().await;
    assert!(summary.has_active);
    assert_eq!(summary.count, 2);
    assert_eq!(summary.latest_message.as_deref(), Some("Water pressure too low"));
    assert_eq!(monitor.active().await.len(), 2);
}

#[tokio::test]
async fn test_failed_poll_keeps_state() {
    let monitor = monitor(vec![vec![BOILER_ERROR]]).await;
    monitor.poll_once().await.unwrap();

    // script exhausted, the device answers 503
    assert!(monitor.poll_once().await.is_err());
    assert_eq!(monitor.active().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_polls_apply_in_order() {
    // the first response is slower than the second
    let transport = ScriptedErrors::new(vec![vec![BOILER_ERROR], vec![]])
        .with_delays(vec![Duration::from_millis(100), Duration::from_millis(10)]);
    let monitor = monitor_with(transport).await;
    let mut rx = monitor.subscribe();

    let (first, second) = tokio::join!(monitor.poll_once(), monitor.poll_once());
    assert_eq!(first.unwrap().len(), 1);
    assert_eq!(second.unwrap().len(), 1);

    assert_eq!(rx.recv().await.unwrap().name(), "error_detected");
    assert_eq!(rx.recv().await.unwrap().name(), "error_cleared");
    assert!(monitor.active().await.is_empty());
}
