//! Active error tracking
//!
//! The tracker keeps only the latest error set. Each poll is diffed against
//! it by identity key: new keys are "detected", vanished keys are "cleared",
//! keys present in both produce nothing.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::sensor::{SensorId, SensorValue};

/// Timestamp format used by the controller
pub const ERROR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Placeholder shown by the latest-error sensor when nothing is active
pub const NO_ERROR: &str = "-";

/// One currently reported fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveError {
    #[serde(rename = "msg")]
    pub message: String,
    pub priority: String,
    /// Device timestamp, `None` when the device reported none
    pub time: Option<NaiveDateTime>,
    pub text: String,
    /// Label of the functional block that raised the error
    pub fub: String,
    pub host: String,
    pub port: u16,
}

impl ActiveError {
    pub fn key(&self) -> ErrorKey {
        ErrorKey {
            fub: self.fub.clone(),
            time: self.time,
            message: self.message.clone(),
        }
    }
}

/// Identity of an error across polls
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorKey {
    pub fub: String,
    pub time: Option<NaiveDateTime>,
    pub message: String,
}

/// Edge-triggered notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ErrorEvent {
    #[serde(rename = "error_detected")]
    Detected(ActiveError),
    #[serde(rename = "error_cleared")]
    Cleared(ActiveError),
}

impl ErrorEvent {
    pub fn error(&self) -> &ActiveError {
        match self {
            ErrorEvent::Detected(e) | ErrorEvent::Cleared(e) => e,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorEvent::Detected(_) => "error_detected",
            ErrorEvent::Cleared(_) => "error_cleared",
        }
    }
}

/// Values for the error sensor family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub has_active: bool,
    pub count: usize,
    pub latest_message: Option<String>,
}

impl ErrorSummary {
    /// Values keyed the way `classifier::error_family` names its sensors
    pub fn sensor_values(&self, host: &str) -> Vec<(SensorId, SensorValue)> {
        vec![
            (SensorId::for_device(host, "errors"), SensorValue::Switch(self.has_active)),
            (
                SensorId::for_device(host, "nbr_active_errors"),
                SensorValue::Number(self.count as f64),
            ),
            (
                SensorId::for_device(host, "latest_error"),
                SensorValue::Text(
                    self.latest_message
                        .clone()
                        .unwrap_or_else(|| NO_ERROR.to_string()),
                ),
            ),
        ]
    }
}

/// Holds the active error set between polls
#[derive(Debug, Default)]
pub struct ErrorTracker {
    current: Vec<ActiveError>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active set and return the transitions, cleared first
    pub fn update(&mut self, errors: Vec<ActiveError>) -> Vec<ErrorEvent> {
        let errors = dedupe(errors);
        let new_keys: HashSet<ErrorKey> = errors.iter().map(ActiveError::key).collect();
        let old_keys: HashSet<ErrorKey> = self.current.iter().map(ActiveError::key).collect();

        let mut events = Vec::new();
        for error in &self.current {
            if !new_keys.contains(&error.key()) {
                info!(fub = %error.fub, msg = %error.message, "Error cleared");
                events.push(ErrorEvent::Cleared(error.clone()));
            }
        }
        for error in &errors {
            if !old_keys.contains(&error.key()) {
                info!(
                    fub = %error.fub,
                    msg = %error.message,
                    priority = %error.priority,
                    "Error detected"
                );
                events.push(ErrorEvent::Detected(error.clone()));
            }
        }

        debug!(active = errors.len(), events = events.len(), "Error poll processed");
        self.current = errors;
        events
    }

    /// Replay "detected" for every active error
    pub fn resend_all(&self) -> Vec<ErrorEvent> {
        self.current.iter().cloned().map(ErrorEvent::Detected).collect()
    }

    pub fn active(&self) -> &[ActiveError] {
        &self.current
    }

    pub fn summary(&self) -> ErrorSummary {
        // newest by device time; errors without a time sort first
        let latest = self.current.iter().max_by_key(|e| e.time);
        ErrorSummary {
            has_active: !self.current.is_empty(),
            count: self.current.len(),
            latest_message: latest.map(|e| e.message.clone()),
        }
    }
}

fn dedupe(errors: Vec<ActiveError>) -> Vec<ActiveError> {
    let mut seen = HashSet::new();
    errors.into_iter().filter(|e| seen.insert(e.key())).collect()
}

/// Parse a controller timestamp, empty strings yield `None`
pub fn parse_error_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, ERROR_TIME_FORMAT).ok()
}
