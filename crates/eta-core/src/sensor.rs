//! Sensor assignments: the durable mapping from endpoint to host entity

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::variable::units;

/// Stable identifier of a sensor, derived from the device host and endpoint URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SensorId(pub String);

const WRITABLE_SUFFIX: &str = "_writable";

impl SensorId {
    /// Identifier for the read side of an endpoint
    pub fn for_endpoint(host: &str, uri: &str) -> Self {
        let path: Vec<&str> = uri.split('/').filter(|s| !s.is_empty()).collect();
        Self(format!("eta_{}_{}", sanitize(host), path.join("_")))
    }

    /// Identifier for a device-wide derived sensor such as the error count
    pub fn for_device(host: &str, name: &str) -> Self {
        Self(format!("eta_{}_{}", sanitize(host), name))
    }

    /// Identifier of the writable companion of this sensor
    pub fn writable(&self) -> Self {
        Self(format!("{}{}", self.0, WRITABLE_SUFFIX))
    }

    pub fn is_writable_companion(&self) -> bool {
        self.0.ends_with(WRITABLE_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn sanitize(host: &str) -> String {
    host.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// What kind of host entity a sensor maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Scaled numeric reading
    Numeric,
    /// Device formatted text
    Text,
    /// Time of day stored as minutes since midnight
    Time,
    /// Quarter-hour time slot, optionally with a temperature
    Timeslot,
    /// Two-state switch with raw on/off codes
    Switch,
    /// Writable companion of a read-side sensor
    Writable,
    /// Whether any error is active
    ErrorFlag,
    /// Number of active errors
    ErrorCount,
    /// Message of the most recent active error
    ErrorMessage,
}

impl SensorKind {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ErrorFlag | Self::ErrorCount | Self::ErrorMessage)
    }
}

/// Where a writable range came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeSource {
    /// Reported by the device metadata
    Device,
    /// Defaulted from the unit because the device cannot report it
    Heuristic,
}

/// Numeric range in scaled (user facing) units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
    pub scale_factor: i64,
    pub dec_places: u32,
    pub source: RangeSource,
}

impl NumericRange {
    /// Build a device-sourced range from raw bounds
    pub fn from_raw(raw_min: f64, raw_max: f64, scale_factor: i64, dec_places: u32) -> Self {
        let factor = if scale_factor == 0 { 1 } else { scale_factor };
        Self {
            min: round_to(raw_min / factor as f64, dec_places),
            max: round_to(raw_max / factor as f64, dec_places),
            scale_factor: factor,
            dec_places,
            source: RangeSource::Device,
        }
    }

    /// Smallest settable increment
    pub fn step(&self) -> f64 {
        10f64.powi(-(self.dec_places as i32))
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

pub(crate) fn round_to(value: f64, dec_places: u32) -> f64 {
    let factor = 10f64.powi(dec_places as i32);
    (value * factor).round() / factor
}

/// Legal values of a writable or switch sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueDomain {
    Range(NumericRange),
    /// Minutes since midnight, 0..=1439
    TimeOfDay,
    /// Begin/end in quarter hours (0..=96), with an optional temperature
    Timeslot { temperature: Option<NumericRange> },
    Switch { on: i64, off: i64 },
}

impl ValueDomain {
    pub fn range(&self) -> Option<&NumericRange> {
        match self {
            ValueDomain::Range(range) => Some(range),
            ValueDomain::Timeslot { temperature } => temperature.as_ref(),
            _ => None,
        }
    }
}

/// Durable mapping from a device endpoint to a host entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorAssignment {
    pub id: SensorId,
    /// Endpoint URI read for this sensor
    pub uri: String,
    /// Last known display label
    pub label: String,
    pub kind: SensorKind,
    pub unit: String,
    /// Device variable type (`DEFAULT`, `TEXT`, ...)
    pub endpoint_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<ValueDomain>,
}

impl SensorAssignment {
    pub fn is_writable(&self) -> bool {
        self.kind == SensorKind::Writable
    }

    /// False when the value domain was defaulted rather than reported by the device
    pub fn is_verified(&self) -> bool {
        !matches!(
            self.domain.as_ref().and_then(|d| d.range()),
            Some(NumericRange {
                source: RangeSource::Heuristic,
                ..
            })
        )
    }

    /// Unit to show to users, `None` for unit-less and synthetic units
    pub fn display_unit(&self) -> Option<&str> {
        match self.unit.as_str() {
            "" => None,
            "%rH" => Some("%"),
            u if units::is_custom(u) => None,
            u => Some(u),
        }
    }

    /// Kind, unit and domain, ignoring the label
    pub fn same_shape(&self, other: &SensorAssignment) -> bool {
        self.kind == other.kind
            && self.unit == other.unit
            && self.uri == other.uri
            && self.endpoint_type == other.endpoint_type
            && self.domain == other.domain
    }
}

/// Current value of a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Switch(bool),
    Time(NaiveTime),
    Text(String),
}
