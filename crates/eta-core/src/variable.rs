//! Variable metadata and raw values returned by the controller

use serde::{Deserialize, Serialize};

/// Placeholder the controller reports for variables without a valid value
pub const INVALID_VALUE: &str = "xxx";

/// Units assigned by the classifier for payloads the device reports without one
pub mod units {
    pub const MINUTES_SINCE_MIDNIGHT: &str = "minutes_since_midnight";
    pub const TIMESLOT: &str = "timeslot";
    pub const TIMESLOT_PLUS_TEMPERATURE: &str = "timeslot_plus_temperature";
    pub const UNITLESS: &str = "unitless";

    pub const CUSTOM: &[&str] = &[
        MINUTES_SINCE_MIDNIGHT,
        TIMESLOT,
        TIMESLOT_PLUS_TEMPERATURE,
        UNITLESS,
    ];

    /// Units whose values are read as scaled numbers
    pub const NUMERIC: &[&str] = &[
        "%", "A", "Hz", "Ohm", "Pa", "U/min", "V", "W", "W/m²", "bar", "kW", "kWh", "kg", "l",
        "l/min", "mV", "m²", "s", "°C", "%rH", UNITLESS,
    ];

    /// Units eligible for a writable companion sensor
    pub const WRITABLE: &[&str] = &[
        "%",
        "°C",
        "kg",
        MINUTES_SINCE_MIDNIGHT,
        TIMESLOT,
        TIMESLOT_PLUS_TEMPERATURE,
        UNITLESS,
    ];

    pub fn is_custom(unit: &str) -> bool {
        CUSTOM.contains(&unit)
    }

    pub fn is_numeric(unit: &str) -> bool {
        NUMERIC.contains(&unit)
    }

    pub fn is_writable(unit: &str) -> bool {
        WRITABLE.contains(&unit)
    }
}

/// Variable types the controller reports in `varinfo`
pub mod var_type {
    pub const DEFAULT: &str = "DEFAULT";
    pub const TEXT: &str = "TEXT";
}

/// One entry of an enumerated value set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumEntry {
    pub label: String,
    pub raw: i64,
}

/// Legal values for a variable, in device (unscaled) units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidValues {
    Enumeration { entries: Vec<EnumEntry> },
    Range { min: f64, max: f64 },
    /// Quarter-hour time slots, optionally carrying a raw temperature range
    Slots {
        min_begin: i64,
        max_end: i64,
        temperature: Option<(f64, f64)>,
    },
}

/// Metadata from the `varinfo` endpoint (API 1.2 and later)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub uri: String,
    pub name: String,
    pub full_name: String,
    pub unit: String,
    pub scale_factor: i64,
    pub dec_places: u32,
    pub adv_text_offset: i64,
    pub var_type: String,
    /// Writability as reported by the device, when the attribute is present
    pub writable: Option<bool>,
    pub valid_values: Option<ValidValues>,
}

/// Result of a metadata query for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "info", rename_all = "snake_case")]
pub enum Metadata {
    Full(VariableInfo),
    /// The device generation has no metadata endpoint
    NotSupported,
}

impl Metadata {
    pub fn info(&self) -> Option<&VariableInfo> {
        match self {
            Metadata::Full(info) => Some(info),
            Metadata::NotSupported => None,
        }
    }
}

/// A reading from the `var` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawValue {
    pub uri: String,
    /// Unscaled numeric text of the element
    pub text: String,
    /// Device formatted string value
    pub str_value: String,
    pub unit: String,
    pub scale_factor: i64,
    pub dec_places: u32,
    pub adv_text_offset: i64,
}

impl RawValue {
    /// Whether the device reported the invalid-value placeholder
    pub fn is_placeholder(&self) -> bool {
        self.str_value.trim() == INVALID_VALUE
    }

    /// Unscaled integer code, used for switch states
    pub fn raw_code(&self) -> Option<i64> {
        self.text.trim().parse().ok()
    }

    /// Scaled numeric value.
    ///
    /// Decimal places are deliberately not applied so no precision the
    /// device sends is lost.
    pub fn scaled(&self) -> Option<f64> {
        let raw: f64 = self.text.trim().parse().ok()?;
        let factor = if self.scale_factor == 0 {
            1
        } else {
            self.scale_factor
        };
        Some(raw / factor as f64)
    }

    /// Whether the formatted value consists of digits only
    pub fn str_value_is_numeric(&self) -> bool {
        let s = self.str_value.trim();
        !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
    }
}
