//! Conversion of user values into raw device writes

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sensor::{round_to, NumericRange, SensorAssignment, SensorKind, SensorValue, ValueDomain};
use crate::variable::RawValue;

const MINUTES_PER_DAY: u32 = 24 * 60;
const SLOTS_PER_DAY: u32 = MINUTES_PER_DAY / 15;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Value {value} outside of [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("Invalid time of day: {0} minutes")]
    InvalidTime(u32),
    #[error("Invalid time slot {begin}..{end}")]
    InvalidSlot { begin: u32, end: u32 },
    #[error("Time slot needs a temperature")]
    MissingTemperature,
    #[error("Time slot does not take a temperature")]
    UnexpectedTemperature,
    #[error("Sensor {0} is not writable")]
    NotWritable(String),
    #[error("Value does not match the sensor's domain")]
    KindMismatch,
}

/// A value a user wants to write, in user units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteValue {
    Number {
        value: f64,
        /// Skip rounding to the declared decimal places and the range check
        #[serde(default)]
        force_decimals: bool,
    },
    Switch { on: bool },
    Time { minutes: u32 },
    Timeslot {
        begin: u32,
        end: u32,
        #[serde(default)]
        temperature: Option<f64>,
    },
}

/// Form fields of a `POST /user/var` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl WritePayload {
    pub fn value(raw: i64) -> Self {
        Self {
            value: Some(raw.to_string()),
            ..Default::default()
        }
    }

    /// Fields in the order the device expects them
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if let Some(v) = &self.value {
            fields.push(("value", v.clone()));
        }
        if let Some(b) = &self.begin {
            fields.push(("begin", b.clone()));
        }
        if let Some(e) = &self.end {
            fields.push(("end", e.clone()));
        }
        fields
    }
}

impl SensorAssignment {
    /// Encode a user value for this sensor's endpoint
    pub fn encode_write(&self, value: &WriteValue) -> Result<WritePayload, DomainError> {
        match (self.kind, &self.domain) {
            (SensorKind::Writable, Some(domain)) | (SensorKind::Switch, Some(domain)) => domain.encode(value),
            _ => Err(DomainError::NotWritable(self.id.to_string())),
        }
    }

    /// Interpret a raw reading according to this sensor's kind
    pub fn interpret(&self, raw: &RawValue) -> Option<SensorValue> {
        match self.kind {
            SensorKind::Numeric => raw.scaled().map(SensorValue::Number),
            SensorKind::Switch => {
                let code = raw.raw_code()?;
                match &self.domain {
                    Some(ValueDomain::Switch { on, .. }) => Some(SensorValue::Switch(code == *on)),
                    _ => None,
                }
            }
            SensorKind::Time => {
                let minutes = raw.scaled()? as u32;
                chrono::NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).map(SensorValue::Time)
            }
            SensorKind::Writable => match &self.domain {
                Some(ValueDomain::Range(_)) => raw.scaled().map(SensorValue::Number),
                Some(ValueDomain::TimeOfDay) => {
                    let minutes = raw.scaled()? as u32;
                    chrono::NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).map(SensorValue::Time)
                }
                _ => Some(SensorValue::Text(raw.str_value.clone())),
            },
            SensorKind::Text | SensorKind::Timeslot => Some(SensorValue::Text(raw.str_value.clone())),
            SensorKind::ErrorFlag | SensorKind::ErrorCount | SensorKind::ErrorMessage => None,
        }
    }
}

impl ValueDomain {
    pub fn encode(&self, value: &WriteValue) -> Result<WritePayload, DomainError> {
        match (self, value) {
            (ValueDomain::Range(range), WriteValue::Number { value, force_decimals }) => {
                encode_number(range, *value, *force_decimals).map(WritePayload::value)
            }
            (ValueDomain::Switch { on, off }, WriteValue::Switch { on: state }) => {
                Ok(WritePayload::value(if *state { *on } else { *off }))
            }
            (ValueDomain::TimeOfDay, WriteValue::Time { minutes }) => {
                if *minutes >= MINUTES_PER_DAY {
                    return Err(DomainError::InvalidTime(*minutes));
                }
                Ok(WritePayload::value(*minutes as i64))
            }
            (ValueDomain::Timeslot { temperature }, WriteValue::Timeslot { begin, end, temperature: t }) => {
                if *begin > SLOTS_PER_DAY || *end > SLOTS_PER_DAY || begin > end {
                    return Err(DomainError::InvalidSlot { begin: *begin, end: *end });
                }
                let value = match (temperature, t) {
                    (Some(range), Some(t)) => Some(encode_number(range, *t, false)?.to_string()),
                    (Some(_), None) => return Err(DomainError::MissingTemperature),
                    (None, Some(_)) => return Err(DomainError::UnexpectedTemperature),
                    (None, None) => None,
                };
                Ok(WritePayload {
                    value,
                    begin: Some(begin.to_string()),
                    end: Some(end.to_string()),
                })
            }
            _ => Err(DomainError::KindMismatch),
        }
    }
}

/// Scale a user value to the raw integer the device stores
fn encode_number(range: &NumericRange, value: f64, force_decimals: bool) -> Result<i64, DomainError> {
    if force_decimals {
        return Ok((value * range.scale_factor as f64).round() as i64);
    }
    if !range.contains(value) {
        return Err(DomainError::OutOfRange {
            value,
            min: range.min,
            max: range.max,
        });
    }
    let rounded = round_to(value, range.dec_places);
    Ok((rounded * range.scale_factor as f64).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{RangeSource, SensorId};

    fn range(min: f64, max: f64, scale: i64, dec: u32) -> NumericRange {
        NumericRange {
            min,
            max,
            scale_factor: scale,
            dec_places: dec,
            source: RangeSource::Device,
        }
    }

    #[test]
    fn test_encode_number() {
        let domain = ValueDomain::Range(range(5.0, 25.0, 10, 1));
        let payload = domain
            .encode(&WriteValue::Number { value: 21.54, force_decimals: false })
            .unwrap();
        assert_eq!(payload.value.as_deref(), Some("215"));
        assert_eq!(payload.fields(), vec![("value", "215".to_string())]);
    }

    #[test]
    fn test_encode_number_out_of_range() {
        let domain = ValueDomain::Range(range(5.0, 25.0, 10, 0));
        let err = domain
            .encode(&WriteValue::Number { value: 30.0, force_decimals: false })
            .unwrap_err();
        assert!(matches!(err, DomainError::OutOfRange { .. }));
    }

    #[test]
    fn test_force_decimals_skips_checks() {
        let domain = ValueDomain::Range(range(5.0, 25.0, 10, 0));
        let payload = domain
            .encode(&WriteValue::Number { value: 30.25, force_decimals: true })
            .unwrap();
        assert_eq!(payload.value.as_deref(), Some("303"));
    }

    #[test]
    fn test_encode_switch_and_time() {
        let switch = ValueDomain::Switch { on: 1803, off: 1802 };
        assert_eq!(switch.encode(&WriteValue::Switch { on: false }).unwrap(), WritePayload::value(1802));

        let time = ValueDomain::TimeOfDay;
        assert_eq!(time.encode(&WriteValue::Time { minutes: 390 }).unwrap(), WritePayload::value(390));
        assert_eq!(
            time.encode(&WriteValue::Time { minutes: 1440 }),
            Err(DomainError::InvalidTime(1440))
        );
    }

    #[test]
    fn test_encode_timeslot() {
        let plain = ValueDomain::Timeslot { temperature: None };
        let payload = plain
            .encode(&WriteValue::Timeslot { begin: 24, end: 88, temperature: None })
            .unwrap();
        assert_eq!(
            payload.fields(),
            vec![("begin", "24".to_string()), ("end", "88".to_string())]
        );
        assert!(matches!(
            plain.encode(&WriteValue::Timeslot { begin: 90, end: 10, temperature: None }),
            Err(DomainError::InvalidSlot { .. })
        ));

        let warm = ValueDomain::Timeslot { temperature: Some(range(7.0, 30.0, 10, 0)) };
        let payload = warm
            .encode(&WriteValue::Timeslot { begin: 24, end: 88, temperature: Some(21.0) })
            .unwrap();
        assert_eq!(payload.value.as_deref(), Some("210"));
        assert_eq!(
            warm.encode(&WriteValue::Timeslot { begin: 24, end: 88, temperature: None }),
            Err(DomainError::MissingTemperature)
        );
    }

    #[test]
    fn test_kind_mismatch() {
        let switch = ValueDomain::Switch { on: 1, off: 0 };
        assert_eq!(
            switch.encode(&WriteValue::Time { minutes: 5 }),
            Err(DomainError::KindMismatch)
        );
    }

    #[test]
    fn test_numeric_sensor_not_writable() {
        let sensor = SensorAssignment {
            id: SensorId("eta_x_1".to_string()),
            uri: "/1".to_string(),
            label: "X".to_string(),
            kind: SensorKind::Numeric,
            unit: "°C".to_string(),
            endpoint_type: "DEFAULT".to_string(),
            domain: None,
        };
        assert!(matches!(
            sensor.encode_write(&WriteValue::Number { value: 1.0, force_decimals: false }),
            Err(DomainError::NotWritable(_))
        ));
    }

    #[test]
    fn test_interpret() {
        let raw = RawValue {
            uri: "/1".to_string(),
            text: "390".to_string(),
            str_value: "06:30".to_string(),
            unit: String::new(),
            scale_factor: 1,
            dec_places: 0,
            adv_text_offset: 0,
        };
        let mut sensor = SensorAssignment {
            id: SensorId("eta_x_1".to_string()),
            uri: "/1".to_string(),
            label: "X".to_string(),
            kind: SensorKind::Time,
            unit: "minutes_since_midnight".to_string(),
            endpoint_type: "DEFAULT".to_string(),
            domain: None,
        };
        assert_eq!(
            sensor.interpret(&raw),
            Some(SensorValue::Time(chrono::NaiveTime::from_hms_opt(6, 30, 0).unwrap()))
        );

        sensor.kind = SensorKind::Text;
        assert_eq!(sensor.interpret(&raw), Some(SensorValue::Text("06:30".to_string())));
    }
}
