//! Sensor classification
//!
//! Turns one endpoint node plus whatever metadata its API generation offers
//! into zero, one or two sensor assignments: a read-side sensor and, for
//! writable variables, a writable companion.
//!
//! API 1.2 devices report unit, range and enumeration through `varinfo`, and
//! those are trusted. API 1.1 devices report nothing beyond the value itself,
//! so every endpoint with a writable-eligible unit becomes a writable
//! candidate with a range defaulted from its unit.

use tracing::trace;

use crate::capabilities::ApiCapabilities;
use crate::endpoint::EndpointNode;
use crate::sensor::{NumericRange, RangeSource, SensorAssignment, SensorId, SensorKind, ValueDomain};
use crate::variable::{units, var_type, Metadata, RawValue, ValidValues, VariableInfo};

/// URI of the active error list
pub const ERRORS_URI: &str = "/user/errors";

/// Labels that mark a two-entry enumeration as a switch
const ON_LABELS: &[&str] = &["Ein", "On", "Ja", "Yes"];
const OFF_LABELS: &[&str] = &["Aus", "Off", "Nein", "No"];

/// Raw switch codes used by API 1.1 devices
const LEGACY_SWITCH_ON: i64 = 1803;
const LEGACY_SWITCH_OFF: i64 = 1802;

/// Last minute of the day
const MINUTES_MAX: f64 = 24.0 * 60.0 - 1.0;
/// Quarter hours per day
const SLOTS_MAX: i64 = 24 * 60 / 15;

/// Classifies endpoints of one device
#[derive(Debug, Clone)]
pub struct Classifier {
    host: String,
}

impl Classifier {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Classify one node.
    ///
    /// `sample` is the node's current value when one was fetched. On API 1.1
    /// it is the only source of unit information, so nodes without a sample
    /// yield nothing. Output is a pure function of the inputs.
    pub fn classify(
        &self,
        node: &EndpointNode,
        metadata: &Metadata,
        sample: Option<&RawValue>,
        caps: &ApiCapabilities,
    ) -> Vec<SensorAssignment> {
        if node.uri == ERRORS_URI {
            return error_family(&self.host);
        }

        let assignments = match (caps.supports_metadata(), metadata) {
            (true, Metadata::Full(info)) => self.classify_extended(node, info, sample),
            _ => self.classify_legacy(node, sample),
        };

        trace!(
            uri = %node.uri,
            count = assignments.len(),
            "Classified endpoint"
        );
        assignments
    }

    fn classify_extended(
        &self,
        node: &EndpointNode,
        info: &VariableInfo,
        sample: Option<&RawValue>,
    ) -> Vec<SensorAssignment> {
        let mut unit = detect_unit(info);
        let domain = extended_domain(info, &unit);

        if let Some(sample) = sample {
            // varinfo and var disagree on some units; trust var unless we assigned our own
            if sample.unit != unit && !units::is_custom(&unit) {
                unit = sample.unit.clone();
            }
            if info.var_type == var_type::DEFAULT && unit.is_empty() && sample.str_value_is_numeric() {
                unit = units::UNITLESS.to_string();
            }
        }

        let id = SensorId::for_endpoint(&self.host, &node.uri);
        let label = format!("{} > {}", node.fub(), info.full_name);
        let mut out = Vec::new();

        let writable = info.writable.unwrap_or(true)
            && units::is_writable(&unit)
            && domain.as_ref().is_some_and(is_settable);
        if writable {
            let domain = match unit.as_str() {
                units::MINUTES_SINCE_MIDNIGHT => Some(ValueDomain::TimeOfDay),
                _ => domain.clone(),
            };
            out.push(SensorAssignment {
                id: id.writable(),
                uri: node.uri.clone(),
                label: label.clone(),
                kind: SensorKind::Writable,
                unit: unit.clone(),
                endpoint_type: info.var_type.clone(),
                domain,
            });
        }

        let read = if units::is_numeric(&unit) {
            Some((SensorKind::Numeric, None))
        } else if let Some(switch) = switch_codes(info) {
            Some((SensorKind::Switch, Some(switch)))
        } else if units::is_custom(&unit)
            || (unit.is_empty() && info.var_type == var_type::TEXT)
        {
            let kind = match unit.as_str() {
                units::MINUTES_SINCE_MIDNIGHT => SensorKind::Time,
                units::TIMESLOT | units::TIMESLOT_PLUS_TEMPERATURE => SensorKind::Timeslot,
                _ => SensorKind::Text,
            };
            Some((kind, None))
        } else {
            None
        };

        if let Some((kind, domain)) = read {
            out.push(SensorAssignment {
                id,
                uri: node.uri.clone(),
                label,
                kind,
                unit,
                endpoint_type: info.var_type.clone(),
                domain,
            });
        }

        out
    }

    fn classify_legacy(&self, node: &EndpointNode, sample: Option<&RawValue>) -> Vec<SensorAssignment> {
        let Some(sample) = sample else {
            return Vec::new();
        };

        let id = SensorId::for_endpoint(&self.host, &node.uri);
        let label = node.display_path();
        let unit = sample.unit.clone();
        let mut out = Vec::new();

        if let Some(range) = heuristic_range(&unit, sample) {
            out.push(SensorAssignment {
                id: id.writable(),
                uri: node.uri.clone(),
                label: label.clone(),
                kind: SensorKind::Writable,
                unit: unit.clone(),
                endpoint_type: var_type::TEXT.to_string(),
                domain: Some(ValueDomain::Range(range)),
            });
        }

        let code = sample.raw_code();
        let read = if units::is_numeric(&unit) {
            Some((SensorKind::Numeric, None))
        } else if unit.is_empty() && matches!(code, Some(LEGACY_SWITCH_ON) | Some(LEGACY_SWITCH_OFF)) {
            Some((
                SensorKind::Switch,
                Some(ValueDomain::Switch {
                    on: LEGACY_SWITCH_ON,
                    off: LEGACY_SWITCH_OFF,
                }),
            ))
        } else if (unit.is_empty() || units::is_custom(&unit)) && !sample.str_value.is_empty() {
            Some((SensorKind::Text, None))
        } else {
            None
        };

        if let Some((kind, domain)) = read {
            out.push(SensorAssignment {
                id,
                uri: node.uri.clone(),
                label,
                kind,
                unit,
                endpoint_type: var_type::TEXT.to_string(),
                domain,
            });
        }

        out
    }
}

/// Whether an API 1.2 endpoint needs its current value to be classified.
///
/// API 1.1 endpoints always do.
pub fn needs_sample(metadata: &Metadata, caps: &ApiCapabilities) -> bool {
    let info = match (caps.supports_metadata(), metadata) {
        (true, Metadata::Full(info)) => info,
        _ => return true,
    };
    let unit = detect_unit(info);
    units::is_numeric(&unit)
        || switch_codes(info).is_some()
        || units::is_custom(&unit)
        || (unit.is_empty() && (info.var_type == var_type::TEXT || info.var_type == var_type::DEFAULT))
}

/// Whether a value should be read as text regardless of its unit
pub fn reads_as_text(unit: &str) -> bool {
    units::is_custom(unit) && unit != units::UNITLESS
}

/// Sensors derived from the device's active error list
pub fn error_family(host: &str) -> Vec<SensorAssignment> {
    [
        ("errors", "Active errors", SensorKind::ErrorFlag),
        ("nbr_active_errors", "Number of active errors", SensorKind::ErrorCount),
        ("latest_error", "Latest error", SensorKind::ErrorMessage),
    ]
    .into_iter()
    .map(|(name, label, kind)| SensorAssignment {
        id: SensorId::for_device(host, name),
        uri: ERRORS_URI.to_string(),
        label: label.to_string(),
        kind,
        unit: String::new(),
        endpoint_type: var_type::DEFAULT.to_string(),
        domain: None,
    })
    .collect()
}

/// Replace the device unit with a synthetic one for time payloads
fn detect_unit(info: &VariableInfo) -> String {
    match &info.valid_values {
        Some(ValidValues::Range { min, max })
            if info.unit.is_empty()
                && info.scale_factor == 1
                && info.dec_places == 0
                && *min == 0.0
                && *max == MINUTES_MAX =>
        {
            units::MINUTES_SINCE_MIDNIGHT.to_string()
        }
        Some(ValidValues::Slots {
            min_begin,
            max_end,
            temperature,
        }) if (info.unit.is_empty() || info.unit == "°C")
            && *min_begin == 0
            && *max_end == SLOTS_MAX =>
        {
            if temperature.is_some() {
                units::TIMESLOT_PLUS_TEMPERATURE.to_string()
            } else {
                units::TIMESLOT.to_string()
            }
        }
        _ => info.unit.clone(),
    }
}

/// Value domain of an API 1.2 endpoint, before any writability decision
fn extended_domain(info: &VariableInfo, unit: &str) -> Option<ValueDomain> {
    match unit {
        units::TIMESLOT => return Some(ValueDomain::Timeslot { temperature: None }),
        units::TIMESLOT_PLUS_TEMPERATURE => {
            let temperature = match &info.valid_values {
                Some(ValidValues::Slots {
                    temperature: Some((min, max)),
                    ..
                }) => Some(NumericRange::from_raw(*min, *max, info.scale_factor, info.dec_places)),
                _ => None,
            };
            return Some(ValueDomain::Timeslot { temperature });
        }
        _ => {}
    }

    match &info.valid_values {
        Some(ValidValues::Range { min, max })
            if units::is_writable(unit) || (info.var_type == var_type::DEFAULT && unit.is_empty()) =>
        {
            Some(ValueDomain::Range(NumericRange::from_raw(
                *min,
                *max,
                info.scale_factor,
                info.dec_places,
            )))
        }
        _ => None,
    }
}

fn is_settable(domain: &ValueDomain) -> bool {
    matches!(domain, ValueDomain::Range(_) | ValueDomain::Timeslot { .. })
}

/// On/off codes of a two-entry enumeration made of on/off words
fn switch_codes(info: &VariableInfo) -> Option<ValueDomain> {
    let Some(ValidValues::Enumeration { entries }) = &info.valid_values else {
        return None;
    };
    if entries.len() != 2 {
        return None;
    }

    let mut on = None;
    let mut off = None;
    for entry in entries {
        if ON_LABELS.contains(&entry.label.as_str()) {
            on = Some(entry.raw);
        } else if OFF_LABELS.contains(&entry.label.as_str()) {
            off = Some(entry.raw);
        } else {
            return None;
        }
    }

    Some(ValueDomain::Switch {
        on: on.unwrap_or(0),
        off: off.unwrap_or(0),
    })
}

/// Default range for API 1.1 writable candidates
fn heuristic_range(unit: &str, sample: &RawValue) -> Option<NumericRange> {
    let (min, max) = match unit {
        "%" => (-100.0, 100.0),
        "°C" => (-100.0, 200.0),
        "kg" => (-100_000.0, 100_000.0),
        _ => return None,
    };
    Some(NumericRange {
        min,
        max,
        scale_factor: if sample.scale_factor == 0 { 1 } else { sample.scale_factor },
        dec_places: sample.dec_places,
        source: RangeSource::Heuristic,
    })
}
