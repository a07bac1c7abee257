//! XML wire format of the ETA REST interface
//!
//! Every response is an `<eta>` document. Which child element is present
//! depends on the request; a device-side failure is an `<error>` child.

use eta_core::errors::parse_error_time;
use eta_core::{ActiveError, EndpointNode, EnumEntry, RawValue, ValidValues, VariableInfo};
use quick_xml::de::from_str;
use serde::Deserialize;
use thiserror::Error;

/// Decoding failure, mapped to `ClientError::MalformedResponse` by the caller
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct WireError(pub String);

#[derive(Debug, Default, Deserialize)]
pub struct EtaDocument {
    #[serde(default)]
    pub api: Option<ApiElement>,
    #[serde(default)]
    pub menu: Option<MenuElement>,
    #[serde(default)]
    pub value: Option<ValueElement>,
    #[serde(rename = "varInfo", default)]
    pub var_info: Option<VarInfoElement>,
    #[serde(default)]
    pub errors: Option<ErrorsElement>,
    #[serde(default)]
    pub success: Option<EmptyElement>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmptyElement {}

#[derive(Debug, Deserialize)]
pub struct ApiElement {
    #[serde(rename = "@version", default)]
    pub version: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MenuElement {
    #[serde(rename = "fub", default)]
    pub fubs: Vec<MenuNode>,
}

#[derive(Debug, Deserialize)]
pub struct MenuNode {
    #[serde(rename = "@uri", default)]
    pub uri: String,
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "object", default)]
    pub children: Vec<MenuNode>,
}

#[derive(Debug, Deserialize)]
pub struct ValueElement {
    #[serde(rename = "@uri", default)]
    pub uri: String,
    #[serde(rename = "@strValue", default)]
    pub str_value: String,
    #[serde(rename = "@unit", default)]
    pub unit: String,
    #[serde(rename = "@decPlaces", default)]
    pub dec_places: Option<String>,
    #[serde(rename = "@scaleFactor", default)]
    pub scale_factor: Option<String>,
    #[serde(rename = "@advTextOffset", default)]
    pub adv_text_offset: Option<String>,
    #[serde(rename = "$text", default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct VarInfoElement {
    #[serde(default)]
    pub variable: Option<VariableElement>,
}

#[derive(Debug, Deserialize)]
pub struct VariableElement {
    #[serde(rename = "@uri", default)]
    pub uri: String,
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "@fullName", default)]
    pub full_name: String,
    #[serde(rename = "@unit", default)]
    pub unit: String,
    #[serde(rename = "@decPlaces", default)]
    pub dec_places: Option<String>,
    #[serde(rename = "@scaleFactor", default)]
    pub scale_factor: Option<String>,
    #[serde(rename = "@advTextOffset", default)]
    pub adv_text_offset: Option<String>,
    #[serde(rename = "@isWritable", default)]
    pub is_writable: Option<String>,
    #[serde(rename = "type", default)]
    pub var_type: Option<String>,
    #[serde(rename = "validValues", default)]
    pub valid_values: Option<ValidValuesElement>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidValuesElement {
    #[serde(rename = "value", default)]
    pub values: Vec<EnumValueElement>,
    #[serde(default)]
    pub min: Option<BoundElement>,
    #[serde(default)]
    pub max: Option<BoundElement>,
}

#[derive(Debug, Deserialize)]
pub struct EnumValueElement {
    #[serde(rename = "@strValue", default)]
    pub str_value: String,
    #[serde(rename = "$text", default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct BoundElement {
    #[serde(rename = "@strValue", default)]
    pub str_value: Option<String>,
    #[serde(rename = "$text", default)]
    pub text: Option<String>,
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorsElement {
    #[serde(rename = "fub", default)]
    pub fubs: Vec<ErrorFubElement>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorFubElement {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "error", default)]
    pub errors: Vec<ErrorElement>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorElement {
    #[serde(rename = "@msg", default)]
    pub msg: String,
    #[serde(rename = "@priority", default)]
    pub priority: String,
    #[serde(rename = "@time", default)]
    pub time: String,
    #[serde(rename = "$text", default)]
    pub text: String,
}

/// Parse an `<eta>` document
pub fn parse_document(xml: &str) -> Result<EtaDocument, WireError> {
    from_str(xml).map_err(|e| WireError(e.to_string()))
}

fn parse_int(field: &str, raw: Option<&str>, default: i64) -> Result<i64, WireError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(s) => s
            .parse()
            .map_err(|_| WireError(format!("invalid {} '{}'", field, s))),
    }
}

fn parse_float(field: &str, raw: &str) -> Result<f64, WireError> {
    raw.trim()
        .parse()
        .map_err(|_| WireError(format!("invalid {} '{}'", field, raw.trim())))
}

/// Flatten the menu depth-first in document order; branches are endpoints too
pub fn flatten_menu(menu: &MenuElement) -> Vec<EndpointNode> {
    fn walk(node: &MenuNode, parent: Option<&str>, path: &[String], out: &mut Vec<EndpointNode>) {
        let mut label_path = path.to_vec();
        label_path.push(node.name.clone());
        out.push(EndpointNode {
            uri: node.uri.clone(),
            label: node.name.clone(),
            label_path: label_path.clone(),
            parent: parent.map(str::to_string),
            is_leaf: node.children.is_empty(),
        });
        for child in &node.children {
            walk(child, Some(node.uri.as_str()), &label_path, out);
        }
    }

    let mut out = Vec::new();
    for fub in &menu.fubs {
        walk(fub, None, &[], &mut out);
    }
    out
}

impl ValueElement {
    pub fn into_raw(self, requested_uri: &str) -> Result<RawValue, WireError> {
        // the element's own uri carries the /user/var prefix
        Ok(RawValue {
            uri: requested_uri.to_string(),
            scale_factor: parse_int("scaleFactor", self.scale_factor.as_deref(), 1)?,
            dec_places: parse_int("decPlaces", self.dec_places.as_deref(), 0)?.max(0) as u32,
            adv_text_offset: parse_int("advTextOffset", self.adv_text_offset.as_deref(), 0)?,
            text: self.text.trim().to_string(),
            str_value: self.str_value,
            unit: self.unit,
        })
    }
}

impl VariableElement {
    pub fn into_info(self, requested_uri: &str) -> Result<VariableInfo, WireError> {
        let scale_factor = parse_int("scaleFactor", self.scale_factor.as_deref(), 1)?;
        let dec_places = parse_int("decPlaces", self.dec_places.as_deref(), 0)?.max(0) as u32;
        let writable = match self.is_writable.as_deref().map(str::trim) {
            Some("1") | Some("true") => Some(true),
            Some("0") | Some("false") => Some(false),
            _ => None,
        };
        let valid_values = match self.valid_values {
            Some(vv) => vv.into_valid_values()?,
            None => None,
        };

        Ok(VariableInfo {
            uri: if self.uri.is_empty() {
                requested_uri.to_string()
            } else {
                normalize_uri(&self.uri)
            },
            name: self.name,
            full_name: self.full_name,
            unit: self.unit,
            scale_factor,
            dec_places,
            adv_text_offset: parse_int("advTextOffset", self.adv_text_offset.as_deref(), 0)?,
            var_type: self.var_type.map(|t| t.trim().to_string()).unwrap_or_default(),
            writable,
            valid_values,
        })
    }
}

impl ValidValuesElement {
    fn into_valid_values(self) -> Result<Option<ValidValues>, WireError> {
        if !self.values.is_empty() {
            let entries = self
                .values
                .into_iter()
                .map(|v| {
                    Ok(EnumEntry {
                        raw: parse_int("validValues/value", Some(v.text.as_str()), 0)?,
                        label: v.str_value,
                    })
                })
                .collect::<Result<Vec<_>, WireError>>()?;
            return Ok(Some(ValidValues::Enumeration { entries }));
        }

        let (Some(min), Some(max)) = (self.min, self.max) else {
            return Ok(None);
        };

        if let (Some(begin), Some(end)) = (&min.begin, &max.end) {
            let temperature = match (&min.value, &max.value) {
                (Some(lo), Some(hi)) => Some((parse_float("min/value", lo)?, parse_float("max/value", hi)?)),
                _ => None,
            };
            return Ok(Some(ValidValues::Slots {
                min_begin: parse_int("min/begin", Some(begin.as_str()), 0)?,
                max_end: parse_int("max/end", Some(end.as_str()), 0)?,
                temperature,
            }));
        }

        match (min.text.as_deref(), max.text.as_deref()) {
            (Some(lo), Some(hi)) if !lo.trim().is_empty() && !hi.trim().is_empty() => Ok(Some(ValidValues::Range {
                min: parse_float("min", lo)?,
                max: parse_float("max", hi)?,
            })),
            _ => Ok(None),
        }
    }
}

impl ErrorsElement {
    pub fn into_errors(self, host: &str, port: u16) -> Vec<ActiveError> {
        self.fubs
            .into_iter()
            .flat_map(|fub| {
                let name = fub.name;
                fub.errors.into_iter().map(move |e| ActiveError {
                    message: e.msg,
                    priority: e.priority,
                    time: parse_error_time(&e.time),
                    text: e.text.trim().to_string(),
                    fub: name.clone(),
                    host: host.to_string(),
                    port,
                })
            })
            .collect()
    }
}

/// Ensure a variable URI starts with a slash
pub fn normalize_uri(uri: &str) -> String {
    let uri = uri.trim();
    if uri.starts_with('/') {
        uri.to_string()
    } else {
        format!("/{}", uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MENU: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<eta version="1.0" xmlns="http://www.eta.co.at/rest/v1">
  <menu uri="/user/menu">
    <fub uri="/112/10021" name="Kessel">
      <object uri="/112/10021/0/0/12080" name="Eingänge">
        <object uri="/112/10021/0/0/12161" name="Kesselfühler"/>
        <object uri="/112/10021/0/0/12162" name="Abgas"/>
      </object>
    </fub>
    <fub uri="/120/10101" name="HK"/>
  </menu>
</eta>"#;

    #[test]
    fn test_flatten_menu() {
        let doc = parse_document(MENU).unwrap();
        let nodes = flatten_menu(&doc.menu.unwrap());
        let uris: Vec<&str> = nodes.iter().map(|n| n.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "/112/10021",
                "/112/10021/0/0/12080",
                "/112/10021/0/0/12161",
                "/112/10021/0/0/12162",
                "/120/10101",
            ]
        );
        assert_eq!(nodes[2].label_path, vec!["Kessel", "Eingänge", "Kesselfühler"]);
        assert_eq!(nodes[2].parent.as_deref(), Some("/112/10021/0/0/12080"));
        assert!(!nodes[1].is_leaf);
        assert!(nodes[4].is_leaf);
        assert!(nodes[0].parent.is_none());
    }

    #[test]
    fn test_parse_value() {
        let xml = r#"<eta version="1.0" xmlns="http://www.eta.co.at/rest/v1">
  <value uri="/user/var/112/10021/0/0/12161" strValue="67" unit="°C" decPlaces="0" scaleFactor="10" advTextOffset="0">673</value>
</eta>"#;
        let doc = parse_document(xml).unwrap();
        let raw = doc.value.unwrap().into_raw("/112/10021/0/0/12161").unwrap();
        assert_eq!(raw.text, "673");
        assert_eq!(raw.str_value, "67");
        assert_eq!(raw.unit, "°C");
        assert_eq!(raw.scale_factor, 10);
        assert_eq!(raw.scaled(), Some(67.3));
    }

    #[test]
    fn test_parse_varinfo_range() {
        let xml = r#"<eta version="1.0" xmlns="http://www.eta.co.at/rest/v1">
  <varInfo uri="/user/varinfo/120/10101/0/0/12111">
    <variable uri="120/10101/0/0/12111" name="Tagtemp" fullName="Heizkreis > Tagtemp" unit="°C" decPlaces="0" scaleFactor="10" advTextOffset="0" isWritable="1">
      <type>DEFAULT</type>
      <validValues>
        <min strValue="5">50</min>
        <max strValue="25">250</max>
      </validValues>
    </variable>
  </varInfo>
</eta>"#;
        let doc = parse_document(xml).unwrap();
        let info = doc
            .var_info
            .unwrap()
            .variable
            .unwrap()
            .into_info("/120/10101/0/0/12111")
            .unwrap();
        assert_eq!(info.uri, "/120/10101/0/0/12111");
        assert_eq!(info.var_type, "DEFAULT");
        assert_eq!(info.writable, Some(true));
        assert_eq!(info.valid_values, Some(ValidValues::Range { min: 50.0, max: 250.0 }));
    }

    #[test]
    fn test_parse_varinfo_enumeration() {
        let xml = r#"<eta version="1.0" xmlns="http://www.eta.co.at/rest/v1">
  <varInfo uri="/user/varinfo/120/10101/0/0/12080">
    <variable uri="120/10101/0/0/12080" name="Ein/Aus" fullName="Ein/Aus" unit="" decPlaces="0" scaleFactor="1" advTextOffset="1802" isWritable="1">
      <type>DEFAULT</type>
      <validValues>
        <value strValue="Aus">1802</value>
        <value strValue="Ein">1803</value>
      </validValues>
    </variable>
  </varInfo>
</eta>"#;
        let doc = parse_document(xml).unwrap();
        let info = doc.var_info.unwrap().variable.unwrap().into_info("/x").unwrap();
        let Some(ValidValues::Enumeration { entries }) = info.valid_values else {
            panic!("expected enumeration");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].label, "Ein");
        assert_eq!(entries[1].raw, 1803);
        assert_eq!(info.adv_text_offset, 1802);
    }

    #[test]
    fn test_parse_varinfo_timeslot() {
        let xml = r#"<eta version="1.0" xmlns="http://www.eta.co.at/rest/v1">
  <varInfo uri="/user/varinfo/120/10101/12113/0/1082">
    <variable uri="120/10101/12113/0/1082" name="Zeitfenster 1" fullName="Montag > Zeitfenster 1" unit="°C" decPlaces="0" scaleFactor="10" advTextOffset="0" isWritable="1">
      <type>TIMESLOT</type>
      <validValues>
        <min strValue="00:00 - 00:00 7"><begin>0</begin><end>0</end><value>70</value></min>
        <max strValue="24:00 - 24:00 30"><begin>96</begin><end>96</end><value>300</value></max>
      </validValues>
    </variable>
  </varInfo>
</eta>"#;
        let doc = parse_document(xml).unwrap();
        let info = doc.var_info.unwrap().variable.unwrap().into_info("/x").unwrap();
        assert_eq!(
            info.valid_values,
            Some(ValidValues::Slots {
                min_begin: 0,
                max_end: 96,
                temperature: Some((70.0, 300.0)),
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        let xml = r#"<eta version="1.0" xmlns="http://www.eta.co.at/rest/v1">
  <errors uri="/user/errors">
    <fub uri="/112/10021" name="Kessel">
      <error msg="Flue gas sensor Interrupted" priority="Error" time="2011-06-29 12:47:50">Sensor or Cable broken or badly connected</error>
      <error msg="Water pressure too low 0,00 bar" priority="Error" time="2011-06-29 12:48:12">Top up heating water</error>
    </fub>
    <fub uri="/112/10101" name="HK1"/>
  </errors>
</eta>"#;
        let doc = parse_document(xml).unwrap();
        let errors = doc.errors.unwrap().into_errors("192.168.0.25", 8080);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].fub, "Kessel");
        assert_eq!(errors[0].text, "Sensor or Cable broken or badly connected");
        assert!(errors[0].time.is_some());
        assert_eq!(errors[1].port, 8080);
    }

    #[test]
    fn test_parse_success_and_error() {
        let doc = parse_document(r#"<eta><success uri="/user/var/1/2"/></eta>"#).unwrap();
        assert!(doc.success.is_some());
        assert!(doc.error.is_none());

        let doc = parse_document(r#"<eta><error>Value out of range</error></eta>"#).unwrap();
        assert!(doc.success.is_none());
        assert_eq!(doc.error.as_deref(), Some("Value out of range"));
    }

    #[test]
    fn test_parse_api() {
        let doc = parse_document(r#"<eta version="1.0"><api version="1.2"/></eta>"#).unwrap();
        assert_eq!(doc.api.unwrap().version, "1.2");
    }

    #[test]
    fn test_bad_attribute() {
        let xml = r#"<eta><value uri="/1" strValue="1" unit="" scaleFactor="ten">1</value></eta>"#;
        let doc = parse_document(xml).unwrap();
        let err = doc.value.unwrap().into_raw("/1").unwrap_err();
        assert_eq!(err.to_string(), "invalid scaleFactor 'ten'");
        let source: &dyn std::error::Error = &err;
        assert!(source.source().is_none());
    }
}
