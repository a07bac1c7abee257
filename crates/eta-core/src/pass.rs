//! One full discovery pass over a device tree

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::ApiCapabilities;
use crate::classifier::{error_family, Classifier};
use crate::endpoint::EndpointNode;
use crate::sensor::SensorAssignment;
use crate::variable::{Metadata, RawValue};

/// A node together with everything fetched for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassEntry {
    pub node: EndpointNode,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<RawValue>,
}

/// Result of one tree walk, consumed once by the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPass {
    pub capabilities: ApiCapabilities,
    pub entries: Vec<PassEntry>,
    /// Classified assignments in tree order, identifiers unique
    pub candidates: Vec<SensorAssignment>,
}

impl DiscoveryPass {
    /// Classify every entry and append the error sensor family.
    ///
    /// When two entries produce the same identifier the first one wins.
    pub fn classify(classifier: &Classifier, capabilities: ApiCapabilities, entries: Vec<PassEntry>) -> Self {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        let classified = entries
            .iter()
            .flat_map(|e| classifier.classify(&e.node, &e.metadata, e.sample.as_ref(), &capabilities));

        for assignment in classified.chain(error_family(classifier.host())) {
            if seen.insert(assignment.id.clone()) {
                candidates.push(assignment);
            } else {
                debug!(id = %assignment.id, uri = %assignment.uri, "Skipping duplicate sensor");
            }
        }

        Self {
            capabilities,
            entries,
            candidates,
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorKind;

    fn entry(uri: &str, unit: &str, text: &str) -> PassEntry {
        PassEntry {
            node: EndpointNode {
                uri: uri.to_string(),
                label: "Fühler".to_string(),
                label_path: vec!["Kessel".to_string(), "Fühler".to_string()],
                parent: None,
                is_leaf: true,
            },
            metadata: Metadata::NotSupported,
            sample: Some(RawValue {
                uri: uri.to_string(),
                text: text.to_string(),
                str_value: text.to_string(),
                unit: unit.to_string(),
                scale_factor: 1,
                dec_places: 0,
                adv_text_offset: 0,
            }),
        }
    }

    #[test]
    fn test_classify_pass_appends_error_family() {
        let classifier = Classifier::new("eta");
        let caps = ApiCapabilities::V11 { reported: "1.1".to_string() };
        let pass = DiscoveryPass::classify(
            &classifier,
            caps,
            vec![entry("/1/1", "kW", "5"), entry("/1/2", "°C", "60")],
        );

        let kinds: Vec<SensorKind> = pass.candidates.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SensorKind::Numeric,
                SensorKind::Writable,
                SensorKind::Numeric,
                SensorKind::ErrorFlag,
                SensorKind::ErrorCount,
                SensorKind::ErrorMessage,
            ]
        );
        assert_eq!(pass.len(), 6);
    }

    #[test]
    fn test_duplicate_ids_first_wins() {
        let classifier = Classifier::new("eta");
        let caps = ApiCapabilities::V11 { reported: "1.1".to_string() };
        let pass = DiscoveryPass::classify(
            &classifier,
            caps,
            vec![entry("/1/1", "kW", "5"), entry("/1/1", "bar", "2")],
        );
        let numeric: Vec<_> = pass
            .candidates
            .iter()
            .filter(|c| c.kind == SensorKind::Numeric)
            .collect();
        assert_eq!(numeric.len(), 1);
        assert_eq!(numeric[0].unit, "kW");
    }
}
