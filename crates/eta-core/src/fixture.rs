//! Recorded device responses and reference assignments
//!
//! Recordings map a request path to the XML body the device returned, so a
//! whole discovery can be replayed without hardware. Reference files hold
//! the assignments a classifier version is expected to produce.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::sensor::{SensorAssignment, SensorId};

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Request path to response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordedResponses {
    pub responses: BTreeMap<String, String>,
}

impl RecordedResponses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), FixtureError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn insert(&mut self, path: impl Into<String>, body: impl Into<String>) {
        self.responses.insert(path.into(), body.into());
    }

    /// Look up a recorded body; trailing slashes are not significant
    pub fn get(&self, path: &str) -> Option<&str> {
        self.responses
            .get(path)
            .or_else(|| self.responses.get(path.trim_end_matches('/')))
            .map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

/// Expected assignments for one API generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAssignments {
    pub api_version: String,
    pub assignments: BTreeMap<SensorId, SensorAssignment>,
}

/// Difference between produced and expected assignments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceDiff {
    pub missing: Vec<SensorId>,
    pub unexpected: Vec<SensorId>,
    pub changed: Vec<SensorId>,
}

impl ReferenceDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.changed.is_empty()
    }
}

impl ReferenceAssignments {
    pub fn new(api_version: impl Into<String>, assignments: impl IntoIterator<Item = SensorAssignment>) -> Self {
        Self {
            api_version: api_version.into(),
            assignments: assignments.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), FixtureError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Compare produced assignments against this reference
    pub fn diff(&self, produced: &[SensorAssignment]) -> ReferenceDiff {
        let mut diff = ReferenceDiff::default();
        let mut seen = HashSet::new();

        for assignment in produced {
            seen.insert(&assignment.id);
            match self.assignments.get(&assignment.id) {
                None => diff.unexpected.push(assignment.id.clone()),
                Some(expected) if expected != assignment => diff.changed.push(assignment.id.clone()),
                Some(_) => {}
            }
        }
        for id in self.assignments.keys() {
            if !seen.contains(id) {
                diff.missing.push(id.clone());
            }
        }
        diff
    }
}
