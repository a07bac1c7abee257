//! Assignment persistence
//!
//! The engine crates never write anything; the daemon keeps the merged
//! assignment set, tombstones included, in one JSON file.

use chrono::{DateTime, Utc};
use eta_core::AssignmentSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Store belongs to {stored}, not {expected}")]
    HostMismatch { stored: String, expected: String },
}

/// On-disk layout of the store file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAssignments {
    #[serde(default = "default_version")]
    pub version: String,
    pub host: String,
    #[serde(default)]
    pub api_version: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub assignments: AssignmentSet,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// JSON file holding one device's assignments
#[derive(Debug, Clone)]
pub struct AssignmentStore {
    path: PathBuf,
    host: String,
}

impl AssignmentStore {
    pub fn new(path: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored set, or an empty one if the file doesn't exist
    pub fn load_or_create(&self) -> Result<AssignmentSet, StoreError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No assignment store yet");
            return Ok(AssignmentSet::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let stored: StoredAssignments = serde_json::from_str(&content)?;
        if stored.host != self.host {
            return Err(StoreError::HostMismatch {
                stored: stored.host,
                expected: self.host.clone(),
            });
        }

        info!(
            path = %self.path.display(),
            active = stored.assignments.len(),
            orphaned = stored.assignments.tombstones.len(),
            "Loaded assignments"
        );
        Ok(stored.assignments)
    }

    pub fn save(&self, assignments: &AssignmentSet, api_version: Option<&str>) -> Result<(), StoreError> {
        let stored = StoredAssignments {
            version: default_version(),
            host: self.host.clone(),
            api_version: api_version.map(str::to_string),
            updated_at: Utc::now(),
            assignments: assignments.clone(),
        };
        let content = serde_json::to_string_pretty(&stored)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), active = assignments.len(), "Saved assignments");
        Ok(())
    }
}
