//! Assignment reconciliation
//!
//! Merges a fresh discovery pass into the host's known assignments. Known
//! identifiers are never deleted: anything missing from the pass moves to a
//! tombstone so the host decides what happens to bound entities. A label
//! change on the device is reported as a new add plus an orphan of the old
//! entry; no attempt is made to match renames across identifiers.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::pass::DiscoveryPass;
use crate::sensor::{SensorAssignment, SensorId};

/// Why an assignment was orphaned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OrphanReason {
    /// The endpoint disappeared from the device tree
    Removed,
    /// The device now reports a different label for the endpoint
    Relabeled { current_label: String },
}

/// An orphaned assignment kept for the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub assignment: SensorAssignment,
    #[serde(flatten)]
    pub reason: OrphanReason,
}

/// Host-held assignments: active entries plus tombstones
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSet {
    #[serde(default)]
    pub active: BTreeMap<SensorId, SensorAssignment>,
    #[serde(default)]
    pub tombstones: BTreeMap<SensorId, Tombstone>,
}

impl AssignmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a set from assignments, first occurrence of an id wins
    pub fn from_assignments(assignments: impl IntoIterator<Item = SensorAssignment>) -> Self {
        let mut set = Self::new();
        for assignment in assignments {
            set.active.entry(assignment.id.clone()).or_insert(assignment);
        }
        set
    }

    pub fn get(&self, id: &SensorId) -> Option<&SensorAssignment> {
        self.active.get(id)
    }

    /// Whether the id is known at all, active or orphaned
    pub fn contains(&self, id: &SensorId) -> bool {
        self.active.contains_key(id) || self.tombstones.contains_key(id)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &SensorAssignment> {
        self.active.values()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Drop a tombstone once the host has decided what to do with it
    pub fn forget(&mut self, id: &SensorId) -> Option<Tombstone> {
        self.tombstones.remove(id)
    }
}

/// A device-side rename of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameConflict {
    pub id: SensorId,
    pub previous_label: String,
    pub current_label: String,
}

/// Output of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub merged: AssignmentSet,
    pub added: Vec<SensorId>,
    pub orphaned: Vec<SensorId>,
    pub renamed: Vec<RenameConflict>,
    /// Same label, different kind, unit or domain; updated in place
    pub updated: Vec<SensorId>,
}

impl Reconciliation {
    /// True when the pass brought nothing new
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.orphaned.is_empty()
            && self.renamed.is_empty()
            && self.updated.is_empty()
    }
}

/// Reconcile previously known assignments against a discovery pass
pub fn reconcile(previous: &AssignmentSet, pass: &DiscoveryPass) -> Reconciliation {
    reconcile_assignments(previous, &pass.candidates)
}

/// Reconcile previously known assignments against classified candidates
pub fn reconcile_assignments(previous: &AssignmentSet, candidates: &[SensorAssignment]) -> Reconciliation {
    let mut result = Reconciliation {
        merged: previous.clone(),
        ..Default::default()
    };
    let mut seen: HashSet<&SensorId> = HashSet::new();

    for candidate in candidates {
        if !seen.insert(&candidate.id) {
            continue;
        }
        let id = &candidate.id;

        match previous.active.get(id) {
            None => {
                if result.merged.tombstones.remove(id).is_some() {
                    debug!(id = %id, "Orphaned sensor reappeared");
                }
                result.merged.active.insert(id.clone(), candidate.clone());
                result.added.push(id.clone());
            }
            Some(known) if label_changed(&known.label, &candidate.label) => {
                debug!(
                    id = %id,
                    previous = %known.label,
                    current = %candidate.label,
                    "Sensor relabeled on device"
                );
                result.merged.tombstones.insert(
                    id.clone(),
                    Tombstone {
                        assignment: known.clone(),
                        reason: OrphanReason::Relabeled {
                            current_label: candidate.label.clone(),
                        },
                    },
                );
                result.merged.active.insert(id.clone(), candidate.clone());
                result.added.push(id.clone());
                result.orphaned.push(id.clone());
                result.renamed.push(RenameConflict {
                    id: id.clone(),
                    previous_label: known.label.clone(),
                    current_label: candidate.label.clone(),
                });
            }
            Some(known) if known.same_shape(candidate) => {}
            Some(known) => {
                // keep the host's exact label when only case or spacing differ
                let mut updated = candidate.clone();
                updated.label = known.label.clone();
                result.merged.active.insert(id.clone(), updated);
                result.updated.push(id.clone());
            }
        }
    }

    for (id, known) in &previous.active {
        if seen.contains(id) {
            continue;
        }
        result.merged.active.remove(id);
        result.merged.tombstones.insert(
            id.clone(),
            Tombstone {
                assignment: known.clone(),
                reason: OrphanReason::Removed,
            },
        );
        result.orphaned.push(id.clone());
    }

    info!(
        added = result.added.len(),
        orphaned = result.orphaned.len(),
        renamed = result.renamed.len(),
        updated = result.updated.len(),
        active = result.merged.active.len(),
        "Reconciled assignments"
    );

    result
}

fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn label_changed(previous: &str, current: &str) -> bool {
    normalize_label(previous) != normalize_label(current)
}
