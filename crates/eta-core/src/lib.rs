//! ETA Core - Endpoint model and sensor assignment engine
//!
//! This crate holds the synchronous half of the system:
//! - Endpoint tree and variable metadata types for both API generations
//! - Sensor classification (kind, unit and writable value domain)
//! - Reconciliation of discovery passes against previously known assignments
//! - Edge-triggered tracking of the controller's active error list
//! - Recorded-response and reference-assignment fixture formats

pub mod capabilities;
pub mod classifier;
pub mod domain;
pub mod endpoint;
pub mod errors;
pub mod fixture;
pub mod pass;
pub mod reconcile;
pub mod sensor;
pub mod variable;

pub use capabilities::{parse_api_version, ApiCapabilities, VersionError};
pub use classifier::{error_family, needs_sample, reads_as_text, Classifier, ERRORS_URI};
pub use domain::{DomainError, WritePayload, WriteValue};
pub use endpoint::EndpointNode;
pub use errors::{ActiveError, ErrorEvent, ErrorKey, ErrorSummary, ErrorTracker};
pub use fixture::{FixtureError, RecordedResponses, ReferenceAssignments, ReferenceDiff};
pub use pass::{DiscoveryPass, PassEntry};
pub use reconcile::{
    reconcile, reconcile_assignments, AssignmentSet, OrphanReason, Reconciliation,
    RenameConflict, Tombstone,
};
pub use sensor::{
    NumericRange, RangeSource, SensorAssignment, SensorId, SensorKind, SensorValue, ValueDomain,
};
pub use variable::{EnumEntry, Metadata, RawValue, ValidValues, VariableInfo};
