//! API version negotiation result

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First API version exposing the `varinfo` metadata endpoint
pub const METADATA_MIN_VERSION: Version = Version::new(1, 2, 0);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Empty API version string")]
    Empty,
    #[error("Invalid API version '{0}'")]
    Invalid(String),
}

/// Capabilities of the connected controller, fixed for the lifetime of a client.
///
/// `V11` devices only expose menu, values and errors. `V12` devices also
/// expose variable metadata (unit, range, enumeration, writability).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "api", rename_all = "lowercase")]
pub enum ApiCapabilities {
    V11 { reported: String },
    V12 { reported: String },
}

impl ApiCapabilities {
    /// Pick the capability set for a reported version.
    ///
    /// `force_legacy` pins newer firmware to the 1.1 behaviour.
    pub fn negotiate(reported: &str, force_legacy: bool) -> Result<Self, VersionError> {
        let version = parse_api_version(reported)?;
        let reported = reported.trim().to_string();
        if !force_legacy && version >= METADATA_MIN_VERSION {
            Ok(Self::V12 { reported })
        } else {
            Ok(Self::V11 { reported })
        }
    }

    pub fn supports_metadata(&self) -> bool {
        matches!(self, Self::V12 { .. })
    }

    /// Version string as reported by the device
    pub fn reported(&self) -> &str {
        match self {
            Self::V11 { reported } | Self::V12 { reported } => reported,
        }
    }

    /// Short label used in logs and fixtures
    pub fn label(&self) -> &'static str {
        match self {
            Self::V11 { .. } => "1.1",
            Self::V12 { .. } => "1.2",
        }
    }
}

impl std::fmt::Display for ApiCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API {} (reported {})", self.label(), self.reported())
    }
}

/// Parse a controller version string such as `1.2` into a semver version.
///
/// Missing minor/patch components are padded with zeros.
pub fn parse_api_version(raw: &str) -> Result<Version, VersionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(VersionError::Empty);
    }

    let mut parts: Vec<&str> = raw.split('.').collect();
    if parts.len() > 3 {
        return Err(VersionError::Invalid(raw.to_string()));
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
        *slot = part
            .parse()
            .map_err(|_| VersionError::Invalid(raw.to_string()))?;
    }

    Ok(Version::new(numbers[0], numbers[1], numbers[2]))
}
