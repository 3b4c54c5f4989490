//! Target compatibility filtering.
//!
//! Units declare the packages they apply to, optionally narrowed by a semver
//! requirement over the target's version name. An empty compatibility list
//! means "every target".

use crate::config::schema::PackageTarget;
use crate::manifest::TargetInfo;
use semver::{Version, VersionReq};
use std::fmt;

#[derive(Debug, Clone)]
pub enum VersionError {
    /// Target version name that does not parse as a version (e.g. "live").
    InvalidVersion { value: String, source: String },
    /// Requirement string that does not parse (e.g. ">=bad").
    InvalidRequirement { value: String, source: String },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, source } => {
                write!(f, "invalid target version '{}': {}", value, source)
            }
            VersionError::InvalidRequirement { value, source } => {
                write!(f, "invalid version requirement '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for VersionError {}

/// Does the target satisfy any declared package target?
pub fn target_compatible(
    targets: &[PackageTarget],
    info: &TargetInfo,
) -> Result<bool, VersionError> {
    if targets.is_empty() {
        return Ok(true);
    }

    for target in targets {
        if target.package != info.package {
            continue;
        }
        let Some(req_str) = target.versions.as_deref().map(str::trim).filter(|s| !s.is_empty())
        else {
            return Ok(true);
        };

        // A version-constrained target needs a version to check against.
        let Some(version_name) = info.version_name.as_deref() else {
            continue;
        };

        let version = parse_lenient(version_name)?;
        let req = VersionReq::parse(req_str).map_err(|e| VersionError::InvalidRequirement {
            value: req_str.to_string(),
            source: e.to_string(),
        })?;
        if req.matches(&version) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Parse an Android version name as semver, padding missing components:
/// `8.6` becomes `8.6.0`.
fn parse_lenient(value: &str) -> Result<Version, VersionError> {
    let trimmed = value.trim();
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    let dots = trimmed.chars().filter(|&c| c == '.').count();
    let padded = match dots {
        0 => format!("{trimmed}.0.0"),
        1 => format!("{trimmed}.0"),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded).map_err(|e| VersionError::InvalidVersion {
        value: value.to_string(),
        source: e.to_string(),
    })
}
