//! Registry version gating for patch files.
//!
//! A patch file may declare `registry_version = ">=1.2, <2"`; it only applies
//! when the loaded registry's `meta.version` satisfies that requirement.

use semver::{Version, VersionReq};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    InvalidVersion { value: String, source: String },
    InvalidRequirement { value: String, source: String },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, source } => {
                write!(f, "invalid registry version '{}': {}", value, source)
            }
            VersionError::InvalidRequirement { value, source } => {
                write!(f, "invalid registry version requirement '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for VersionError {}

/// Check a registry version against a patch file's requirement.
///
/// A missing or blank requirement matches everything. A requirement against a
/// registry without a version never matches.
///
/// ```
/// use ooxml_patcher::registry::version::matches_requirement;
///
/// assert!(matches_requirement(Some("1.4.0"), Some(">=1.2, <2")).unwrap());
/// assert!(!matches_requirement(Some("2.0.0"), Some(">=1.2, <2")).unwrap());
/// assert!(matches_requirement(None, None).unwrap());
/// ```
pub fn matches_requirement(
    version: Option<&str>,
    requirement: Option<&str>,
) -> Result<bool, VersionError> {
    let Some(requirement) = requirement.map(str::trim).filter(|req| !req.is_empty()) else {
        return Ok(true);
    };

    let req = VersionReq::parse(requirement).map_err(|e| VersionError::InvalidRequirement {
        value: requirement.to_string(),
        source: e.to_string(),
    })?;

    let Some(version) = version else {
        return Ok(false);
    };
    let version = Version::parse(version.trim()).map_err(|e| VersionError::InvalidVersion {
        value: version.to_string(),
        source: e.to_string(),
    })?;

    Ok(req.matches(&version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_requirement_matches() {
        assert!(matches_requirement(Some("0.1.0"), None).unwrap());
        assert!(matches_requirement(Some("1.0.0"), Some("  ")).unwrap());
        assert!(matches_requirement(None, Some("")).unwrap());
    }

    #[test]
    fn compound_requirement() {
        let req = Some(">=1.2.0, <2.0.0");
        assert!(matches_requirement(Some("1.2.0"), req).unwrap());
        assert!(matches_requirement(Some("1.9.3"), req).unwrap());
        assert!(!matches_requirement(Some("1.1.9"), req).unwrap());
        assert!(!matches_requirement(Some("2.0.0"), req).unwrap());
    }

    #[test]
    fn unversioned_registry_never_satisfies() {
        assert!(!matches_requirement(None, Some(">=0.0.0")).unwrap());
    }

    #[test]
    fn invalid_inputs() {
        assert!(matches!(
            matches_requirement(Some("one"), Some(">=1.0.0")),
            Err(VersionError::InvalidVersion { .. })
        ));
        assert!(matches!(
            matches_requirement(Some("1.0.0"), Some(">=bad")),
            Err(VersionError::InvalidRequirement { .. })
        ));
    }
}
