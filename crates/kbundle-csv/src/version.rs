//! Descriptor version handling
//!
//! Versions must be strict semantic versions: `1.2.3`, optionally with
//! pre-release and build metadata. A `v` prefix or leading zeros in a
//! numeric component are rejected.

use semver::Version;

use crate::error::{CsvError, Result};

/// Parse a strict semantic version
///
/// `field` names the option the value came from and is only used in the
/// error.
pub fn parse_version(field: &str, value: &str) -> Result<Version> {
    let invalid = |message: String| CsvError::InvalidVersion {
        field: field.to_string(),
        value: value.to_string(),
        message,
    };

    if value.starts_with(['v', 'V']) {
        return Err(invalid("a leading 'v' is not allowed".to_string()));
    }

    Version::parse(value).map_err(|e| invalid(e.to_string()))
}

/// Descriptor name for a package at a version (`<package>.v<version>`)
pub fn csv_name(package: &str, version: &str) -> String {
    format!("{}.v{}", package, version)
}
