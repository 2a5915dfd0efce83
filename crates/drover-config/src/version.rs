use semver::Version;

use crate::error::GenError;

/// Parse a node OS version, tolerating a leading `v` and a missing patch
/// component (`1.4` parses as `1.4.0`).
pub fn parse_version(raw: &str) -> Result<Version, GenError> {
    let trimmed = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }
    let padded = format!("{}.0", trimmed);
    Version::parse(&padded).map_err(|_| GenError::InvalidVersion(raw.to_string()))
}

/// True when `raw` is at least `major.minor.0`, ignoring pre-release tags.
pub fn at_least(raw: &str, major: u64, minor: u64) -> bool {
    match parse_version(raw) {
        Ok(version) => (version.major, version.minor) >= (major, minor),
        Err(_) => false,
    }
}
