//! Schema versioning for persisted artifacts and command output.

/// Current schema version for artifacts and JSON envelopes.
///
/// Bump the minor version for additive changes, the major version for
/// anything that breaks readers of older artifacts.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Whether an artifact written with `version` can be read by this build.
///
/// Only the major component has to match.
pub fn is_compatible(version: &str) -> bool {
    major(version).is_some() && major(version) == major(SCHEMA_VERSION)
}

fn major(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}
