//! Scope and consent gate applied before any scan starts.

use crate::error::ScoutError;

/// Private-network prefixes used when no allow-list is configured.
pub const DEFAULT_ALLOWED_PREFIXES: &[&str] = &["10.", "172.", "192.168."];

/// Check every requested range against the allow-list.
///
/// Each range must start with at least one allowed prefix. Returns the
/// violating ranges, in request order, when any range is out of scope.
pub fn validate_ranges(ranges: &[String], allowed: &[String]) -> Result<(), Vec<String>> {
    let violations: Vec<String> = ranges
        .iter()
        .filter(|r| !allowed.iter().any(|prefix| r.trim().starts_with(prefix.as_str())))
        .cloned()
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Return the trimmed consent identifier, rejecting absent or blank values.
pub fn require_consent(consent_id: Option<&str>) -> Result<String, ScoutError> {
    match consent_id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ScoutError::MissingConsent),
    }
}
