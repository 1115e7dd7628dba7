use thiserror::Error;

use crate::types::Phase;

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScoutError {
    #[error("scan command has no consent identifier")]
    MissingConsent,
    #[error("requested ranges outside the allowed scope: {}", violations.join(", "))]
    ScopeViolation { violations: Vec<String> },
    #[error("a scan is already running")]
    Busy,
    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },
}

/// Failure of a single TLS endpoint check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlsCheckError {
    /// Nothing answering, reset, or timed out. Not a finding.
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error("unreadable certificate: {0}")]
    Certificate(String),
}
