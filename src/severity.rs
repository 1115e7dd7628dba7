use std::fmt;

use serde::{Deserialize, Serialize};

/// Three-level risk shared by web findings and TLS issues.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        })
    }
}

const HIGH_KEYWORDS: &[&str] = &["critical", "exploit", "vulnerability"];
const MEDIUM_KEYWORDS: &[&str] = &["warning", "issue", "problem"];

/// Keyword heuristic over a free-text finding description.
///
/// Case-insensitive substring match; the first matching tier wins.
pub fn classify_description(description: &str) -> Severity {
    let desc = description.to_lowercase();
    if HIGH_KEYWORDS.iter().any(|k| desc.contains(k)) {
        Severity::High
    } else if MEDIUM_KEYWORDS.iter().any(|k| desc.contains(k)) {
        Severity::Medium
    } else {
        Severity::Low
    }
}
