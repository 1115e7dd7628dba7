use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::error::ScoutError;
use crate::scope;
use crate::severity::Severity;

/// Addresses and web hosts a scan is allowed to touch.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanScope {
    #[serde(default, alias = "cidr")]
    pub cidr_ranges: Vec<String>,
    #[serde(default)]
    pub http_hosts: Vec<String>,
}

/// Inbound start command as delivered by the transport collaborator.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ScanCommand {
    #[serde(default)]
    pub consent_id: Option<String>,
    #[serde(default)]
    pub scope: ScanScope,
}

/// A start command that passed consent and scope validation.
///
/// Fields are private so an accepted request cannot be altered afterwards.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    consent_id: String,
    scope: ScanScope,
    config: ScanConfig,
}

impl ScanRequest {
    /// Validate a command against `config` and freeze it into a request.
    ///
    /// Fails closed: a missing consent identifier or any range outside the
    /// allow-list rejects the whole command.
    pub fn accept(command: ScanCommand, config: ScanConfig) -> Result<Self, ScoutError> {
        let consent_id = scope::require_consent(command.consent_id.as_deref())?;
        scope::validate_ranges(&command.scope.cidr_ranges, &config.allowed_ranges)
            .map_err(|violations| ScoutError::ScopeViolation { violations })?;
        Ok(Self {
            consent_id,
            scope: command.scope,
            config,
        })
    }

    pub fn consent_id(&self) -> &str {
        &self.consent_id
    }

    pub fn scope(&self) -> &ScanScope {
        &self.scope
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }
}

/// Reachability of a discovered host.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Up,
    Down,
    Unknown,
}

impl From<&str> for HostState {
    fn from(s: &str) -> Self {
        match s {
            "up" => HostState::Up,
            "down" => HostState::Down,
            _ => HostState::Unknown,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unfiltered,
    OpenFiltered,
    ClosedFiltered,
    Unknown,
}

impl From<&str> for PortState {
    fn from(s: &str) -> Self {
        match s {
            "open" => PortState::Open,
            "closed" => PortState::Closed,
            "filtered" => PortState::Filtered,
            "unfiltered" => PortState::Unfiltered,
            "open|filtered" => PortState::OpenFiltered,
            "closed|filtered" => PortState::ClosedFiltered,
            _ => PortState::Unknown,
        }
    }
}

/// One discovered port on a host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port: u16,
    pub protocol: String,
    pub state: PortState,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<String>,
}

/// A live host produced by discovery. The IP is its identity for the rest of the scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub ip: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub state: HostState,
    pub ports: Vec<PortRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_findings: Vec<WebFinding>,
}

impl HostRecord {
    pub fn new(ip: IpAddr, state: HostState) -> Self {
        Self {
            ip,
            hostname: None,
            state,
            ports: Vec::new(),
            web_findings: Vec::new(),
        }
    }

    pub fn open_port_count(&self) -> u64 {
        self.ports
            .iter()
            .filter(|p| p.state == PortState::Open)
            .count() as u64
    }
}

/// A classified web probe finding.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WebFinding {
    /// Host identifier as supplied in the scan scope.
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub method: String,
    pub uri: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TlsIssueKind {
    ExpiredCertificate,
    CertificateExpiringSoon,
    WeakTlsProtocol,
    SslError,
}

impl TlsIssueKind {
    pub fn severity(self) -> Severity {
        match self {
            TlsIssueKind::ExpiredCertificate | TlsIssueKind::WeakTlsProtocol => Severity::High,
            TlsIssueKind::CertificateExpiringSoon | TlsIssueKind::SslError => Severity::Medium,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TlsIssue {
    pub host: String,
    pub port: u16,
    pub issue: TlsIssueKind,
    pub severity: Severity,
    pub details: String,
}

impl TlsIssue {
    pub fn new(host: impl Into<String>, port: u16, issue: TlsIssueKind, details: String) -> Self {
        Self {
            host: host.into(),
            port,
            issue,
            severity: issue.severity(),
            details,
        }
    }
}

/// Discovery totals plus per-severity finding counts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeveritySummary {
    pub total_hosts: u64,
    pub open_ports: u64,
    pub high_severity: u64,
    pub medium_severity: u64,
    pub low_severity: u64,
}

impl SeveritySummary {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high_severity += 1,
            Severity::Medium => self.medium_severity += 1,
            Severity::Low => self.low_severity += 1,
        }
    }

    pub fn findings_total(&self) -> u64 {
        self.high_severity + self.medium_severity + self.low_severity
    }
}

/// Why a scan ended before reaching `Complete`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Aborted,
    DeadlineExceeded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Aborted => f.write_str("aborted"),
            StopReason::DeadlineExceeded => f.write_str("maximum scan duration exceeded"),
        }
    }
}

/// The unified result of one scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub consent_id: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: u64,
    pub scope: ScanScope,
    pub hosts: Vec<HostRecord>,
    pub tls_issues: Vec<TlsIssue>,
    pub summary: SeveritySummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped: Option<StopReason>,
}

impl ScanReport {
    pub fn web_finding_count(&self) -> usize {
        self.hosts.iter().map(|h| h.web_findings.len()).sum()
    }

    pub fn host(&self, ip: IpAddr) -> Option<&HostRecord> {
        self.hosts.iter().find(|h| h.ip == ip)
    }
}

/// States of a single scan run, in execution order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Discovery,
    WebProbe,
    TlsValidate,
    Aggregating,
    Complete,
    Aborted,
    Failed,
}

impl Phase {
    /// Human-facing phase name used in progress events.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Discovery => "Discovery",
            Phase::WebProbe => "Web Scanning",
            Phase::TlsValidate => "TLS Validation",
            Phase::Aggregating => "Aggregating",
            Phase::Complete => "Complete",
            Phase::Aborted => "Aborted",
            Phase::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Read-only snapshot returned by `Orchestrator::status`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Running {
        phase: Phase,
        elapsed_seconds: u64,
        hosts_scanned: u64,
    },
}

impl ScanStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, ScanStatus::Idle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Progress { phase: Phase, percent: f32 },
}

/// Final result of a scan, delivered exactly once.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Completed(ScanReport),
    Aborted { report: ScanReport, reason: StopReason },
    Failed(String),
}
