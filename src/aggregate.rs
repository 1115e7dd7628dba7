use std::time::Duration;

use tracing::debug;

use crate::types::{
    HostRecord, ScanReport, ScanScope, SeveritySummary, StopReason, TlsIssue, WebFinding,
};
use crate::webprobe::host_key;

/// Merges per-phase outputs into the final report.
///
/// `finish` consumes the aggregator, so a scan's findings can only be
/// counted once.
#[derive(Debug)]
pub struct Aggregator {
    consent_id: String,
    scope: ScanScope,
    start_time: String,
    hosts: Vec<HostRecord>,
}

impl Aggregator {
    pub fn new(
        consent_id: String,
        scope: ScanScope,
        start_time: String,
        hosts: Vec<HostRecord>,
    ) -> Self {
        Self {
            consent_id,
            scope,
            start_time,
            hosts,
        }
    }

    /// Attach web findings to their hosts, append TLS issues, and total everything.
    ///
    /// A web finding whose host is not a discovered IP is dropped.
    pub fn finish(
        mut self,
        web_findings: Vec<WebFinding>,
        tls_issues: Vec<TlsIssue>,
        end_time: String,
        duration: Duration,
        stopped: Option<StopReason>,
    ) -> ScanReport {
        let mut summary = SeveritySummary {
            total_hosts: self.hosts.len() as u64,
            open_ports: self.hosts.iter().map(HostRecord::open_port_count).sum(),
            ..SeveritySummary::default()
        };

        for finding in web_findings {
            let target = host_key(&finding.host)
                .and_then(|ip| self.hosts.iter_mut().find(|h| h.ip == ip));
            match target {
                Some(host) => {
                    summary.record(finding.severity);
                    host.web_findings.push(finding);
                }
                None => debug!(
                    host = %finding.host,
                    uri = %finding.uri,
                    "no discovered host for web finding, dropping"
                ),
            }
        }

        for issue in &tls_issues {
            summary.record(issue.severity);
        }

        ScanReport {
            consent_id: self.consent_id,
            start_time: self.start_time,
            end_time,
            duration_seconds: duration.as_secs(),
            scope: self.scope,
            hosts: self.hosts,
            tls_issues,
            summary,
            stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;
    use crate::types::{HostState, PortRecord, PortState, TlsIssueKind};

    fn host(ip: &str, ports: &[(u16, &str)]) -> HostRecord {
        let mut h = HostRecord::new(ip.parse().unwrap(), HostState::Up);
        for &(port, service) in ports {
            h.ports.push(PortRecord {
                port,
                protocol: "tcp".into(),
                state: PortState::Open,
                service: service.into(),
                product: None,
                version: None,
                extra_info: None,
            });
        }
        h
    }

    fn finding(host: &str, severity: Severity) -> WebFinding {
        WebFinding {
            host: host.into(),
            port: Some(80),
            method: "GET".into(),
            uri: "/".into(),
            description: "x".into(),
            severity,
        }
    }

    fn aggregator(hosts: Vec<HostRecord>) -> Aggregator {
        Aggregator::new("c-1".into(), ScanScope::default(), "t0".into(), hosts)
    }

    #[test]
    fn findings_join_by_ip_and_unknown_hosts_are_dropped() {
        let hosts = vec![
            host("10.0.0.5", &[(22, "ssh")]),
            host("10.0.0.6", &[(80, "http"), (443, "https")]),
        ];
        let report = aggregator(hosts).finish(
                vec![
                    finding("http://10.0.0.6/", Severity::High),
                    finding("10.0.0.6", Severity::Low),
                    finding("10.0.0.99", Severity::High),
                    finding("intranet.lan", Severity::Medium),
                ],
                vec![TlsIssue::new("10.0.0.6", 443, TlsIssueKind::SslError, "boom".into())],
                "t1".into(),
                Duration::from_secs(12),
                None,
            );

        assert_eq!(report.summary.total_hosts, 2);
        assert_eq!(report.summary.open_ports, 3);
        assert_eq!(report.hosts.len(), 2);
        assert!(report.hosts[0].web_findings.is_empty());
        assert_eq!(report.hosts[1].web_findings.len(), 2);
        assert_eq!(report.summary.high_severity, 1);
        assert_eq!(report.summary.medium_severity, 1);
        assert_eq!(report.summary.low_severity, 1);
        assert_eq!(
            report.summary.findings_total() as usize,
            report.web_finding_count() + report.tls_issues.len()
        );
        assert_eq!(report.duration_seconds, 12);
    }

    #[test]
    fn empty_scan_has_zero_summary() {
        let report = aggregator(Vec::new()).finish(
            Vec::new(),
            Vec::new(),
            "t1".into(),
            Duration::ZERO,
            None,
        );
        assert_eq!(report.summary, SeveritySummary::default());
        assert!(report.tls_issues.is_empty());
    }
}
