//! Web server probing of the explicitly scoped HTTP(S) hosts.

use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::time;
use tracing::{info, warn};

use crate::config::WebProbeConfig;
use crate::control::Checkpoint;
use crate::severity::classify_description;
use crate::types::WebFinding;

/// A finding as reported by the probe, before severity classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawWebFinding {
    pub port: Option<u16>,
    pub method: String,
    pub uri: String,
    pub description: String,
}

impl RawWebFinding {
    pub fn classify(self, host: &str) -> WebFinding {
        let severity = classify_description(&self.description);
        WebFinding {
            host: host.to_string(),
            port: self.port,
            method: self.method,
            uri: self.uri,
            description: self.description,
            severity,
        }
    }
}

/// Probes one web host and returns its raw findings.
///
/// An error means the host contributes nothing; partial output is never returned.
#[async_trait]
pub trait WebProbe: Send + Sync {
    async fn probe(&self, host: &str) -> Result<Vec<RawWebFinding>>;
}

/// Probe each host in order, classifying every finding.
///
/// Timeouts, tool failures and unparsable output skip the host.
pub async fn run_phase(
    probe: &dyn WebProbe,
    hosts: &[String],
    checkpoint: &Checkpoint,
) -> Vec<WebFinding> {
    let mut findings = Vec::new();
    for host in hosts {
        if let Some(reason) = checkpoint.check() {
            info!(%reason, host = %host, "web probe stopped before host");
            break;
        }
        info!(host = %host, "probing web host");
        match probe.probe(host).await {
            Ok(raw) => {
                info!(host = %host, findings = raw.len(), "web probe complete");
                findings.extend(raw.into_iter().map(|r| r.classify(host)));
            }
            Err(e) => warn!(
                host = %host,
                error = %format!("{e:#}"),
                "web probe failed, skipping host"
            ),
        }
    }
    findings
}

/// Web probing through a `nikto` subprocess with JSON on stdout.
#[derive(Debug, Clone)]
pub struct NiktoProbe {
    program: String,
    timeout: Duration,
}

impl NiktoProbe {
    pub fn new(config: &WebProbeConfig) -> Self {
        Self {
            program: config.nikto_path.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl WebProbe for NiktoProbe {
    async fn probe(&self, host: &str) -> Result<Vec<RawWebFinding>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-h", host, "-Format", "json", "-output", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = time::timeout(self.timeout, cmd.output())
            .await
            .with_context(|| format!("nikto timed out after {:?}", self.timeout))?
            .with_context(|| format!("failed to run {}", self.program))?;
        if !output.status.success() {
            bail!("nikto exited with {}", output.status);
        }
        parse_nikto_json(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract findings from nikto's JSON report.
///
/// Items are read from the `host` array, or `vulnerabilities` when that is
/// what the report carries. The document may also be an array of such
/// objects. A document with neither key yields no findings.
pub fn parse_nikto_json(s: &str) -> Result<Vec<RawWebFinding>> {
    let doc: Value = serde_json::from_str(s.trim()).context("unparsable nikto JSON")?;
    let reports: Vec<&Value> = match &doc {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&doc],
        _ => bail!("unexpected nikto JSON document"),
    };

    let mut out = Vec::new();
    for report in reports {
        let items = ["host", "vulnerabilities"]
            .iter()
            .find_map(|key| report.get(key).and_then(Value::as_array));
        for item in items.into_iter().flatten() {
            if !item.is_object() {
                continue;
            }
            out.push(RawWebFinding {
                port: item.get("port").and_then(port_value),
                method: string_field(item, &["method"]),
                uri: string_field(item, &["uri", "url"]),
                description: string_field(item, &["description", "msg"]),
            });
        }
    }
    Ok(out)
}

fn string_field(item: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn port_value(v: &Value) -> Option<u16> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The IP a scoped web host identifier refers to, used to join findings to hosts.
///
/// Accepts bare addresses, `addr:port`, and URLs. Names are not resolved.
pub fn host_key(identifier: &str) -> Option<IpAddr> {
    let id = identifier.trim();
    if let Ok(ip) = id.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(sock) = id.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    let with_scheme = if id.contains("://") {
        id.to_string()
    } else {
        format!("http://{id}")
    };
    match url::Url::parse(&with_scheme).ok()?.host()? {
        url::Host::Ipv4(v4) => Some(IpAddr::V4(v4)),
        url::Host::Ipv6(v6) => Some(IpAddr::V6(v6)),
        url::Host::Domain(_) => None,
    }
}
