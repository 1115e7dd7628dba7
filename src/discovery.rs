//! Host and port discovery over the requested CIDR ranges.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DiscoveryBackend, DiscoveryConfig};
use crate::control::Checkpoint;
use crate::types::{HostRecord, HostState, PortRecord, PortState};
use crate::{netdetect, ports, scanner};

/// Enumerates live hosts and their ports for one address range.
#[async_trait]
pub trait DiscoveryEngine: Send + Sync {
    async fn discover(&self, range: &str, cancel: &CancellationToken) -> Result<Vec<HostRecord>>;
}

/// Build the engine selected by `config.backend`.
pub fn engine_from_config(config: &DiscoveryConfig) -> Box<dyn DiscoveryEngine> {
    match config.backend {
        DiscoveryBackend::Nmap => Box::new(NmapDiscovery::new(config)),
        DiscoveryBackend::Connect => Box::new(ConnectDiscovery::new(config)),
    }
}

/// Output of the discovery phase.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutput {
    pub hosts: Vec<HostRecord>,
    pub failed_ranges: Vec<String>,
}

/// Run discovery over every range in order.
///
/// A failing range is logged and skipped. Hosts already seen in an earlier
/// range are dropped so each IP appears once. `on_progress` receives the
/// number of unique hosts found so far after each range completes.
pub async fn run_phase(
    engine: &dyn DiscoveryEngine,
    ranges: &[String],
    checkpoint: &Checkpoint,
    mut on_progress: impl FnMut(u64),
) -> DiscoveryOutput {
    let mut out = DiscoveryOutput::default();
    let mut seen = HashSet::<IpAddr>::new();

    for range in ranges {
        if let Some(reason) = checkpoint.check() {
            info!(%reason, range = %range, "discovery stopped before range");
            break;
        }
        info!(range = %range, "discovering hosts");
        match engine.discover(range, checkpoint.token()).await {
            Ok(hosts) => {
                let before = out.hosts.len();
                for host in hosts {
                    if seen.insert(host.ip) {
                        out.hosts.push(host);
                    } else {
                        debug!(
                            ip = %host.ip,
                            range = %range,
                            "host already discovered, skipping duplicate"
                        );
                    }
                }
                info!(range = %range, hosts = out.hosts.len() - before, "range complete");
            }
            Err(e) => {
                warn!(
                    range = %range,
                    error = %format!("{e:#}"),
                    "discovery failed for range, skipping"
                );
                out.failed_ranges.push(range.clone());
            }
        }
        on_progress(out.hosts.len() as u64);
    }
    out
}

/// Discovery through an `nmap` subprocess with XML output on stdout.
#[derive(Debug, Clone)]
pub struct NmapDiscovery {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl NmapDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            program: config.nmap_path.clone(),
            args: config.nmap_args.clone(),
            timeout: config.range_timeout(),
        }
    }
}

#[async_trait]
impl DiscoveryEngine for NmapDiscovery {
    async fn discover(&self, range: &str, _cancel: &CancellationToken) -> Result<Vec<HostRecord>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(["-oX", "-", range])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = time::timeout(self.timeout, cmd.output())
            .await
            .with_context(|| format!("nmap timed out after {:?}", self.timeout))?
            .with_context(|| format!("failed to run {}", self.program))?;
        if !output.status.success() {
            bail!(
                "nmap exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_nmap_xml(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<NmapHost>,
}

#[derive(Debug, Deserialize)]
struct NmapHost {
    #[serde(rename = "address", default)]
    addresses: Vec<NmapAddress>,
    status: Option<NmapStatus>,
    #[serde(default)]
    hostnames: Option<NmapHostnames>,
    #[serde(default)]
    ports: Option<NmapPorts>,
}

#[derive(Debug, Deserialize)]
struct NmapAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addr_type: String,
}

#[derive(Debug, Deserialize)]
struct NmapStatus {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct NmapHostnames {
    #[serde(rename = "hostname", default)]
    names: Vec<NmapHostname>,
}

#[derive(Debug, Deserialize)]
struct NmapHostname {
    #[serde(rename = "@name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct NmapPorts {
    #[serde(rename = "port", default)]
    ports: Vec<NmapPort>,
}

#[derive(Debug, Deserialize)]
struct NmapPort {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: u16,
    state: NmapPortState,
    service: Option<NmapService>,
}

#[derive(Debug, Deserialize)]
struct NmapPortState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
struct NmapService {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@product", default)]
    product: Option<String>,
    #[serde(rename = "@version", default)]
    version: Option<String>,
    #[serde(rename = "@extrainfo", default)]
    extra_info: Option<String>,
    #[serde(rename = "@tunnel", default)]
    tunnel: Option<String>,
}

impl NmapService {
    /// Service name as nmap prints it: `ssl/http` for an SSL-tunnelled http port.
    fn display_name(&self) -> String {
        let name = non_empty(self.name.clone()).unwrap_or_else(|| "unknown".to_string());
        match self.tunnel.as_deref() {
            Some("ssl") => format!("ssl/{name}"),
            _ => name,
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

/// Convert an nmap XML report into host records, in report order.
///
/// Hosts without an IPv4/IPv6 address are ignored.
pub fn parse_nmap_xml(xml: &str) -> Result<Vec<HostRecord>> {
    let run: NmapRun = quick_xml::de::from_str(xml).context("malformed nmap XML")?;
    let mut hosts = Vec::with_capacity(run.hosts.len());
    for h in run.hosts {
        let Some(ip) = h
            .addresses
            .iter()
            .filter(|a| a.addr_type == "ipv4" || a.addr_type == "ipv6")
            .find_map(|a| a.addr.parse::<IpAddr>().ok())
        else {
            continue;
        };
        let mut record = HostRecord::new(
            ip,
            h.status
                .as_ref()
                .map(|s| HostState::from(s.state.as_str()))
                .unwrap_or(HostState::Unknown),
        );
        record.hostname = h
            .hostnames
            .and_then(|hn| hn.names.into_iter().map(|n| n.name).find(|n| !n.is_empty()));
        for p in h.ports.map(|p| p.ports).unwrap_or_default() {
            let service = p.service.unwrap_or_default();
            record.ports.push(PortRecord {
                port: p.portid,
                protocol: p.protocol,
                state: PortState::from(p.state.state.as_str()),
                service: service.display_name(),
                product: non_empty(service.product),
                version: non_empty(service.version),
                extra_info: non_empty(service.extra_info),
            });
        }
        hosts.push(record);
    }
    Ok(hosts)
}

/// Built-in discovery: TCP connect sweep of a port list, no external tools.
#[derive(Debug, Clone)]
pub struct ConnectDiscovery {
    ports_file: Option<PathBuf>,
    concurrency: usize,
    timeout: Duration,
}

impl ConnectDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            ports_file: config.ports_file.clone(),
            concurrency: config.concurrency,
            timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl DiscoveryEngine for ConnectDiscovery {
    async fn discover(&self, range: &str, cancel: &CancellationToken) -> Result<Vec<HostRecord>> {
        let targets = netdetect::expand_range(range)?;
        let port_list = ports::load_ports_or_default(self.ports_file.as_deref());
        debug!(range, targets = targets.len(), ports = port_list.len(), "starting connect sweep");
        let open =
            scanner::sweep(&targets, &port_list, self.concurrency, self.timeout, cancel).await;

        let mut hosts: Vec<HostRecord> = Vec::new();
        for socket in open {
            if hosts.last().map(|h| h.ip) != Some(socket.ip) {
                hosts.push(HostRecord::new(socket.ip, HostState::Up));
            }
            if let Some(host) = hosts.last_mut() {
                host.ports.push(PortRecord {
                    port: socket.port,
                    protocol: "tcp".to_string(),
                    state: PortState::Open,
                    service: ports::service_name(socket.port).to_string(),
                    product: None,
                    version: None,
                    extra_info: socket.banner,
                });
            }
        }
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sS -sV -oX - 10.0.0.0/29" start="1700000000" version="7.94">
<scaninfo type="syn" protocol="tcp" numservices="1000" services="1-1000"/>
<verbose level="0"/>
<debugging level="0"/>
<host starttime="1700000001" endtime="1700000010">
  <status state="up" reason="arp-response" reason_ttl="0"/>
  <address addr="10.0.0.5" addrtype="ipv4"/>
  <address addr="AA:BB:CC:DD:EE:FF" addrtype="mac" vendor="Acme"/>
  <hostnames><hostname name="files.lan" type="PTR"/></hostnames>
  <ports>
    <extraports state="closed" count="999"><extrareasons reason="reset" count="999"/></extraports>
    <port protocol="tcp" portid="22">
      <state state="open" reason="syn-ack" reason_ttl="64"/>
      <service name="ssh" product="OpenSSH" version="8.9p1" extrainfo="Ubuntu Linux" method="probed" conf="10"/>
    </port>
  </ports>
</host>
<taskprogress task="Service scan" time="1700000011" percent="50.00"/>
<host starttime="1700000001" endtime="1700000012">
  <status state="up" reason="arp-response" reason_ttl="0"/>
  <address addr="10.0.0.6" addrtype="ipv4"/>
  <hostnames/>
  <ports>
    <port protocol="tcp" portid="443">
      <state state="open" reason="syn-ack" reason_ttl="64"/>
      <service name="https" method="table" conf="3"/>
    </port>
    <port protocol="tcp" portid="8080">
      <state state="open" reason="syn-ack" reason_ttl="64"/>
    </port>
  </ports>
</host>
<runstats><finished time="1700000013" elapsed="13.00" exit="success"/><hosts up="2" down="6" total="8"/></runstats>
</nmaprun>"#;

    #[test]
    fn parses_hosts_ports_and_services() {
        let hosts = parse_nmap_xml(SAMPLE).unwrap();
        assert_eq!(hosts.len(), 2);

        let a = &hosts[0];
        assert_eq!(a.ip.to_string(), "10.0.0.5");
        assert_eq!(a.hostname.as_deref(), Some("files.lan"));
        assert_eq!(a.state, HostState::Up);
        assert_eq!(a.ports.len(), 1);
        assert_eq!(a.ports[0].service, "ssh");
        assert_eq!(a.ports[0].product.as_deref(), Some("OpenSSH"));
        assert_eq!(a.ports[0].version.as_deref(), Some("8.9p1"));
        assert_eq!(a.ports[0].extra_info.as_deref(), Some("Ubuntu Linux"));

        let b = &hosts[1];
        assert_eq!(b.hostname, None);
        assert_eq!(b.ports[0].port, 443);
        assert_eq!(b.ports[0].service, "https");
        assert_eq!(b.ports[0].product, None);
        assert_eq!(b.ports[1].service, "unknown");
        assert_eq!(b.open_port_count(), 2);
    }

    #[test]
    fn ssl_tunnel_is_part_of_the_service_name() {
        let xml = r#"<nmaprun><host>
  <status state="up"/>
  <address addr="10.0.0.9" addrtype="ipv4"/>
  <ports>
    <port protocol="tcp" portid="443">
      <state state="open"/>
      <service name="http" product="nginx" tunnel="ssl" method="probed" conf="10"/>
    </port>
    <port protocol="tcp" portid="80">
      <state state="open"/>
      <service name="http" product="nginx" method="probed" conf="10"/>
    </port>
  </ports>
</host></nmaprun>"#;
        let hosts = parse_nmap_xml(xml).unwrap();
        let ports = &hosts[0].ports;
        assert_eq!(ports[0].service, "ssl/http");
        assert_eq!(ports[0].product.as_deref(), Some("nginx"));
        assert_eq!(ports[1].service, "http");

        let tls_services = crate::config::TlsConfig::default().services;
        assert!(crate::tls::is_tls_service(&ports[0].service, &tls_services));
        assert!(!crate::tls::is_tls_service(&ports[1].service, &tls_services));
    }

    #[test]
    fn empty_run_has_no_hosts() {
        let xml = r#"<nmaprun><runstats><hosts up="0" down="0" total="0"/></runstats></nmaprun>"#;
        assert!(parse_nmap_xml(xml).unwrap().is_empty());
    }

    #[test]
    fn mismatched_tags_are_an_error() {
        let xml = r#"<nmaprun><host><status state="up"/></nmaprun>"#;
        assert!(parse_nmap_xml(xml).is_err());
    }
}
