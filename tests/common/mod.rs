#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use net_scout::config::ScanConfig;
use net_scout::discovery::DiscoveryEngine;
use net_scout::error::TlsCheckError;
use net_scout::orchestrator::{Orchestrator, Toolset};
use net_scout::tls::{TlsInspector, TlsObservation};
use net_scout::types::{
    HostRecord, HostState, PortRecord, PortState, ScanCommand, ScanRequest, ScanScope,
};
use net_scout::webprobe::{RawWebFinding, WebProbe};

pub fn host(ip: &str, ports: &[(u16, &str)]) -> HostRecord {
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

pub fn raw(description: &str) -> RawWebFinding {
    RawWebFinding {
        port: Some(80),
        method: "GET".into(),
        uri: "/".into(),
        description: description.into(),
    }
}

pub fn request(ranges: &[&str], http_hosts: &[&str], config: ScanConfig) -> ScanRequest {
    let command = ScanCommand {
        consent_id: Some("consent-1".into()),
        scope: ScanScope {
            cidr_ranges: ranges.iter().map(|s| s.to_string()).collect(),
            http_hosts: http_hosts.iter().map(|s| s.to_string()).collect(),
        },
    };
    ScanRequest::accept(command, config).expect("request in scope")
}

/// Lets a test hold the first call of a fake inside the tool.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
    used: AtomicBool,
}

impl Gate {
    async fn pass(&self) {
        if !self.used.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[derive(Default)]
pub struct FakeDiscovery {
    pub ranges: HashMap<String, Result<Vec<HostRecord>, String>>,
    pub panic_on: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeDiscovery {
    pub fn with(mut self, range: &str, hosts: Vec<HostRecord>) -> Self {
        self.ranges.insert(range.into(), Ok(hosts));
        self
    }

    pub fn failing(mut self, range: &str) -> Self {
        self.ranges.insert(range.into(), Err(format!("cannot scan {range}")));
        self
    }
}

#[async_trait]
impl DiscoveryEngine for FakeDiscovery {
    async fn discover(
        &self,
        range: &str,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<HostRecord>> {
        self.calls.lock().unwrap().push(range.to_string());
        if self.panic_on.as_deref() == Some(range) {
            panic!("discovery engine crashed on {range}");
        }
        match self.ranges.get(range) {
            Some(Ok(hosts)) => Ok(hosts.clone()),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct FakeWebProbe {
    pub hosts: HashMap<String, Result<Vec<RawWebFinding>, String>>,
    pub gate: Option<Arc<Gate>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeWebProbe {
    pub fn with(mut self, host: &str, findings: Vec<RawWebFinding>) -> Self {
        self.hosts.insert(host.into(), Ok(findings));
        self
    }

    pub fn failing(mut self, host: &str) -> Self {
        self.hosts.insert(host.into(), Err("nikto timed out".into()));
        self
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl WebProbe for FakeWebProbe {
    async fn probe(&self, host: &str) -> anyhow::Result<Vec<RawWebFinding>> {
        self.calls.lock().unwrap().push(host.to_string());
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        match self.hosts.get(host) {
            Some(Ok(findings)) => Ok(findings.clone()),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct FakeTls {
    pub endpoints: HashMap<(String, u16), Result<TlsObservation, TlsCheckError>>,
    pub calls: Mutex<Vec<(String, u16)>>,
}

impl FakeTls {
    pub fn with(
        mut self,
        host: &str,
        port: u16,
        result: Result<TlsObservation, TlsCheckError>,
    ) -> Self {
        self.endpoints.insert((host.into(), port), result);
        self
    }
}

#[async_trait]
impl TlsInspector for FakeTls {
    async fn inspect(
        &self,
        host: &str,
        _server_name: &str,
        port: u16,
    ) -> Result<TlsObservation, TlsCheckError> {
        self.calls.lock().unwrap().push((host.to_string(), port));
        self.endpoints
            .get(&(host.to_string(), port))
            .cloned()
            .unwrap_or_else(|| Err(TlsCheckError::Connection("connection refused".into())))
    }
}

pub struct Fakes {
    pub discovery: Arc<FakeDiscovery>,
    pub web: Arc<FakeWebProbe>,
    pub tls: Arc<FakeTls>,
}

impl Fakes {
    pub fn new(discovery: FakeDiscovery, web: FakeWebProbe, tls: FakeTls) -> Self {
        Self {
            discovery: Arc::new(discovery),
            web: Arc::new(web),
            tls: Arc::new(tls),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(Toolset {
            discovery: self.discovery.clone(),
            web_probe: self.web.clone(),
            tls: self.tls.clone(),
        })
    }
}
