//! Certificate and protocol checks on discovered TLS endpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use native_tls::Protocol;
use ::time::format_description::well_known::Rfc3339;
use ::time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio::time;
use tokio_native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info, warn};
use x509_parser::parse_x509_certificate;

use crate::config::TlsConfig;
use crate::control::Checkpoint;
use crate::error::TlsCheckError;
use crate::types::{HostRecord, PortState, TlsIssue, TlsIssueKind};

/// Protocol version negotiated with an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProtocol {
    Tls10,
    Tls11,
    Tls12OrLater,
}

impl TlsProtocol {
    pub fn is_deprecated(self) -> bool {
        matches!(self, TlsProtocol::Tls10 | TlsProtocol::Tls11)
    }

    pub fn label(self) -> &'static str {
        match self {
            TlsProtocol::Tls10 => "TLSv1",
            TlsProtocol::Tls11 => "TLSv1.1",
            TlsProtocol::Tls12OrLater => "TLSv1.2+",
        }
    }
}

/// What a successful inspection learned about an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsObservation {
    /// Leaf certificate `notAfter`.
    pub not_after: OffsetDateTime,
    pub protocol: Option<TlsProtocol>,
    /// Set when chain or hostname verification failed but the leaf could still be read.
    pub verification_error: Option<String>,
}

#[async_trait]
pub trait TlsInspector: Send + Sync {
    /// Connect to `host:port`, presenting `server_name` for SNI and verification.
    async fn inspect(
        &self,
        host: &str,
        server_name: &str,
        port: u16,
    ) -> Result<TlsObservation, TlsCheckError>;
}

pub fn is_tls_service(service: &str, tls_services: &[String]) -> bool {
    tls_services.iter().any(|s| service.eq_ignore_ascii_case(s)) || service.starts_with("ssl/")
}

fn format_date(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

/// Turn an observation into issues.
///
/// Expired and expiring-soon are exclusive; an endpoint expiring in exactly
/// `warning_days` days is not yet "soon". The weak protocol check applies
/// independently.
pub fn classify(
    host: &str,
    port: u16,
    obs: &TlsObservation,
    now: OffsetDateTime,
    warning_days: i64,
) -> Vec<TlsIssue> {
    let mut issues = Vec::new();
    let expired = obs.not_after < now;
    if expired {
        issues.push(TlsIssue::new(
            host,
            port,
            TlsIssueKind::ExpiredCertificate,
            format!("Certificate expired on {}", format_date(obs.not_after)),
        ));
    } else {
        let days_left = (obs.not_after - now).whole_days();
        if days_left < warning_days {
            issues.push(TlsIssue::new(
                host,
                port,
                TlsIssueKind::CertificateExpiringSoon,
                format!("Certificate expires in {days_left} days"),
            ));
        }
    }
    if let Some(protocol) = obs.protocol.filter(|p| p.is_deprecated()) {
        issues.push(TlsIssue::new(
            host,
            port,
            TlsIssueKind::WeakTlsProtocol,
            format!("Using deprecated TLS version: {}", protocol.label()),
        ));
    }
    if let Some(err) = obs.verification_error.as_ref().filter(|_| !expired) {
        issues.push(TlsIssue::new(host, port, TlsIssueKind::SslError, err.clone()));
    }
    issues
}

/// Issues produced by a failed inspection. Connection failures produce none.
pub fn issues_for_error(host: &str, port: u16, err: &TlsCheckError) -> Vec<TlsIssue> {
    match err {
        TlsCheckError::Connection(reason) => {
            debug!(host, port, reason = %reason, "no TLS endpoint reachable");
            Vec::new()
        }
        TlsCheckError::Handshake(msg) | TlsCheckError::Certificate(msg) => {
            vec![TlsIssue::new(host, port, TlsIssueKind::SslError, msg.clone())]
        }
    }
}

/// Check every TLS-like open port of every discovered host.
pub async fn run_phase(
    inspector: &dyn TlsInspector,
    hosts: &[HostRecord],
    config: &TlsConfig,
    checkpoint: &Checkpoint,
) -> Vec<TlsIssue> {
    let mut issues = Vec::new();
    for host in hosts {
        if let Some(reason) = checkpoint.check() {
            info!(%reason, ip = %host.ip, "TLS validation stopped before host");
            break;
        }
        let target = host.ip.to_string();
        let server_name = host.hostname.as_deref().unwrap_or(&target);
        for port in host
            .ports
            .iter()
            .filter(|p| p.state == PortState::Open && is_tls_service(&p.service, &config.services))
        {
            debug!(host = %target, port = port.port, "checking certificate");
            let found = match inspector.inspect(&target, server_name, port.port).await {
                Ok(obs) => classify(
                    &target,
                    port.port,
                    &obs,
                    OffsetDateTime::now_utc(),
                    config.expiry_warning_days,
                ),
                Err(e) => issues_for_error(&target, port.port, &e),
            };
            for issue in &found {
                warn!(
                    host = %target,
                    port = port.port,
                    issue = ?issue.issue,
                    details = %issue.details,
                    "TLS issue"
                );
            }
            issues.extend(found);
        }
    }
    issues
}

/// Inspector backed by the platform TLS library.
///
/// The negotiated version is inferred from which minimum-version handshakes
/// the server accepts, since the platform API does not expose it.
#[derive(Clone)]
pub struct NativeTlsInspector {
    timeout: Duration,
    strict: TlsConnector,
    permissive: TlsConnector,
    min_tls12: TlsConnector,
    min_tls11: TlsConnector,
}

fn build_connector(verify: bool, min: Protocol) -> Result<TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.min_protocol_version(Some(min));
    if !verify {
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    let connector = builder.build().context("failed to build TLS connector")?;
    Ok(TlsConnector::from(connector))
}

impl NativeTlsInspector {
    pub fn new(config: &TlsConfig) -> Result<Self> {
        Ok(Self {
            timeout: config.connect_timeout(),
            strict: build_connector(true, Protocol::Tlsv10)?,
            permissive: build_connector(false, Protocol::Tlsv10)?,
            min_tls12: build_connector(false, Protocol::Tlsv12)?,
            min_tls11: build_connector(false, Protocol::Tlsv11)?,
        })
    }

    async fn handshake(
        &self,
        connector: &TlsConnector,
        host: &str,
        server_name: &str,
        port: u16,
    ) -> Result<TlsStream<TcpStream>, TlsCheckError> {
        let tcp = time::timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TlsCheckError::Connection("connect timed out".into()))?
            .map_err(|e| TlsCheckError::Connection(e.to_string()))?;
        time::timeout(self.timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| TlsCheckError::Connection("handshake timed out".into()))?
            .map_err(|e| TlsCheckError::Handshake(e.to_string()))
    }

    async fn negotiated_protocol(
        &self,
        host: &str,
        server_name: &str,
        port: u16,
    ) -> Option<TlsProtocol> {
        match self.handshake(&self.min_tls12, host, server_name, port).await {
            Ok(_) => return Some(TlsProtocol::Tls12OrLater),
            Err(TlsCheckError::Handshake(_)) => {}
            Err(_) => return None,
        }
        match self.handshake(&self.min_tls11, host, server_name, port).await {
            Ok(_) => Some(TlsProtocol::Tls11),
            Err(TlsCheckError::Handshake(_)) => Some(TlsProtocol::Tls10),
            Err(_) => None,
        }
    }

    async fn observe(
        &self,
        stream: TlsStream<TcpStream>,
        host: &str,
        server_name: &str,
        port: u16,
        verification_error: Option<String>,
    ) -> Result<TlsObservation, TlsCheckError> {
        let not_after = leaf_not_after(&stream)?;
        drop(stream);
        let protocol = self.negotiated_protocol(host, server_name, port).await;
        Ok(TlsObservation {
            not_after,
            protocol,
            verification_error,
        })
    }
}

fn leaf_not_after(stream: &TlsStream<TcpStream>) -> Result<OffsetDateTime, TlsCheckError> {
    let cert = stream
        .get_ref()
        .peer_certificate()
        .map_err(|e| TlsCheckError::Certificate(e.to_string()))?
        .ok_or_else(|| TlsCheckError::Certificate("no peer certificate".into()))?;
    let der = cert
        .to_der()
        .map_err(|e| TlsCheckError::Certificate(e.to_string()))?;
    let (_, x509) =
        parse_x509_certificate(&der).map_err(|e| TlsCheckError::Certificate(e.to_string()))?;
    Ok(x509.validity().not_after.to_datetime())
}

#[async_trait]
impl TlsInspector for NativeTlsInspector {
    async fn inspect(
        &self,
        host: &str,
        server_name: &str,
        port: u16,
    ) -> Result<TlsObservation, TlsCheckError> {
        match self.handshake(&self.strict, host, server_name, port).await {
            Ok(stream) => self.observe(stream, host, server_name, port, None).await,
            Err(TlsCheckError::Handshake(msg)) => {
                // Verification may have failed; read the leaf anyway so an expired
                // certificate is reported as such.
                match self.handshake(&self.permissive, host, server_name, port).await {
                    Ok(stream) => self.observe(stream, host, server_name, port, Some(msg)).await,
                    Err(_) => Err(TlsCheckError::Handshake(msg)),
                }
            }
            Err(e) => Err(e),
        }
    }
}
