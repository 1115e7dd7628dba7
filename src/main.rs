use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use net_scout::config::{load_config, ScoutConfig};
use net_scout::orchestrator::{Orchestrator, ScanObserver, Toolset};
use net_scout::server::{self, AppState};
use net_scout::types::{ScanCommand, ScanOutcome, ScanReport, ScanRequest, ScanScope, StopReason};
use net_scout::logging;

/// net-scout: consent-gated network assessment merged into one severity-scored report.
#[derive(Debug, Clone, Parser)]
#[command(name = "net-scout", version, long_about = None)]
struct Cli {
    /// JSON configuration file. Defaults to ./net-scout.json when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also append logs to this file.
    #[arg(long = "log-file", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Accept scan commands over HTTP until Ctrl+C.
    Serve {
        /// Listen address, overrides the configured one.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one scan in the foreground and print the report.
    Run {
        /// Consent identifier authorising this scope.
        #[arg(long = "consent-id")]
        consent_id: String,

        /// CIDR range to discover (repeatable).
        #[arg(long = "cidr")]
        cidr: Vec<String>,

        /// HTTP(S) host to probe for web issues (repeatable).
        #[arg(long = "http-host")]
        http_hosts: Vec<String>,

        /// Write the report as pretty JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref())?;

    let config = load_config(cli.config.as_deref())?;
    info!(
        device_id = config.device_id.as_deref().unwrap_or("<unset>"),
        allowed_ranges = ?config.scanning.allowed_ranges,
        "configuration loaded"
    );
    let orchestrator = Orchestrator::new(Toolset::from_config(&config.scanning)?);

    match cli.command {
        Command::Serve { bind } => serve(config, orchestrator, bind).await,
        Command::Run {
            consent_id,
            cidr,
            http_hosts,
            output,
        } => {
            let command = ScanCommand {
                consent_id: Some(consent_id),
                scope: ScanScope {
                    cidr_ranges: cidr,
                    http_hosts,
                },
            };
            run_once(config, orchestrator, command, output.as_deref()).await
        }
    }
}

async fn serve(
    config: ScoutConfig,
    orchestrator: Orchestrator,
    bind: Option<String>,
) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.bind.clone());
    let state = AppState::new(orchestrator.clone(), config.scanning);
    tokio::select! {
        res = server::serve(&bind, state) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            orchestrator.abort();
            Ok(())
        }
    }
}

struct ConsoleObserver;

impl ScanObserver for ConsoleObserver {
    fn on_progress(&self, phase: &str, percent: f32) {
        println!("[{percent:>5.1}%] {phase}");
    }

    fn on_aborted(&self, _report: ScanReport, reason: StopReason) {
        warn!(%reason, "scan ended early; report is partial");
    }

    fn on_error(&self, message: &str) {
        error!(reason = message, "scan failed");
    }
}

async fn run_once(
    config: ScoutConfig,
    orchestrator: Orchestrator,
    command: ScanCommand,
    output: Option<&Path>,
) -> Result<()> {
    let request = ScanRequest::accept(command, config.scanning)?;
    let handle = orchestrator.start(request)?;

    // Ctrl-C aborts the scan at the next checkpoint.
    let on_ctrlc = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrlc.abort();
        }
    });

    let report = match handle.drive(&ConsoleObserver).await {
        ScanOutcome::Completed(report) => report,
        ScanOutcome::Aborted { report, .. } => report,
        ScanOutcome::Failed(message) => bail!("scan failed: {message}"),
    };

    print_report_table(&report);
    if let Some(path) = output {
        write_report_json(path, &report)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        println!("Wrote JSON report to {}", path.display());
    }
    Ok(())
}

fn print_report_table(report: &ScanReport) {
    let mut ip_w = "ip".len();
    let mut svc_w = "service".len();
    for h in &report.hosts {
        ip_w = ip_w.max(h.ip.to_string().len());
        for p in &h.ports {
            svc_w = svc_w.max(p.service.len());
        }
    }
    let port_w = 5usize;

    let s = &report.summary;
    println!(
        "\nHosts: {}  open ports: {}  findings: {} high / {} medium / {} low",
        s.total_hosts, s.open_ports, s.high_severity, s.medium_severity, s.low_severity
    );
    if let Some(reason) = report.stopped {
        println!("Scan ended early ({reason}); results are partial.");
    }
    println!(
        "{:<ip_w$}  {:>port_w$}  {:<svc_w$}  product",
        "ip",
        "port",
        "service",
    );
    println!("{:-<ip_w$}  {:-<port_w$}  {:-<svc_w$}  {:-<7}", "", "", "", "");
    for h in &report.hosts {
        for p in &h.ports {
            let product = [p.product.as_deref(), p.version.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            println!(
                "{:<ip_w$}  {:>port_w$}  {:<svc_w$}  {}",
                h.ip, p.port, p.service, product
            );
        }
    }

    let findings: Vec<_> = report.hosts.iter().flat_map(|h| &h.web_findings).collect();
    if !findings.is_empty() {
        println!("\nWeb findings:");
        for f in findings {
            println!("  [{:<6}] {} {} {} - {}", f.severity, f.host, f.method, f.uri, f.description);
        }
    }
    if !report.tls_issues.is_empty() {
        println!("\nTLS issues:");
        for i in &report.tls_issues {
            println!("  [{:<6}] {}:{} {:?} - {}", i.severity, i.host, i.port, i.issue, i.details);
        }
    }
}

fn write_report_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
