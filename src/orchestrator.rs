//! Scan orchestration: runs one scan at a time on its own task and exposes
//! `start`, `abort` and `status` to other execution contexts.
//!
//! Progress is a stream of [`ScanEvent`]s and the result is a single
//! [`ScanOutcome`], both carried by the [`ScanHandle`] returned from
//! [`Orchestrator::start`].

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregate::Aggregator;
use crate::config::ScanConfig;
use crate::control::Checkpoint;
use crate::discovery::{self, DiscoveryEngine};
use crate::error::ScoutError;
use crate::state::ScanStateMachine;
use crate::tls::{self, NativeTlsInspector, TlsInspector};
use crate::types::{Phase, ScanEvent, ScanOutcome, ScanReport, ScanRequest, ScanStatus, StopReason};
use crate::webprobe::{self, NiktoProbe, WebProbe};

/// The three external tools a scan drives.
#[derive(Clone)]
pub struct Toolset {
    pub discovery: Arc<dyn DiscoveryEngine>,
    pub web_probe: Arc<dyn WebProbe>,
    pub tls: Arc<dyn TlsInspector>,
}

impl Toolset {
    /// Real tools as selected by `config`.
    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        Ok(Self {
            discovery: Arc::from(discovery::engine_from_config(&config.discovery)),
            web_probe: Arc::new(NiktoProbe::new(&config.web_probe)),
            tls: Arc::new(NativeTlsInspector::new(&config.tls)?),
        })
    }
}

/// Callback-style consumer of a scan, see [`ScanHandle::drive`].
pub trait ScanObserver: Send + Sync {
    fn on_progress(&self, _phase: &str, _percent: f32) {}
    fn on_complete(&self, _report: ScanReport) {}
    fn on_error(&self, _message: &str) {}
    fn on_aborted(&self, _report: ScanReport, _reason: StopReason) {}
}

/// Caller's side of a running scan.
#[derive(Debug)]
pub struct ScanHandle {
    events: mpsc::UnboundedReceiver<ScanEvent>,
    outcome: oneshot::Receiver<ScanOutcome>,
}

impl ScanHandle {
    /// Next progress event; `None` once the scan has finished.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Wait for the final outcome, discarding unread progress events.
    pub async fn outcome(self) -> ScanOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| ScanOutcome::Failed("scan worker terminated unexpectedly".into()))
    }

    /// Forward every event and the outcome to `observer`, returning the outcome.
    ///
    /// Exactly one of `on_complete`, `on_error` or `on_aborted` is called.
    pub async fn drive(mut self, observer: &dyn ScanObserver) -> ScanOutcome {
        while let Some(ScanEvent::Progress { phase, percent }) = self.events.recv().await {
            observer.on_progress(phase.label(), percent);
        }
        let outcome = self.outcome().await;
        match &outcome {
            ScanOutcome::Completed(report) => observer.on_complete(report.clone()),
            ScanOutcome::Aborted { report, reason } => observer.on_aborted(report.clone(), *reason),
            ScanOutcome::Failed(message) => observer.on_error(message),
        }
        outcome
    }
}

/// What the worker publishes for `status()`.
#[derive(Debug, Clone, Copy)]
enum Live {
    Running {
        phase: Phase,
        started: Instant,
        hosts_scanned: u64,
    },
    Finished,
}

struct ActiveScan {
    cancel: CancellationToken,
    live: watch::Receiver<Live>,
}

impl ActiveScan {
    fn is_running(&self) -> bool {
        matches!(*self.live.borrow(), Live::Running { .. })
    }
}

/// Entry point for starting, aborting and inspecting scans.
///
/// Cheap to clone; clones share the single active-scan slot, so at most one
/// scan runs across all of them.
#[derive(Clone)]
pub struct Orchestrator {
    tools: Toolset,
    active: Arc<Mutex<Option<ActiveScan>>>,
}

impl Orchestrator {
    pub fn new(tools: Toolset) -> Self {
        Self {
            tools,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Launch `request` on a new task. Must be called within a Tokio runtime.
    ///
    /// Returns [`ScoutError::Busy`] while another scan is running.
    pub fn start(&self, request: ScanRequest) -> Result<ScanHandle, ScoutError> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(ActiveScan::is_running) {
            warn!("scan already in progress, rejecting start");
            return Err(ScoutError::Busy);
        }

        let cancel = CancellationToken::new();
        let checkpoint = Checkpoint::new(cancel.clone(), request.config().max_duration());
        // published as Discovery until the worker enters it or stops first
        let (live_tx, live_rx) = watch::channel(Live::Running {
            phase: Phase::Discovery,
            started: Instant::now(),
            hosts_scanned: 0,
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        info!(
            consent_id = request.consent_id(),
            ranges = request.scope().cidr_ranges.len(),
            http_hosts = request.scope().http_hosts.len(),
            "starting scan"
        );
        let pipeline = Pipeline {
            request,
            tools: self.tools.clone(),
            checkpoint,
            live: Arc::new(live_tx),
            events: events_tx,
            machine: ScanStateMachine::new(),
        };
        tokio::spawn(run_worker(pipeline, outcome_tx));

        *slot = Some(ActiveScan {
            cancel,
            live: live_rx,
        });
        Ok(ScanHandle {
            events: events_rx,
            outcome: outcome_rx,
        })
    }

    /// Request cooperative cancellation. Returns whether a scan was running.
    ///
    /// Does not wait for the scan to stop.
    pub fn abort(&self) -> bool {
        let slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref().filter(|a| a.is_running()) {
            Some(active) => {
                warn!("scan abort requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> ScanStatus {
        let slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = slot.as_ref() else {
            return ScanStatus::Idle;
        };
        let live = *active.live.borrow();
        match live {
            Live::Finished => ScanStatus::Idle,
            Live::Running {
                phase,
                started,
                hosts_scanned,
            } => ScanStatus::Running {
                phase,
                elapsed_seconds: started.elapsed().as_secs(),
                hosts_scanned,
            },
        }
    }

    pub fn is_running(&self) -> bool {
        !self.status().is_idle()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

enum PipelineEnd {
    Completed(ScanReport),
    Stopped(ScanReport, StopReason),
}

struct Pipeline {
    request: ScanRequest,
    tools: Toolset,
    checkpoint: Checkpoint,
    live: Arc<watch::Sender<Live>>,
    events: mpsc::UnboundedSender<ScanEvent>,
    machine: ScanStateMachine,
}

impl Pipeline {
    /// Enter `phase` unless the scan should stop first.
    fn begin(&mut self, phase: Phase) -> Result<Option<StopReason>> {
        if let Some(reason) = self.checkpoint.check() {
            return Ok(Some(reason));
        }
        self.machine.advance(phase)?;
        self.live.send_modify(|live| {
            if let Live::Running { phase: p, .. } = live {
                *p = phase;
            }
        });
        self.emit(phase);
        Ok(None)
    }

    fn emit(&self, phase: Phase) {
        if let Some(percent) = phase.milestone() {
            info!(phase = %phase, percent, "scan progress");
            let _ = self.events.send(ScanEvent::Progress { phase, percent });
        }
    }

    /// Drive the phases; an internal error leaves the machine in `Failed`.
    async fn run(&mut self) -> Result<PipelineEnd> {
        let result = self.execute().await;
        if result.is_err() && !self.machine.phase().is_terminal() {
            self.machine.advance(Phase::Failed)?;
        }
        result
    }

    async fn execute(&mut self) -> Result<PipelineEnd> {
        let start_time = now_rfc3339();
        let tools = self.tools.clone();
        let scope = self.request.scope().clone();
        let config = self.request.config().clone();

        let mut hosts = Vec::new();
        let mut web_findings = Vec::new();
        let mut tls_issues = Vec::new();

        let stopped = 'phases: {
            if let Some(reason) = self.begin(Phase::Discovery)? {
                break 'phases Some(reason);
            }
            let live = self.live.clone();
            let found = discovery::run_phase(
                tools.discovery.as_ref(),
                &scope.cidr_ranges,
                &self.checkpoint,
                |n| {
                    live.send_modify(|l| {
                        if let Live::Running { hosts_scanned, .. } = l {
                            *hosts_scanned = n;
                        }
                    });
                },
            )
            .await;
            hosts = found.hosts;

            if let Some(reason) = self.begin(Phase::WebProbe)? {
                break 'phases Some(reason);
            }
            web_findings =
                webprobe::run_phase(tools.web_probe.as_ref(), &scope.http_hosts, &self.checkpoint)
                    .await;

            if let Some(reason) = self.begin(Phase::TlsValidate)? {
                break 'phases Some(reason);
            }
            tls_issues =
                tls::run_phase(tools.tls.as_ref(), &hosts, &config.tls, &self.checkpoint).await;

            if let Some(reason) = self.begin(Phase::Aggregating)? {
                break 'phases Some(reason);
            }
            None
        };

        let report = Aggregator::new(
            self.request.consent_id().to_string(),
            scope,
            start_time,
            hosts,
        )
        .finish(
            web_findings,
            tls_issues,
            now_rfc3339(),
            self.checkpoint.elapsed(),
            stopped,
        );

        match stopped {
            Some(reason) => {
                self.machine.advance(Phase::Aborted)?;
                warn!(%reason, hosts = report.hosts.len(), "scan stopped early");
                Ok(PipelineEnd::Stopped(report, reason))
            }
            None => {
                self.machine.advance(Phase::Complete)?;
                self.emit(Phase::Complete);
                info!(
                    hosts = report.summary.total_hosts,
                    open_ports = report.summary.open_ports,
                    high = report.summary.high_severity,
                    medium = report.summary.medium_severity,
                    low = report.summary.low_severity,
                    "scan complete"
                );
                Ok(PipelineEnd::Completed(report))
            }
        }
    }
}

/// Run the pipeline on its own task so a panic becomes a `Failed` outcome,
/// then mark the scan finished before delivering the outcome.
async fn run_worker(mut pipeline: Pipeline, outcome_tx: oneshot::Sender<ScanOutcome>) {
    let live = pipeline.live.clone();
    let outcome = match tokio::spawn(async move { pipeline.run().await }).await {
        Ok(Ok(PipelineEnd::Completed(report))) => ScanOutcome::Completed(report),
        Ok(Ok(PipelineEnd::Stopped(report, reason))) => ScanOutcome::Aborted { report, reason },
        Ok(Err(e)) => {
            error!(error = %format!("{e:#}"), "scan failed");
            ScanOutcome::Failed(e.to_string())
        }
        Err(join) => {
            error!(error = %join, "scan task panicked");
            ScanOutcome::Failed(format!("scan task panicked: {join}"))
        }
    };
    live.send_replace(Live::Finished);
    let _ = outcome_tx.send(outcome);
}
