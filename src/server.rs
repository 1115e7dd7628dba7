use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    config::ScanConfig,
    error::ScoutError,
    orchestrator::Orchestrator,
    types::{ScanCommand, ScanOutcome, ScanReport, ScanRequest},
};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    config: Arc<ScanConfig>,
    last_report: Arc<RwLock<Option<ScanReport>>>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: ScanConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
            last_report: Arc::new(RwLock::new(None)),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AbortBody {
    aborting: bool,
}

/// Build the `/api` router. Separate from [`serve`] so it can be driven in-process.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/abort", post(post_abort))
        .route("/report", get(get_report))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "command API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.orchestrator.status()))
}

async fn get_report(State(app): State<AppState>) -> impl IntoResponse {
    let last = app.last_report.read().await;
    if let Some(report) = last.as_ref() {
        (StatusCode::OK, Json(report.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_abort(State(app): State<AppState>) -> impl IntoResponse {
    let aborting = app.orchestrator.abort();
    (StatusCode::ACCEPTED, Json(AbortBody { aborting }))
}

fn rejection(status: StatusCode, err: ScoutError) -> axum::response::Response {
    let violations = match &err {
        ScoutError::ScopeViolation { violations } => violations.clone(),
        _ => Vec::new(),
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            violations,
        }),
    )
        .into_response()
}

async fn post_scan(
    State(app): State<AppState>,
    Json(command): Json<ScanCommand>,
) -> impl IntoResponse {
    let request = match ScanRequest::accept(command, app.config.as_ref().clone()) {
        Ok(r) => r,
        Err(e @ ScoutError::MissingConsent) => {
            warn!("rejecting scan without consent identifier");
            return rejection(StatusCode::BAD_REQUEST, e);
        }
        Err(e) => {
            warn!(error = %e, "rejecting out-of-scope scan");
            return rejection(StatusCode::FORBIDDEN, e);
        }
    };

    let handle = match app.orchestrator.start(request) {
        Ok(h) => h,
        Err(e) => return rejection(StatusCode::CONFLICT, e),
    };

    let last_report = app.last_report.clone();
    tokio::spawn(async move {
        match handle.outcome().await {
            ScanOutcome::Completed(report) => *last_report.write().await = Some(report),
            ScanOutcome::Aborted { report, reason } => {
                warn!(%reason, "scan ended early, keeping partial report");
                *last_report.write().await = Some(report);
            }
            ScanOutcome::Failed(reason) => error!(%reason, "scan failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(app.orchestrator.status())).into_response()
}
