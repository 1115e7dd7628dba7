mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{host, FakeDiscovery, FakeTls, FakeWebProbe, Fakes, Gate};
use net_scout::config::ScanConfig;
use net_scout::server::{router, AppState};

fn app_with(web: FakeWebProbe) -> Router {
    let fakes = Fakes::new(
        FakeDiscovery::default().with("10.0.0.0/24", vec![host("10.0.0.5", &[(22, "ssh")])]),
        web,
        FakeTls::default(),
    );
    router(AppState::new(fakes.orchestrator(), ScanConfig::default()))
}

fn app() -> Router {
    app_with(FakeWebProbe::default())
}

async fn wait_for_report(app: &Router) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let (StatusCode::OK, Some(report)) = send(app, "GET", "/api/report", None).await {
                break report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("report published")
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Option<Value>) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = (!bytes.is_empty()).then(|| serde_json::from_slice(&bytes).unwrap());
    (status, json)
}

#[tokio::test]
async fn idle_status_and_empty_report() {
    let app = app();
    let (status, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Some(json!({ "state": "idle" })));

    let (status, body) = send(&app, "GET", "/api/report", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, None);

    let (status, body) = send(&app, "POST", "/api/abort", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, Some(json!({ "aborting": false })));
}

#[tokio::test]
async fn scan_without_consent_is_bad_request() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/scan",
        Some(json!({ "scope": { "cidr_ranges": ["10.0.0.0/24"] } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.unwrap()["error"].as_str().unwrap().contains("consent"));
}

#[tokio::test]
async fn out_of_scope_range_is_forbidden() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/scan",
        Some(json!({
            "consent_id": "c-42",
            "scope": { "cidr": ["10.0.0.0/24", "8.8.8.0/24"] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body.unwrap()["violations"], json!(["8.8.8.0/24"]));
}

#[tokio::test]
async fn accepted_scan_publishes_report() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/scan",
        Some(json!({
            "consent_id": "c-42",
            "scope": { "cidr_ranges": ["10.0.0.0/24"], "http_hosts": [] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.unwrap().get("state").is_some());

    let report = wait_for_report(&app).await;

    assert_eq!(report["consent_id"], "c-42");
    assert_eq!(report["summary"]["total_hosts"], 1);
    assert_eq!(report["summary"]["open_ports"], 1);
    assert_eq!(report["hosts"][0]["ip"], "10.0.0.5");
    assert!(report.get("stopped").is_none());

    let (_, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(body, Some(json!({ "state": "idle" })));
}

#[tokio::test]
async fn scan_while_running_is_conflict() {
    let gate = Arc::new(Gate::default());
    let app = app_with(FakeWebProbe::default().gated(gate.clone()));
    let command = json!({
        "consent_id": "c-42",
        "scope": { "cidr_ranges": ["10.0.0.0/24"], "http_hosts": ["10.0.0.5"] }
    });

    let (status, _) = send(&app, "POST", "/api/scan", Some(command.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    gate.entered.notified().await;

    let (status, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["phase"], "web_probe");

    let (status, body) = send(&app, "POST", "/api/scan", Some(command)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.unwrap()["error"], "a scan is already running");

    gate.release.notify_one();
    let report = wait_for_report(&app).await;
    assert_eq!(report["summary"]["total_hosts"], 1);
}
