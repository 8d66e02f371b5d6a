//! HTTP source and webhook notifier against a local axum server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use registry_monitor::config::NotifyConfig;
use registry_monitor::notifier::{FanoutNotifier, WebhookNotifier};
use registry_monitor::source::HttpSource;
use registry_monitor_core::models::{ChangeResult, Record};
use registry_monitor_core::notify::{Alert, AlertKind, Notifier};
use registry_monitor_core::source::SnapshotSource;
use registry_monitor_core::stability::StabilityMetrics;
use registry_monitor_core::Status;

#[derive(Clone, Default)]
struct Shared {
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

const SNAPSHOT: &str = r#"{"pages": 2, "records": [
    {"id": "seia_1000001", "name": "A", "status_raw": "Aprobado"},
    {"id": "seia_1000002", "name": "B", "status_raw": "Aprobado"}
]}"#;

async fn flaky(State(state): State<Shared>) -> (StatusCode, String) {
    // Fail twice, then serve the snapshot.
    if state.hits.fetch_add(1, Ordering::SeqCst) < 2 {
        (StatusCode::SERVICE_UNAVAILABLE, "maintenance".to_string())
    } else {
        (StatusCode::OK, SNAPSHOT.to_string())
    }
}

async fn forbidden(State(state): State<Shared>) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FORBIDDEN, "no".to_string())
}

async fn capture(State(state): State<Shared>, Json(body): Json<serde_json::Value>) -> StatusCode {
    state.bodies.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

fn metrics() -> StabilityMetrics {
    StabilityMetrics {
        intersection_ratio: 0.4,
        count_ratio: 1.0,
        is_stable: false,
        staging_count: 100,
        baseline_count: 100,
        intersection_count: 40,
    }
}

#[tokio::test]
async fn test_http_source_retries_server_errors() {
    let state = Shared::default();
    let app = Router::new()
        .route("/snapshot", get(flaky))
        .with_state(state.clone());
    let addr = serve(app).await;

    let source = HttpSource::new("api", format!("http://{}/snapshot", addr), Duration::from_secs(5), 3)
        .unwrap()
        .with_backoff(Duration::from_millis(10));
    let retrieval = source.fetch().await.unwrap();

    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
    assert_eq!(retrieval.records.len(), 2);
    assert_eq!(retrieval.meta.pages_fetched, 2);
    assert_eq!(retrieval.records[0].status, Status::Approved);
}

#[tokio::test]
async fn test_http_source_gives_up_after_max_retries() {
    let state = Shared::default();
    let app = Router::new()
        .route("/snapshot", get(flaky))
        .with_state(state.clone());
    let addr = serve(app).await;

    let source = HttpSource::new("api", format!("http://{}/snapshot", addr), Duration::from_secs(5), 1)
        .unwrap()
        .with_backoff(Duration::from_millis(10));
    let err = source.fetch().await.unwrap_err();

    assert_eq!(state.hits.load(Ordering::SeqCst), 2);
    assert!(err.to_string().contains("503"), "err={}", err);
}

#[tokio::test]
async fn test_http_source_does_not_retry_client_errors() {
    let state = Shared::default();
    let app = Router::new()
        .route("/snapshot", get(forbidden))
        .with_state(state.clone());
    let addr = serve(app).await;

    let source = HttpSource::new("api", format!("http://{}/snapshot", addr), Duration::from_secs(5), 3)
        .unwrap()
        .with_backoff(Duration::from_millis(10));
    assert!(source.fetch().await.is_err());
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_webhook_posts_plain_json() {
    let state = Shared::default();
    let app = Router::new()
        .route("/hook", post(capture))
        .with_state(state.clone());
    let addr = serve(app).await;

    let webhook = WebhookNotifier::new(format!("http://{}/hook", addr), Duration::from_secs(5)).unwrap();
    let changes = ChangeResult {
        new_records: vec![Record::new("seia_1000003", "C", "Aprobado")],
        ..Default::default()
    };
    webhook.report(&changes).await.unwrap();
    webhook
        .alert(&Alert {
            kind: AlertKind::QuarantineEntered,
            reason: "intersection too low".to_string(),
            metrics: metrics(),
            total_retrieved: 100,
        })
        .await
        .unwrap();

    let bodies = state.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["type"], "report");
    assert_eq!(bodies[0]["new_count"], 1);
    assert_eq!(bodies[0]["new_records"][0]["id"], "seia_1000003");
    assert_eq!(bodies[1]["type"], "alert");
    assert_eq!(bodies[1]["kind"], "quarantine_entered");
    assert_eq!(bodies[1]["metrics"]["intersection_count"], 40);
}

#[tokio::test]
async fn test_fanout_respects_anomaly_switch() {
    let state = Shared::default();
    let app = Router::new()
        .route("/hook", post(capture))
        .with_state(state.clone());
    let addr = serve(app).await;

    let config = NotifyConfig {
        enabled: true,
        alert_on_anomaly: false,
        webhook_url: Some(format!("http://{}/hook", addr)),
        timeout_secs: 5,
    };
    let notifier = FanoutNotifier::from_config(&config).unwrap();

    let alert = |kind| Alert {
        kind,
        reason: "r".to_string(),
        metrics: metrics(),
        total_retrieved: 1,
    };
    notifier.alert(&alert(AlertKind::Anomaly)).await.unwrap();
    notifier.alert(&alert(AlertKind::QuarantineActive)).await.unwrap();

    let bodies = state.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["kind"], "quarantine_active");
}

#[tokio::test]
async fn test_webhook_error_status_is_reported() {
    let app = Router::new().route("/hook", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let addr = serve(app).await;

    let webhook = WebhookNotifier::new(format!("http://{}/hook", addr), Duration::from_secs(5)).unwrap();
    let err = webhook.report(&ChangeResult::default()).await.unwrap_err();
    assert!(err.to_string().contains("500"));
}
