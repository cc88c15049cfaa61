// Integration tests: HTTP and WebSocket endpoints

mod common;

use axum_test::TestServer;
use common::{event, now_ms};
use labwatch::config::{AppConfig, OverflowPolicy};
use labwatch::ingress::{EventQueue, IngressCounters};
use labwatch::models::{EventSource, MachineStatus, OccupancySnapshot};
use labwatch::registry::MachineRegistry;
use labwatch::routes;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, watch};

const TEST_CONFIG: &str = r#"
[server]
port = 8091
host = "0.0.0.0"

[ingress]
queue_capacity = 64
clock_skew_tolerance_secs = 30

[aggregation]
debounce_ms = 10
refresh_interval_ms = 50
stale_after_secs = 60

[publishing]
broadcast_capacity = 16

[monitoring]
stats_log_interval_secs = 3600
"#;

struct TestApp {
    app: axum::Router,
    stats_tx: broadcast::Sender<Arc<OccupancySnapshot>>,
    snapshot_tx: watch::Sender<Arc<OccupancySnapshot>>,
    registry: Arc<MachineRegistry>,
    queue: Arc<EventQueue>,
}

fn test_app_with_queue(queue: Arc<EventQueue>) -> TestApp {
    let config = AppConfig::load_from_str(TEST_CONFIG).unwrap();
    let registry = Arc::new(MachineRegistry::default());
    let (stats_tx, _) = broadcast::channel(config.publishing.broadcast_capacity);
    let initial = Arc::new(labwatch::aggregator::build_snapshot(
        &registry,
        now_ms(),
        60_000,
    ));
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let counters = Arc::new(IngressCounters::default());
    let app = routes::app(
        stats_tx.clone(),
        snapshot_rx,
        registry.clone(),
        queue.clone(),
        counters,
        Arc::new(AtomicUsize::new(0)),
        config,
    );
    TestApp {
        app,
        stats_tx,
        snapshot_tx,
        registry,
        queue,
    }
}

fn test_app() -> TestApp {
    test_app_with_queue(Arc::new(EventQueue::new(64, OverflowPolicy::DropOldest)))
}

/// Build TestServer with http_transport (required for WebSocket tests).
fn test_server_with_http(app: axum::Router) -> TestServer {
    TestServer::builder().http_transport().build(app).unwrap()
}

#[tokio::test]
async fn test_root_endpoint() {
    let t = test_app();
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("labwatch: occupancy aggregator up");
}

#[tokio::test]
async fn test_version_endpoint() {
    let t = test_app();
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("labwatch"));
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_initial_snapshot_is_all_zero() {
    let t = test_app();
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/api/snapshot").await;
    response.assert_status_ok();
    let snapshot: OccupancySnapshot = response.json();
    assert_eq!(snapshot.stats.connected, 0);
    assert_eq!(snapshot.stats.alerts, 0);
    assert!(snapshot.machines.is_empty());
}

#[tokio::test]
async fn test_machines_empty_and_unknown_id_404() {
    let t = test_app();
    let server = TestServer::new(t.app).unwrap();
    let list = server.get("/api/machines").await;
    list.assert_status_ok();
    let machines: Vec<labwatch::models::Machine> = list.json();
    assert!(machines.is_empty());

    let missing = server.get("/api/machines/pc-404").await;
    missing.assert_status_not_found();
    let json: serde_json::Value = missing.json();
    assert_eq!(
        json.get("error").and_then(|v| v.as_str()),
        Some("MACHINE_NOT_FOUND")
    );
}

#[tokio::test]
async fn test_machine_lookup_after_direct_apply() {
    let t = test_app();
    t.registry
        .apply_event(&event("pc-001", MachineStatus::Fault, 1_000, EventSource::Sensor))
        .unwrap();
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/api/machines/pc-001").await;
    response.assert_status_ok();
    let machine: labwatch::models::Machine = response.json();
    assert_eq!(machine.status, MachineStatus::Fault);
}

#[tokio::test]
async fn test_post_event_is_accepted_and_queued() {
    let t = test_app();
    let server = TestServer::new(t.app).unwrap();
    let response = server
        .post("/api/events")
        .json(&event("pc-001", MachineStatus::Occupied, now_ms(), EventSource::Sensor))
        .await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    assert_eq!(t.queue.len(), 1);
}

#[tokio::test]
async fn test_post_malformed_event_is_422_and_counted() {
    let t = test_app();
    let server = TestServer::new(t.app).unwrap();
    let response = server
        .post("/api/events")
        .json(&event("pc 001", MachineStatus::Occupied, now_ms(), EventSource::Sensor))
        .await;
    response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    let json: serde_json::Value = response.json();
    assert_eq!(
        json.get("error").and_then(|v| v.as_str()),
        Some("MALFORMED_EVENT")
    );

    let stats = server.get("/api/ingress/stats").await;
    stats.assert_status_ok();
    let stats: labwatch::ingress::IngressStats = stats.json();
    assert_eq!(stats.rejected_malformed, 1);
    assert_eq!(stats.accepted, 0);
}

#[tokio::test]
async fn test_post_event_queue_full_is_retryable_503() {
    let t = test_app_with_queue(Arc::new(EventQueue::new(1, OverflowPolicy::RejectNew)));
    let server = TestServer::new(t.app).unwrap();
    let now = now_ms();
    server
        .post("/api/events")
        .json(&event("pc-001", MachineStatus::Occupied, now, EventSource::Sensor))
        .await
        .assert_status(axum::http::StatusCode::ACCEPTED);
    let full = server
        .post("/api/events")
        .json(&event("pc-002", MachineStatus::Occupied, now, EventSource::Sensor))
        .await;
    full.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(full.header("retry-after"), "1");
    let json: serde_json::Value = full.json();
    assert_eq!(json.get("error").and_then(|v| v.as_str()), Some("QUEUE_FULL"));
}

#[tokio::test]
async fn test_bulk_events_mixed_validity() {
    let t = test_app();
    let server = TestServer::new(t.app).unwrap();
    let now = now_ms();
    let body = serde_json::json!({
        "events": [
            event("pc-001", MachineStatus::Occupied, now, EventSource::Sensor),
            event("bad id", MachineStatus::Free, now, EventSource::Sensor),
            event("pc-002", MachineStatus::Free, now, EventSource::Heartbeat),
        ]
    });
    let response = server.post("/api/events/bulk").json(&body).await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    let json: serde_json::Value = response.json();
    assert_eq!(json.get("accepted").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(json.get("rejected").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(t.queue.len(), 2);
}

// --- WebSocket message tests (require http_transport + ws feature) ---
// Receive until we get valid JSON (server may send Ping first).

async fn receive_first_json_text<T: serde::de::DeserializeOwned>(
    ws: &mut axum_test::TestWebSocket,
) -> T {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(v) = serde_json::from_str::<T>(&text) {
            return v;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for JSON"
        );
    }
}

#[tokio::test]
async fn test_ws_occupancy_welcome_is_current_snapshot() {
    let t = test_app();
    // Seed the watch channel so the welcome frame is distinguishable.
    let seeded = OccupancySnapshot {
        generated_at: 77,
        stats: labwatch::models::OccupancyStats {
            connected: 1,
            occupied: 1,
            free: 0,
            offline: 0,
            fault: 0,
            alerts: 0,
        },
        machines: vec![],
    };
    t.snapshot_tx.send_replace(Arc::new(seeded));
    let server = test_server_with_http(t.app);
    let mut ws = server
        .get_websocket("/ws/occupancy")
        .await
        .into_websocket()
        .await;
    let welcome: OccupancySnapshot = receive_first_json_text(&mut ws).await;
    assert_eq!(welcome.generated_at, 77);
    assert_eq!(welcome.stats.occupied, 1);
}

#[tokio::test]
async fn test_ws_occupancy_receives_broadcast_snapshot() {
    let t = test_app();
    let snapshot = OccupancySnapshot {
        generated_at: 42,
        stats: labwatch::models::OccupancyStats {
            connected: 2,
            occupied: 1,
            free: 1,
            offline: 0,
            fault: 0,
            alerts: 0,
        },
        machines: vec![],
    };
    let server = test_server_with_http(t.app);
    let mut ws = server
        .get_websocket("/ws/occupancy")
        .await
        .into_websocket()
        .await;
    // Skip the welcome frame (generated_at of the initial empty snapshot).
    let _welcome: OccupancySnapshot = receive_first_json_text(&mut ws).await;

    let tx = t.stats_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        let _ = tx.send(Arc::new(snapshot));
    });
    let received: OccupancySnapshot = receive_first_json_text(&mut ws).await;
    assert_eq!(received.generated_at, 42);
    assert_eq!(received.stats.connected, 2);
}
