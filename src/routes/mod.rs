// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, watch};
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::ingress::{EventQueue, IngressCounters};
use crate::models::OccupancySnapshot;
use crate::registry::MachineRegistry;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) stats_tx: broadcast::Sender<Arc<OccupancySnapshot>>,
    pub(crate) snapshot_rx: watch::Receiver<Arc<OccupancySnapshot>>,
    pub(crate) registry: Arc<MachineRegistry>,
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) counters: Arc<IngressCounters>,
    pub(crate) ws_connections: Arc<AtomicUsize>,
    pub(crate) config: AppConfig,
}

pub fn app(
    stats_tx: broadcast::Sender<Arc<OccupancySnapshot>>,
    snapshot_rx: watch::Receiver<Arc<OccupancySnapshot>>,
    registry: Arc<MachineRegistry>,
    queue: Arc<EventQueue>,
    counters: Arc<IngressCounters>,
    ws_connections: Arc<AtomicUsize>,
    config: AppConfig,
) -> Router {
    let state = AppState {
        stats_tx,
        snapshot_rx,
        registry,
        queue,
        counters,
        ws_connections,
        config,
    };
    Router::new()
        .route("/", get(|| async { "labwatch: occupancy aggregator up" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/snapshot", get(http::snapshot_handler)) // GET /api/snapshot
        .route("/api/machines", get(http::machines_handler)) // GET /api/machines
        .route("/api/machines/{id}", get(http::machine_handler)) // GET /api/machines/{id}
        .route("/api/ingress/stats", get(http::ingress_stats_handler)) // GET /api/ingress/stats
        .route("/api/events", post(http::submit_event_handler)) // POST /api/events
        .route("/api/events/bulk", post(http::submit_events_bulk_handler)) // POST /api/events/bulk
        .route("/ws/occupancy", get(ws::ws_occupancy)) // WS /ws/occupancy
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
