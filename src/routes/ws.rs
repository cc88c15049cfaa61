// WebSocket handler and stream logic for /ws/occupancy

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, watch};
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::models::OccupancySnapshot;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements ws_occupancy connection count on drop (connect = +1, drop = -1).
struct WsOccupancyGuard(Arc<AtomicUsize>);

impl Drop for WsOccupancyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }
}

pub(super) async fn ws_occupancy(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let tx = state.stats_tx.clone();
    let conn_count = state.ws_connections.clone();
    let snapshot_rx = state.snapshot_rx.clone();
    ws.on_upgrade(move |socket| async move {
        let mut rx = tx.subscribe();
        if let Err(e) = stream_occupancy(socket, &mut rx, conn_count, snapshot_rx).await {
            tracing::info!("Occupancy stream error: {}", e);
        }
    })
}

async fn stream_occupancy(
    mut socket: WebSocket,
    rx: &mut broadcast::Receiver<Arc<OccupancySnapshot>>,
    conn_count: Arc<AtomicUsize>,
    snapshot_rx: watch::Receiver<Arc<OccupancySnapshot>>,
) -> anyhow::Result<()> {
    conn_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let _guard = WsOccupancyGuard(conn_count);
    tracing::info!("Client connected to occupancy stream");

    // Welcome frame: the latest snapshot, so the view renders immediately
    // instead of waiting for the next publish.
    let welcome = snapshot_rx.borrow().clone();
    let welcome_json = serde_json::to_string(welcome.as_ref())?;
    let r = timeout(
        WS_SEND_TIMEOUT,
        socket.send(Message::Text(welcome_json.into())),
    )
    .await;
    if r.is_err() || r.unwrap_or(Ok(())).is_err() {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(snapshot) => {
                        let json = serde_json::to_string(snapshot.as_ref())?;
                        let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
                        if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/occupancy client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}
