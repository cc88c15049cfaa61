// Snapshot publisher: recomputes stats on change signals (debounced) and on
// a periodic refresh tick so staleness alerts surface without new events.
// Publish lag after an accepted event is bounded by debounce_ms.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::{Notify, broadcast, watch};
use tokio::time::{Duration, Instant, interval};

use crate::aggregator;
use crate::ingress::IngressCounters;
use crate::models::OccupancySnapshot;
use crate::registry::MachineRegistry;

/// Rate limit for "no receivers" logging (avoid a line per publish when no
/// one is on /ws/occupancy).
const NO_RECEIVERS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Current unix time in millis; logs and returns 0 if the clock is broken.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}

/// Registry, channels, and shutdown for the publisher.
pub struct PublisherDeps {
    pub registry: Arc<MachineRegistry>,
    /// Signalled by the apply worker after each accepted event.
    pub changes: Arc<Notify>,
    /// Latest snapshot for pull consumers (GET /api/snapshot).
    pub snapshot_tx: watch::Sender<Arc<OccupancySnapshot>>,
    /// Fan-out to push consumers (/ws/occupancy).
    pub stats_tx: broadcast::Sender<Arc<OccupancySnapshot>>,
    pub counters: Arc<IngressCounters>,
    pub ws_connections: Arc<AtomicUsize>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// Publisher timing and logging config.
pub struct PublisherConfig {
    pub debounce_ms: u64,
    pub refresh_interval_ms: u64,
    pub stale_after_secs: u64,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
}

pub fn spawn(deps: PublisherDeps, config: PublisherConfig) -> tokio::task::JoinHandle<()> {
    let PublisherDeps {
        registry,
        changes,
        snapshot_tx,
        stats_tx,
        counters,
        ws_connections,
        mut shutdown_rx,
    } = deps;
    let stale_after_ms = config.stale_after_secs * 1000;

    tokio::spawn(async move {
        let mut debounce_tick = interval(Duration::from_millis(config.debounce_ms));
        debounce_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut refresh_tick = interval(Duration::from_millis(config.refresh_interval_ms));
        refresh_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(config.stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut dirty = false;
        let mut last_no_receivers_log: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = changes.notified() => {
                    dirty = true;
                }
                _ = debounce_tick.tick() => {
                    if dirty {
                        publish(&registry, &snapshot_tx, &stats_tx, stale_after_ms, &mut last_no_receivers_log);
                        dirty = false;
                    }
                }
                _ = refresh_tick.tick() => {
                    // Unconditional: staleness can change with no new events.
                    publish(&registry, &snapshot_tx, &stats_tx, stale_after_ms, &mut last_no_receivers_log);
                    dirty = false;
                }
                _ = stats_log_tick.tick() => {
                    let stats = counters.stats();
                    tracing::info!(
                        machines = registry.len(),
                        ws_occupancy_clients =
                            ws_connections.load(std::sync::atomic::Ordering::Relaxed),
                        events_accepted_total = stats.accepted,
                        events_rejected_malformed_total = stats.rejected_malformed,
                        events_rejected_stale_total = stats.rejected_stale,
                        events_dropped_overflow_total = stats.dropped_overflow,
                        "app stats"
                    );
                }
                _ = &mut shutdown_rx => {
                    if dirty {
                        publish(&registry, &snapshot_tx, &stats_tx, stale_after_ms, &mut last_no_receivers_log);
                    }
                    tracing::debug!("Publisher shutting down");
                    break;
                }
            }
        }
    })
}

fn publish(
    registry: &MachineRegistry,
    snapshot_tx: &watch::Sender<Arc<OccupancySnapshot>>,
    stats_tx: &broadcast::Sender<Arc<OccupancySnapshot>>,
    stale_after_ms: u64,
    last_no_receivers_log: &mut Option<Instant>,
) {
    let snapshot = Arc::new(aggregator::build_snapshot(registry, now_ms(), stale_after_ms));
    snapshot_tx.send_replace(snapshot.clone());
    if stats_tx.send(snapshot).is_err() {
        let should_log =
            last_no_receivers_log.is_none_or(|t| t.elapsed() >= NO_RECEIVERS_LOG_INTERVAL);
        if should_log {
            tracing::debug!(
                operation = "broadcast_snapshot",
                "No active WebSocket clients; broadcast channel has no receivers"
            );
            *last_no_receivers_log = Some(Instant::now());
        }
    }
}
