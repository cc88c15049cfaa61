use anyhow::Result;
use labwatch::*;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{Notify, broadcast, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let source_priority = app_config.aggregation.source_priority()?;
    let registry = Arc::new(registry::MachineRegistry::new(source_priority));

    let (stats_tx, _) = broadcast::channel::<Arc<models::OccupancySnapshot>>(
        app_config.publishing.broadcast_capacity,
    );
    let stale_after_ms = app_config.aggregation.stale_after_secs * 1000;
    let initial = Arc::new(aggregator::build_snapshot(
        &registry,
        publisher::now_ms(),
        stale_after_ms,
    ));
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);

    let queue = Arc::new(ingress::EventQueue::new(
        app_config.ingress.queue_capacity,
        app_config.ingress.overflow_policy,
    ));
    let counters = Arc::new(ingress::IngressCounters::default());
    let changes = Arc::new(Notify::new());
    let ws_connections = Arc::new(AtomicUsize::new(0));

    let (worker_shutdown_tx, worker_shutdown_rx) = tokio::sync::oneshot::channel();
    let (publisher_shutdown_tx, publisher_shutdown_rx) = tokio::sync::oneshot::channel();

    let worker_handle = worker::spawn(worker::ApplyWorkerDeps {
        registry: registry.clone(),
        queue: queue.clone(),
        counters: counters.clone(),
        changes: changes.clone(),
        shutdown_rx: worker_shutdown_rx,
    });
    let publisher_handle = publisher::spawn(
        publisher::PublisherDeps {
            registry: registry.clone(),
            changes,
            snapshot_tx,
            stats_tx: stats_tx.clone(),
            counters: counters.clone(),
            ws_connections: ws_connections.clone(),
            shutdown_rx: publisher_shutdown_rx,
        },
        publisher::PublisherConfig {
            debounce_ms: app_config.aggregation.debounce_ms,
            refresh_interval_ms: app_config.aggregation.refresh_interval_ms,
            stale_after_secs: app_config.aggregation.stale_after_secs,
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
        },
    );

    let app = routes::app(
        stats_tx,
        snapshot_rx,
        registry,
        queue,
        counters,
        ws_connections,
        app_config.clone(),
    );
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c().await
                }
            } => {
                tracing::info!("Received shutdown signal");
                let _ = worker_shutdown_tx.send(());
                let _ = worker_handle.await;
                let _ = publisher_shutdown_tx.send(());
                let _ = publisher_handle.await;
            }
        }
    }

    Ok(())
}
