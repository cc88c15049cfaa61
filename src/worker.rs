// Apply worker: drains the ingress queue into the registry and signals the
// snapshot publisher on every accepted event. Stale events are logged,
// counted, and dropped; nothing here is fatal.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;

use crate::ingress::{EventQueue, IngressCounters};
use crate::registry::{MachineRegistry, RegistryError};

/// Registry, queue, counters, and shutdown for the apply worker.
pub struct ApplyWorkerDeps {
    pub registry: Arc<MachineRegistry>,
    pub queue: Arc<EventQueue>,
    pub counters: Arc<IngressCounters>,
    /// Signalled after each accepted event; the publisher debounces it.
    pub changes: Arc<Notify>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

pub fn spawn(deps: ApplyWorkerDeps) -> tokio::task::JoinHandle<()> {
    let ApplyWorkerDeps {
        registry,
        queue,
        counters,
        changes,
        mut shutdown_rx,
    } = deps;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_event = queue.pop() => {
                    match maybe_event {
                        Some(event) => apply_one(&registry, &counters, &changes, &event),
                        None => break,
                    }
                }
                _ = &mut shutdown_rx => {
                    // Close intake, drain what is already queued, then exit.
                    queue.close();
                    while let Some(event) = queue.pop().await {
                        apply_one(&registry, &counters, &changes, &event);
                    }
                    break;
                }
            }
        }
        tracing::debug!("Apply worker shutting down");
    })
}

fn apply_one(
    registry: &MachineRegistry,
    counters: &IngressCounters,
    changes: &Notify,
    event: &crate::models::StatusEvent,
) {
    match registry.apply_event(event) {
        Ok(machine) => {
            counters.accepted.fetch_add(1, Ordering::Relaxed);
            changes.notify_one();
            tracing::trace!(
                machine_id = %machine.id,
                status = ?machine.status,
                operation = "apply_event",
                "event applied"
            );
        }
        Err(e @ RegistryError::StaleEvent { .. }) => {
            counters.rejected_stale.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                error = %e,
                operation = "apply_event",
                "stale event dropped"
            );
        }
    }
}
