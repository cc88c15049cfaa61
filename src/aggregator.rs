// O(n) stats recompute over registry contents

use crate::models::{Machine, MachineStatus, OccupancySnapshot, OccupancyStats};
use crate::registry::MachineRegistry;

/// Counts statuses and alerts in one pass. A machine is stale when no event
/// arrived within `stale_after_ms`; stale machines raise an alert even
/// without a fault event, but a faulted machine is only counted once.
pub fn compute_stats(machines: &[Machine], now_ms: u64, stale_after_ms: u64) -> OccupancyStats {
    let mut stats = OccupancyStats::default();
    for machine in machines {
        stats.connected += 1;
        match machine.status {
            MachineStatus::Free => stats.free += 1,
            MachineStatus::Occupied => stats.occupied += 1,
            MachineStatus::Fault => stats.fault += 1,
            MachineStatus::Offline => stats.offline += 1,
        }
        let stale = now_ms.saturating_sub(machine.last_seen_at) > stale_after_ms;
        if machine.status == MachineStatus::Fault || stale {
            stats.alerts += 1;
        }
    }
    stats
}

/// Builds a fresh immutable snapshot from the registry. An empty registry
/// yields all-zero stats, not an error.
pub fn build_snapshot(
    registry: &MachineRegistry,
    now_ms: u64,
    stale_after_ms: u64,
) -> OccupancySnapshot {
    let machines = registry.all();
    let stats = compute_stats(&machines, now_ms, stale_after_ms);
    OccupancySnapshot {
        generated_at: now_ms,
        stats,
        machines,
    }
}
