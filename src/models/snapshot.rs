// Published snapshot: machines ordered by id + derived stats

use serde::{Deserialize, Serialize};

use super::Machine;

/// Derived counts. `occupied + free + offline + fault == connected` holds for
/// every published snapshot; `alerts` counts faulted machines plus stale ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyStats {
    pub connected: u32,
    pub occupied: u32,
    pub free: u32,
    pub offline: u32,
    pub fault: u32,
    pub alerts: u32,
}

/// Immutable point-in-time view of the registry. Each publish produces a new
/// snapshot; consumers (e.g. the admin dashboard) only ever read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancySnapshot {
    /// Unix millis at publish time.
    pub generated_at: u64,
    pub stats: OccupancyStats,
    /// Ordered by machine id.
    pub machines: Vec<Machine>,
}
