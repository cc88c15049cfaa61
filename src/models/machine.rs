// Machine state and status-change events

use serde::{Deserialize, Serialize};

/// Closed status set. Transitions are total: hardware faults and recoveries
/// are unordered, so every status is reachable from every other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Free,
    Occupied,
    Fault,
    Offline,
}

/// Origin of a status event. Tie-break order for simultaneous timestamps
/// comes from config (`aggregation.source_priority`), not from this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Sensor,
    Heartbeat,
    Manual,
}

/// Raw status-change event as submitted by monitored endpoints.
/// Consumed once by the apply worker, never retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub machine_id: String,
    pub new_status: MachineStatus,
    /// Unix millis.
    pub timestamp: u64,
    pub source: EventSource,
}

/// Registry-owned machine state. Created on the first observed event for an
/// id, transitioned afterwards, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    pub status: MachineStatus,
    /// When `status` last changed (unix millis).
    pub last_changed_at: u64,
    /// Ordering watermark: timestamp of the newest accepted event (unix millis).
    pub last_seen_at: u64,
    /// Source of the newest accepted event; used for same-timestamp tie-breaks.
    pub last_source: EventSource,
}
