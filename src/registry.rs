// Authoritative machine-id -> state map.
// The outer RwLock only guards the map shape; each machine sits behind its
// own mutex, so events for different ids apply in parallel while same-id
// events serialize in timestamp order.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::models::{EventSource, Machine, StatusEvent};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Event does not advance the stored watermark for its machine.
    #[error(
        "stale event for {machine_id}: event timestamp {event_ts} does not advance state at {last_seen_at}"
    )]
    StaleEvent {
        machine_id: String,
        event_ts: u64,
        last_seen_at: u64,
    },
}

/// Tie-break order for events carrying identical timestamps, highest first.
/// Default: authoritative sensor > heartbeat > manual override.
#[derive(Debug, Clone)]
pub struct SourcePriority {
    order: [EventSource; 3],
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self {
            order: [
                EventSource::Sensor,
                EventSource::Heartbeat,
                EventSource::Manual,
            ],
        }
    }
}

impl SourcePriority {
    /// Builds a priority order from config names. All three sources must
    /// appear exactly once.
    pub fn from_names(names: &[String]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            names.len() == 3,
            "source_priority must list exactly 3 sources, got {}",
            names.len()
        );
        let mut order = [EventSource::Sensor; 3];
        for (i, name) in names.iter().enumerate() {
            order[i] = match name.as_str() {
                "sensor" => EventSource::Sensor,
                "heartbeat" => EventSource::Heartbeat,
                "manual" => EventSource::Manual,
                other => anyhow::bail!(
                    "source_priority: unknown source {:?} (expected sensor, heartbeat, manual)",
                    other
                ),
            };
        }
        anyhow::ensure!(
            order[0] != order[1] && order[0] != order[2] && order[1] != order[2],
            "source_priority must not repeat a source"
        );
        Ok(Self { order })
    }

    /// Rank of a source in the order; 0 is highest priority.
    pub fn rank(&self, source: EventSource) -> usize {
        self.order.iter().position(|s| *s == source).unwrap_or(2)
    }
}

pub struct MachineRegistry {
    machines: RwLock<HashMap<String, Arc<Mutex<Machine>>>>,
    priority: SourcePriority,
}

impl Default for MachineRegistry {
    fn default() -> Self {
        Self::new(SourcePriority::default())
    }
}

impl MachineRegistry {
    pub fn new(priority: SourcePriority) -> Self {
        Self {
            machines: RwLock::new(HashMap::new()),
            priority,
        }
    }

    /// Applies a status event. The first event for an id creates the machine;
    /// later events must advance the watermark: strictly newer timestamps win,
    /// equal timestamps win only with strictly higher source priority (which
    /// also makes re-applying the same event idempotent).
    pub fn apply_event(&self, event: &StatusEvent) -> Result<Machine, RegistryError> {
        let slot = {
            let map = self
                .machines
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            map.get(&event.machine_id).cloned()
        };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                let mut map = self
                    .machines
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                match map.entry(event.machine_id.clone()) {
                    // Another writer created it between our read and write lock.
                    Entry::Occupied(e) => e.get().clone(),
                    Entry::Vacant(e) => {
                        let machine = Machine {
                            id: event.machine_id.clone(),
                            status: event.new_status,
                            last_changed_at: event.timestamp,
                            last_seen_at: event.timestamp,
                            last_source: event.source,
                        };
                        e.insert(Arc::new(Mutex::new(machine.clone())));
                        return Ok(machine);
                    }
                }
            }
        };

        let mut machine = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let advances = event.timestamp > machine.last_seen_at
            || (event.timestamp == machine.last_seen_at
                && self.priority.rank(event.source) < self.priority.rank(machine.last_source));
        if !advances {
            return Err(RegistryError::StaleEvent {
                machine_id: event.machine_id.clone(),
                event_ts: event.timestamp,
                last_seen_at: machine.last_seen_at,
            });
        }

        machine.last_seen_at = event.timestamp;
        machine.last_source = event.source;
        if machine.status != event.new_status {
            machine.status = event.new_status;
            machine.last_changed_at = event.timestamp;
        }
        Ok(machine.clone())
    }

    pub fn get(&self, id: &str) -> Option<Machine> {
        let map = self
            .machines
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        map.get(id)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// All machines, ordered by id.
    pub fn all(&self) -> Vec<Machine> {
        let map = self
            .machines
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut machines: Vec<Machine> = map
            .values()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        machines.sort_by(|a, b| a.id.cmp(&b.id));
        machines
    }

    pub fn len(&self) -> usize {
        self.machines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
