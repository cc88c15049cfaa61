// Shared test helpers

use labwatch::models::*;

pub fn event(id: &str, status: MachineStatus, timestamp: u64, source: EventSource) -> StatusEvent {
    StatusEvent {
        machine_id: id.to_string(),
        new_status: status,
        timestamp,
        source,
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_millis() as u64
}
