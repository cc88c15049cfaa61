// Domain models (machines, events, snapshots)

mod machine;
mod snapshot;

pub use machine::{EventSource, Machine, MachineStatus, StatusEvent};
pub use snapshot::{OccupancySnapshot, OccupancyStats};
