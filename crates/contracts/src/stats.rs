//! Pipeline run counters exposed to observers.

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the pipeline's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Command batches handed to the simulator.
    pub batches_submitted: u64,
    /// Vehicle-ticks that raised a collision hazard.
    pub collision_hazards: u64,
    /// Vehicle-ticks that raised a traffic-light or junction hazard.
    pub traffic_light_hazards: u64,
    /// Vehicle-ticks skipped on localized errors.
    pub vehicles_skipped: u64,
}
