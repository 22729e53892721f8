//! Per-run pipeline counters surfaced by the CLI after a run.

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::StatsSnapshot;

/// Shared counters updated by the stages.
#[derive(Debug, Default)]
pub struct PipelineStats {
    batches_submitted: AtomicU64,
    collision_hazards: AtomicU64,
    traffic_light_hazards: AtomicU64,
    vehicles_skipped: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self) {
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collision_hazard(&self) {
        self.collision_hazards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_traffic_light_hazard(&self) {
        self.traffic_light_hazards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vehicle_skipped(&self) {
        self.vehicles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            collision_hazards: self.collision_hazards.load(Ordering::Relaxed),
            traffic_light_hazards: self.traffic_light_hazards.load(Ordering::Relaxed),
            vehicles_skipped: self.vehicles_skipped.load(Ordering::Relaxed),
        }
    }
}
