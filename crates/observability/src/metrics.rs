//! 指标收集辅助函数
//!
//! Stage-level counters are recorded inline by the pipeline crate via
//! the `metrics` facade; this module adds gauge snapshots taken at the
//! orchestration layer.

use contracts::StatsSnapshot;

/// Export one pipeline stats snapshot as gauges.
pub fn record_pipeline_stats(stats: &StatsSnapshot) {
    metrics::gauge!("pipeline_batches_submitted").set(stats.batches_submitted as f64);
    metrics::gauge!("pipeline_collision_hazards").set(stats.collision_hazards as f64);
    metrics::gauge!("pipeline_traffic_light_hazards").set(stats.traffic_light_hazards as f64);
    metrics::gauge!("pipeline_vehicles_skipped").set(stats.vehicles_skipped as f64);
}

/// Record one submitted batch and its assembly latency.
pub fn record_batch_latency_ms(latency_ms: f64) {
    metrics::histogram!("pipeline_batch_latency_ms").record(latency_ms);
}
