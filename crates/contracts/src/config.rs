//! TrafficConfig - tunable constants for map construction and every
//! pipeline stage.
//!
//! SI units throughout. Defaults reproduce the tuned production values;
//! a config file only needs to name the knobs it overrides.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Gains of one PID controller: `[kp, ki, kd]`.
pub type PidGains = [f32; 3];

/// Complete behavioural configuration of the traffic manager.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TrafficConfig {
    /// Map discretization, metres between dense waypoints.
    #[validate(range(min = 0.1, max = 10.0))]
    pub sampling_resolution: f32,

    /// Map settings.
    #[validate(nested)]
    pub map: MapConfig,

    /// Localization settings.
    #[validate(nested)]
    pub localization: LocalizationConfig,

    /// Collision settings.
    #[validate(nested)]
    pub collision: CollisionConfig,

    /// Traffic-light settings.
    #[validate(nested)]
    pub traffic_light: TrafficLightConfig,

    /// Motion-planner settings.
    #[validate(nested)]
    pub planner: PlannerConfig,

    /// Minimum milliseconds between command-batch submissions
    /// (10 ms caps the control rate at 100 Hz).
    #[validate(range(min = 1, max = 1000))]
    pub batch_interval_ms: u64,

    /// Worker threads per stage. Zero derives cores / stage-count.
    pub pool_size: usize,

    /// Seed for the per-vehicle divergence table.
    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            sampling_resolution: 1.0,
            map: MapConfig::default(),
            localization: LocalizationConfig::default(),
            collision: CollisionConfig::default(),
            traffic_light: TrafficLightConfig::default(),
            planner: PlannerConfig::default(),
            batch_interval_ms: 10,
            pool_size: 0,
            seed: 42,
        }
    }
}

/// In-memory map construction knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MapConfig {
    /// Vehicle waypoint-grid cell size.
    #[validate(range(min = 1.0))]
    pub vehicle_grid_cell: f32,

    /// Pedestrian waypoint-grid cell size (coarser).
    #[validate(range(min = 1.0))]
    pub pedestrian_grid_cell: f32,

    /// Vertical band for vicinity lookups.
    #[validate(range(min = 0.1))]
    pub vertical_band: f32,

    /// Cosine threshold above which a dangling exit may link directly;
    /// sharper turns advance the target first.
    pub lane_change_angular_threshold: f32,

    /// Hops to advance the link target on a sharp merge.
    pub lane_change_look_ahead: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            vehicle_grid_cell: 4.0,
            pedestrian_grid_cell: 16.0,
            vertical_band: 1.0,
            lane_change_angular_threshold: 0.5,
            lane_change_look_ahead: 5,
        }
    }
}

/// Localization-stage knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LocalizationConfig {
    /// Seconds of travel the waypoint buffer must cover.
    #[validate(range(min = 0.5))]
    pub waypoint_time_horizon: f32,

    /// Floor on buffer arc length, metres.
    #[validate(range(min = 1.0))]
    pub minimum_horizon_length: f32,

    /// Seconds ahead for the steering target waypoint.
    pub target_waypoint_time_horizon: f32,

    /// Floor on the steering target index, metres.
    pub target_waypoint_horizon_length: f32,

    /// Buffer indices sampled for junction detection: (near, far).
    pub junction_check_indices: (usize, usize),
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            waypoint_time_horizon: 3.0,
            minimum_horizon_length: 25.0,
            target_waypoint_time_horizon: 0.5,
            target_waypoint_horizon_length: 2.0,
            junction_check_indices: (2, 5),
        }
    }
}

/// Collision-stage knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CollisionConfig {
    /// Vicinity-grid cell size.
    #[validate(range(min = 1.0))]
    pub vicinity_cell: f32,

    /// Radius within which a neighbour is negotiated with.
    #[validate(range(min = 1.0))]
    pub search_radius: f32,

    /// Maximum height difference for two actors to overlap.
    pub vertical_overlap_threshold: f32,

    /// Intersection areas at or below this are noise.
    pub zero_area: f32,

    /// Corridor look-ahead, seconds.
    pub time_horizon: f32,

    /// Minimum corridor extension, metres.
    pub boundary_extension_minimum: f32,

    /// Coefficient of the sqrt term of the corridor length.
    pub extension_square_point: f32,

    /// Speed above which the highway corridor applies, m/s.
    pub highway_speed: f32,

    /// Corridor look-ahead on highways, seconds.
    pub highway_time_horizon: f32,

    /// Seconds between sweeps for vehicles the manager does not drive.
    pub unregistered_sweep_interval: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            vicinity_cell: 10.0,
            search_radius: 20.0,
            vertical_overlap_threshold: 2.0,
            zero_area: 1e-4,
            time_horizon: 0.5,
            boundary_extension_minimum: 2.0,
            extension_square_point: 7.0,
            highway_speed: 50.0 / 3.6,
            highway_time_horizon: 5.0,
            unregistered_sweep_interval: 0.5,
        }
    }
}

/// Traffic-light-stage knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TrafficLightConfig {
    /// Seconds after which an unsignalised-junction ticket expires.
    #[validate(range(min = 0.1))]
    pub ticket_expiry: f32,
}

impl Default for TrafficLightConfig {
    fn default() -> Self {
        Self { ticket_expiry: 2.0 }
    }
}

/// Motion-planner knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PlannerConfig {
    /// Longitudinal gains below the highway threshold.
    pub longitudinal_gains: PidGains,

    /// Longitudinal gains at highway speed limits.
    pub longitudinal_highway_gains: PidGains,

    /// Lateral gains.
    pub lateral_gains: PidGains,

    /// Speed limit from which the highway gain set applies, m/s.
    pub highway_speed: f32,

    /// Global fraction below the speed limit, 0–100 (%).
    #[validate(range(min = 0.0, max = 100.0))]
    pub global_percentage_below_limit: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            longitudinal_gains: [0.1, 0.15, 0.01],
            longitudinal_highway_gains: [5.0, 0.1, 0.01],
            lateral_gains: [10.0, 0.0, 0.1],
            highway_speed: 50.0 / 3.6,
            global_percentage_below_limit: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrafficConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_interval_ms, 10);
        assert_eq!(config.localization.junction_check_indices, (2, 5));
    }

    #[test]
    fn test_rejects_bad_resolution() {
        let config = TrafficConfig {
            sampling_resolution: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: TrafficConfig = toml::from_str(
            r#"
            sampling_resolution = 2.0

            [collision]
            search_radius = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(config.sampling_resolution, 2.0);
        assert_eq!(config.collision.search_radius, 30.0);
        // Untouched sections keep their defaults
        assert_eq!(config.map.vehicle_grid_cell, 4.0);
    }
}
