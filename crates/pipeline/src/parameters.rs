//! Thread-safe behavioural knobs, per actor and global.
//!
//! 每个表一把读写锁：读者并发访问一致快照，写者串行。

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use contracts::ActorId;

/// Direction of a commanded lane change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneChangeDirection {
    Left,
    Right,
}

/// Per-actor and global behavioural parameters consulted by the stages.
#[derive(Default)]
pub struct Parameters {
    /// Percentage below the speed limit, per vehicle.
    percentage_below_limit: RwLock<HashMap<ActorId, f32>>,
    /// Global percentage below the speed limit.
    global_percentage_below_limit: RwLock<f32>,
    /// Actors ignored during collision detection, per vehicle.
    ignore_collision: RwLock<HashMap<ActorId, HashSet<ActorId>>>,
    /// Distance to keep to the leading vehicle, per vehicle.
    distance_to_leading: RwLock<HashMap<ActorId, f32>>,
    /// Pending forced lane changes, consumed by Localization.
    force_lane_change: RwLock<HashMap<ActorId, LaneChangeDirection>>,
    /// Automatic lane-change permission, per vehicle.
    auto_lane_change: RwLock<HashMap<ActorId, bool>>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the percentage below the speed limit for one vehicle.
    pub fn set_percentage_speed_difference(&self, actor_id: ActorId, percentage: f32) {
        self.percentage_below_limit
            .write()
            .expect("parameters lock poisoned")
            .insert(actor_id, percentage);
    }

    /// Set the global percentage below the speed limit.
    pub fn set_global_percentage_speed_difference(&self, percentage: f32) {
        *self
            .global_percentage_below_limit
            .write()
            .expect("parameters lock poisoned") = percentage;
    }

    /// Target velocity for a vehicle given the posted limit.
    pub fn vehicle_target_velocity(&self, actor_id: ActorId, speed_limit: f32) -> f32 {
        let individual = self
            .percentage_below_limit
            .read()
            .expect("parameters lock poisoned")
            .get(&actor_id)
            .copied()
            .unwrap_or(0.0);
        let global = *self
            .global_percentage_below_limit
            .read()
            .expect("parameters lock poisoned");
        speed_limit * (1.0 - individual / 100.0) * (1.0 - global / 100.0)
    }

    /// Enable or disable collision detection of `reference` against
    /// `other`. Disabling adds `other` to the reference's ignore set.
    pub fn set_collision_detection(
        &self,
        reference: ActorId,
        other: ActorId,
        detect_collision: bool,
    ) {
        let mut map = self
            .ignore_collision
            .write()
            .expect("parameters lock poisoned");
        if detect_collision {
            if let Some(ignored) = map.get_mut(&reference) {
                ignored.remove(&other);
            }
        } else {
            map.entry(reference).or_default().insert(other);
        }
    }

    /// Whether collisions of `reference` against `other` are detected.
    pub fn collision_detection(&self, reference: ActorId, other: ActorId) -> bool {
        !self
            .ignore_collision
            .read()
            .expect("parameters lock poisoned")
            .get(&reference)
            .map(|ignored| ignored.contains(&other))
            .unwrap_or(false)
    }

    /// Command a lane change; Localization consumes it on its next tick.
    pub fn set_force_lane_change(&self, actor_id: ActorId, direction: LaneChangeDirection) {
        self.force_lane_change
            .write()
            .expect("parameters lock poisoned")
            .insert(actor_id, direction);
    }

    /// Take the pending lane-change command for a vehicle, if any.
    pub fn take_force_lane_change(&self, actor_id: ActorId) -> Option<LaneChangeDirection> {
        self.force_lane_change
            .write()
            .expect("parameters lock poisoned")
            .remove(&actor_id)
    }

    /// Allow or forbid automatic lane changes for a vehicle.
    pub fn set_auto_lane_change(&self, actor_id: ActorId, enable: bool) {
        self.auto_lane_change
            .write()
            .expect("parameters lock poisoned")
            .insert(actor_id, enable);
    }

    /// Automatic lane-change permission; defaults to enabled.
    pub fn auto_lane_change(&self, actor_id: ActorId) -> bool {
        self.auto_lane_change
            .read()
            .expect("parameters lock poisoned")
            .get(&actor_id)
            .copied()
            .unwrap_or(true)
    }

    /// Distance a vehicle keeps to its leader.
    pub fn set_distance_to_leading_vehicle(&self, actor_id: ActorId, distance: f32) {
        self.distance_to_leading
            .write()
            .expect("parameters lock poisoned")
            .insert(actor_id, distance);
    }

    /// Configured leading distance, if any was set.
    pub fn distance_to_leading_vehicle(&self, actor_id: ActorId) -> Option<f32> {
        self.distance_to_leading
            .read()
            .expect("parameters lock poisoned")
            .get(&actor_id)
            .copied()
    }

    /// Drop every per-actor entry for a vehicle.
    pub fn forget_actor(&self, actor_id: ActorId) {
        self.percentage_below_limit
            .write()
            .expect("parameters lock poisoned")
            .remove(&actor_id);
        self.ignore_collision
            .write()
            .expect("parameters lock poisoned")
            .remove(&actor_id);
        self.distance_to_leading
            .write()
            .expect("parameters lock poisoned")
            .remove(&actor_id);
        self.force_lane_change
            .write()
            .expect("parameters lock poisoned")
            .remove(&actor_id);
        self.auto_lane_change
            .write()
            .expect("parameters lock poisoned")
            .remove(&actor_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_velocity_combines_percentages() {
        let parameters = Parameters::new();
        parameters.set_percentage_speed_difference(1, 20.0);
        parameters.set_global_percentage_speed_difference(10.0);

        let target = parameters.vehicle_target_velocity(1, 10.0);
        assert!((target - 10.0 * 0.8 * 0.9).abs() < 1e-6);

        // Unconfigured vehicle only sees the global percentage.
        let target = parameters.vehicle_target_velocity(2, 10.0);
        assert!((target - 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_collision_ignore_round_trip() {
        let parameters = Parameters::new();
        assert!(parameters.collision_detection(1, 2));

        parameters.set_collision_detection(1, 2, false);
        assert!(!parameters.collision_detection(1, 2));
        // Asymmetric by design.
        assert!(parameters.collision_detection(2, 1));

        parameters.set_collision_detection(1, 2, true);
        assert!(parameters.collision_detection(1, 2));
    }

    #[test]
    fn test_force_lane_change_consumed_once() {
        let parameters = Parameters::new();
        parameters.set_force_lane_change(1, LaneChangeDirection::Left);
        assert_eq!(
            parameters.take_force_lane_change(1),
            Some(LaneChangeDirection::Left)
        );
        assert_eq!(parameters.take_force_lane_change(1), None);
    }

    #[test]
    fn test_forget_actor_clears_everything() {
        let parameters = Parameters::new();
        parameters.set_percentage_speed_difference(1, 30.0);
        parameters.set_auto_lane_change(1, false);
        parameters.forget_actor(1);
        assert_eq!(parameters.vehicle_target_velocity(1, 10.0), 10.0);
        assert!(parameters.auto_lane_change(1));
    }
}
