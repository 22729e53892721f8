//! Actor handles and per-tick actor snapshots.

use serde::{Deserialize, Serialize};

use crate::{BoundingBox, Location, Transform, Vector3D};

/// Simulator actor handle.
pub type ActorId = u32;

/// OpenDRIVE junction identifier.
pub type JunctionId = i32;

/// Kinematic snapshot of a vehicle, polled once per stage action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub transform: Transform,
    pub velocity: Vector3D,
    pub bounding_box: BoundingBox,
    /// Posted speed limit at the vehicle's position, m/s.
    pub speed_limit: f32,
}

impl VehicleState {
    pub fn location(&self) -> Location {
        self.transform.location
    }

    pub fn heading(&self) -> Vector3D {
        self.transform.forward_vector()
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }
}

/// Signal phase reported for the light governing a vehicle's lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLightState {
    Red,
    Yellow,
    Green,
    Off,
}

impl TrafficLightState {
    /// Whether the phase requires stopping.
    pub fn demands_stop(&self) -> bool {
        matches!(self, TrafficLightState::Red | TrafficLightState::Yellow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demands_stop() {
        assert!(TrafficLightState::Red.demands_stop());
        assert!(TrafficLightState::Yellow.demands_stop());
        assert!(!TrafficLightState::Green.demands_stop());
        assert!(!TrafficLightState::Off.demands_stop());
    }
}
