//! Actuation commands submitted to the simulator.

use serde::{Deserialize, Serialize};

use crate::ActorId;

/// Low-level vehicle actuation. Throttle and brake in [0, 1],
/// steer in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleControl {
    pub throttle: f32,
    pub brake: f32,
    pub steer: f32,
}

/// One entry of a per-tick command batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleCommand {
    pub actor_id: ActorId,
    pub control: VehicleControl,
}

impl VehicleCommand {
    pub fn apply_vehicle_control(actor_id: ActorId, control: VehicleControl) -> Self {
        Self { actor_id, control }
    }
}
