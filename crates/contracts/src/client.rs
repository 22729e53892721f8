//! Simulator client abstraction.
//!
//! Names the RPC operations the pipeline consumes; the transport itself
//! lives outside this workspace. Stages call these from worker threads,
//! so implementations must be `Send + Sync` and cheap per call.

use crate::{ActorId, Result, TrafficLightState, VehicleCommand, VehicleState};

/// The slice of the simulator RPC surface the traffic manager needs.
pub trait SimulatorClient: Send + Sync {
    /// Ids of world actors whose type matches `pattern`
    /// (e.g. `"vehicle.*"`).
    fn list_actors(&self, pattern: &str) -> Result<Vec<ActorId>>;

    /// Kinematic snapshot of a vehicle. Errors with
    /// [`TrafficError::DeadActor`](crate::TrafficError::DeadActor) when
    /// the handle went stale between ticks.
    fn vehicle_state(&self, actor_id: ActorId) -> Result<VehicleState>;

    /// Whether the actor handle is still valid.
    fn is_alive(&self, actor_id: ActorId) -> bool;

    /// Phase of the signal governing the vehicle's lane; `None` when no
    /// signal applies.
    fn traffic_light_state(&self, actor_id: ActorId) -> Result<Option<TrafficLightState>>;

    /// Reset every traffic-light group to the start of its cycle.
    fn reset_all_traffic_light_groups(&self) -> Result<()>;

    /// Submit one tick's actuation commands in a single call.
    fn apply_batch(&self, commands: &[VehicleCommand]) -> Result<()>;
}
