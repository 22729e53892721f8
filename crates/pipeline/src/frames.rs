//! Frame types carried across the stage DAG.
//!
//! Every edge moves a fixed-size array with one slot per registered
//! vehicle, shared as `Arc` through the edge's messenger. Producers keep
//! two frames per edge and alternate, so the consumer reads the stable
//! one while the producer fills the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use contracts::{ActorId, VehicleControl};
use road_map::WaypointId;

use crate::Messenger;

/// One slot per registered vehicle; workers of a stage write disjoint
/// slot ranges, so per-slot locks are never contended.
pub type Frame<T> = Vec<Mutex<T>>;

/// Allocate a frame of `n` default slots.
pub fn make_frame<T: Default>(n: usize) -> Arc<Frame<T>> {
    Arc::new((0..n).map(|_| Mutex::new(T::default())).collect())
}

/// Per-vehicle ordered run of waypoints ahead of the vehicle; the front
/// element is the closest waypoint not yet passed.
pub type WaypointBuffer = VecDeque<WaypointId>;

/// The waypoint buffers of every registered vehicle, indexed like the
/// frames.
pub type BufferList = Vec<Mutex<WaypointBuffer>>;

/// Allocate an empty buffer list of `n` vehicles.
pub fn make_buffer_list(n: usize) -> Arc<BufferList> {
    Arc::new((0..n).map(|_| Mutex::new(WaypointBuffer::new())).collect())
}

/// Localization -> MotionPlanner slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalizationToPlannerData {
    pub actor_id: ActorId,
    /// Signed lateral error toward the target waypoint,
    /// `(1 - dot) * sign(cross_z)`.
    pub deviation: f32,
}

/// Localization -> Collision slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalizationToCollisionData {
    pub actor_id: ActorId,
}

/// Localization -> Collision frame: the slots plus a read handle onto the
/// waypoint buffers backing them, valid until the frame is released.
pub struct LocalizationToCollisionFrame {
    pub slots: Frame<LocalizationToCollisionData>,
    pub buffers: Arc<BufferList>,
}

/// Localization -> TrafficLight slot: the geodesic waypoints sampled at
/// the fixed junction-check indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalizationToTrafficLightData {
    pub actor_id: ActorId,
    pub near_waypoint: Option<WaypointId>,
    pub far_waypoint: Option<WaypointId>,
}

/// Collision -> MotionPlanner slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollisionToPlannerData {
    pub hazard: bool,
}

/// TrafficLight -> MotionPlanner slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrafficLightToPlannerData {
    pub hazard: bool,
}

/// MotionPlanner -> BatchControl slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlannerToControlData {
    pub actor_id: ActorId,
    pub control: VehicleControl,
}

pub type LocalizationToPlannerFrame = Frame<LocalizationToPlannerData>;
pub type LocalizationToTrafficLightFrame = Frame<LocalizationToTrafficLightData>;
pub type CollisionToPlannerFrame = Frame<CollisionToPlannerData>;
pub type TrafficLightToPlannerFrame = Frame<TrafficLightToPlannerData>;
pub type PlannerToControlFrame = Frame<PlannerToControlData>;

pub type LocalizationToPlannerMessenger = Messenger<Arc<LocalizationToPlannerFrame>>;
pub type LocalizationToCollisionMessenger = Messenger<Arc<LocalizationToCollisionFrame>>;
pub type LocalizationToTrafficLightMessenger = Messenger<Arc<LocalizationToTrafficLightFrame>>;
pub type CollisionToPlannerMessenger = Messenger<Arc<CollisionToPlannerFrame>>;
pub type TrafficLightToPlannerMessenger = Messenger<Arc<TrafficLightToPlannerFrame>>;
pub type PlannerToControlMessenger = Messenger<Arc<PlannerToControlFrame>>;
