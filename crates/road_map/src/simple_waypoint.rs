//! Nodes of the dense topology graph.

use contracts::{JunctionId, LaneChange, Location, Vector3D};

/// Stable handle to a node in the [`InMemoryMap`](crate::InMemoryMap)
/// arena. Valid for the lifetime of the map that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaypointId(pub(crate) u32);

impl WaypointId {
    /// Arena index of this handle.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One node of the dense topology. Created during map construction,
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct SimpleWaypoint {
    /// Identifier of the underlying sparse waypoint.
    pub(crate) road_id: u64,
    pub(crate) location: Location,
    pub(crate) forward: Vector3D,
    pub(crate) is_junction: bool,
    pub(crate) junction_id: Option<JunctionId>,
    pub(crate) lane_change: LaneChange,
    /// Successor nodes; empty only before the stitching pass.
    pub(crate) next: Vec<WaypointId>,
    pub(crate) left: Option<WaypointId>,
    pub(crate) right: Option<WaypointId>,
}

impl SimpleWaypoint {
    pub fn road_id(&self) -> u64 {
        self.road_id
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn forward_vector(&self) -> Vector3D {
        self.forward
    }

    pub fn is_junction(&self) -> bool {
        self.is_junction
    }

    /// Geodesic-grid (junction) identifier, when inside a junction.
    pub fn junction_id(&self) -> Option<JunctionId> {
        self.junction_id
    }

    pub fn lane_change(&self) -> LaneChange {
        self.lane_change
    }

    pub fn next_waypoints(&self) -> &[WaypointId] {
        &self.next
    }

    /// Nearest node on the left neighbour lane, when linked.
    pub fn left_waypoint(&self) -> Option<WaypointId> {
        self.left
    }

    /// Nearest node on the right neighbour lane, when linked.
    pub fn right_waypoint(&self) -> Option<WaypointId> {
        self.right
    }

    pub fn distance(&self, location: Location) -> f32 {
        self.location.distance(location)
    }

    pub fn distance_squared(&self, location: Location) -> f32 {
        self.location.distance_squared(location)
    }
}
