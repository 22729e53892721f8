//! Sparse road-map interface consumed by the in-memory map builder.
//!
//! The road description parser is an external collaborator; it hands the
//! pipeline a sequence of (begin, end) segment pairs whose endpoints
//! implement [`RoadWaypoint`]. Interpolation along a segment goes through
//! the waypoint's own `next(d)` primitive so lane geometry stays with the
//! road provider.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{JunctionId, Location, Result, Vector3D};

/// Lane-change permission recorded on the road marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneChange {
    #[default]
    None,
    Left,
    Right,
    Both,
}

impl LaneChange {
    pub fn permits_left(&self) -> bool {
        matches!(self, LaneChange::Left | LaneChange::Both)
    }

    pub fn permits_right(&self) -> bool {
        matches!(self, LaneChange::Right | LaneChange::Both)
    }
}

/// A waypoint of the sparse road description.
///
/// Object-safe so road providers can be swapped; the pipeline only holds
/// these during `InMemoryMap` construction.
pub trait RoadWaypoint: Send + Sync {
    /// Provider-stable identifier for this waypoint.
    fn id(&self) -> u64;

    fn location(&self) -> Location;

    fn forward_vector(&self) -> Vector3D;

    fn is_junction(&self) -> bool;

    /// Junction this waypoint belongs to, when inside one.
    fn junction_id(&self) -> Option<JunctionId>;

    /// Lane-change permission at this waypoint.
    fn lane_change(&self) -> LaneChange;

    /// Waypoints `distance` metres further along the lane. Empty at a
    /// road's end.
    fn next(&self, distance: f32) -> Vec<WaypointPtr>;

    /// Nearest waypoint on the left neighbour lane. Errors on missing
    /// road data.
    fn left(&self) -> Result<WaypointPtr>;

    /// Nearest waypoint on the right neighbour lane. Errors on missing
    /// road data.
    fn right(&self) -> Result<WaypointPtr>;
}

/// Shared handle to a sparse waypoint.
pub type WaypointPtr = Arc<dyn RoadWaypoint>;

/// The sparse topology: one (entry, exit) pair per road segment.
pub type SparseTopology = Vec<(WaypointPtr, WaypointPtr)>;
