//! Synthetic sparse road topologies.
//!
//! Each builder returns a [`SparseTopology`] whose endpoints implement
//! [`RoadWaypoint`] over straight polyline lanes sampled at 1 m. Exits
//! placed on top of another lane's entry get stitched by the map builder,
//! which is how arms, rings and junctions connect.

use std::sync::{Arc, Mutex, Weak};

use contracts::{
    JunctionId, LaneChange, Location, Result, RoadWaypoint, SparseTopology, TrafficError,
    Vector3D, WaypointPtr,
};

const SPACING: f32 = 1.0;

/// One straight lane of a synthetic network.
struct LaneData {
    /// Base for provider-stable waypoint ids; index is added per point.
    id_base: u64,
    points: Vec<Location>,
    forward: Vector3D,
    junction: Option<JunctionId>,
    lane_change: LaneChange,
    left: Mutex<Option<Weak<LaneData>>>,
    right: Mutex<Option<Weak<LaneData>>>,
}

impl LaneData {
    fn new(
        id_base: u64,
        start: Location,
        end: Location,
        junction: Option<JunctionId>,
        lane_change: LaneChange,
    ) -> Arc<Self> {
        let direction = (end - start).unit();
        let length = start.distance(end);
        let count = (length / SPACING).floor() as usize;

        let mut points = Vec::with_capacity(count + 2);
        for i in 0..=count {
            points.push(start + direction * (i as f32 * SPACING));
        }
        if points
            .last()
            .map(|p| p.distance(end) > 1e-3)
            .unwrap_or(true)
        {
            points.push(end);
        }

        Arc::new(Self {
            id_base,
            points,
            forward: direction,
            junction,
            lane_change,
            left: Mutex::new(None),
            right: Mutex::new(None),
        })
    }

    fn waypoint(self: &Arc<Self>, index: usize) -> WaypointPtr {
        Arc::new(SyntheticWaypoint {
            lane: self.clone(),
            index,
        })
    }
}

/// A sampled point on a [`LaneData`].
struct SyntheticWaypoint {
    lane: Arc<LaneData>,
    index: usize,
}

impl SyntheticWaypoint {
    fn neighbour(&self, slot: &Mutex<Option<Weak<LaneData>>>) -> Result<WaypointPtr> {
        let lane = slot
            .lock()
            .expect("lane link lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(TrafficError::MissingRoadData {
                location: self.location(),
            })?;
        let index = self.index.min(lane.points.len().saturating_sub(1));
        Ok(lane.waypoint(index))
    }
}

impl RoadWaypoint for SyntheticWaypoint {
    fn id(&self) -> u64 {
        self.lane.id_base + self.index as u64
    }

    fn location(&self) -> Location {
        self.lane.points[self.index]
    }

    fn forward_vector(&self) -> Vector3D {
        self.lane.forward
    }

    fn is_junction(&self) -> bool {
        self.lane.junction.is_some()
    }

    fn junction_id(&self) -> Option<JunctionId> {
        self.lane.junction
    }

    fn lane_change(&self) -> LaneChange {
        self.lane.lane_change
    }

    fn next(&self, distance: f32) -> Vec<WaypointPtr> {
        let steps = ((distance / SPACING).round() as usize).max(1);
        let last = self.lane.points.len() - 1;
        if self.index >= last {
            return Vec::new();
        }
        let target = (self.index + steps).min(last);
        vec![self.lane.waypoint(target)]
    }

    fn left(&self) -> Result<WaypointPtr> {
        self.neighbour(&self.lane.left)
    }

    fn right(&self) -> Result<WaypointPtr> {
        self.neighbour(&self.lane.right)
    }
}

fn segment(lane: &Arc<LaneData>) -> (WaypointPtr, WaypointPtr) {
    (lane.waypoint(0), lane.waypoint(lane.points.len() - 1))
}

/// A single straight road along +x starting at the origin.
pub fn straight_road(length: f32) -> SparseTopology {
    let lane = LaneData::new(
        1_000,
        Location::new(0.0, 0.0, 0.0),
        Location::new(length, 0.0, 0.0),
        None,
        LaneChange::None,
    );
    vec![segment(&lane)]
}

/// Two parallel lanes along +x, `offset` metres apart. The lane at y = 0
/// permits a left change onto its neighbour at y = -offset.
pub fn parallel_lanes(length: f32, offset: f32) -> SparseTopology {
    let main = LaneData::new(
        1_000,
        Location::new(0.0, 0.0, 0.0),
        Location::new(length, 0.0, 0.0),
        None,
        LaneChange::Left,
    );
    let neighbour = LaneData::new(
        10_000,
        Location::new(0.0, -offset, 0.0),
        Location::new(length, -offset, 0.0),
        None,
        LaneChange::None,
    );
    *main.left.lock().expect("lane link lock poisoned") = Some(Arc::downgrade(&neighbour));
    *neighbour.right.lock().expect("lane link lock poisoned") = Some(Arc::downgrade(&main));

    vec![segment(&main), segment(&neighbour)]
}

/// A closed square circuit of side `side`; every exit coincides with the
/// next segment's entry, so the stitched map has no terminal nodes.
pub fn ring_road(side: f32) -> SparseTopology {
    let corners = [
        Location::new(0.0, 0.0, 0.0),
        Location::new(side, 0.0, 0.0),
        Location::new(side, side, 0.0),
        Location::new(0.0, side, 0.0),
    ];

    let mut topology = Vec::with_capacity(4);
    for i in 0..4 {
        let lane = LaneData::new(
            1_000 * (i as u64 + 1),
            corners[i],
            corners[(i + 1) % 4],
            None,
            LaneChange::None,
        );
        topology.push(segment(&lane));
    }
    topology
}

/// A T-junction: two approach arms feeding a shared junction box `junction`,
/// each continuing onto its own exit lane.
///
/// Arm A runs along +x and crosses the box straight; arm B approaches
/// along +y and turns into +x inside the box. `approach` is the arm
/// length before the box.
pub fn t_junction(approach: f32, junction: JunctionId) -> SparseTopology {
    let box_size = 8.0;

    // Arm A: straight through along +x.
    let a_in = LaneData::new(
        1_000,
        Location::new(-approach, 0.0, 0.0),
        Location::new(0.0, 0.0, 0.0),
        None,
        LaneChange::None,
    );
    let a_box = LaneData::new(
        2_000,
        Location::new(0.0, 0.0, 0.0),
        Location::new(box_size, 0.0, 0.0),
        Some(junction),
        LaneChange::None,
    );
    let a_out = LaneData::new(
        3_000,
        Location::new(box_size, 0.0, 0.0),
        Location::new(box_size + approach, 0.0, 0.0),
        None,
        LaneChange::None,
    );

    // Arm B: approaches from -y, turns right into +x inside the box.
    let b_in = LaneData::new(
        4_000,
        Location::new(box_size / 2.0, -approach - box_size / 2.0, 0.0),
        Location::new(box_size / 2.0, -box_size / 2.0, 0.0),
        None,
        LaneChange::None,
    );
    let b_box = LaneData::new(
        5_000,
        Location::new(box_size / 2.0, -box_size / 2.0, 0.0),
        Location::new(box_size, 0.0, 0.0),
        Some(junction),
        LaneChange::None,
    );

    vec![
        segment(&a_in),
        segment(&a_box),
        segment(&a_out),
        segment(&b_in),
        segment(&b_box),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_road_sampling() {
        let topology = straight_road(20.0);
        assert_eq!(topology.len(), 1);
        let (begin, end) = &topology[0];
        assert_eq!(begin.location(), Location::new(0.0, 0.0, 0.0));
        assert_eq!(end.location(), Location::new(20.0, 0.0, 0.0));

        let stepped = begin.next(1.0);
        assert_eq!(stepped.len(), 1);
        assert!((stepped[0].location().x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_next_past_end_is_empty() {
        let topology = straight_road(5.0);
        let (_, end) = &topology[0];
        assert!(end.next(1.0).is_empty());
    }

    #[test]
    fn test_parallel_lane_links() {
        let topology = parallel_lanes(30.0, 3.5);
        let (begin, _) = &topology[0];
        assert!(begin.lane_change().permits_left());
        let left = begin.left().unwrap();
        assert!((left.location().y + 3.5).abs() < 1e-5);

        // The neighbour lane permits no change; its left link is missing.
        let (neighbour_begin, _) = &topology[1];
        assert!(neighbour_begin.left().is_err());
    }

    #[test]
    fn test_t_junction_flags() {
        let topology = t_junction(30.0, 7);
        let (a_in_begin, a_in_end) = &topology[0];
        assert!(!a_in_begin.is_junction());
        assert!(!a_in_end.is_junction());

        let (box_begin, _) = &topology[1];
        assert!(box_begin.is_junction());
        assert_eq!(box_begin.junction_id(), Some(7));
    }
}
