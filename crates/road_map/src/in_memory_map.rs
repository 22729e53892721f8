//! Dense map construction and grid-backed waypoint lookup.

use std::collections::HashMap;

use contracts::{LaneChange, Location, MapConfig, SparseTopology, WaypointPtr};
use tracing::{debug, info, instrument, warn};

use crate::{SimpleWaypoint, WaypointId};

/// Segments shorter than this are degenerate; exits within this distance
/// of an entry are stitched. Must stay below 1e-4.
const ZERO_LENGTH: f32 = 1e-4;

/// Hard cap on samples per segment, guards against a road provider whose
/// `next()` never converges on the segment end.
const MAX_SEGMENT_SAMPLES: usize = 100_000;

type GridKey = (i32, i32);
type WaypointGrid = HashMap<GridKey, Vec<WaypointId>>;

/// The discretized local map cache.
///
/// Construct with [`InMemoryMap::set_up`]; read-only afterwards, so the
/// pipeline shares it without locking.
pub struct InMemoryMap {
    dense_topology: Vec<SimpleWaypoint>,
    vehicle_grid: WaypointGrid,
    pedestrian_grid: WaypointGrid,
    vehicle_cell: f32,
    pedestrian_cell: f32,
    vertical_band: f32,
}

impl InMemoryMap {
    /// Build the dense map from the sparse topology.
    ///
    /// Interpolates every segment at `sampling_resolution` metres, stitches
    /// segment exits to coincident entries, ties dangling exits to the
    /// nearest entry, indexes both grids, and records lane-change links.
    #[instrument(name = "in_memory_map_set_up", skip(topology, config), fields(segments = topology.len()))]
    pub fn set_up(topology: &SparseTopology, sampling_resolution: f32, config: &MapConfig) -> Self {
        let mut nodes: Vec<SimpleWaypoint> = Vec::new();
        let mut raw_nodes: Vec<WaypointPtr> = Vec::new();
        let mut entry_nodes: Vec<WaypointId> = Vec::new();
        let mut exit_nodes: Vec<WaypointId> = Vec::new();

        let push_node = |nodes: &mut Vec<SimpleWaypoint>,
                             raw_nodes: &mut Vec<WaypointPtr>,
                             waypoint: &WaypointPtr| {
            let id = WaypointId(nodes.len() as u32);
            nodes.push(SimpleWaypoint {
                road_id: waypoint.id(),
                location: waypoint.location(),
                forward: waypoint.forward_vector(),
                is_junction: waypoint.is_junction(),
                junction_id: waypoint.junction_id(),
                lane_change: waypoint.lane_change(),
                next: Vec::new(),
                left: None,
                right: None,
            });
            raw_nodes.push(waypoint.clone());
            id
        };

        // Creating dense topology.
        for (begin, end) in topology {
            let end_location = end.location();
            if begin.location().distance_squared(end_location) <= ZERO_LENGTH * ZERO_LENGTH {
                continue;
            }

            let mut current = begin.clone();
            let mut previous = push_node(&mut nodes, &mut raw_nodes, &current);
            entry_nodes.push(previous);

            // Populating waypoints from begin to end.
            let mut samples = 0usize;
            while current.location().distance_squared(end_location)
                > sampling_resolution * sampling_resolution
            {
                let Some(next) = current.next(sampling_resolution).into_iter().next() else {
                    warn!(
                        x = end_location.x,
                        y = end_location.y,
                        "road provider ended segment before its end waypoint"
                    );
                    break;
                };
                current = next;
                let id = push_node(&mut nodes, &mut raw_nodes, &current);
                nodes[previous.index()].next.push(id);
                previous = id;

                samples += 1;
                if samples >= MAX_SEGMENT_SAMPLES {
                    warn!(samples, "segment sampling did not converge, truncating");
                    break;
                }
            }

            let exit = push_node(&mut nodes, &mut raw_nodes, end);
            nodes[previous.index()].next.push(exit);
            exit_nodes.push(exit);
        }

        // Linking segments: connect each exit to every coincident entry.
        let mut links: Vec<(WaypointId, WaypointId)> = Vec::new();
        for (i, &exit) in exit_nodes.iter().enumerate() {
            for (j, &entry) in entry_nodes.iter().enumerate() {
                if i != j
                    && nodes[exit.index()].distance_squared(nodes[entry.index()].location)
                        < ZERO_LENGTH * ZERO_LENGTH
                {
                    links.push((exit, entry));
                }
            }
        }
        for (exit, entry) in links {
            nodes[exit.index()].next.push(entry);
        }

        // Tying up loose ends: any exit still without a successor is
        // connected to the nearest entry of another segment.
        for (i, &exit) in exit_nodes.iter().enumerate() {
            if !nodes[exit.index()].next.is_empty() {
                continue;
            }

            let mut min_distance = f32::MAX;
            let mut closest: Option<WaypointId> = None;
            for (j, &entry) in entry_nodes.iter().enumerate() {
                let distance =
                    nodes[exit.index()].distance_squared(nodes[entry.index()].location);
                if i != j && distance < min_distance {
                    min_distance = distance;
                    closest = Some(entry);
                }
            }
            let Some(mut target) = closest else {
                continue;
            };

            let relative = (nodes[target.index()].location - nodes[exit.index()].location).unit();
            let relative_dot = nodes[exit.index()].forward.dot(relative);
            if relative_dot < config.lane_change_angular_threshold {
                // Sharp incoming merge; advance the target to smooth it.
                for _ in 0..config.lane_change_look_ahead {
                    let Some(&next) = nodes[target.index()].next.first() else {
                        break;
                    };
                    target = next;
                }
            }
            nodes[exit.index()].next.push(target);
        }

        // Localizing waypoints into grids.
        let mut vehicle_grid: WaypointGrid = HashMap::new();
        let mut pedestrian_grid: WaypointGrid = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            let id = WaypointId(index as u32);
            vehicle_grid
                .entry(grid_key(node.location, config.vehicle_grid_cell))
                .or_default()
                .push(id);
            pedestrian_grid
                .entry(grid_key(node.location, config.pedestrian_grid_cell))
                .or_default()
                .push(id);
        }

        // Linking lane change connections.
        let mut lane_links: Vec<(usize, Option<WaypointId>, Option<WaypointId>)> = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            if node.is_junction || node.lane_change == LaneChange::None {
                continue;
            }
            let (left, right) = find_lane_change(
                &nodes,
                &vehicle_grid,
                &raw_nodes[index],
                node.lane_change,
                config,
            );
            if left.is_some() || right.is_some() {
                lane_links.push((index, left, right));
            }
        }
        for (index, left, right) in lane_links {
            nodes[index].left = left;
            nodes[index].right = right;
        }

        info!(
            waypoints = nodes.len(),
            entries = entry_nodes.len(),
            exits = exit_nodes.len(),
            "dense topology constructed"
        );

        Self {
            dense_topology: nodes,
            vehicle_grid,
            pedestrian_grid,
            vehicle_cell: config.vehicle_grid_cell,
            pedestrian_cell: config.pedestrian_grid_cell,
            vertical_band: config.vertical_band,
        }
    }

    /// Resolve a handle. Panics on a handle from another map.
    pub fn get(&self, id: WaypointId) -> &SimpleWaypoint {
        &self.dense_topology[id.index()]
    }

    /// Nearest node in the 3x3 vehicle-grid neighbourhood of `location`,
    /// restricted to the vertical band. `None` when no candidate lies in
    /// the band.
    pub fn waypoint_in_vicinity(&self, location: Location) -> Option<WaypointId> {
        nearest_in_vicinity(
            &self.dense_topology,
            &self.vehicle_grid,
            location,
            self.vehicle_cell,
            self.vertical_band,
        )
    }

    /// Vicinity lookup on the coarser pedestrian grid.
    pub fn pedestrian_waypoint_in_vicinity(&self, location: Location) -> Option<WaypointId> {
        nearest_in_vicinity(
            &self.dense_topology,
            &self.pedestrian_grid,
            location,
            self.pedestrian_cell,
            self.vertical_band,
        )
    }

    /// Full-scan nearest node; fallback when the vicinity lookup misses.
    /// `None` only on an empty map.
    pub fn waypoint(&self, location: Location) -> Option<WaypointId> {
        let mut min_distance = f32::MAX;
        let mut closest = None;
        for (index, node) in self.dense_topology.iter().enumerate() {
            let distance = node.distance_squared(location);
            if distance < min_distance {
                min_distance = distance;
                closest = Some(WaypointId(index as u32));
            }
        }
        closest
    }

    /// All nodes of the dense topology, in arena order.
    pub fn dense_topology(&self) -> &[SimpleWaypoint] {
        &self.dense_topology
    }

    /// Handles of all nodes, in arena order.
    pub fn ids(&self) -> impl Iterator<Item = WaypointId> + '_ {
        (0..self.dense_topology.len()).map(|i| WaypointId(i as u32))
    }

    pub fn len(&self) -> usize {
        self.dense_topology.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense_topology.is_empty()
    }

    /// Cell of the vehicle grid holding `location`.
    pub fn vehicle_cell_of(&self, location: Location) -> (i32, i32) {
        grid_key(location, self.vehicle_cell)
    }

    /// Cell of the pedestrian grid holding `location`.
    pub fn pedestrian_cell_of(&self, location: Location) -> (i32, i32) {
        grid_key(location, self.pedestrian_cell)
    }

    /// Nodes indexed under a vehicle-grid cell.
    pub fn vehicle_cell_waypoints(&self, cell: (i32, i32)) -> &[WaypointId] {
        self.vehicle_grid.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes indexed under a pedestrian-grid cell.
    pub fn pedestrian_cell_waypoints(&self, cell: (i32, i32)) -> &[WaypointId] {
        self.pedestrian_grid
            .get(&cell)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn grid_key(location: Location, cell: f32) -> GridKey {
    (
        (location.x / cell).floor() as i32,
        (location.y / cell).floor() as i32,
    )
}

fn nearest_in_vicinity(
    nodes: &[SimpleWaypoint],
    grid: &WaypointGrid,
    location: Location,
    cell: f32,
    vertical_band: f32,
) -> Option<WaypointId> {
    let (cx, cy) = grid_key(location, cell);

    let mut min_distance = f32::MAX;
    let mut closest = None;
    for i in -1..=1 {
        for j in -1..=1 {
            let Some(ids) = grid.get(&(cx + i, cy + j)) else {
                continue;
            };
            for &id in ids {
                let node = &nodes[id.index()];
                if (node.location.z - location.z).abs() > vertical_band {
                    continue;
                }
                let distance = node.distance_squared(location);
                if distance < min_distance {
                    min_distance = distance;
                    closest = Some(id);
                }
            }
        }
    }
    closest
}

/// Lane-change neighbour lookup for one node. Missing road data is logged
/// and skipped, never fatal.
fn find_lane_change(
    nodes: &[SimpleWaypoint],
    grid: &WaypointGrid,
    raw: &WaypointPtr,
    lane_change: LaneChange,
    config: &MapConfig,
) -> (Option<WaypointId>, Option<WaypointId>) {
    let locate = |target: Location| {
        nearest_in_vicinity(
            nodes,
            grid,
            target,
            config.vehicle_grid_cell,
            config.vertical_band,
        )
        .or_else(|| full_scan(nodes, target))
    };

    let mut left = None;
    let mut right = None;

    if lane_change.permits_left() {
        match raw.left() {
            Ok(neighbour) => left = locate(neighbour.location()),
            Err(error) => {
                let location = raw.location();
                info!(
                    x = location.x,
                    y = location.y,
                    z = location.z,
                    %error,
                    "unable to link left lane-change connection"
                );
            }
        }
    }
    if lane_change.permits_right() {
        match raw.right() {
            Ok(neighbour) => right = locate(neighbour.location()),
            Err(error) => {
                let location = raw.location();
                info!(
                    x = location.x,
                    y = location.y,
                    z = location.z,
                    %error,
                    "unable to link right lane-change connection"
                );
            }
        }
    }

    if left.is_none() && right.is_none() {
        debug!("no lane-change link recorded for permitted node");
    }
    (left, right)
}

fn full_scan(nodes: &[SimpleWaypoint], location: Location) -> Option<WaypointId> {
    let mut min_distance = f32::MAX;
    let mut closest = None;
    for (index, node) in nodes.iter().enumerate() {
        let distance = node.distance_squared(location);
        if distance < min_distance {
            min_distance = distance;
            closest = Some(WaypointId(index as u32));
        }
    }
    closest
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::MapConfig;
    use sim_client::roads;

    fn default_map(topology: &contracts::SparseTopology) -> InMemoryMap {
        InMemoryMap::set_up(topology, 1.0, &MapConfig::default())
    }

    #[test]
    fn test_straight_road_is_connected() {
        let topology = roads::straight_road(100.0);
        let map = default_map(&topology);

        assert!(map.len() >= 100);
        let terminal_count = map
            .dense_topology()
            .iter()
            .filter(|w| w.next_waypoints().is_empty())
            .count();
        // The single exit has no entry to tie to; everything else chains.
        assert!(terminal_count <= 1);
    }

    #[test]
    fn test_ring_road_has_no_terminals() {
        let topology = roads::ring_road(40.0);
        let map = default_map(&topology);

        for node in map.dense_topology() {
            assert!(
                !node.next_waypoints().is_empty(),
                "ring node at {:?} lost its successor",
                node.location()
            );
        }
    }

    #[test]
    fn test_grid_coverage_both_grids() {
        let topology = roads::straight_road(60.0);
        let map = default_map(&topology);

        for id in map.ids() {
            let node = map.get(id);
            let vehicle_cell = map.vehicle_cell_of(node.location());
            assert!(map.vehicle_cell_waypoints(vehicle_cell).contains(&id));
            let ped_cell = map.pedestrian_cell_of(node.location());
            assert!(map.pedestrian_cell_waypoints(ped_cell).contains(&id));
        }
    }

    #[test]
    fn test_waypoint_round_trip() {
        let topology = roads::straight_road(50.0);
        let map = default_map(&topology);

        for id in map.ids() {
            let node = map.get(id);
            assert_eq!(map.waypoint(node.location()), Some(id));
        }
    }

    #[test]
    fn test_vicinity_respects_vertical_band() {
        let topology = roads::straight_road(50.0);
        let map = default_map(&topology);

        let on_road = Location::new(10.0, 0.0, 0.0);
        assert!(map.waypoint_in_vicinity(on_road).is_some());

        let overhead = Location::new(10.0, 0.0, 5.0);
        assert!(map.waypoint_in_vicinity(overhead).is_none());
        // The full scan still answers.
        assert!(map.waypoint(overhead).is_some());
    }

    #[test]
    fn test_parallel_lanes_link_left() {
        let topology = roads::parallel_lanes(80.0, 3.5);
        let map = default_map(&topology);

        let mut checked = 0;
        for node in map.dense_topology() {
            if !node.lane_change().permits_left() || node.is_junction() {
                continue;
            }
            let left = node
                .left_waypoint()
                .expect("left-change permitted node missing its link");
            let neighbour = map.get(left);
            let dy = (neighbour.location().y - node.location().y).abs();
            assert!((dy - 3.5).abs() < 1.0, "left link crossed to dy={dy}");
            checked += 1;
        }
        assert!(checked > 0);
    }

    #[test]
    fn test_empty_topology_yields_empty_map() {
        let topology: contracts::SparseTopology = Vec::new();
        let map = default_map(&topology);
        assert!(map.is_empty());
        assert!(map.waypoint(Location::default()).is_none());
    }
}
