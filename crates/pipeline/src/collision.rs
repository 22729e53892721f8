//! Collision stage: geodesic-boundary overlap checks against vicinity
//! actors.
//!
//! The worker owning the first partition additionally runs the
//! housekeeping slice: admitting world vehicles the manager does not
//! drive into the vicinity grid and evicting dead ones.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use geo::{Area, BooleanOps, LineString, Polygon};
use tracing::{debug, info, warn};

use contracts::{
    ActorId, CollisionConfig, Location, Result, SimulatorClient, TrafficConfig, VehicleState,
};
use road_map::InMemoryMap;

use crate::frames::*;
use crate::messenger::DataPacket;
use crate::parameters::Parameters;
use crate::stage::Stage;
use crate::stats::PipelineStats;
use crate::vicinity_grid::VicinityGrid;

pub struct CollisionStage {
    client: Arc<dyn SimulatorClient>,
    map: Arc<InMemoryMap>,
    parameters: Arc<Parameters>,
    stats: Arc<PipelineStats>,
    config: CollisionConfig,
    vicinity_grid: VicinityGrid,

    localization_messenger: Arc<LocalizationToCollisionMessenger>,
    planner_messenger: Arc<CollisionToPlannerMessenger>,
    localization_messenger_state: AtomicU16,
    planner_messenger_state: AtomicU16,

    frame_selector: AtomicBool,
    planner_frames: [Arc<CollisionToPlannerFrame>; 2],
    localization_frame: Mutex<Option<Arc<LocalizationToCollisionFrame>>>,

    /// Actor id -> slot index of the current localization frame. Doubles
    /// as the registered-vehicle membership test.
    id_to_index: Mutex<HashMap<ActorId, usize>>,
    /// World vehicles not driven by the manager.
    unregistered_actors: Mutex<HashSet<ActorId>>,
    /// `None` until the first sweep ran.
    last_world_sweep: Mutex<Option<Instant>>,
}

impl CollisionStage {
    pub fn new(
        client: Arc<dyn SimulatorClient>,
        map: Arc<InMemoryMap>,
        parameters: Arc<Parameters>,
        stats: Arc<PipelineStats>,
        config: &TrafficConfig,
        number_of_vehicles: usize,
        localization_messenger: Arc<LocalizationToCollisionMessenger>,
        planner_messenger: Arc<CollisionToPlannerMessenger>,
    ) -> Self {
        let localization_messenger_state = AtomicU16::new(localization_messenger.state());
        // Preemptively write: this edge precedes the motion planner.
        let planner_messenger_state = AtomicU16::new(planner_messenger.state().wrapping_sub(1));

        Self {
            client,
            map,
            parameters,
            stats,
            config: config.collision.clone(),
            vicinity_grid: VicinityGrid::new(config.collision.vicinity_cell),
            localization_messenger,
            planner_messenger,
            localization_messenger_state,
            planner_messenger_state,
            frame_selector: AtomicBool::new(true),
            planner_frames: [
                make_frame(number_of_vehicles),
                make_frame(number_of_vehicles),
            ],
            localization_frame: Mutex::new(None),
            id_to_index: Mutex::new(HashMap::new()),
            unregistered_actors: Mutex::new(HashSet::new()),
            last_world_sweep: Mutex::new(None),
        }
    }

    /// Admit unknown world vehicles, refresh grid cells, evict the dead.
    fn housekeeping(&self) {
        {
            let mut last_sweep = self
                .last_world_sweep
                .lock()
                .expect("sweep clock lock poisoned");
            let due = last_sweep
                .map(|at| at.elapsed().as_secs_f32() > self.config.unregistered_sweep_interval)
                .unwrap_or(true);
            if due {
                *last_sweep = Some(Instant::now());
                drop(last_sweep);

                match self.client.list_actors("vehicle.*") {
                    Ok(world_actors) => {
                        let id_to_index =
                            self.id_to_index.lock().expect("id map lock poisoned");
                        let mut unregistered = self
                            .unregistered_actors
                            .lock()
                            .expect("unregistered set lock poisoned");
                        for actor_id in world_actors {
                            if !id_to_index.contains_key(&actor_id) {
                                unregistered.insert(actor_id);
                            }
                        }
                    }
                    Err(error) => warn!(%error, "world actor sweep failed"),
                }
            }
        }

        let mut unregistered = self
            .unregistered_actors
            .lock()
            .expect("unregistered set lock poisoned");
        unregistered.retain(|&actor_id| match self.client.vehicle_state(actor_id) {
            Ok(state) => {
                self.vicinity_grid.update_grid(actor_id, state.location());
                true
            }
            Err(_) => {
                self.vicinity_grid.erase_actor(actor_id);
                false
            }
        });
    }

    fn detect_hazard(&self, ego_id: ActorId, frame: &LocalizationToCollisionFrame) -> bool {
        let Ok(ego_state) = self.client.vehicle_state(ego_id) else {
            return false;
        };
        let candidates = self
            .vicinity_grid
            .actors_around(ego_id, ego_state.location());

        let mut hazard = false;
        for other_id in candidates {
            if hazard {
                break;
            }
            if other_id == ego_id {
                continue;
            }
            if !self.parameters.collision_detection(ego_id, other_id) {
                continue;
            }

            // Any unexpected failure on a pair downgrades to "no hazard"
            // for this tick; the batch must not abort.
            let negotiated = catch_unwind(AssertUnwindSafe(|| {
                let Ok(other_state) = self.client.vehicle_state(other_id) else {
                    return false;
                };
                if ego_state.location().distance(other_state.location())
                    > self.config.search_radius
                {
                    return false;
                }
                self.negotiate_collision(ego_id, &ego_state, other_id, &other_state, frame)
            }));
            match negotiated {
                Ok(result) => hazard = result,
                Err(_) => {
                    warn!(ego_id, other_id, "problem while determining collision");
                    info!("actor might not be alive");
                }
            }
        }
        hazard
    }

    /// The vehicle whose heading points more directly at the other one
    /// yields; overlap of the geodesic corridors confirms the hazard.
    fn negotiate_collision(
        &self,
        ego_id: ActorId,
        ego_state: &VehicleState,
        other_id: ActorId,
        other_state: &VehicleState,
        frame: &LocalizationToCollisionFrame,
    ) -> bool {
        let ego_relative = (other_state.location() - ego_state.location()).unit();
        let ego_dot = ego_state.heading().dot(ego_relative);

        let other_relative = (ego_state.location() - other_state.location()).unit();
        let other_dot = other_state.heading().dot(other_relative);

        ego_dot > other_dot
            && self.check_geodesic_collision(ego_id, ego_state, other_id, other_state, frame)
    }

    fn check_geodesic_collision(
        &self,
        ego_id: ActorId,
        ego_state: &VehicleState,
        other_id: ActorId,
        other_state: &VehicleState,
        frame: &LocalizationToCollisionFrame,
    ) -> bool {
        let height_delta = ego_state.location().z - other_state.location().z;
        if height_delta.abs() >= self.config.vertical_overlap_threshold {
            return false;
        }

        let ego_boundary = self.geodesic_boundary(ego_id, ego_state, frame);
        let other_boundary = self.geodesic_boundary(other_id, other_state, frame);
        if ego_boundary.is_empty() || other_boundary.is_empty() {
            return false;
        }

        let ego_polygon = to_polygon(&ego_boundary);
        let other_polygon = to_polygon(&other_boundary);
        let overlap = ego_polygon.intersection(&other_polygon).unsigned_area();
        overlap > self.config.zero_area as f64
    }

    /// Corridor around the buffered path ahead, closed over the
    /// vehicle's bounding box; plain bounding box for unregistered
    /// actors. Traversed clockwise so polygon orientation is consistent.
    fn geodesic_boundary(
        &self,
        actor_id: ActorId,
        state: &VehicleState,
        frame: &LocalizationToCollisionFrame,
    ) -> Vec<Location> {
        let bbox = bounding_box_corners(state);

        let index = {
            let id_to_index = self.id_to_index.lock().expect("id map lock poisoned");
            id_to_index.get(&actor_id).copied()
        };
        let Some(index) = index else {
            return bbox;
        };

        let velocity = state.speed();
        let extension = if velocity > self.config.highway_speed {
            (self.config.highway_time_horizon * velocity).round() as usize
        } else {
            ((self.config.extension_square_point * velocity)
                .sqrt()
                .max(self.config.boundary_extension_minimum)
                + (velocity * self.config.time_horizon)
                    .max(self.config.boundary_extension_minimum)
                + self.config.boundary_extension_minimum) as usize
        };

        let buffer = frame.buffers[index]
            .lock()
            .expect("waypoint buffer lock poisoned");
        let half_width = state.bounding_box.extent_y;

        let samples = extension.min(buffer.len());
        let mut left_boundary = Vec::with_capacity(samples);
        let mut right_boundary = Vec::with_capacity(samples);
        for k in 0..samples {
            let node = self.map.get(buffer[k]);
            let perpendicular = node.forward_vector().perpendicular().unit();
            left_boundary.push(node.location() + perpendicular * half_width);
            right_boundary.push(node.location() + perpendicular * (-half_width));
        }
        drop(buffer);

        // Both offset lines start nearest the vehicle; reversing the
        // right one yields a clockwise trace.
        right_boundary.reverse();
        let mut geodesic_boundary = right_boundary;
        geodesic_boundary.extend(bbox);
        geodesic_boundary.extend(left_boundary);
        geodesic_boundary
    }
}

impl Stage for CollisionStage {
    fn name(&self) -> &'static str {
        "collision"
    }

    fn data_receiver(&self) -> Result<()> {
        let state = self.localization_messenger_state.load(Ordering::Relaxed);
        let packet = self.localization_messenger.receive(state)?;
        self.localization_messenger_state
            .store(packet.state, Ordering::Relaxed);

        // Connect actor ids to their slot index; this map also answers
        // whether an id is registered with the manager at all.
        let mut id_to_index = self.id_to_index.lock().expect("id map lock poisoned");
        id_to_index.clear();
        for (index, slot) in packet.data.slots.iter().enumerate() {
            let actor_id = slot.lock().expect("collision frame lock poisoned").actor_id;
            id_to_index.insert(actor_id, index);
        }
        drop(id_to_index);

        *self
            .localization_frame
            .lock()
            .expect("frame handle lock poisoned") = Some(packet.data);
        Ok(())
    }

    fn action(&self, start_index: usize, end_index: usize) {
        let frame = self
            .localization_frame
            .lock()
            .expect("frame handle lock poisoned")
            .clone();
        let Some(frame) = frame else {
            return;
        };
        let selector = self.frame_selector.load(Ordering::Relaxed) as usize;

        // Housekeeping runs on an arbitrary single partition.
        if start_index == 0 {
            self.housekeeping();
        }

        for index in start_index..end_index {
            let actor_id = frame.slots[index]
                .lock()
                .expect("collision frame lock poisoned")
                .actor_id;
            let hazard = self.detect_hazard(actor_id, &frame);
            if hazard {
                self.stats.record_collision_hazard();
                metrics::counter!("collision_hazards").increment(1);
            }
            self.planner_frames[selector][index]
                .lock()
                .expect("planner frame lock poisoned")
                .hazard = hazard;
        }
    }

    fn data_sender(&self) -> Result<()> {
        let selector = self.frame_selector.load(Ordering::Relaxed);
        let packet = DataPacket {
            state: self.planner_messenger_state.load(Ordering::Relaxed),
            data: self.planner_frames[selector as usize].clone(),
        };
        self.frame_selector.store(!selector, Ordering::Relaxed);
        let new_state = self.planner_messenger.send(packet)?;
        self.planner_messenger_state
            .store(new_state, Ordering::Relaxed);
        debug!(state = new_state, "collision frame sent");
        Ok(())
    }
}

fn to_polygon(boundary: &[Location]) -> Polygon<f64> {
    let coords: Vec<(f64, f64)> = boundary
        .iter()
        .map(|location| (location.x as f64, location.y as f64))
        .collect();
    Polygon::new(LineString::from(coords), vec![])
}

/// Four corners of the vehicle in top view, clockwise.
fn bounding_box_corners(state: &VehicleState) -> Vec<Location> {
    let mut heading = state.heading();
    heading.z = 0.0;
    let perpendicular = heading.perpendicular();
    let location = state.location();

    let x_vector = heading * state.bounding_box.extent_x;
    let y_vector = perpendicular * state.bounding_box.extent_y;
    vec![
        location + (x_vector - y_vector),
        location + (-x_vector - y_vector),
        location + (-x_vector + y_vector),
        location + (x_vector + y_vector),
    ]
}
