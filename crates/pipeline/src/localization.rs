//! Localization stage: per-vehicle waypoint buffers and the lateral
//! deviation signal.
//!
//! Fans out to three edges. The planner frame swaps every tick; the
//! collision and traffic-light frames (and the waypoint buffers that
//! back them) swap only once the downstream stage consumed the previous
//! frame, detected by comparing the messenger counter with the cached
//! send state.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use contracts::{
    ActorId, Location, LocalizationConfig, Result, SimulatorClient, TrafficConfig, Vector3D,
    VehicleState,
};
use road_map::InMemoryMap;

use crate::frames::*;
use crate::messenger::DataPacket;
use crate::parameters::{LaneChangeDirection, Parameters};
use crate::stage::Stage;
use crate::stats::PipelineStats;

/// Upper bound on buffer growth; a horizon can never need this many
/// samples, but a looped road shorter than the horizon would otherwise
/// extend forever.
const BUFFER_HARD_CAP: usize = 1000;

pub struct LocalizationStage {
    client: Arc<dyn SimulatorClient>,
    map: Arc<InMemoryMap>,
    parameters: Arc<Parameters>,
    stats: Arc<PipelineStats>,
    config: LocalizationConfig,
    actor_ids: Vec<ActorId>,
    /// Per-vehicle multiplier making branch choices deterministic per
    /// seed but diverse across the fleet.
    divergence_choice: Vec<u64>,

    buffer_lists: [Arc<BufferList>; 2],
    planner_frames: [Arc<LocalizationToPlannerFrame>; 2],
    collision_frames: [Arc<LocalizationToCollisionFrame>; 2],
    traffic_light_frames: [Arc<LocalizationToTrafficLightFrame>; 2],

    planner_selector: AtomicBool,
    collision_selector: AtomicBool,
    traffic_light_selector: AtomicBool,

    planner_messenger: Arc<LocalizationToPlannerMessenger>,
    collision_messenger: Arc<LocalizationToCollisionMessenger>,
    traffic_light_messenger: Arc<LocalizationToTrafficLightMessenger>,

    planner_messenger_state: AtomicU16,
    collision_messenger_state: AtomicU16,
    traffic_light_messenger_state: AtomicU16,
}

impl LocalizationStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn SimulatorClient>,
        map: Arc<InMemoryMap>,
        parameters: Arc<Parameters>,
        stats: Arc<PipelineStats>,
        config: &TrafficConfig,
        actor_ids: Vec<ActorId>,
        planner_messenger: Arc<LocalizationToPlannerMessenger>,
        collision_messenger: Arc<LocalizationToCollisionMessenger>,
        traffic_light_messenger: Arc<LocalizationToTrafficLightMessenger>,
    ) -> Self {
        let number_of_vehicles = actor_ids.len();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let divergence_choice = (0..number_of_vehicles).map(|_| rng.gen()).collect();

        let buffer_lists = [
            make_buffer_list(number_of_vehicles),
            make_buffer_list(number_of_vehicles),
        ];
        let collision_frames = [
            Arc::new(LocalizationToCollisionFrame {
                slots: (0..number_of_vehicles).map(|_| Default::default()).collect(),
                buffers: buffer_lists[0].clone(),
            }),
            Arc::new(LocalizationToCollisionFrame {
                slots: (0..number_of_vehicles).map(|_| Default::default()).collect(),
                buffers: buffer_lists[1].clone(),
            }),
        ];

        // Sender edges preemptively write: cached state trails the
        // counter by one so the first send passes immediately.
        let planner_messenger_state = AtomicU16::new(planner_messenger.state().wrapping_sub(1));
        let collision_messenger_state =
            AtomicU16::new(collision_messenger.state().wrapping_sub(1));
        let traffic_light_messenger_state =
            AtomicU16::new(traffic_light_messenger.state().wrapping_sub(1));

        Self {
            client,
            map,
            parameters,
            stats,
            config: config.localization.clone(),
            actor_ids,
            divergence_choice,
            buffer_lists,
            planner_frames: [
                make_frame(number_of_vehicles),
                make_frame(number_of_vehicles),
            ],
            collision_frames,
            traffic_light_frames: [
                make_frame(number_of_vehicles),
                make_frame(number_of_vehicles),
            ],
            planner_selector: AtomicBool::new(true),
            collision_selector: AtomicBool::new(true),
            traffic_light_selector: AtomicBool::new(true),
            planner_messenger,
            collision_messenger,
            traffic_light_messenger,
            planner_messenger_state,
            collision_messenger_state,
            traffic_light_messenger_state,
        }
    }

    fn localize_vehicle(
        &self,
        index: usize,
        actor_id: ActorId,
        state: &VehicleState,
        planner_sel: usize,
        collision_sel: usize,
        traffic_sel: usize,
    ) {
        let velocity = state.speed();
        let location = state.location();
        let heading = state.heading();
        let horizon = (velocity * self.config.waypoint_time_horizon)
            .max(self.config.minimum_horizon_length);

        let buffer_list = &self.buffer_lists[collision_sel];
        let mut buffer = buffer_list[index]
            .lock()
            .expect("waypoint buffer lock poisoned");

        // Pop waypoints the vehicle has passed.
        while let Some(&front) = buffer.front() {
            let dot = deviation_dot(heading, location, self.map.get(front).location());
            if dot <= 0.0 {
                buffer.pop_front();
            } else {
                break;
            }
        }

        // Commanded lane change retargets the buffer onto the link.
        if let Some(direction) = self.parameters.take_force_lane_change(actor_id) {
            if let Some(&front) = buffer.front() {
                let node = self.map.get(front);
                let link = match direction {
                    LaneChangeDirection::Left => node.left_waypoint(),
                    LaneChangeDirection::Right => node.right_waypoint(),
                };
                match link {
                    Some(target) => {
                        buffer.clear();
                        buffer.push_back(target);
                        metrics::counter!("localization_lane_changes").increment(1);
                    }
                    None => debug!(actor_id, "no lane-change link at buffer front"),
                }
            }
        }

        if buffer.is_empty() {
            let seed = self
                .map
                .waypoint_in_vicinity(location)
                .or_else(|| self.map.waypoint(location));
            match seed {
                Some(id) => buffer.push_back(id),
                None => {
                    warn!(actor_id, "vehicle outside map coverage, skipping tick");
                    drop(buffer);
                    self.stats.record_vehicle_skipped();
                    self.write_fallback(index, actor_id, planner_sel, collision_sel, traffic_sel);
                    return;
                }
            }
        }

        // Extend until the buffer spans the velocity-scaled horizon.
        while self.buffer_span(&buffer) <= horizon && buffer.len() < BUFFER_HARD_CAP {
            let back = *buffer.back().expect("buffer cannot be empty here");
            let node = self.map.get(back);
            let successors = node.next_waypoints();
            if successors.is_empty() {
                break;
            }
            let mut selection = 0usize;
            if successors.len() > 1 {
                selection = (self.divergence_choice[index]
                    .wrapping_mul(node.road_id().wrapping_add(1))
                    % successors.len() as u64) as usize;
            }
            buffer.push_back(successors[selection]);
        }

        // Deviation toward the target waypoint ahead.
        let target_index = (velocity * self.config.target_waypoint_time_horizon)
            .max(self.config.target_waypoint_horizon_length)
            .ceil() as usize;
        let target_index = target_index.min(buffer.len() - 1);
        let target_location = self.map.get(buffer[target_index]).location();
        let dot = deviation_dot(heading, location, target_location);
        let cross = deviation_cross(heading, location, target_location);
        let mut deviation = 1.0 - dot;
        if cross < 0.0 {
            deviation = -deviation;
        }

        {
            let mut slot = self.planner_frames[planner_sel][index]
                .lock()
                .expect("planner frame lock poisoned");
            slot.actor_id = actor_id;
            slot.deviation = deviation;
        }
        {
            let mut slot = self.collision_frames[collision_sel].slots[index]
                .lock()
                .expect("collision frame lock poisoned");
            slot.actor_id = actor_id;
        }

        // The traffic-light edge samples the buffer list backing its own
        // frame pair.
        let (near, far) = if traffic_sel == collision_sel {
            self.sample_junction_waypoints(&buffer)
        } else {
            drop(buffer);
            let other = self.buffer_lists[traffic_sel][index]
                .lock()
                .expect("waypoint buffer lock poisoned");
            self.sample_junction_waypoints(&other)
        };
        let mut slot = self.traffic_light_frames[traffic_sel][index]
            .lock()
            .expect("traffic-light frame lock poisoned");
        slot.actor_id = actor_id;
        slot.near_waypoint = near;
        slot.far_waypoint = far;
    }

    fn sample_junction_waypoints(
        &self,
        buffer: &WaypointBuffer,
    ) -> (Option<road_map::WaypointId>, Option<road_map::WaypointId>) {
        let (near_index, far_index) = self.config.junction_check_indices;
        (
            buffer.get(near_index).copied(),
            buffer.get(far_index).copied(),
        )
    }

    fn buffer_span(&self, buffer: &WaypointBuffer) -> f32 {
        match (buffer.front(), buffer.back()) {
            (Some(&front), Some(&back)) => self
                .map
                .get(back)
                .distance(self.map.get(front).location()),
            _ => 0.0,
        }
    }

    /// Neutral slot contents for a vehicle skipped this tick.
    fn write_fallback(
        &self,
        index: usize,
        actor_id: ActorId,
        planner_sel: usize,
        collision_sel: usize,
        traffic_sel: usize,
    ) {
        let mut slot = self.planner_frames[planner_sel][index]
            .lock()
            .expect("planner frame lock poisoned");
        *slot = LocalizationToPlannerData {
            actor_id,
            deviation: 0.0,
        };
        drop(slot);

        let mut slot = self.collision_frames[collision_sel].slots[index]
            .lock()
            .expect("collision frame lock poisoned");
        slot.actor_id = actor_id;
        drop(slot);

        let mut slot = self.traffic_light_frames[traffic_sel][index]
            .lock()
            .expect("traffic-light frame lock poisoned");
        *slot = LocalizationToTrafficLightData {
            actor_id,
            near_waypoint: None,
            far_waypoint: None,
        };
    }
}

impl Stage for LocalizationStage {
    fn name(&self) -> &'static str {
        "localization"
    }

    fn data_receiver(&self) -> Result<()> {
        // First stage of the DAG; input is polled from the simulator
        // inside `action`.
        Ok(())
    }

    fn action(&self, start_index: usize, end_index: usize) {
        let planner_sel = self.planner_selector.load(Ordering::Relaxed) as usize;
        let collision_sel = self.collision_selector.load(Ordering::Relaxed) as usize;
        let traffic_sel = self.traffic_light_selector.load(Ordering::Relaxed) as usize;

        for index in start_index..end_index {
            let actor_id = self.actor_ids[index];
            match self.client.vehicle_state(actor_id) {
                Ok(state) => self.localize_vehicle(
                    index,
                    actor_id,
                    &state,
                    planner_sel,
                    collision_sel,
                    traffic_sel,
                ),
                Err(error) => {
                    info!(actor_id, %error, "skipping vehicle this tick");
                    self.stats.record_vehicle_skipped();
                    self.write_fallback(index, actor_id, planner_sel, collision_sel, traffic_sel);
                }
            }
        }
    }

    fn data_sender(&self) -> Result<()> {
        // Planner edge: swap every tick, block until consumed.
        let planner_sel = self.planner_selector.load(Ordering::Relaxed);
        let packet = DataPacket {
            state: self.planner_messenger_state.load(Ordering::Relaxed),
            data: self.planner_frames[planner_sel as usize].clone(),
        };
        self.planner_selector.store(!planner_sel, Ordering::Relaxed);
        let new_state = self.planner_messenger.send(packet)?;
        self.planner_messenger_state
            .store(new_state, Ordering::Relaxed);

        // Collision and traffic-light edges: swap only once the previous
        // frame was consumed, else overwrite in place next tick.
        let cached = self.collision_messenger_state.load(Ordering::Relaxed);
        if self.collision_messenger.state() != cached {
            let sel = self.collision_selector.load(Ordering::Relaxed);
            let packet = DataPacket {
                state: cached,
                data: self.collision_frames[sel as usize].clone(),
            };
            let new_state = self.collision_messenger.send(packet)?;
            self.collision_messenger_state
                .store(new_state, Ordering::Relaxed);
            self.collision_selector.store(!sel, Ordering::Relaxed);
        }

        let cached = self.traffic_light_messenger_state.load(Ordering::Relaxed);
        if self.traffic_light_messenger.state() != cached {
            let sel = self.traffic_light_selector.load(Ordering::Relaxed);
            let packet = DataPacket {
                state: cached,
                data: self.traffic_light_frames[sel as usize].clone(),
            };
            let new_state = self.traffic_light_messenger.send(packet)?;
            self.traffic_light_messenger_state
                .store(new_state, Ordering::Relaxed);
            self.traffic_light_selector.store(!sel, Ordering::Relaxed);
        }

        Ok(())
    }
}

fn deviation_dot(heading: Vector3D, position: Location, target: Location) -> f32 {
    (target - position).unit().dot(heading)
}

fn deviation_cross(heading: Vector3D, position: Location, target: Location) -> f32 {
    heading.cross_z((target - position).unit())
}
