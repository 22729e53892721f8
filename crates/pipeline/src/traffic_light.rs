//! Traffic-light stage: signal hazards and unsignalised-junction turn
//! arbitration.
//!
//! A red or yellow signal is an immediate hazard. Without a signal, a
//! vehicle whose buffer crosses into a junction negotiates a ticket: at
//! most one vehicle per junction holds it, tickets expire after a fixed
//! interval, and the negotiation mutex orders contenders FIFO.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use contracts::{
    ActorId, JunctionId, Result, SimulatorClient, TrafficConfig, TrafficLightConfig,
};
use road_map::InMemoryMap;

use crate::frames::*;
use crate::messenger::DataPacket;
use crate::stage::Stage;
use crate::stats::PipelineStats;

#[derive(Default)]
struct JunctionNegotiation {
    /// Ticket issue time per vehicle.
    vehicle_last_ticket: HashMap<ActorId, Instant>,
    /// Last ticket issue time per junction.
    junction_last_ticket: HashMap<JunctionId, Instant>,
    /// Junction a vehicle was last admitted into.
    vehicle_last_junction: HashMap<ActorId, JunctionId>,
}

pub struct TrafficLightStage {
    client: Arc<dyn SimulatorClient>,
    map: Arc<InMemoryMap>,
    stats: Arc<PipelineStats>,
    config: TrafficLightConfig,

    localization_messenger: Arc<LocalizationToTrafficLightMessenger>,
    planner_messenger: Arc<TrafficLightToPlannerMessenger>,
    localization_messenger_state: AtomicU16,
    planner_messenger_state: AtomicU16,

    frame_selector: AtomicBool,
    planner_frames: [Arc<TrafficLightToPlannerFrame>; 2],
    localization_frame: Mutex<Option<Arc<LocalizationToTrafficLightFrame>>>,

    negotiation: Mutex<JunctionNegotiation>,
}

impl TrafficLightStage {
    pub fn new(
        client: Arc<dyn SimulatorClient>,
        map: Arc<InMemoryMap>,
        stats: Arc<PipelineStats>,
        config: &TrafficConfig,
        number_of_vehicles: usize,
        localization_messenger: Arc<LocalizationToTrafficLightMessenger>,
        planner_messenger: Arc<TrafficLightToPlannerMessenger>,
    ) -> Self {
        let localization_messenger_state = AtomicU16::new(localization_messenger.state());
        // Preemptively write: this edge precedes the motion planner.
        let planner_messenger_state = AtomicU16::new(planner_messenger.state().wrapping_sub(1));

        Self {
            client,
            map,
            stats,
            config: config.traffic_light.clone(),
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
            negotiation: Mutex::new(JunctionNegotiation::default()),
        }
    }

    /// Ticket arbitration for one vehicle approaching `junction_id`.
    /// Returns true when the vehicle must wait its turn.
    fn negotiate_junction(&self, actor_id: ActorId, junction_id: JunctionId) -> bool {
        let mut negotiation = self
            .negotiation
            .lock()
            .expect("junction negotiation lock poisoned");

        // Already admitted into this junction.
        if negotiation.vehicle_last_junction.get(&actor_id) == Some(&junction_id) {
            return false;
        }

        let now = Instant::now();
        let expiry = Duration::from_secs_f32(self.config.ticket_expiry);
        let ticket_available = negotiation
            .junction_last_ticket
            .get(&junction_id)
            .map(|&issued| now.duration_since(issued) > expiry)
            .unwrap_or(true);

        if ticket_available {
            negotiation.vehicle_last_ticket.insert(actor_id, now);
            negotiation.junction_last_ticket.insert(junction_id, now);
            negotiation.vehicle_last_junction.insert(actor_id, junction_id);
            debug!(actor_id, junction_id, "junction ticket issued");
            false
        } else {
            true
        }
    }

    fn hazard_for(&self, slot: &LocalizationToTrafficLightData) -> bool {
        let actor_id = slot.actor_id;
        match self.client.traffic_light_state(actor_id) {
            Ok(Some(state)) if state.demands_stop() => true,
            Ok(_) => {
                // Approaching an unsignalised junction: near sample out,
                // far sample in.
                let (Some(near), Some(far)) = (slot.near_waypoint, slot.far_waypoint) else {
                    return false;
                };
                let far_node = self.map.get(far);
                if self.map.get(near).is_junction() || !far_node.is_junction() {
                    return false;
                }
                match far_node.junction_id() {
                    Some(junction_id) => self.negotiate_junction(actor_id, junction_id),
                    None => false,
                }
            }
            Err(error) => {
                info!(actor_id, %error, "skipping vehicle this tick");
                false
            }
        }
    }
}

impl Stage for TrafficLightStage {
    fn name(&self) -> &'static str {
        "traffic-light"
    }

    fn data_receiver(&self) -> Result<()> {
        let state = self.localization_messenger_state.load(Ordering::Relaxed);
        let packet = self.localization_messenger.receive(state)?;
        self.localization_messenger_state
            .store(packet.state, Ordering::Relaxed);
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

        for index in start_index..end_index {
            let slot = *frame[index]
                .lock()
                .expect("traffic-light frame lock poisoned");
            let hazard = self.hazard_for(&slot);
            if hazard {
                self.stats.record_traffic_light_hazard();
                metrics::counter!("traffic_light_hazards").increment(1);
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Location, TrafficLightState, Transform};
    use sim_client::{roads, MockSimulator};

    use crate::messenger::Messenger;

    struct Rig {
        world: MockSimulator,
        stage: TrafficLightStage,
        messenger: Arc<LocalizationToTrafficLightMessenger>,
        send_state: u16,
        map: Arc<InMemoryMap>,
    }

    fn make_rig(number_of_vehicles: usize, ticket_expiry: f32) -> Rig {
        let mut config = TrafficConfig::default();
        config.traffic_light.ticket_expiry = ticket_expiry;

        let topology = roads::t_junction(40.0, 9);
        let map = Arc::new(InMemoryMap::set_up(
            &topology,
            config.sampling_resolution,
            &config.map,
        ));
        let world = MockSimulator::new();
        let messenger: Arc<LocalizationToTrafficLightMessenger> = Arc::new(Messenger::new());
        let send_state = messenger.state().wrapping_sub(1);

        let stage = TrafficLightStage::new(
            Arc::new(world.clone()),
            map.clone(),
            Arc::new(PipelineStats::new()),
            &config,
            number_of_vehicles,
            messenger.clone(),
            Arc::new(Messenger::new()),
        );
        Rig {
            world,
            stage,
            messenger,
            send_state,
            map,
        }
    }

    fn spawn(world: &MockSimulator, location: Location) -> ActorId {
        world.spawn_vehicle(
            Transform {
                location,
                ..Default::default()
            },
            10.0,
        )
    }

    /// A frame whose near sample is outside the junction and whose far
    /// sample is inside it.
    fn junction_approach_slot(rig: &Rig, actor_id: ActorId) -> LocalizationToTrafficLightData {
        let near = rig
            .map
            .waypoint(Location::new(-2.0, 0.0, 0.0))
            .expect("approach waypoint");
        let far = rig
            .map
            .waypoint(Location::new(2.0, 0.0, 0.0))
            .expect("junction waypoint");
        assert!(!rig.map.get(near).is_junction());
        assert!(rig.map.get(far).is_junction());
        LocalizationToTrafficLightData {
            actor_id,
            near_waypoint: Some(near),
            far_waypoint: Some(far),
        }
    }

    fn tick(rig: &mut Rig, slots: Vec<LocalizationToTrafficLightData>) -> Vec<bool> {
        let count = slots.len();
        let frame: Arc<LocalizationToTrafficLightFrame> =
            Arc::new(slots.into_iter().map(Mutex::new).collect());
        rig.send_state = rig
            .messenger
            .send(DataPacket {
                state: rig.send_state,
                data: frame,
            })
            .unwrap();
        rig.stage.data_receiver().unwrap();
        rig.stage.action(0, count);

        let selector = rig.stage.frame_selector.load(Ordering::Relaxed) as usize;
        (0..count)
            .map(|i| rig.stage.planner_frames[selector][i].lock().unwrap().hazard)
            .collect()
    }

    #[test]
    fn test_red_and_yellow_lights_demand_stop() {
        let mut rig = make_rig(1, 2.0);
        let actor_id = spawn(&rig.world, Location::new(-10.0, 0.0, 0.0));

        for (state, expected) in [
            (TrafficLightState::Red, true),
            (TrafficLightState::Yellow, true),
            (TrafficLightState::Green, false),
        ] {
            rig.world.set_traffic_light(actor_id, Some(state));
            let hazards = tick(
                &mut rig,
                vec![LocalizationToTrafficLightData {
                    actor_id,
                    near_waypoint: None,
                    far_waypoint: None,
                }],
            );
            assert_eq!(hazards[0], expected, "state {state:?}");
        }
    }

    #[test]
    fn test_single_vehicle_gets_the_ticket() {
        let mut rig = make_rig(1, 2.0);
        let actor_id = spawn(&rig.world, Location::new(-4.0, 0.0, 0.0));
        let slot = junction_approach_slot(&rig, actor_id);

        let hazards = tick(&mut rig, vec![slot]);
        assert!(!hazards[0]);

        // Still admitted on the next tick.
        let hazards = tick(&mut rig, vec![slot]);
        assert!(!hazards[0]);
    }

    #[test]
    fn test_exactly_one_of_two_contenders_admitted() {
        let mut rig = make_rig(2, 2.0);
        let first = spawn(&rig.world, Location::new(-4.0, 0.0, 0.0));
        let second = spawn(&rig.world, Location::new(4.0, -8.0, 0.0));

        let slots = vec![
            junction_approach_slot(&rig, first),
            junction_approach_slot(&rig, second),
        ];
        let hazards = tick(&mut rig, slots);
        assert_eq!(
            hazards.iter().filter(|&&h| !h).count(),
            1,
            "exactly one vehicle may enter, got {hazards:?}"
        );
    }

    #[test]
    fn test_expired_ticket_passes_to_the_next_vehicle() {
        let mut rig = make_rig(2, 0.05);
        let first = spawn(&rig.world, Location::new(-4.0, 0.0, 0.0));
        let second = spawn(&rig.world, Location::new(4.0, -8.0, 0.0));

        let slots = vec![
            junction_approach_slot(&rig, first),
            junction_approach_slot(&rig, second),
        ];
        let hazards = tick(&mut rig, slots.clone());
        assert!(!hazards[0]);
        assert!(hazards[1]);

        std::thread::sleep(Duration::from_millis(80));
        let hazards = tick(&mut rig, slots);
        // First keeps its admission; second now holds a fresh ticket.
        assert!(!hazards[0]);
        assert!(!hazards[1]);
    }

    #[test]
    fn test_straight_buffer_raises_no_junction_hazard() {
        let mut rig = make_rig(1, 2.0);
        let actor_id = spawn(&rig.world, Location::new(-30.0, 0.0, 0.0));
        let near = rig.map.waypoint(Location::new(-30.0, 0.0, 0.0)).unwrap();
        let far = rig.map.waypoint(Location::new(-25.0, 0.0, 0.0)).unwrap();

        let hazards = tick(
            &mut rig,
            vec![LocalizationToTrafficLightData {
                actor_id,
                near_waypoint: Some(near),
                far_waypoint: Some(far),
            }],
        );
        assert!(!hazards[0]);
    }
}
