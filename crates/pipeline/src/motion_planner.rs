//! Motion-planner stage: PID control producing actuation signals.
//!
//! 纵向 PID 跟踪目标速度（限速按全局与单车百分比折减），横向 PID
//! 跟踪 Localization 输出的偏差信号。碰撞或信号灯危险时全力制动并
//! 复位积分器，避免恢复时的积分饱和。

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::info;

use contracts::{PlannerConfig, Result, SimulatorClient, TrafficConfig, VehicleControl};

use crate::frames::*;
use crate::messenger::DataPacket;
use crate::parameters::Parameters;
use crate::pid::{self, StateEntry};
use crate::stage::Stage;
use crate::stats::PipelineStats;

pub struct MotionPlannerStage {
    client: Arc<dyn SimulatorClient>,
    parameters: Arc<Parameters>,
    stats: Arc<PipelineStats>,
    config: PlannerConfig,
    /// dt assumed on a vehicle's first controlled tick.
    fallback_dt: f32,

    localization_messenger: Arc<LocalizationToPlannerMessenger>,
    collision_messenger: Arc<CollisionToPlannerMessenger>,
    traffic_light_messenger: Arc<TrafficLightToPlannerMessenger>,
    control_messenger: Arc<PlannerToControlMessenger>,

    localization_messenger_state: AtomicU16,
    collision_messenger_state: AtomicU16,
    traffic_light_messenger_state: AtomicU16,
    control_messenger_state: AtomicU16,

    frame_selector: AtomicBool,
    control_frames: [Arc<PlannerToControlFrame>; 2],

    localization_frame: Mutex<Option<Arc<LocalizationToPlannerFrame>>>,
    collision_frame: Mutex<Option<Arc<CollisionToPlannerFrame>>>,
    traffic_light_frame: Mutex<Option<Arc<TrafficLightToPlannerFrame>>>,

    /// Controller memory, one entry per registered vehicle.
    pid_states: Vec<Mutex<StateEntry>>,
}

impl MotionPlannerStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn SimulatorClient>,
        parameters: Arc<Parameters>,
        stats: Arc<PipelineStats>,
        config: &TrafficConfig,
        number_of_vehicles: usize,
        localization_messenger: Arc<LocalizationToPlannerMessenger>,
        collision_messenger: Arc<CollisionToPlannerMessenger>,
        traffic_light_messenger: Arc<TrafficLightToPlannerMessenger>,
        control_messenger: Arc<PlannerToControlMessenger>,
    ) -> Self {
        let localization_messenger_state = AtomicU16::new(localization_messenger.state());
        let collision_messenger_state = AtomicU16::new(collision_messenger.state());
        let traffic_light_messenger_state = AtomicU16::new(traffic_light_messenger.state());
        // Preemptively write toward batch control.
        let control_messenger_state = AtomicU16::new(control_messenger.state().wrapping_sub(1));

        Self {
            client,
            parameters,
            stats,
            config: config.planner.clone(),
            fallback_dt: config.batch_interval_ms as f32 / 1000.0,
            localization_messenger,
            collision_messenger,
            traffic_light_messenger,
            control_messenger,
            localization_messenger_state,
            collision_messenger_state,
            traffic_light_messenger_state,
            control_messenger_state,
            frame_selector: AtomicBool::new(true),
            control_frames: [
                make_frame(number_of_vehicles),
                make_frame(number_of_vehicles),
            ],
            localization_frame: Mutex::new(None),
            collision_frame: Mutex::new(None),
            traffic_light_frame: Mutex::new(None),
            pid_states: (0..number_of_vehicles)
                .map(|_| Mutex::new(StateEntry::default()))
                .collect(),
        }
    }
}

impl Stage for MotionPlannerStage {
    fn name(&self) -> &'static str {
        "motion-planner"
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

        let state = self.collision_messenger_state.load(Ordering::Relaxed);
        let packet = self.collision_messenger.receive(state)?;
        self.collision_messenger_state
            .store(packet.state, Ordering::Relaxed);
        *self
            .collision_frame
            .lock()
            .expect("frame handle lock poisoned") = Some(packet.data);

        let state = self.traffic_light_messenger_state.load(Ordering::Relaxed);
        let packet = self.traffic_light_messenger.receive(state)?;
        self.traffic_light_messenger_state
            .store(packet.state, Ordering::Relaxed);
        *self
            .traffic_light_frame
            .lock()
            .expect("frame handle lock poisoned") = Some(packet.data);

        Ok(())
    }

    fn action(&self, start_index: usize, end_index: usize) {
        let localization_frame = self
            .localization_frame
            .lock()
            .expect("frame handle lock poisoned")
            .clone();
        let collision_frame = self
            .collision_frame
            .lock()
            .expect("frame handle lock poisoned")
            .clone();
        let traffic_light_frame = self
            .traffic_light_frame
            .lock()
            .expect("frame handle lock poisoned")
            .clone();
        let (Some(localization_frame), Some(collision_frame), Some(traffic_light_frame)) =
            (localization_frame, collision_frame, traffic_light_frame)
        else {
            return;
        };
        let selector = self.frame_selector.load(Ordering::Relaxed) as usize;

        for index in start_index..end_index {
            let localization = *localization_frame[index]
                .lock()
                .expect("planner frame lock poisoned");
            let collision_hazard = collision_frame[index]
                .lock()
                .expect("collision frame lock poisoned")
                .hazard;
            let traffic_light_hazard = traffic_light_frame[index]
                .lock()
                .expect("traffic-light frame lock poisoned")
                .hazard;

            let actor_id = localization.actor_id;
            let control = match self.client.vehicle_state(actor_id) {
                Ok(state) => {
                    let mut entry = self.pid_states[index]
                        .lock()
                        .expect("pid state lock poisoned");
                    let now = Instant::now();

                    if collision_hazard || traffic_light_hazard {
                        *entry = StateEntry::reset(now);
                        VehicleControl {
                            throttle: 0.0,
                            brake: 1.0,
                            steer: 0.0,
                        }
                    } else {
                        let target = self
                            .parameters
                            .vehicle_target_velocity(actor_id, state.speed_limit);
                        let velocity_error = target - state.speed();
                        let gains = if state.speed_limit > self.config.highway_speed {
                            &self.config.longitudinal_highway_gains
                        } else {
                            &self.config.longitudinal_gains
                        };

                        let previous = *entry;
                        let (current, dt) = StateEntry::advance(
                            &previous,
                            velocity_error,
                            localization.deviation,
                            now,
                            self.fallback_dt,
                        );
                        let signal = pid::run_step(
                            &current,
                            &previous,
                            dt,
                            gains,
                            &self.config.lateral_gains,
                        );
                        *entry = current;
                        VehicleControl {
                            throttle: signal.throttle,
                            brake: signal.brake,
                            steer: signal.steer,
                        }
                    }
                }
                Err(error) => {
                    info!(actor_id, %error, "skipping vehicle this tick");
                    self.stats.record_vehicle_skipped();
                    VehicleControl::default()
                }
            };

            let mut slot = self.control_frames[selector][index]
                .lock()
                .expect("control frame lock poisoned");
            slot.actor_id = actor_id;
            slot.control = control;
        }
    }

    fn data_sender(&self) -> Result<()> {
        let selector = self.frame_selector.load(Ordering::Relaxed);
        let packet = DataPacket {
            state: self.control_messenger_state.load(Ordering::Relaxed),
            data: self.control_frames[selector as usize].clone(),
        };
        self.frame_selector.store(!selector, Ordering::Relaxed);
        let new_state = self.control_messenger.send(packet)?;
        self.control_messenger_state
            .store(new_state, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ActorId, Location, Transform, Vector3D};
    use sim_client::MockSimulator;

    use crate::messenger::Messenger;

    struct Rig {
        world: MockSimulator,
        stage: MotionPlannerStage,
        loc: Arc<LocalizationToPlannerMessenger>,
        col: Arc<CollisionToPlannerMessenger>,
        tl: Arc<TrafficLightToPlannerMessenger>,
        loc_state: u16,
        col_state: u16,
        tl_state: u16,
    }

    fn make_rig(number_of_vehicles: usize) -> Rig {
        let world = MockSimulator::new();
        let loc: Arc<LocalizationToPlannerMessenger> = Arc::new(Messenger::new());
        let col: Arc<CollisionToPlannerMessenger> = Arc::new(Messenger::new());
        let tl: Arc<TrafficLightToPlannerMessenger> = Arc::new(Messenger::new());
        let loc_state = loc.state().wrapping_sub(1);
        let col_state = col.state().wrapping_sub(1);
        let tl_state = tl.state().wrapping_sub(1);

        let stage = MotionPlannerStage::new(
            Arc::new(world.clone()),
            Arc::new(Parameters::new()),
            Arc::new(PipelineStats::new()),
            &TrafficConfig::default(),
            number_of_vehicles,
            loc.clone(),
            col.clone(),
            tl.clone(),
            Arc::new(Messenger::new()),
        );
        Rig {
            world,
            stage,
            loc,
            col,
            tl,
            loc_state,
            col_state,
            tl_state,
        }
    }

    fn tick(
        rig: &mut Rig,
        localization: Vec<LocalizationToPlannerData>,
        collision: Vec<bool>,
        traffic_light: Vec<bool>,
    ) -> Vec<VehicleControl> {
        let count = localization.len();
        let loc_frame: Arc<LocalizationToPlannerFrame> =
            Arc::new(localization.into_iter().map(Mutex::new).collect());
        let col_frame: Arc<CollisionToPlannerFrame> = Arc::new(
            collision
                .into_iter()
                .map(|hazard| Mutex::new(CollisionToPlannerData { hazard }))
                .collect(),
        );
        let tl_frame: Arc<TrafficLightToPlannerFrame> = Arc::new(
            traffic_light
                .into_iter()
                .map(|hazard| Mutex::new(TrafficLightToPlannerData { hazard }))
                .collect(),
        );

        rig.loc_state = rig
            .loc
            .send(DataPacket {
                state: rig.loc_state,
                data: loc_frame,
            })
            .unwrap();
        rig.col_state = rig
            .col
            .send(DataPacket {
                state: rig.col_state,
                data: col_frame,
            })
            .unwrap();
        rig.tl_state = rig
            .tl
            .send(DataPacket {
                state: rig.tl_state,
                data: tl_frame,
            })
            .unwrap();

        rig.stage.data_receiver().unwrap();
        rig.stage.action(0, count);

        let selector = rig.stage.frame_selector.load(Ordering::Relaxed) as usize;
        (0..count)
            .map(|i| {
                rig.stage.control_frames[selector][i]
                    .lock()
                    .unwrap()
                    .control
            })
            .collect()
    }

    fn spawn_cruising(world: &MockSimulator, speed: f32, limit: f32) -> ActorId {
        let actor_id = world.spawn_vehicle(
            Transform {
                location: Location::new(0.0, 0.0, 0.0),
                ..Default::default()
            },
            limit,
        );
        world.set_velocity(actor_id, Vector3D::new(speed, 0.0, 0.0));
        actor_id
    }

    #[test]
    fn test_below_limit_throttles_straight() {
        let mut rig = make_rig(1);
        let actor_id = spawn_cruising(&rig.world, 5.0, 10.0);

        let controls = tick(
            &mut rig,
            vec![LocalizationToPlannerData {
                actor_id,
                deviation: 0.0,
            }],
            vec![false],
            vec![false],
        );
        assert!(controls[0].throttle > 0.0);
        assert_eq!(controls[0].brake, 0.0);
        assert!(controls[0].steer.abs() < 0.05);
    }

    #[test]
    fn test_hazard_overrides_with_full_brake() {
        let mut rig = make_rig(1);
        let actor_id = spawn_cruising(&rig.world, 5.0, 10.0);

        let slot = LocalizationToPlannerData {
            actor_id,
            deviation: 0.3,
        };
        let controls = tick(&mut rig, vec![slot], vec![true], vec![false]);
        assert_eq!(controls[0].throttle, 0.0);
        assert_eq!(controls[0].brake, 1.0);
        assert_eq!(controls[0].steer, 0.0);

        // Integrators were reset under the hazard.
        let entry = rig.stage.pid_states[0].lock().unwrap();
        assert_eq!(entry.velocity_integral, 0.0);
        assert_eq!(entry.deviation_integral, 0.0);
    }

    #[test]
    fn test_traffic_light_hazard_brakes_too() {
        let mut rig = make_rig(1);
        let actor_id = spawn_cruising(&rig.world, 5.0, 10.0);

        let slot = LocalizationToPlannerData {
            actor_id,
            deviation: 0.0,
        };
        let controls = tick(&mut rig, vec![slot], vec![false], vec![true]);
        assert_eq!(controls[0].brake, 1.0);
    }

    #[test]
    fn test_percentage_below_limit_lowers_target() {
        let mut rig = make_rig(1);
        // Already at the posted limit.
        let actor_id = spawn_cruising(&rig.world, 10.0, 10.0);
        rig.stage
            .parameters
            .set_percentage_speed_difference(actor_id, 50.0);

        let slot = LocalizationToPlannerData {
            actor_id,
            deviation: 0.0,
        };
        let controls = tick(&mut rig, vec![slot], vec![false], vec![false]);
        // Target is 5 m/s, vehicle drives 10: brake.
        assert_eq!(controls[0].throttle, 0.0);
        assert!(controls[0].brake > 0.0);
    }

    #[test]
    fn test_dead_actor_emits_neutral_control() {
        let mut rig = make_rig(1);
        let actor_id = spawn_cruising(&rig.world, 5.0, 10.0);
        rig.world.kill(actor_id);

        let slot = LocalizationToPlannerData {
            actor_id,
            deviation: 0.0,
        };
        let controls = tick(&mut rig, vec![slot], vec![false], vec![false]);
        assert_eq!(controls[0], VehicleControl::default());
    }
}
