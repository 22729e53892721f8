//! TrafficManager: public facade wiring the five stages together.
//!
//! Owns the messengers and stage runners of one running pipeline.
//! `start` builds everything from the registered vehicle set, `stop`
//! terminates the messengers and joins the stages in reverse DAG order.
//! Registration changes take effect at the next `start`.

use std::sync::{Arc, Mutex};

use tracing::{info, instrument};
use validator::Validate;

use contracts::{ActorId, Result, SimulatorClient, StatsSnapshot, TrafficConfig, TrafficError};
use road_map::InMemoryMap;

use crate::batch_control::BatchControlStage;
use crate::collision::CollisionStage;
use crate::frames::*;
use crate::localization::LocalizationStage;
use crate::messenger::Messenger;
use crate::motion_planner::MotionPlannerStage;
use crate::parameters::{LaneChangeDirection, Parameters};
use crate::stage::{Stage, StageRunner};
use crate::stats::PipelineStats;
use crate::traffic_light::TrafficLightStage;

const NUMBER_OF_STAGES: usize = 5;

struct Messengers {
    localization_planner: Arc<LocalizationToPlannerMessenger>,
    localization_collision: Arc<LocalizationToCollisionMessenger>,
    localization_traffic_light: Arc<LocalizationToTrafficLightMessenger>,
    collision_planner: Arc<CollisionToPlannerMessenger>,
    traffic_light_planner: Arc<TrafficLightToPlannerMessenger>,
    planner_control: Arc<PlannerToControlMessenger>,
}

impl Messengers {
    fn new() -> Self {
        Self {
            localization_planner: Arc::new(Messenger::new()),
            localization_collision: Arc::new(Messenger::new()),
            localization_traffic_light: Arc::new(Messenger::new()),
            collision_planner: Arc::new(Messenger::new()),
            traffic_light_planner: Arc::new(Messenger::new()),
            planner_control: Arc::new(Messenger::new()),
        }
    }

    fn terminate_all(&self) {
        self.localization_planner.terminate();
        self.localization_collision.terminate();
        self.localization_traffic_light.terminate();
        self.collision_planner.terminate();
        self.traffic_light_planner.terminate();
        self.planner_control.terminate();
    }
}

/// Runners in DAG order: localization, collision, traffic light,
/// planner, control.
struct PipelineRuntime {
    runners: Vec<StageRunner>,
    messengers: Messengers,
}

/// The autonomous traffic manager.
pub struct TrafficManager {
    client: Arc<dyn SimulatorClient>,
    map: Arc<InMemoryMap>,
    config: TrafficConfig,
    parameters: Arc<Parameters>,
    stats: Arc<PipelineStats>,
    registered: Mutex<Vec<ActorId>>,
    runtime: Mutex<Option<PipelineRuntime>>,
}

impl TrafficManager {
    /// Create a manager over a prepared map. Fails on an invalid
    /// configuration.
    pub fn new(
        client: Arc<dyn SimulatorClient>,
        map: Arc<InMemoryMap>,
        config: TrafficConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| TrafficError::config_validation("config", errors.to_string()))?;

        let parameters = Arc::new(Parameters::new());
        parameters.set_global_percentage_speed_difference(
            config.planner.global_percentage_below_limit,
        );

        Ok(Self {
            client,
            map,
            config,
            parameters,
            stats: Arc::new(PipelineStats::new()),
            registered: Mutex::new(Vec::new()),
            runtime: Mutex::new(None),
        })
    }

    /// Hand a set of vehicles to the manager. Effective at the next
    /// `start`.
    pub fn register_vehicles(&self, actor_ids: &[ActorId]) {
        let mut registered = self.registered.lock().expect("registration lock poisoned");
        for &actor_id in actor_ids {
            if !registered.contains(&actor_id) {
                registered.push(actor_id);
            }
        }
    }

    /// Remove vehicles from the manager and drop their parameters.
    pub fn unregister_vehicles(&self, actor_ids: &[ActorId]) {
        let mut registered = self.registered.lock().expect("registration lock poisoned");
        registered.retain(|actor_id| !actor_ids.contains(actor_id));
        for &actor_id in actor_ids {
            self.parameters.forget_actor(actor_id);
        }
    }

    pub fn registered_count(&self) -> usize {
        self.registered.lock().expect("registration lock poisoned").len()
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().expect("runtime lock poisoned").is_some()
    }

    /// Spin up the pipeline over the registered vehicles.
    #[instrument(name = "traffic_manager_start", skip(self))]
    pub fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().expect("runtime lock poisoned");
        if runtime.is_some() {
            return Err(TrafficError::Other("pipeline already running".to_string()));
        }

        let actor_ids = self
            .registered
            .lock()
            .expect("registration lock poisoned")
            .clone();
        if actor_ids.is_empty() {
            return Err(TrafficError::config_validation(
                "vehicles",
                "no vehicles registered",
            ));
        }
        let number_of_vehicles = actor_ids.len();
        let pool_size = self.pool_size();

        // Known signal phase before the first tick.
        self.client.reset_all_traffic_light_groups()?;

        let messengers = Messengers::new();

        let localization: Arc<dyn Stage> = Arc::new(LocalizationStage::new(
            self.client.clone(),
            self.map.clone(),
            self.parameters.clone(),
            self.stats.clone(),
            &self.config,
            actor_ids,
            messengers.localization_planner.clone(),
            messengers.localization_collision.clone(),
            messengers.localization_traffic_light.clone(),
        ));
        let collision: Arc<dyn Stage> = Arc::new(CollisionStage::new(
            self.client.clone(),
            self.map.clone(),
            self.parameters.clone(),
            self.stats.clone(),
            &self.config,
            number_of_vehicles,
            messengers.localization_collision.clone(),
            messengers.collision_planner.clone(),
        ));
        let traffic_light: Arc<dyn Stage> = Arc::new(TrafficLightStage::new(
            self.client.clone(),
            self.map.clone(),
            self.stats.clone(),
            &self.config,
            number_of_vehicles,
            messengers.localization_traffic_light.clone(),
            messengers.traffic_light_planner.clone(),
        ));
        let planner: Arc<dyn Stage> = Arc::new(MotionPlannerStage::new(
            self.client.clone(),
            self.parameters.clone(),
            self.stats.clone(),
            &self.config,
            number_of_vehicles,
            messengers.localization_planner.clone(),
            messengers.collision_planner.clone(),
            messengers.traffic_light_planner.clone(),
            messengers.planner_control.clone(),
        ));
        let control: Arc<dyn Stage> = Arc::new(BatchControlStage::new(
            self.client.clone(),
            self.stats.clone(),
            &self.config,
            number_of_vehicles,
            messengers.planner_control.clone(),
        ));

        let stages = vec![localization, collision, traffic_light, planner, control];
        let runners =
            start_runners(stages, pool_size, number_of_vehicles, &messengers)?;

        info!(
            vehicles = number_of_vehicles,
            pool_size, "traffic manager started"
        );
        *runtime = Some(PipelineRuntime {
            runners,
            messengers,
        });
        Ok(())
    }

    /// Stop the pipeline: terminate every messenger, then join the
    /// stages in reverse DAG order. Idempotent.
    #[instrument(name = "traffic_manager_stop", skip(self))]
    pub fn stop(&self) {
        let runtime = self.runtime.lock().expect("runtime lock poisoned").take();
        let Some(runtime) = runtime else {
            return;
        };

        runtime.messengers.terminate_all();
        for runner in runtime.runners.into_iter().rev() {
            runner.stop();
        }
        info!("traffic manager stopped");
    }

    // ===== Behavioural parameters =====

    pub fn set_global_percentage_speed_difference(&self, percentage: f32) {
        self.parameters
            .set_global_percentage_speed_difference(percentage);
    }

    pub fn set_percentage_speed_difference(&self, actor_id: ActorId, percentage: f32) {
        self.parameters
            .set_percentage_speed_difference(actor_id, percentage);
    }

    pub fn set_collision_detection(
        &self,
        reference: ActorId,
        other: ActorId,
        detect_collision: bool,
    ) {
        self.parameters
            .set_collision_detection(reference, other, detect_collision);
    }

    pub fn set_force_lane_change(&self, actor_id: ActorId, direction: LaneChangeDirection) {
        self.parameters.set_force_lane_change(actor_id, direction);
    }

    pub fn set_auto_lane_change(&self, actor_id: ActorId, enable: bool) {
        self.parameters.set_auto_lane_change(actor_id, enable);
    }

    pub fn set_distance_to_leading_vehicle(&self, actor_id: ActorId, distance: f32) {
        self.parameters
            .set_distance_to_leading_vehicle(actor_id, distance);
    }

    /// Counters of the current (or last) run.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn pool_size(&self) -> usize {
        if self.config.pool_size > 0 {
            return self.config.pool_size;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(NUMBER_OF_STAGES);
        (cores / NUMBER_OF_STAGES).max(1)
    }
}

impl Drop for TrafficManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start all stages, tearing down cleanly when one fails to spawn.
fn start_runners(
    stages: Vec<Arc<dyn Stage>>,
    pool_size: usize,
    number_of_vehicles: usize,
    messengers: &Messengers,
) -> Result<Vec<StageRunner>> {
    let mut runners = Vec::with_capacity(stages.len());
    for stage in stages {
        match StageRunner::start(stage, pool_size, number_of_vehicles) {
            Ok(runner) => runners.push(runner),
            Err(error) => {
                messengers.terminate_all();
                for runner in runners.into_iter().rev() {
                    runner.stop();
                }
                return Err(error);
            }
        }
    }
    Ok(runners)
}
