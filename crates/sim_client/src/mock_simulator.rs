//! Mock simulator client.
//!
//! A programmable kinematic world for unit tests, integration scenarios
//! and the CLI demo mode. Internal state wrapped in Arc, supports Clone.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, instrument};

use contracts::{
    ActorId, BoundingBox, Result, SimulatorClient, TrafficError, TrafficLightState, Transform,
    Vector3D, VehicleCommand, VehicleState,
};

/// One vehicle of the mock world.
#[derive(Debug, Clone)]
pub struct MockVehicle {
    /// Actor type id matched by `list_actors` patterns.
    pub type_id: String,
    pub transform: Transform,
    pub velocity: Vector3D,
    pub bounding_box: BoundingBox,
    /// Posted speed limit, m/s.
    pub speed_limit: f32,
    /// Phase of the signal governing this vehicle, if any.
    pub traffic_light: Option<TrafficLightState>,
    pub alive: bool,
}

impl MockVehicle {
    fn new(transform: Transform, speed_limit: f32) -> Self {
        Self {
            type_id: "vehicle.mock.sedan".to_string(),
            transform,
            velocity: Vector3D::default(),
            bounding_box: BoundingBox {
                extent_x: 2.3,
                extent_y: 1.0,
                extent_z: 0.75,
            },
            speed_limit,
            traffic_light: None,
            alive: true,
        }
    }
}

struct MockSimulatorInner {
    /// BTreeMap keeps actor iteration deterministic across runs.
    vehicles: RwLock<BTreeMap<ActorId, MockVehicle>>,
    next_actor_id: AtomicU32,
    /// Every batch submitted through `apply_batch`, in order.
    batches: Mutex<Vec<Vec<VehicleCommand>>>,
    light_group_resets: AtomicU32,
    /// Injected stall per `apply_batch` call, for backpressure tests.
    batch_delay: Mutex<Option<std::time::Duration>>,
}

/// Mock simulator client. Cloning shares the world.
#[derive(Clone)]
pub struct MockSimulator {
    inner: Arc<MockSimulatorInner>,
}

impl MockSimulator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockSimulatorInner {
                vehicles: RwLock::new(BTreeMap::new()),
                // Start from 1000 for easy identification
                next_actor_id: AtomicU32::new(1000),
                batches: Mutex::new(Vec::new()),
                light_group_resets: AtomicU32::new(0),
                batch_delay: Mutex::new(None),
            }),
        }
    }

    /// Spawn a vehicle at `transform` with the given speed limit.
    #[instrument(name = "mock_spawn_vehicle", skip(self, transform), fields(speed_limit))]
    pub fn spawn_vehicle(&self, transform: Transform, speed_limit: f32) -> ActorId {
        let actor_id = self.inner.next_actor_id.fetch_add(1, Ordering::SeqCst);
        self.write()
            .insert(actor_id, MockVehicle::new(transform, speed_limit));
        debug!(actor_id, "spawned mock vehicle");
        actor_id
    }

    /// Overwrite a vehicle's velocity vector.
    pub fn set_velocity(&self, actor_id: ActorId, velocity: Vector3D) {
        if let Some(vehicle) = self.write().get_mut(&actor_id) {
            vehicle.velocity = velocity;
        }
    }

    /// Overwrite a vehicle's transform.
    pub fn set_transform(&self, actor_id: ActorId, transform: Transform) {
        if let Some(vehicle) = self.write().get_mut(&actor_id) {
            vehicle.transform = transform;
        }
    }

    /// Set the phase of the signal governing a vehicle; `None` clears it.
    pub fn set_traffic_light(&self, actor_id: ActorId, state: Option<TrafficLightState>) {
        if let Some(vehicle) = self.write().get_mut(&actor_id) {
            vehicle.traffic_light = state;
        }
    }

    /// Invalidate an actor handle, as the simulator does between ticks.
    pub fn kill(&self, actor_id: ActorId) {
        if let Some(vehicle) = self.write().get_mut(&actor_id) {
            vehicle.alive = false;
        }
    }

    /// Integrate vehicle positions over `dt` seconds.
    pub fn advance(&self, dt: f32) {
        for vehicle in self.write().values_mut() {
            if vehicle.alive {
                vehicle.transform.location = vehicle.transform.location + vehicle.velocity * dt;
            }
        }
    }

    /// Snapshot of one vehicle, for assertions.
    pub fn vehicle(&self, actor_id: ActorId) -> Option<MockVehicle> {
        self.read().get(&actor_id).cloned()
    }

    pub fn vehicle_count(&self) -> usize {
        self.read().len()
    }

    /// All batches submitted so far, oldest first.
    pub fn submitted_batches(&self) -> Vec<Vec<VehicleCommand>> {
        self.inner.batches.lock().expect("batch lock poisoned").clone()
    }

    /// The most recent batch, if any was submitted.
    pub fn last_batch(&self) -> Option<Vec<VehicleCommand>> {
        self.inner
            .batches
            .lock()
            .expect("batch lock poisoned")
            .last()
            .cloned()
    }

    pub fn batch_count(&self) -> usize {
        self.inner.batches.lock().expect("batch lock poisoned").len()
    }

    /// Last control submitted for one vehicle, scanning batches backwards.
    pub fn last_control(&self, actor_id: ActorId) -> Option<contracts::VehicleControl> {
        let batches = self.inner.batches.lock().expect("batch lock poisoned");
        batches
            .iter()
            .rev()
            .flat_map(|batch| batch.iter())
            .find(|command| command.actor_id == actor_id)
            .map(|command| command.control)
    }

    /// How many times the traffic-light groups were reset.
    pub fn light_group_reset_count(&self) -> u32 {
        self.inner.light_group_resets.load(Ordering::SeqCst)
    }

    /// Stall every subsequent `apply_batch` call by `delay`; `None`
    /// removes the stall.
    pub fn set_batch_delay(&self, delay: Option<std::time::Duration>) {
        *self
            .inner
            .batch_delay
            .lock()
            .expect("batch delay lock poisoned") = delay;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ActorId, MockVehicle>> {
        self.inner.vehicles.read().expect("vehicle lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ActorId, MockVehicle>> {
        self.inner.vehicles.write().expect("vehicle lock poisoned")
    }
}

impl Default for MockSimulator {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_pattern(type_id: &str, pattern: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => type_id.starts_with(prefix),
        None => type_id == pattern,
    }
}

impl SimulatorClient for MockSimulator {
    fn list_actors(&self, pattern: &str) -> Result<Vec<ActorId>> {
        Ok(self
            .read()
            .iter()
            .filter(|(_, vehicle)| vehicle.alive && matches_pattern(&vehicle.type_id, pattern))
            .map(|(&actor_id, _)| actor_id)
            .collect())
    }

    fn vehicle_state(&self, actor_id: ActorId) -> Result<VehicleState> {
        let vehicles = self.read();
        let vehicle = vehicles
            .get(&actor_id)
            .filter(|vehicle| vehicle.alive)
            .ok_or(TrafficError::DeadActor { actor_id })?;
        Ok(VehicleState {
            transform: vehicle.transform,
            velocity: vehicle.velocity,
            bounding_box: vehicle.bounding_box,
            speed_limit: vehicle.speed_limit,
        })
    }

    fn is_alive(&self, actor_id: ActorId) -> bool {
        self.read()
            .get(&actor_id)
            .map(|vehicle| vehicle.alive)
            .unwrap_or(false)
    }

    fn traffic_light_state(&self, actor_id: ActorId) -> Result<Option<TrafficLightState>> {
        let vehicles = self.read();
        let vehicle = vehicles
            .get(&actor_id)
            .filter(|vehicle| vehicle.alive)
            .ok_or(TrafficError::DeadActor { actor_id })?;
        Ok(vehicle.traffic_light)
    }

    fn reset_all_traffic_light_groups(&self) -> Result<()> {
        self.inner.light_group_resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_batch(&self, commands: &[VehicleCommand]) -> Result<()> {
        let delay = *self
            .inner
            .batch_delay
            .lock()
            .expect("batch delay lock poisoned");
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.inner
            .batches
            .lock()
            .expect("batch lock poisoned")
            .push(commands.to_vec());
        Ok(())
    }
}
