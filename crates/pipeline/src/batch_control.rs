//! Batch-control stage: assemble and submit the per-tick command batch.
//!
//! Collects one `ApplyVehicleControl` per slot, hands the batch to the
//! simulator in a single call, then sleeps out the remainder of the
//! submission interval so the control rate stays capped.

use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use contracts::{Result, SimulatorClient, TrafficConfig, VehicleCommand};

use crate::frames::*;
use crate::stage::Stage;
use crate::stats::PipelineStats;

pub struct BatchControlStage {
    client: Arc<dyn SimulatorClient>,
    stats: Arc<PipelineStats>,
    batch_interval: Duration,

    messenger: Arc<PlannerToControlMessenger>,
    messenger_state: AtomicU16,
    data_frame: Mutex<Option<Arc<PlannerToControlFrame>>>,

    /// Command batch, one slot per registered vehicle.
    commands: Vec<Mutex<VehicleCommand>>,
    last_submission: Mutex<Option<Instant>>,
}

impl BatchControlStage {
    pub fn new(
        client: Arc<dyn SimulatorClient>,
        stats: Arc<PipelineStats>,
        config: &TrafficConfig,
        number_of_vehicles: usize,
        messenger: Arc<PlannerToControlMessenger>,
    ) -> Self {
        let messenger_state = AtomicU16::new(messenger.state());
        Self {
            client,
            stats,
            batch_interval: Duration::from_millis(config.batch_interval_ms),
            messenger,
            messenger_state,
            data_frame: Mutex::new(None),
            commands: (0..number_of_vehicles)
                .map(|_| Mutex::new(VehicleCommand::default()))
                .collect(),
            last_submission: Mutex::new(None),
        }
    }
}

impl Stage for BatchControlStage {
    fn name(&self) -> &'static str {
        "batch-control"
    }

    fn data_receiver(&self) -> Result<()> {
        let state = self.messenger_state.load(Ordering::Relaxed);
        let packet = self.messenger.receive(state)?;
        self.messenger_state.store(packet.state, Ordering::Relaxed);
        *self
            .data_frame
            .lock()
            .expect("frame handle lock poisoned") = Some(packet.data);
        Ok(())
    }

    fn action(&self, start_index: usize, end_index: usize) {
        let frame = self
            .data_frame
            .lock()
            .expect("frame handle lock poisoned")
            .clone();
        let Some(frame) = frame else {
            return;
        };

        for index in start_index..end_index {
            let slot = *frame[index]
                .lock()
                .expect("control frame lock poisoned");
            *self.commands[index]
                .lock()
                .expect("command slot lock poisoned") =
                VehicleCommand::apply_vehicle_control(slot.actor_id, slot.control);
        }
    }

    fn data_sender(&self) -> Result<()> {
        let batch: Vec<VehicleCommand> = self
            .commands
            .iter()
            .map(|slot| *slot.lock().expect("command slot lock poisoned"))
            .collect();
        self.client.apply_batch(&batch)?;
        self.stats.record_batch();
        metrics::counter!("control_batches_submitted").increment(1);
        debug!(commands = batch.len(), "batch submitted");

        // Cap the control rate: wait out the rest of the interval since
        // the previous submission.
        let mut last_submission = self
            .last_submission
            .lock()
            .expect("submission clock lock poisoned");
        if let Some(previous) = *last_submission {
            let elapsed = previous.elapsed();
            if elapsed < self.batch_interval {
                std::thread::sleep(self.batch_interval - elapsed);
            }
        }
        *last_submission = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ActorId, VehicleControl};
    use sim_client::MockSimulator;

    use crate::messenger::{DataPacket, Messenger};

    fn make_stage(
        world: &MockSimulator,
        number_of_vehicles: usize,
    ) -> (BatchControlStage, Arc<PlannerToControlMessenger>, u16) {
        let messenger: Arc<PlannerToControlMessenger> = Arc::new(Messenger::new());
        let send_state = messenger.state().wrapping_sub(1);
        let stage = BatchControlStage::new(
            Arc::new(world.clone()),
            Arc::new(PipelineStats::new()),
            &TrafficConfig::default(),
            number_of_vehicles,
            messenger.clone(),
        );
        (stage, messenger, send_state)
    }

    fn frame_of(entries: &[(ActorId, f32)]) -> Arc<PlannerToControlFrame> {
        Arc::new(
            entries
                .iter()
                .map(|&(actor_id, throttle)| {
                    Mutex::new(PlannerToControlData {
                        actor_id,
                        control: VehicleControl {
                            throttle,
                            ..Default::default()
                        },
                    })
                })
                .collect(),
        )
    }

    #[test]
    fn test_one_command_per_slot_in_order() {
        let world = MockSimulator::new();
        let (stage, messenger, send_state) = make_stage(&world, 3);

        let frame = frame_of(&[(10, 0.1), (11, 0.2), (12, 0.3)]);
        messenger
            .send(DataPacket {
                state: send_state,
                data: frame,
            })
            .unwrap();

        stage.data_receiver().unwrap();
        stage.action(0, 3);
        stage.data_sender().unwrap();

        let batch = world.last_batch().expect("batch submitted");
        assert_eq!(batch.len(), 3);
        let ids: Vec<ActorId> = batch.iter().map(|c| c.actor_id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert_eq!(batch[1].control.throttle, 0.2);
    }

    #[test]
    fn test_submission_rate_is_capped() {
        let world = MockSimulator::new();
        let (stage, messenger, mut send_state) = make_stage(&world, 1);

        let started = Instant::now();
        for _ in 0..3 {
            send_state = messenger
                .send(DataPacket {
                    state: send_state,
                    data: frame_of(&[(10, 0.5)]),
                })
                .unwrap();
            stage.data_receiver().unwrap();
            stage.action(0, 1);
            stage.data_sender().unwrap();
        }

        // Three submissions: at least two full intervals elapsed.
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(world.batch_count(), 3);
    }
}
