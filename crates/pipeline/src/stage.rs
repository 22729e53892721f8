//! Stage orchestration: three roles per stage, barrier-synchronised.
//!
//! 每个阶段拥有三类长驻线程：receiver、`pool_size` 个 worker、sender。
//! 协调状态集中在一把互斥锁下，三个条件变量分别唤醒对应角色，
//! 避免惊群。
//!
//! Ordering per tick is strict: `data_receiver` -> all workers finish
//! `action` over their disjoint partitions -> `data_sender` -> next tick.
//! Workers never block on messengers; only the receiver and sender do.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use contracts::{Result, TrafficError};
use tracing::{debug, warn};

/// One stage of the pipeline.
///
/// All methods take `&self`: stage state that workers write is laid out
/// in per-slot cells, and receiver/sender-only state is behind its own
/// lock. `action` is called with a half-open slot range `[start, end)`
/// disjoint from every other worker's range.
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Pull the tick's input frames; may block on an upstream messenger.
    fn data_receiver(&self) -> Result<()>;

    /// Process the slot partition `[start_index, end_index)`.
    fn action(&self, start_index: usize, end_index: usize);

    /// Push the tick's output frames; may block on a downstream
    /// messenger.
    fn data_sender(&self) -> Result<()>;
}

struct Coordination {
    run_stage: bool,
    receiver_turn: bool,
    /// Bumped once per tick; workers latch it so a fast worker cannot
    /// run the same tick twice.
    action_tick: u64,
    pending_workers: usize,
    sender_turn: bool,
}

struct StageControl {
    coordination: Mutex<Coordination>,
    wake_receiver: Condvar,
    wake_action: Condvar,
    wake_sender: Condvar,
}

impl StageControl {
    fn new() -> Self {
        Self {
            coordination: Mutex::new(Coordination {
                run_stage: true,
                receiver_turn: true,
                action_tick: 0,
                pending_workers: 0,
                sender_turn: false,
            }),
            wake_receiver: Condvar::new(),
            wake_action: Condvar::new(),
            wake_sender: Condvar::new(),
        }
    }

    fn shut_down(&self) {
        if let Ok(mut guard) = self.coordination.lock() {
            guard.run_stage = false;
        }
        self.wake_receiver.notify_all();
        self.wake_action.notify_all();
        self.wake_sender.notify_all();
    }
}

/// Owns the threads of one running stage.
pub struct StageRunner {
    control: Arc<StageControl>,
    threads: Vec<JoinHandle<()>>,
}

impl StageRunner {
    /// Spawn receiver, `pool_size` workers and sender for `stage`,
    /// partitioning `[0, number_of_vehicles)` evenly across the workers.
    pub fn start(
        stage: Arc<dyn Stage>,
        pool_size: usize,
        number_of_vehicles: usize,
    ) -> Result<Self> {
        if pool_size == 0 {
            return Err(TrafficError::config_validation(
                "pool_size",
                "stage needs at least one worker",
            ));
        }

        let control = Arc::new(StageControl::new());
        let mut threads = Vec::with_capacity(pool_size + 2);

        threads.push(spawn_role(
            format!("{}-receiver", stage.name()),
            stage.clone(),
            control.clone(),
            pool_size,
            Role::Receiver,
        )?);

        let chunk = number_of_vehicles.div_ceil(pool_size).max(1);
        for worker in 0..pool_size {
            let start_index = (worker * chunk).min(number_of_vehicles);
            let end_index = ((worker + 1) * chunk).min(number_of_vehicles);
            threads.push(spawn_role(
                format!("{}-worker-{}", stage.name(), worker),
                stage.clone(),
                control.clone(),
                pool_size,
                Role::Worker {
                    start_index,
                    end_index,
                },
            )?);
        }

        threads.push(spawn_role(
            format!("{}-sender", stage.name()),
            stage.clone(),
            control.clone(),
            pool_size,
            Role::Sender,
        )?);

        Ok(Self { control, threads })
    }

    /// Stop the stage and join its threads. Messengers the stage blocks
    /// on must already be terminated or the join can stall.
    pub fn stop(mut self) {
        self.control.shut_down();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("stage thread panicked during shutdown");
            }
        }
    }
}

enum Role {
    Receiver,
    Worker {
        start_index: usize,
        end_index: usize,
    },
    Sender,
}

fn spawn_role(
    thread_name: String,
    stage: Arc<dyn Stage>,
    control: Arc<StageControl>,
    pool_size: usize,
    role: Role,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || match role {
            Role::Receiver => receiver_loop(&*stage, &control, pool_size),
            Role::Worker {
                start_index,
                end_index,
            } => worker_loop(&*stage, &control, start_index, end_index),
            Role::Sender => sender_loop(&*stage, &control),
        })
        .map_err(TrafficError::Io)
}

fn receiver_loop(stage: &dyn Stage, control: &StageControl, pool_size: usize) {
    loop {
        {
            let mut guard = match control.coordination.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            while !guard.receiver_turn && guard.run_stage {
                guard = match control.wake_receiver.wait(guard) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
            if !guard.run_stage {
                return;
            }
            guard.receiver_turn = false;
        }

        if let Err(error) = stage.data_receiver() {
            debug!(stage = stage.name(), %error, "receiver stopping");
            control.shut_down();
            return;
        }

        let Ok(mut guard) = control.coordination.lock() else {
            return;
        };
        guard.pending_workers = pool_size;
        guard.action_tick += 1;
        control.wake_action.notify_all();
    }
}

fn worker_loop(stage: &dyn Stage, control: &StageControl, start_index: usize, end_index: usize) {
    let mut last_tick = 0u64;
    loop {
        {
            let mut guard = match control.coordination.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            while guard.action_tick == last_tick && guard.run_stage {
                guard = match control.wake_action.wait(guard) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
            if !guard.run_stage {
                return;
            }
            last_tick = guard.action_tick;
        }

        stage.action(start_index, end_index);

        // Barrier: the last worker through hands the tick to the sender.
        let Ok(mut guard) = control.coordination.lock() else {
            return;
        };
        guard.pending_workers -= 1;
        if guard.pending_workers == 0 {
            guard.sender_turn = true;
            control.wake_sender.notify_one();
        }
    }
}

fn sender_loop(stage: &dyn Stage, control: &StageControl) {
    loop {
        {
            let mut guard = match control.coordination.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            while !guard.sender_turn && guard.run_stage {
                guard = match control.wake_sender.wait(guard) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
            if !guard.run_stage {
                return;
            }
            guard.sender_turn = false;
        }

        if let Err(error) = stage.data_sender() {
            debug!(stage = stage.name(), %error, "sender stopping");
            control.shut_down();
            return;
        }

        let Ok(mut guard) = control.coordination.lock() else {
            return;
        };
        guard.receiver_turn = true;
        control.wake_receiver.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts role invocations and records which slots workers touched.
    struct CountingStage {
        receives: AtomicUsize,
        sends: AtomicUsize,
        slot_hits: Vec<AtomicUsize>,
        max_ticks: usize,
    }

    impl CountingStage {
        fn new(slots: usize, max_ticks: usize) -> Self {
            Self {
                receives: AtomicUsize::new(0),
                sends: AtomicUsize::new(0),
                slot_hits: (0..slots).map(|_| AtomicUsize::new(0)).collect(),
                max_ticks,
            }
        }
    }

    impl Stage for CountingStage {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn data_receiver(&self) -> Result<()> {
            if self.receives.fetch_add(1, Ordering::SeqCst) >= self.max_ticks {
                return Err(TrafficError::Shutdown);
            }
            Ok(())
        }

        fn action(&self, start_index: usize, end_index: usize) {
            for slot in start_index..end_index {
                self.slot_hits[slot].fetch_add(1, Ordering::SeqCst);
            }
        }

        fn data_sender(&self) -> Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_every_slot_processed_once_per_tick() {
        let ticks = 10;
        let stage = Arc::new(CountingStage::new(7, ticks));
        let runner = StageRunner::start(stage.clone(), 3, 7).unwrap();

        // The receiver self-terminates after `ticks`; give it time.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while stage.sends.load(Ordering::SeqCst) < ticks && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        runner.stop();

        let sends = stage.sends.load(Ordering::SeqCst);
        assert_eq!(sends, ticks);
        for hits in &stage.slot_hits {
            // Strict receiver -> workers -> sender ordering means every
            // completed tick touched every slot exactly once.
            assert_eq!(hits.load(Ordering::SeqCst), sends);
        }
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let stage = Arc::new(CountingStage::new(1, 1));
        assert!(matches!(
            StageRunner::start(stage, 0, 1),
            Err(TrafficError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_stop_while_idle_joins_quickly() {
        let stage = Arc::new(CountingStage::new(4, usize::MAX));
        let runner = StageRunner::start(stage, 2, 4).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        runner.stop();
    }
}
