//! # Integration Tests
//!
//! End-to-end scenarios running the full pipeline (all five stages on
//! their own threads) against the mock simulator world. No external
//! simulator required.

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        ActorId, Location, TrafficConfig, Transform, Vector3D, VehicleControl,
    };
    use pipeline::TrafficManager;
    use road_map::InMemoryMap;
    use sim_client::{roads, MockSimulator};

    fn manager_over(
        world: &MockSimulator,
        topology: &contracts::SparseTopology,
        config: TrafficConfig,
    ) -> TrafficManager {
        let map = Arc::new(InMemoryMap::set_up(
            topology,
            config.sampling_resolution,
            &config.map,
        ));
        TrafficManager::new(Arc::new(world.clone()), map, config).unwrap()
    }

    fn small_pool_config() -> TrafficConfig {
        TrafficConfig {
            pool_size: 2,
            ..Default::default()
        }
    }

    fn spawn(world: &MockSimulator, location: Location, speed: f32, limit: f32) -> ActorId {
        let actor_id = world.spawn_vehicle(
            Transform {
                location,
                ..Default::default()
            },
            limit,
        );
        if speed != 0.0 {
            world.set_velocity(actor_id, Vector3D::new(speed, 0.0, 0.0));
        }
        actor_id
    }

    /// Wait until the world saw at least `count` batches, bounded.
    fn await_batches(world: &MockSimulator, count: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while world.batch_count() < count && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(
            world.batch_count() >= count,
            "only {} batches after 5s",
            world.batch_count()
        );
    }

    /// Scenario: a lone vehicle on a straight road cruises below the
    /// limit; the pipeline throttles it, steering stays neutral.
    #[test]
    fn test_single_vehicle_straight_road() {
        let world = MockSimulator::new();
        let ego = spawn(&world, Location::new(0.0, 0.0, 0.0), 5.0, 10.0);

        let manager = manager_over(&world, &roads::straight_road(100.0), small_pool_config());
        manager.register_vehicles(&[ego]);
        manager.start().unwrap();
        await_batches(&world, 3);
        manager.stop();

        let control = world.last_control(ego).expect("control submitted");
        assert!(control.throttle > 0.0, "throttle {}", control.throttle);
        assert_eq!(control.brake, 0.0);
        assert!(control.steer.abs() < 0.05, "steer {}", control.steer);
    }

    /// Scenario: a stationary vehicle 5 m ahead forces the hazard
    /// override: full brake, no throttle, neutral steer.
    #[test]
    fn test_hazard_override_behind_stationary_leader() {
        let world = MockSimulator::new();
        let ego = spawn(&world, Location::new(0.0, 0.0, 0.0), 5.0, 10.0);
        let leader = spawn(&world, Location::new(5.0, 0.0, 0.0), 0.0, 10.0);

        let manager = manager_over(&world, &roads::straight_road(100.0), small_pool_config());
        manager.register_vehicles(&[ego, leader]);
        manager.start().unwrap();
        await_batches(&world, 3);
        manager.stop();

        let control = world.last_control(ego).expect("control submitted");
        assert_eq!(control.throttle, 0.0);
        assert_eq!(control.brake, 1.0);
        assert_eq!(control.steer, 0.0);
        assert!(manager.stats().collision_hazards > 0);
    }

    /// Scenario: two vehicles reach an unsignalised junction together;
    /// exactly one gets the ticket, the other waits. After the ticket
    /// expires, both are admitted.
    #[test]
    fn test_unsignalised_junction_ticket_fifo() {
        let world = MockSimulator::new();
        // Arm A approaches the box along +x, arm B along +y; both have
        // their buffer's near sample outside and far sample inside.
        let from_a = spawn(&world, Location::new(-4.0, 0.0, 0.0), 0.0, 10.0);
        let from_b = world.spawn_vehicle(
            Transform {
                location: Location::new(4.0, -8.0, 0.0),
                rotation: contracts::Rotation {
                    pitch: 0.0,
                    yaw: 90.0,
                    roll: 0.0,
                },
            },
            10.0,
        );

        let manager = manager_over(&world, &roads::t_junction(40.0, 9), small_pool_config());
        manager.register_vehicles(&[from_a, from_b]);
        manager.start().unwrap();
        await_batches(&world, 3);

        let braking = [from_a, from_b]
            .iter()
            .filter(|&&id| world.last_control(id).map(|c| c.brake == 1.0).unwrap_or(false))
            .count();
        assert_eq!(braking, 1, "exactly one vehicle must wait its turn");

        // Past the 2 s expiry the waiting vehicle is issued the ticket.
        std::thread::sleep(Duration::from_millis(2100));
        let before = world.batch_count();
        await_batches(&world, before + 2);
        manager.stop();

        for actor_id in [from_a, from_b] {
            let control = world.last_control(actor_id).unwrap();
            assert_eq!(
                control.brake, 0.0,
                "vehicle {actor_id} still braking after expiry"
            );
        }
    }

    /// Scenario: stalling batch control must not wedge the upstream
    /// stages; once the stall clears, batches flow again.
    #[test]
    fn test_backpressure_through_stalled_batch_control() {
        let world = MockSimulator::new();
        let ego = spawn(&world, Location::new(0.0, 0.0, 0.0), 5.0, 10.0);

        let manager = manager_over(&world, &roads::straight_road(100.0), small_pool_config());
        manager.register_vehicles(&[ego]);
        manager.start().unwrap();
        await_batches(&world, 2);

        world.set_batch_delay(Some(Duration::from_millis(50)));
        std::thread::sleep(Duration::from_millis(200));
        world.set_batch_delay(None);

        let resumed_from = world.batch_count();
        await_batches(&world, resumed_from + 5);
        manager.stop();

        // Latest-wins: the post-stall controls are still coherent.
        let control = world.last_control(ego).unwrap();
        assert!(control.throttle > 0.0);
        assert_eq!(control.brake, 0.0);
    }

    /// Scenario: start -> stop -> start with identical world state and
    /// seed reproduces the first tick's output.
    #[test]
    fn test_restart_reproduces_first_tick() {
        let world = MockSimulator::new();
        let ego = spawn(&world, Location::new(0.0, 0.0, 0.0), 5.0, 10.0);

        let manager = manager_over(&world, &roads::straight_road(100.0), small_pool_config());
        manager.register_vehicles(&[ego]);

        manager.start().unwrap();
        await_batches(&world, 1);
        manager.stop();
        let first_run: Vec<VehicleControl> = world.submitted_batches()[0]
            .iter()
            .map(|c| c.control)
            .collect();

        let resumed_from = world.batch_count();
        manager.start().unwrap();
        await_batches(&world, resumed_from + 1);
        manager.stop();
        let second_run: Vec<VehicleControl> = world.submitted_batches()[resumed_from]
            .iter()
            .map(|c| c.control)
            .collect();

        assert_eq!(first_run, second_run);
    }

    /// Scenario: a vehicle dying mid-run is skipped without stalling the
    /// rest of the fleet.
    #[test]
    fn test_dead_actor_does_not_stall_the_fleet() {
        let world = MockSimulator::new();
        let ego = spawn(&world, Location::new(0.0, 0.0, 0.0), 5.0, 10.0);
        let doomed = spawn(&world, Location::new(50.0, 0.0, 0.0), 5.0, 10.0);

        let manager = manager_over(&world, &roads::straight_road(100.0), small_pool_config());
        manager.register_vehicles(&[ego, doomed]);
        manager.start().unwrap();
        await_batches(&world, 2);

        world.kill(doomed);
        let before = world.batch_count();
        await_batches(&world, before + 5);
        manager.stop();

        assert!(manager.stats().vehicles_skipped > 0);
        let control = world.last_control(ego).unwrap();
        assert!(control.throttle > 0.0);
    }
}
