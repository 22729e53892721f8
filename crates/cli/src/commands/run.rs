//! `run` command: drive the pipeline against a synthetic circuit.
//!
//! Spawns vehicles on a closed ring road in the mock world, starts the
//! manager, and integrates the submitted controls back into the world so
//! the fleet actually moves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use config_loader::ConfigLoader;
use contracts::{ActorId, Location, TrafficConfig, Transform};
use pipeline::TrafficManager;
use road_map::InMemoryMap;
use sim_client::{roads, MockSimulator};

use crate::cli::RunArgs;

/// Flat-out acceleration and braking assumed for the mock vehicles.
const MOCK_ACCELERATION: f32 = 3.0;
const MOCK_DECELERATION: f32 = 8.0;

const WORLD_TICK: Duration = Duration::from_millis(10);

pub fn execute(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TrafficConfig::default(),
    };

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
        info!(port = args.metrics_port, "Metrics endpoint available");
    }

    info!(
        vehicles = args.vehicles,
        circuit_side = args.circuit_side,
        "Building synthetic circuit"
    );
    let topology = roads::ring_road(args.circuit_side);
    let map = Arc::new(InMemoryMap::set_up(
        &topology,
        config.sampling_resolution,
        &config.map,
    ));
    info!(waypoints = map.len(), "In-memory map constructed");

    let world = MockSimulator::new();
    let actor_ids = spawn_fleet(&world, &args);

    let manager = TrafficManager::new(Arc::new(world.clone()), map, config)
        .context("failed to construct traffic manager")?;
    manager.register_vehicles(&actor_ids);

    if args.dry_run {
        info!("Dry run requested; not starting the pipeline");
        return Ok(());
    }

    manager.start().context("failed to start pipeline")?;
    info!(duration_secs = args.duration, "Pipeline running");

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    while Instant::now() < deadline {
        std::thread::sleep(WORLD_TICK);
        apply_controls(&world, &actor_ids, WORLD_TICK.as_secs_f32());
        world.advance(WORLD_TICK.as_secs_f32());
    }

    manager.stop();

    let stats = manager.stats();
    observability::record_pipeline_stats(&stats);
    info!(
        batches = stats.batches_submitted,
        collision_hazards = stats.collision_hazards,
        traffic_light_hazards = stats.traffic_light_hazards,
        skipped = stats.vehicles_skipped,
        "Pipeline run complete"
    );

    println!("batches submitted:     {}", stats.batches_submitted);
    println!("collision hazards:     {}", stats.collision_hazards);
    println!("traffic-light hazards: {}", stats.traffic_light_hazards);
    println!("vehicles skipped:      {}", stats.vehicles_skipped);
    Ok(())
}

/// Place the fleet along the circuit's first side, evenly spaced.
fn spawn_fleet(world: &MockSimulator, args: &RunArgs) -> Vec<ActorId> {
    let spacing = (args.circuit_side / args.vehicles.max(1) as f32).max(6.0);
    (0..args.vehicles)
        .map(|i| {
            world.spawn_vehicle(
                Transform {
                    location: Location::new(i as f32 * spacing, 0.0, 0.0),
                    ..Default::default()
                },
                args.speed_limit,
            )
        })
        .collect()
}

/// Integrate the latest submitted controls into mock vehicle velocities.
fn apply_controls(world: &MockSimulator, actor_ids: &[ActorId], dt: f32) {
    for &actor_id in actor_ids {
        let (Some(control), Some(vehicle)) = (world.last_control(actor_id), world.vehicle(actor_id))
        else {
            continue;
        };
        let heading = vehicle.transform.forward_vector();
        let speed = vehicle.velocity.length();
        let accelerated = speed + control.throttle * MOCK_ACCELERATION * dt
            - control.brake * MOCK_DECELERATION * dt;
        world.set_velocity(actor_id, heading * accelerated.max(0.0));
    }
}
