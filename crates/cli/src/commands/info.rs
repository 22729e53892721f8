//! `info` command: print the effective configuration.

use anyhow::{Context, Result};

use config_loader::ConfigLoader;
use contracts::TrafficConfig;

use crate::cli::InfoArgs;

pub fn execute(args: InfoArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TrafficConfig::default(),
    };

    if args.json {
        println!("{}", ConfigLoader::to_json(&config)?);
        return Ok(());
    }

    println!("sampling resolution:   {} m", config.sampling_resolution);
    println!(
        "grids:                 vehicle {} m / pedestrian {} m / vicinity {} m",
        config.map.vehicle_grid_cell,
        config.map.pedestrian_grid_cell,
        config.collision.vicinity_cell
    );
    println!(
        "collision:             radius {} m, vertical overlap {} m",
        config.collision.search_radius, config.collision.vertical_overlap_threshold
    );
    println!(
        "horizons:              buffer {}s (min {} m), target {}s (min {} m)",
        config.localization.waypoint_time_horizon,
        config.localization.minimum_horizon_length,
        config.localization.target_waypoint_time_horizon,
        config.localization.target_waypoint_horizon_length
    );
    println!(
        "junction checks:       buffer indices {:?}, ticket expiry {}s",
        config.localization.junction_check_indices, config.traffic_light.ticket_expiry
    );
    println!(
        "control:               batch every {} ms, pool size {}",
        config.batch_interval_ms,
        if config.pool_size == 0 {
            "auto".to_string()
        } else {
            config.pool_size.to_string()
        }
    );
    println!("seed:                  {}", config.seed);
    Ok(())
}
