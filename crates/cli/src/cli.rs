//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Traffic Manager - autonomous traffic pipeline for a driving simulator
#[derive(Parser, Debug)]
#[command(
    name = "traffic-manager",
    author,
    version,
    about = "Autonomous traffic manager pipeline",
    long_about = "Drives a population of simulated vehicles through a road network.\n\n\
                  Builds the in-memory map, registers vehicles, and runs the\n\
                  localization / collision / traffic-light / motion-planner /\n\
                  batch-control pipeline against a mock simulator world."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TRAFFIC_MANAGER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TRAFFIC_MANAGER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline against a synthetic world
    Run(RunArgs),

    /// Validate a configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when
    /// omitted
    #[arg(short, long, env = "TRAFFIC_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of vehicles to spawn on the circuit
    #[arg(long, default_value = "10", env = "TRAFFIC_MANAGER_VEHICLES")]
    pub vehicles: usize,

    /// Side length of the synthetic circuit, metres
    #[arg(long, default_value = "200.0")]
    pub circuit_side: f32,

    /// Posted speed limit on the circuit, m/s
    #[arg(long, default_value = "13.9")]
    pub speed_limit: f32,

    /// How long to run, seconds
    #[arg(long, default_value = "10", env = "TRAFFIC_MANAGER_DURATION")]
    pub duration: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "TRAFFIC_MANAGER_METRICS_PORT")]
    pub metrics_port: u16,

    /// Build everything and exit without starting the pipeline
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "traffic.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file; defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
