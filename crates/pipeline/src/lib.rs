//! # Pipeline
//!
//! The concurrent multi-stage pipeline that turns world state into
//! per-tick actuation batches. Stages are coupled by single-slot
//! [`Messenger`]s and run on their own receiver / worker-pool / sender
//! threads, so each stage ticks at its own cadence with latest-wins
//! semantics toward slow consumers.
//!
//! Data flow:
//!
//! ```text
//! Localization ─┬─> Collision ────┐
//!               ├─> TrafficLight ─┼─> MotionPlanner ─> BatchControl
//!               └─────────────────┘
//! ```

mod batch_control;
mod collision;
mod frames;
mod localization;
mod manager;
mod messenger;
mod motion_planner;
mod parameters;
mod pid;
mod stage;
mod stats;
mod traffic_light;
mod vicinity_grid;

pub use batch_control::BatchControlStage;
pub use collision::CollisionStage;
pub use frames::*;
pub use localization::LocalizationStage;
pub use manager::TrafficManager;
pub use messenger::{DataPacket, Messenger};
pub use motion_planner::MotionPlannerStage;
pub use parameters::{LaneChangeDirection, Parameters};
pub use contracts::StatsSnapshot;
pub use stage::{Stage, StageRunner};
pub use stats::PipelineStats;
pub use traffic_light::TrafficLightStage;
pub use vicinity_grid::VicinityGrid;
