//! # Road Map
//!
//! In-memory discretized road map: the sparse topology handed over by the
//! road provider is densified into a grid-indexed waypoint graph with
//! lane-change links. Built once per episode, immutable afterwards.

mod in_memory_map;
mod simple_waypoint;

pub use in_memory_map::InMemoryMap;
pub use simple_waypoint::{SimpleWaypoint, WaypointId};
