//! # Sim Client
//!
//! 仿真器客户端模块：提供 `SimulatorClient` 的 mock 实现与合成路网。
//!
//! The real RPC transport lives outside this workspace; stages only see
//! the `contracts::SimulatorClient` trait. This crate provides:
//! - [`MockSimulator`]: a programmable kinematic world for tests and the
//!   CLI demo mode
//! - [`roads`]: synthetic sparse topologies (straight roads, parallel
//!   lanes, rings, T-junctions) implementing `contracts::RoadWaypoint`

mod mock_simulator;
pub mod roads;

pub use mock_simulator::{MockSimulator, MockVehicle};
