//! # Austin
//!
//! Input-output controller for a Universal Robots arm with a Robotiq gripper that
//! moves samples between a storage board and a beamline stage. The robot's
//! state and commands are exposed as process variables (PVs) that clients read,
//! write and monitor over a line-based JSON protocol.
//!
//! ## Crate Structure
//!
//! - **`config`**: layered Figment configuration (defaults, TOML file, `AUSTIN_*` env).
//! - **`driver`**: blocking robot links (dashboard, URScript arm, Robotiq gripper),
//!   transfer sequences, and simulated links for running without hardware.
//! - **`error`**: the `IocError` enum shared by every module.
//! - **`ioc`**: PV groups for the dashboard, arm status, gripper, actions, sample
//!   slots and the alive heartbeat, plus autosave and the global run lock.
//! - **`kinematics`**: forward kinematics for the simulated arm.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`pv`**: process variables, the PV database and the scan scheduler.
//! - **`server`**: the TCP server clients talk to.

pub mod config;
pub mod driver;
pub mod error;
pub mod ioc;
pub mod kinematics;
pub mod logging;
pub mod pv;
pub mod server;
