//! Robot link capabilities
//!
//! The robot controller exposes three independent links, and each one is a small
//! trait here:
//!
//! - `DashboardLink` - line-based dashboard server (program control, status)
//! - `ArmControl` - joint/pose state and URScript motion
//! - `GripperControl` - Robotiq gripper over the URCap socket
//!
//! # Design Philosophy
//!
//! Unlike most of the IOC, these traits are synchronous. They are the only place
//! blocking socket I/O happens; callers on the async side go through
//! `DriverHandle::call`, which moves the work onto the blocking pool.
//!
//! Each trait:
//! - Takes `&mut self` (the driver serialises access with a mutex per link)
//! - Is `Send` so it can cross into a blocking worker
//! - Returns `AppResult` so disconnects surface as `IocError::RobotDisconnected`

use crate::driver::{CartesianPose, JointPosition, MotionParams, ObjectStatus};
use crate::error::AppResult;

/// Capability: Dashboard Commands
///
/// # Contract
/// - One command in, one reply line out
/// - The reply has its line terminator removed
/// - A lost connection is reported as `RobotDisconnected`; the next call may reconnect
pub trait DashboardLink: Send {
    /// Send a command and return the single-line reply
    fn send_and_receive(&mut self, command: &str) -> AppResult<String>;
}

/// Capability: Arm Motion
///
/// # Contract
/// - `movej` and `movel` return only after the arm reached the target (or failed)
/// - `relative` targets are added to the current joints/pose
/// - `joints` and `pose` report the latest state seen by the link
pub trait ArmControl: Send {
    /// Current joint positions
    fn joints(&mut self) -> AppResult<JointPosition>;

    /// Current tool pose
    fn pose(&mut self) -> AppResult<CartesianPose>;

    /// Move in joint space
    fn movej(
        &mut self,
        target: JointPosition,
        params: MotionParams,
        relative: bool,
    ) -> AppResult<()>;

    /// Move linearly in tool space
    fn movel(
        &mut self,
        target: CartesianPose,
        params: MotionParams,
        relative: bool,
    ) -> AppResult<()>;
}

/// Capability: Parallel Gripper
///
/// Positions, speeds and forces are raw 0..=255 counts; position 0 is fully open.
pub trait GripperControl: Send {
    fn is_active(&mut self) -> AppResult<bool>;

    /// Reset and activate the gripper, blocking until it reports ready
    fn activate(&mut self) -> AppResult<()>;

    fn disconnect(&mut self) -> AppResult<()>;

    /// Calibrated fully-open position
    fn open_position(&self) -> u8;

    /// Calibrated fully-closed position
    fn closed_position(&self) -> u8;

    /// Measure the open and closed limits
    fn auto_calibrate(&mut self) -> AppResult<()>;

    fn current_position(&mut self) -> AppResult<u8>;

    /// Move and block until the gripper stops, returning the final position
    fn move_and_wait_for_pos(
        &mut self,
        position: u8,
        speed: u8,
        force: u8,
    ) -> AppResult<(u8, ObjectStatus)>;
}
