//! Pick and place sequences
//!
//! Each transfer is planned as a list of `TransferStep`s and then executed by
//! `RobotDriver::run_transfer`. Planning is pure so the approach geometry can be
//! checked without a robot.

use crate::driver::{CartesianPose, GripperSettings, JointPosition};

/// Height added to linear pick goals (gripper finger length)
pub const PICK_Z_OFFSET: f64 = 0.235;
/// Height added to linear place goals
pub const PLACE_Z_OFFSET: f64 = 0.237;
/// Clearance above a linear pick goal
pub const PICK_CLEARANCE: f64 = 0.134;
/// Clearance above a linear place goal
pub const PLACE_CLEARANCE: f64 = 0.132;
/// Squared radius beyond which board slots need a tilted approach
pub const CENTRAL_RADIUS_SQ: f64 = 0.15;
/// Wrist rotation applied after a linear pick to free the sample (about 5°)
pub const RELEASE_TWIST: f64 = 0.087;

const PICKJ_ABOVE: [f64; 6] = [0.0, 0.218, -0.827, 0.610, 0.0, 0.0];
const PLACEJ_ABOVE: [f64; 6] = [0.0, 0.070, -0.614, 0.544, 0.0, 0.0];

/// One motion in a transfer sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferStep {
    MoveJ(JointPosition),
    /// Joint move relative to the current joints
    MoveJRelative(JointPosition),
    MoveL(CartesianPose),
    /// Move the gripper to a raw position and wait
    Gripper(u8),
}

fn joints_above(goal: &JointPosition, delta: [f64; 6]) -> JointPosition {
    goal.offset(&JointPosition::new(delta))
}

/// Approach pose for a linear goal; board slots outside the central area approach tilted
pub fn linear_above(goal: &CartesianPose, clearance: f64) -> CartesianPose {
    let is_board = goal.y > 0.0;
    let outside_range = goal.x.powi(2) + goal.y.powi(2) > CENTRAL_RADIUS_SQ;
    let delta = if is_board && outside_range {
        CartesianPose::new(0.0, -0.0762, clearance, 0.103, -0.104, 0.151)
    } else {
        CartesianPose::new(0.0, 0.0, clearance, 0.0, 0.0, 0.0)
    };
    goal.offset(&delta)
}

fn raised(goal: &CartesianPose, dz: f64) -> CartesianPose {
    CartesianPose { z: goal.z + dz, ..*goal }
}

/// Pick from a joint-space goal
pub fn pickj(goal: JointPosition, gripper: GripperSettings) -> Vec<TransferStep> {
    let above = joints_above(&goal, PICKJ_ABOVE);
    vec![
        TransferStep::MoveJ(above),
        TransferStep::Gripper(gripper.open),
        TransferStep::MoveJ(goal),
        TransferStep::Gripper(gripper.closed),
        TransferStep::MoveJ(above),
    ]
}

/// Place at a joint-space goal
pub fn placej(goal: JointPosition, gripper: GripperSettings) -> Vec<TransferStep> {
    let above = joints_above(&goal, PLACEJ_ABOVE);
    vec![
        TransferStep::MoveJ(above),
        TransferStep::MoveJ(goal),
        TransferStep::Gripper(gripper.open),
        TransferStep::MoveJ(above),
    ]
}

/// Pick from a cartesian goal
pub fn pickl(goal: CartesianPose, gripper: GripperSettings) -> Vec<TransferStep> {
    let goal = raised(&goal, PICK_Z_OFFSET);
    let above = linear_above(&goal, PICK_CLEARANCE);
    vec![
        TransferStep::MoveL(above),
        TransferStep::Gripper(gripper.open),
        TransferStep::MoveL(goal),
        TransferStep::Gripper(gripper.closed),
        TransferStep::MoveJRelative(JointPosition::new([0.0, 0.0, 0.0, 0.0, 0.0, RELEASE_TWIST])),
        TransferStep::MoveL(above),
    ]
}

/// Place at a cartesian goal
pub fn placel(goal: CartesianPose, gripper: GripperSettings) -> Vec<TransferStep> {
    let goal = raised(&goal, PLACE_Z_OFFSET);
    let above = linear_above(&goal, PLACE_CLEARANCE);
    vec![
        TransferStep::MoveL(above),
        TransferStep::MoveL(goal),
        TransferStep::Gripper(gripper.open),
        TransferStep::MoveL(above),
    ]
}
