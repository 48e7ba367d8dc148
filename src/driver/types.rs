//! Position and parameter types shared by the driver and the PV groups.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppResult, IocError};

/// Six joint angles (`i..n`), radians
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointPosition([f64; 6]);

impl JointPosition {
    /// Wrap six joint angles, base first
    pub const fn new(joints: [f64; 6]) -> Self {
        Self(joints)
    }

    /// Joint angles in `i..n` order
    pub fn as_array(&self) -> &[f64; 6] {
        &self.0
    }

    /// Euclidean distance in joint space
    pub fn distance(&self, other: &JointPosition) -> f64 {
        norm(&self.0, &other.0)
    }

    /// Joint-wise sum, used for relative moves
    pub fn offset(&self, delta: &JointPosition) -> JointPosition {
        JointPosition(add(&self.0, &delta.0))
    }
}

impl From<[f64; 6]> for JointPosition {
    fn from(value: [f64; 6]) -> Self {
        Self(value)
    }
}

impl fmt::Display for JointPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, &self.0)
    }
}

/// Tool pose: position in metres and a rotation vector in radians
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CartesianPose {
    /// Base-frame x, metres
    pub x: f64,
    /// Base-frame y, metres
    pub y: f64,
    /// Base-frame z, metres
    pub z: f64,
    /// Rotation vector x, radians
    pub rx: f64,
    /// Rotation vector y, radians
    pub ry: f64,
    /// Rotation vector z, radians
    pub rz: f64,
}

impl CartesianPose {
    /// Pose from position and rotation vector components
    pub const fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Self {
            x,
            y,
            z,
            rx,
            ry,
            rz,
        }
    }

    /// `[x, y, z, rx, ry, rz]`
    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.rx, self.ry, self.rz]
    }

    /// Build a pose from three `(x, y, z)` or six values.
    ///
    /// With three values the orientation is taken from `current`.
    pub fn from_slice(values: &[f64], current: &CartesianPose) -> AppResult<Self> {
        match values {
            [x, y, z] => Ok(Self::new(*x, *y, *z, current.rx, current.ry, current.rz)),
            [x, y, z, rx, ry, rz] => Ok(Self::new(*x, *y, *z, *rx, *ry, *rz)),
            _ => Err(IocError::InvalidPosition(format!(
                "Position must be either (x, y, z) or (x, y, z, rx, ry, rz). Received {values:?}"
            ))),
        }
    }

    /// Rotation described by `(rx, ry, rz)`
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(Vector3::new(self.rx, self.ry, self.rz))
    }

    /// Distance between two poses: translation in metres combined with the
    /// geodesic angle between the orientations in radians.
    ///
    /// Rotation vectors are not unique (`θ·u` and `(θ - 2π)·u` are the same
    /// orientation), so they are compared as rotations rather than as vectors.
    pub fn distance(&self, other: &CartesianPose) -> f64 {
        let translation = ((self.x - other.x).powi(2)
            + (self.y - other.y).powi(2)
            + (self.z - other.z).powi(2))
        .sqrt();
        let angle = self.rotation().angle_to(&other.rotation());
        translation.hypot(angle)
    }

    /// Component-wise sum, used for relative moves and approach offsets
    pub fn offset(&self, delta: &CartesianPose) -> CartesianPose {
        CartesianPose::from(add(&self.to_array(), &delta.to_array()))
    }

    /// Whether every component is exactly zero (an uncalibrated slot)
    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|v| *v == 0.0)
    }
}

impl From<[f64; 6]> for CartesianPose {
    fn from(v: [f64; 6]) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

impl fmt::Display for CartesianPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, &self.to_array())
    }
}

/// Acceleration and velocity for one move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParams {
    /// Tool or joint acceleration, m/s² or rad/s²
    pub acceleration: f64,
    /// Tool or joint speed, m/s or rad/s
    pub velocity: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            acceleration: 0.5,
            velocity: 0.2,
        }
    }
}

/// Gripper counts used during transfers (0 = open, 255 = closed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripperSettings {
    /// Position count used to release
    pub open: u8,
    /// Position count used to grip
    pub closed: u8,
    /// Finger speed, 0..=255
    pub speed: u8,
    /// Grip force, 0..=255
    pub force: u8,
}

impl Default for GripperSettings {
    fn default() -> Self {
        Self {
            open: 0,
            closed: 255,
            speed: 255,
            force: 50,
        }
    }
}

/// Object detection status reported by the gripper after a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    /// Fingers still moving toward the set point
    Moving,
    /// Stopped on an object while opening
    StoppedOuterObject,
    /// Stopped on an object while closing
    StoppedInnerObject,
    /// Reached the set point without contact
    AtDest,
}

impl ObjectStatus {
    /// Decode the gripper's `OBJ` register
    pub fn from_code(code: i32) -> AppResult<Self> {
        match code {
            0 => Ok(ObjectStatus::Moving),
            1 => Ok(ObjectStatus::StoppedOuterObject),
            2 => Ok(ObjectStatus::StoppedInnerObject),
            3 => Ok(ObjectStatus::AtDest),
            other => Err(IocError::Driver(format!("Unknown gripper OBJ status {other}"))),
        }
    }
}

fn norm(a: &[f64; 6], b: &[f64; 6]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn add(a: &[f64; 6], b: &[f64; 6]) -> [f64; 6] {
    let mut out = *a;
    for (o, d) in out.iter_mut().zip(b.iter()) {
        *o += d;
    }
    out
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[f64; 6]) -> fmt::Result {
    write!(f, "(")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{v:.5}")?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_values_keep_current_orientation() {
        let current = CartesianPose::new(0.0, 0.0, 0.0, 1.0, 2.0, 3.0);
        let pose = CartesianPose::from_slice(&[0.1, 0.2, 0.3], &current).unwrap();
        assert_eq!(pose, CartesianPose::new(0.1, 0.2, 0.3, 1.0, 2.0, 3.0));
    }

    #[test]
    fn other_lengths_are_rejected() {
        let current = CartesianPose::default();
        let err = CartesianPose::from_slice(&[0.1, 0.2], &current).unwrap_err();
        assert!(matches!(err, IocError::InvalidPosition(_)));
    }

    #[test]
    fn joint_distance_and_offset() {
        let a = JointPosition::new([0.0; 6]);
        let b = a.offset(&JointPosition::new([0.0, 0.0, 0.0, 0.0, 0.3, 0.4]));
        assert!((a.distance(&b) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn pose_distance_compares_orientations_as_rotations() {
        // Stage pose, just over π about its axis
        let stage = CartesianPose::new(0.19676, -0.42392, 0.17796, 2.909, 1.187, 0.003);
        let r = Vector3::new(stage.rx, stage.ry, stage.rz);
        let theta = r.norm();
        assert!(theta > std::f64::consts::PI);

        // Same orientation as the controller reports it: 2π - θ about -axis
        let equivalent = r * -(2.0 * std::f64::consts::PI - theta) / theta;
        let reported = CartesianPose::new(
            stage.x,
            stage.y,
            stage.z,
            equivalent.x,
            equivalent.y,
            equivalent.z,
        );
        assert!(stage.distance(&reported) < 1e-6);

        let shifted = CartesianPose { x: stage.x + 0.03, y: stage.y + 0.04, ..reported };
        assert!((stage.distance(&shifted) - 0.05).abs() < 1e-6);
    }

    #[test]
    fn pose_distance_includes_rotation() {
        let a = CartesianPose::new(0.1, 0.2, 0.3, 0.0, 0.0, 0.0);
        let b = CartesianPose::new(0.1, 0.2, 0.3, 0.0, 0.0, 0.5);
        assert!((a.distance(&b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn object_status_codes() {
        assert_eq!(ObjectStatus::from_code(3).unwrap(), ObjectStatus::AtDest);
        assert!(ObjectStatus::from_code(7).is_err());
    }
}
