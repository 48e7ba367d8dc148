//! Forward kinematics for Universal Robots e-Series arms.
//!
//! Uses the standard Denavit–Hartenberg parameters published by Universal Robots.
//! The tool pose is returned the way the controller reports it: position in metres
//! and orientation as a rotation vector (axis × angle, radians).

use nalgebra::{Matrix3, Matrix4, Rotation3};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

use crate::driver::{CartesianPose, JointPosition};

/// Supported arm models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotModel {
    Ur3e,
    #[default]
    Ur5e,
    Ur10e,
}

/// DH table for one arm: link offsets `d`, link lengths `a`, twists `alpha`
#[derive(Debug, Clone, Copy)]
pub struct DhParameters {
    pub d: [f64; 6],
    pub a: [f64; 6],
    pub alpha: [f64; 6],
}

const UR_ALPHA: [f64; 6] = [FRAC_PI_2, 0.0, 0.0, FRAC_PI_2, -FRAC_PI_2, 0.0];

impl RobotModel {
    pub fn dh(self) -> DhParameters {
        let (d, a) = match self {
            RobotModel::Ur3e => (
                [0.15185, 0.0, 0.0, 0.13105, 0.08535, 0.0921],
                [0.0, -0.24355, -0.2132, 0.0, 0.0, 0.0],
            ),
            RobotModel::Ur5e => (
                [0.1625, 0.0, 0.0, 0.1333, 0.0997, 0.0996],
                [0.0, -0.425, -0.3922, 0.0, 0.0, 0.0],
            ),
            RobotModel::Ur10e => (
                [0.1807, 0.0, 0.0, 0.17415, 0.11985, 0.11655],
                [0.0, -0.6127, -0.57155, 0.0, 0.0, 0.0],
            ),
        };
        DhParameters {
            d,
            a,
            alpha: UR_ALPHA,
        }
    }
}

fn dh_transform(theta: f64, d: f64, a: f64, alpha: f64) -> Matrix4<f64> {
    let (st, ct) = theta.sin_cos();
    let (sa, ca) = alpha.sin_cos();
    Matrix4::new(
        ct, -st * ca, st * sa, a * ct, //
        st, ct * ca, -ct * sa, a * st, //
        0.0, sa, ca, d, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Tool flange pose for the given joint angles.
pub fn forward(model: RobotModel, joints: &JointPosition) -> CartesianPose {
    let dh = model.dh();
    let mut t = Matrix4::<f64>::identity();
    for (i, theta) in joints.as_array().iter().enumerate() {
        t *= dh_transform(*theta, dh.d[i], dh.a[i], dh.alpha[i]);
    }

    let rotation: Matrix3<f64> = t.fixed_view::<3, 3>(0, 0).into_owned();
    let rotation_vector = Rotation3::from_matrix_unchecked(rotation).scaled_axis();
    CartesianPose::new(
        t[(0, 3)],
        t[(1, 3)],
        t[(2, 3)],
        rotation_vector.x,
        rotation_vector.y,
        rotation_vector.z,
    )
}
