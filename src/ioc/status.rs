//! Arm position PVs
//!
//! `i..n` are joint set points and `x..rz` tool pose set points. Writing one axis
//! moves the arm, taking the other axes from their readbacks.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::driver::{CartesianPose, DriverHandle, JointPosition, MotionParams};
use crate::error::{AppResult, IocError};
use crate::ioc::busy::RunLock;
use crate::pv::{ProcessVariable, PvGroup, PvValue, ScanSpec};

pub const JOINT_AXES: [&str; 6] = ["i", "j", "k", "l", "m", "n"];
pub const POSE_AXES: [&str; 6] = ["x", "y", "z", "rx", "ry", "rz"];

const SCAN_JOINTS: &str = "joints";
const SCAN_POSE: &str = "pose";

/// Shared acceleration/velocity PVs read by every group that moves the arm
#[derive(Clone)]
pub struct MotionSettings {
    acceleration: Arc<ProcessVariable>,
    velocity: Arc<ProcessVariable>,
}

impl MotionSettings {
    fn new(prefix: &str) -> Self {
        let defaults = MotionParams::default();
        Self {
            acceleration: Arc::new(
                ProcessVariable::float(format!("{prefix}acceleration"), defaults.acceleration)
                    .with_doc("Acceleration used for every move")
                    .with_precision(3)
                    .autosaved(),
            ),
            velocity: Arc::new(
                ProcessVariable::float(format!("{prefix}velocity"), defaults.velocity)
                    .with_doc("Velocity used for every move")
                    .with_precision(3)
                    .autosaved(),
            ),
        }
    }

    pub fn params(&self) -> MotionParams {
        MotionParams {
            acceleration: self.acceleration.get().as_f64(),
            velocity: self.velocity.get().as_f64(),
        }
    }
}

struct Axis {
    setpoint: Arc<ProcessVariable>,
    readback: Arc<ProcessVariable>,
}

fn axes(prefix: &str, names: [&str; 6], kind: &str) -> Vec<Axis> {
    names
        .iter()
        .map(|axis| {
            let mut setpoint = ProcessVariable::float(format!("{prefix}{axis}"), 0.0)
                .with_doc(format!("{kind} {axis} set point"))
                .with_precision(3);
            let mut readback = ProcessVariable::float(format!("{prefix}{axis}.RBV"), 0.0)
                .with_doc(format!("{kind} {axis} readback"))
                .with_precision(3)
                .read_only();
            if matches!(*axis, "x" | "y" | "z") {
                setpoint = setpoint.with_units("m");
                readback = readback.with_units("m");
            }
            Axis {
                setpoint: Arc::new(setpoint),
                readback: Arc::new(readback),
            }
        })
        .collect()
}

pub struct StatusGroup {
    driver: DriverHandle,
    run_lock: RunLock,
    period: Duration,
    joints: Vec<Axis>,
    pose: Vec<Axis>,
    motion: MotionSettings,
}

impl StatusGroup {
    pub fn new(prefix: &str, driver: DriverHandle, run_lock: RunLock, period: Duration) -> Self {
        Self {
            driver,
            run_lock,
            period,
            joints: axes(prefix, JOINT_AXES, "Joint"),
            pose: axes(prefix, POSE_AXES, "Tool"),
            motion: MotionSettings::new(prefix),
        }
    }

    pub fn motion(&self) -> MotionSettings {
        self.motion.clone()
    }

    /// Readbacks with `axis` replaced by `value`
    fn compose(axes: &[Axis], axis: usize, value: f64) -> [f64; 6] {
        let mut target = [0.0; 6];
        for (i, (slot, a)) in target.iter_mut().zip(axes).enumerate() {
            *slot = if i == axis { value } else { a.readback.get().as_f64() };
        }
        target
    }

    async fn refresh_joints(&self) -> AppResult<()> {
        let joints = self.driver.get_joints().await?;
        for (axis, value) in self.joints.iter().zip(joints.as_array()) {
            axis.readback.write_if_changed(PvValue::Float(*value))?;
        }
        Ok(())
    }

    async fn refresh_pose(&self) -> AppResult<()> {
        let pose = self.driver.get_position().await?;
        for (axis, value) in self.pose.iter().zip(pose.to_array()) {
            axis.readback.write_if_changed(PvValue::Float(value))?;
        }
        Ok(())
    }

    async fn move_joints(&self, target: JointPosition) -> AppResult<()> {
        let _guard = self.run_lock.try_acquire()?;
        let params = self.motion.params();
        info!(%target, "Joint move requested");
        self.driver.call(move |d| d.movej(target, params)).await?;
        self.refresh_joints().await?;
        self.refresh_pose().await
    }

    async fn move_pose(&self, target: CartesianPose) -> AppResult<()> {
        let _guard = self.run_lock.try_acquire()?;
        let params = self.motion.params();
        info!(%target, "Linear move requested");
        self.driver
            .call(move |d| d.movel(&target.to_array(), params, false))
            .await?;
        self.refresh_joints().await?;
        self.refresh_pose().await
    }
}

#[async_trait]
impl PvGroup for StatusGroup {
    fn name(&self) -> &str {
        "status"
    }

    fn pvs(&self) -> Vec<Arc<ProcessVariable>> {
        let mut pvs = Vec::new();
        for axis in self.joints.iter().chain(&self.pose) {
            pvs.push(Arc::clone(&axis.setpoint));
            pvs.push(Arc::clone(&axis.readback));
        }
        pvs.push(Arc::clone(&self.motion.acceleration));
        pvs.push(Arc::clone(&self.motion.velocity));
        pvs
    }

    fn scans(&self) -> Vec<ScanSpec> {
        vec![
            ScanSpec::new(SCAN_JOINTS, self.period),
            ScanSpec::new(SCAN_POSE, self.period),
        ]
    }

    async fn scan(&self, id: &str) -> AppResult<()> {
        match id {
            SCAN_JOINTS => self.refresh_joints().await,
            SCAN_POSE => self.refresh_pose().await,
            _ => Ok(()),
        }
    }

    async fn put(&self, pv: &Arc<ProcessVariable>, value: PvValue) -> AppResult<Option<PvValue>> {
        let value = value.as_f64();

        if Arc::ptr_eq(pv, &self.motion.acceleration) || Arc::ptr_eq(pv, &self.motion.velocity) {
            if value <= 0.0 {
                return Err(IocError::invalid_value(pv.name(), "must be positive"));
            }
            return Ok(None);
        }

        if let Some(axis) = self.joints.iter().position(|a| Arc::ptr_eq(&a.setpoint, pv)) {
            let target = JointPosition::new(Self::compose(&self.joints, axis, value));
            self.move_joints(target).await?;
            return Ok(None);
        }

        if let Some(axis) = self.pose.iter().position(|a| Arc::ptr_eq(&a.setpoint, pv)) {
            let target = CartesianPose::from(Self::compose(&self.pose, axis, value));
            self.move_pose(target).await?;
            return Ok(None);
        }

        Err(IocError::PvReadOnly(pv.name().to_string()))
    }
}
