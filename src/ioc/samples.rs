//! Sample slot PVs
//!
//! One group per configured slot, served under `sample<N>:`. Setting `load` carries
//! the sample from its slot to the stage: linear pick, home, linear place.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::driver::{CartesianPose, DriverHandle, GripperSettings, JointPosition};
use crate::error::{AppResult, IocError};
use crate::ioc::busy::RunLock;
use crate::ioc::status::{MotionSettings, POSE_AXES};
use crate::pv::{ProcessVariable, PvGroup, PvValue};

/// Where the sample goes and how to get there
#[derive(Debug, Clone, Copy)]
pub struct LoadPlan {
    pub home: JointPosition,
    pub stage: CartesianPose,
    pub gripper: GripperSettings,
}

pub struct SampleGroup {
    index: u32,
    position: CartesianPose,
    plan: LoadPlan,
    driver: DriverHandle,
    run_lock: RunLock,
    motion: MotionSettings,

    present: Arc<ProcessVariable>,
    load: Arc<ProcessVariable>,
    coordinates: Vec<Arc<ProcessVariable>>,
}

impl SampleGroup {
    /// `prefix` is the IOC prefix; PVs are named `<prefix>sample<index>:<pv>`
    pub fn new(
        prefix: &str,
        index: u32,
        position: CartesianPose,
        plan: LoadPlan,
        driver: DriverHandle,
        run_lock: RunLock,
        motion: MotionSettings,
    ) -> Self {
        let base = format!("{prefix}sample{index}:");
        let coordinates = POSE_AXES
            .iter()
            .zip(position.to_array())
            .map(|(axis, value)| {
                let kind = if axis.starts_with('r') { "Rotation" } else { "Translation" };
                let mut pv = ProcessVariable::float(format!("{base}{axis}"), value)
                    .with_doc(format!("{kind} coordinate of the sample pick position"))
                    .with_precision(5)
                    .read_only();
                if !axis.starts_with('r') {
                    pv = pv.with_units("m");
                }
                Arc::new(pv)
            })
            .collect();

        Self {
            index,
            position,
            plan,
            driver,
            run_lock,
            motion,
            present: Arc::new(
                ProcessVariable::bool(format!("{base}present"), false)
                    .with_doc("Whether the sensor detects a sample is present"),
            ),
            load: Arc::new(
                ProcessVariable::bool(format!("{base}load"), false)
                    .with_doc("Direct the robot to load this sample to the stage"),
            ),
            coordinates,
        }
    }

    async fn load_sample(&self) -> AppResult<()> {
        if self.position.is_zero() {
            return Err(IocError::InvalidPosition(format!(
                "Sample slot {} has no calibrated position",
                self.index
            )));
        }

        let _guard = self.run_lock.try_acquire()?;
        let params = self.motion.params();
        let pick = self.position;
        let plan = self.plan;
        info!(slot = self.index, from = %pick, to = %plan.stage, "Loading sample");
        self.driver
            .call(move |d| {
                d.pickl(pick, params, plan.gripper)?;
                d.movej(plan.home, params)?;
                d.placel(plan.stage, params, plan.gripper)
            })
            .await?;
        info!(slot = self.index, "Sample loaded");
        Ok(())
    }
}

#[async_trait]
impl PvGroup for SampleGroup {
    fn name(&self) -> &str {
        "sample"
    }

    fn pvs(&self) -> Vec<Arc<ProcessVariable>> {
        let mut pvs = vec![Arc::clone(&self.present), Arc::clone(&self.load)];
        pvs.extend(self.coordinates.iter().map(Arc::clone));
        pvs
    }

    async fn put(&self, pv: &Arc<ProcessVariable>, value: PvValue) -> AppResult<Option<PvValue>> {
        if Arc::ptr_eq(pv, &self.load) {
            if value.as_bool() {
                self.load_sample().await?;
            }
            return Ok(Some(PvValue::Bool(false)));
        }

        if Arc::ptr_eq(pv, &self.present) {
            return Ok(None);
        }

        Err(IocError::PvReadOnly(pv.name().to_string()))
    }
}
