//! Remote-procedure PVs: `pick:`, `place:` and `home:`
//!
//! Each action has six joint arguments, a `Process` trigger, a `Status` string and
//! a `Retval`. Setting `Process` runs the action under the run lock.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use crate::driver::{DriverHandle, GripperSettings, JointPosition};
use crate::error::{AppResult, IocError};
use crate::ioc::busy::RunLock;
use crate::ioc::status::{MotionSettings, JOINT_AXES};
use crate::pv::{ProcessVariable, PvGroup, PvValue};

pub const STATUS_RUNNING: &str = "Running";
pub const STATUS_SUCCESS: &str = "Success";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Pick up with a joint-space approach
    Pick,
    /// Place with a joint-space approach
    Place,
    /// Plain joint move
    Home,
}

impl ActionKind {
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Pick => "pick",
            ActionKind::Place => "place",
            ActionKind::Home => "home",
        }
    }
}

pub struct ActionGroup {
    kind: ActionKind,
    driver: DriverHandle,
    run_lock: RunLock,
    motion: MotionSettings,
    gripper: GripperSettings,

    args: Vec<Arc<ProcessVariable>>,
    process: Arc<ProcessVariable>,
    status: Arc<ProcessVariable>,
    retval: Arc<ProcessVariable>,
}

impl ActionGroup {
    /// `prefix` ends with the action's separator, e.g. `25idAustin:pick:`
    pub fn new(
        prefix: &str,
        kind: ActionKind,
        driver: DriverHandle,
        run_lock: RunLock,
        motion: MotionSettings,
        gripper: GripperSettings,
    ) -> Self {
        let args = JOINT_AXES
            .iter()
            .map(|axis| {
                Arc::new(
                    ProcessVariable::float(format!("{prefix}{axis}"), 0.0)
                        .with_doc(format!("Joint {axis} argument for {}()", kind.name()))
                        .with_precision(3),
                )
            })
            .collect();

        Self {
            kind,
            driver,
            run_lock,
            motion,
            gripper,
            args,
            process: Arc::new(
                ProcessVariable::bool(format!("{prefix}Process"), false)
                    .with_doc(format!("Run {}()", kind.name())),
            ),
            status: Arc::new(
                ProcessVariable::string(format!("{prefix}Status"), "")
                    .with_doc("Outcome of the last call")
                    .read_only(),
            ),
            retval: Arc::new(
                ProcessVariable::int(format!("{prefix}Retval"), 0)
                    .with_doc("0 on success, 1 on failure")
                    .read_only(),
            ),
        }
    }

    fn arguments(&self) -> JointPosition {
        let mut joints = [0.0; 6];
        for (slot, pv) in joints.iter_mut().zip(&self.args) {
            *slot = pv.get().as_f64();
        }
        JointPosition::new(joints)
    }

    async fn execute(&self, goal: JointPosition) -> AppResult<()> {
        let params = self.motion.params();
        let gripper = self.gripper;
        match self.kind {
            ActionKind::Pick => self.driver.call(move |d| d.pickj(goal, params, gripper)).await,
            ActionKind::Place => self.driver.call(move |d| d.placej(goal, params, gripper)).await,
            ActionKind::Home => self.driver.call(move |d| d.movej(goal, params)).await,
        }
    }

    async fn process(&self) -> AppResult<()> {
        let _guard = self.run_lock.try_acquire()?;
        let goal = self.arguments();
        info!(action = self.kind.name(), %goal, "Running action");
        self.status.write(STATUS_RUNNING.into())?;

        match self.execute(goal).await {
            Ok(()) => {
                self.status.write(STATUS_SUCCESS.into())?;
                self.retval.write(PvValue::Int(0))?;
                Ok(())
            }
            Err(e) => {
                error!(action = self.kind.name(), error = %e, "Action failed");
                self.status.write(format!("Error: {e}").into())?;
                self.retval.write(PvValue::Int(1))?;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PvGroup for ActionGroup {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn pvs(&self) -> Vec<Arc<ProcessVariable>> {
        let mut pvs: Vec<_> = self.args.iter().map(Arc::clone).collect();
        pvs.extend([
            Arc::clone(&self.process),
            Arc::clone(&self.status),
            Arc::clone(&self.retval),
        ]);
        pvs
    }

    async fn put(&self, pv: &Arc<ProcessVariable>, value: PvValue) -> AppResult<Option<PvValue>> {
        if Arc::ptr_eq(pv, &self.process) {
            if value.as_bool() {
                self.process().await?;
            }
            return Ok(Some(PvValue::Bool(false)));
        }

        if self.args.iter().any(|arg| Arc::ptr_eq(arg, pv)) {
            return Ok(None);
        }

        Err(IocError::PvReadOnly(pv.name().to_string()))
    }
}
