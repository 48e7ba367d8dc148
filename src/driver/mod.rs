//! Robot driver
//!
//! Synchronous access to the three robot links (dashboard, arm, gripper). Each
//! link sits behind its own mutex, so dashboard polling continues while the arm
//! is moving.
//!
//! The async side of the IOC never calls `RobotDriver` directly. It goes through
//! `DriverHandle`, which runs each call on tokio's blocking pool.

pub mod capabilities;
pub mod dashboard;
pub mod gripper;
pub mod mock;
pub mod realtime;
pub mod transfer;
pub mod types;
pub mod urscript;

pub use capabilities::{ArmControl, DashboardLink, GripperControl};
pub use types::{CartesianPose, GripperSettings, JointPosition, MotionParams, ObjectStatus};

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::RobotConfig;
use crate::error::{AppResult, IocError};
use crate::kinematics::RobotModel;
use dashboard::DashboardClient;
use gripper::RobotiqGripper;
use mock::{MockArm, MockDashboard, MockGripper};
use transfer::TransferStep;
use urscript::UrArm;

fn acquire<'a, T: ?Sized>(link: &'a Mutex<T>, name: &str) -> AppResult<MutexGuard<'a, T>> {
    link.lock()
        .map_err(|_| IocError::Driver(format!("{name} link poisoned by a panicked call")))
}

/// Blocking robot driver
pub struct RobotDriver {
    dashboard: Mutex<Box<dyn DashboardLink>>,
    arm: Mutex<Box<dyn ArmControl>>,
    gripper: Mutex<Box<dyn GripperControl>>,
}

impl RobotDriver {
    /// Driver over any set of links
    pub fn new(
        dashboard: Box<dyn DashboardLink>,
        arm: Box<dyn ArmControl>,
        gripper: Box<dyn GripperControl>,
    ) -> Self {
        Self {
            dashboard: Mutex::new(dashboard),
            arm: Mutex::new(arm),
            gripper: Mutex::new(gripper),
        }
    }

    /// Connect to a real controller.
    ///
    /// A dashboard that is unreachable at startup is logged and retried on the
    /// first command; the IOC still comes up.
    pub fn connect(config: &RobotConfig) -> Self {
        let mut dashboard = DashboardClient::new(&config.host, config.dashboard_port, config.timeout);
        match dashboard.connect() {
            Ok(()) => info!(host = %config.host, "Connected to robot dashboard"),
            Err(e) => warn!(host = %config.host, error = %e, "Robot dashboard not reachable yet"),
        }
        let arm = UrArm::connect(config);
        let gripper = RobotiqGripper::new(
            &config.host,
            config.gripper_port,
            config.timeout,
            config.move_timeout,
        );
        Self::new(Box::new(dashboard), Box::new(arm), Box::new(gripper))
    }

    /// A driver backed by the simulated links
    pub fn simulated(model: RobotModel) -> Self {
        Self::new(
            Box::new(MockDashboard::new()),
            Box::new(MockArm::new(model)),
            Box::new(MockGripper::new()),
        )
    }

    // Dashboard

    /// Send one dashboard command and return its reply line
    pub fn send_and_receive(&self, command: &str) -> AppResult<String> {
        acquire(&self.dashboard, "dashboard")?.send_and_receive(command)
    }

    // Arm

    /// Latest tool pose from the realtime stream
    pub fn get_position(&self) -> AppResult<CartesianPose> {
        acquire(&self.arm, "arm")?.pose()
    }

    /// Latest joint angles from the realtime stream
    pub fn get_joints(&self) -> AppResult<JointPosition> {
        acquire(&self.arm, "arm")?.joints()
    }

    /// Joint move; returns once the arm is at `joints`
    pub fn movej(&self, joints: JointPosition, params: MotionParams) -> AppResult<()> {
        info!(%joints, "Moving to joints");
        acquire(&self.arm, "arm")?.movej(joints, params, false)
    }

    /// Joint move by `delta` from the current joints
    pub fn movej_relative(&self, delta: JointPosition, params: MotionParams) -> AppResult<()> {
        acquire(&self.arm, "arm")?.movej(delta, params, true)
    }

    /// Linear move to `(x, y, z)` or `(x, y, z, rx, ry, rz)`.
    ///
    /// Three values keep the current orientation. Any other length fails with
    /// `InvalidPosition`.
    pub fn movel(&self, pos: &[f64], params: MotionParams, relative: bool) -> AppResult<()> {
        let mut arm = acquire(&self.arm, "arm")?;
        let target = if pos.len() == 3 {
            CartesianPose::from_slice(pos, &arm.pose()?)?
        } else {
            CartesianPose::from_slice(pos, &CartesianPose::default())?
        };
        info!(pos = %target, relative, "Moving to position");
        arm.movel(target, params, relative)
    }

    // Gripper

    /// Activate if needed, then open
    pub fn activate_gripper(&self, settings: GripperSettings) -> AppResult<()> {
        let mut gripper = acquire(&self.gripper, "gripper")?;
        if gripper.is_active()? {
            debug!("Gripper already active");
            return Ok(());
        }
        gripper.activate()?;
        gripper.move_and_wait_for_pos(settings.open, settings.speed, settings.force)?;
        Ok(())
    }

    /// Whether the gripper reports itself activated
    pub fn gripper_is_active(&self) -> AppResult<bool> {
        acquire(&self.gripper, "gripper")?.is_active()
    }

    /// Drop the gripper socket; the next command reconnects
    pub fn disconnect_gripper(&self) -> AppResult<()> {
        acquire(&self.gripper, "gripper")?.disconnect()
    }

    /// Calibrated closed stop
    pub fn gripper_closed_position(&self) -> AppResult<u8> {
        Ok(acquire(&self.gripper, "gripper")?.closed_position())
    }

    /// Calibrated open stop
    pub fn gripper_open_position(&self) -> AppResult<u8> {
        Ok(acquire(&self.gripper, "gripper")?.open_position())
    }

    /// Find the open and closed stops
    pub fn calibrate_gripper(&self) -> AppResult<()> {
        acquire(&self.gripper, "gripper")?.auto_calibrate()
    }

    /// Measured finger position
    pub fn gripper_position(&self) -> AppResult<u8> {
        acquire(&self.gripper, "gripper")?.current_position()
    }

    /// Move the fingers and wait until they stop
    pub fn gripper_move(&self, position: u8, speed: u8, force: u8) -> AppResult<(u8, ObjectStatus)> {
        acquire(&self.gripper, "gripper")?.move_and_wait_for_pos(position, speed, force)
    }

    // Transfers

    /// Pick at `goal`, approaching in joint space
    pub fn pickj(&self, goal: JointPosition, params: MotionParams, gripper: GripperSettings) -> AppResult<()> {
        self.run_transfer(&transfer::pickj(goal, gripper), params, gripper)
    }

    /// Place at `goal`, approaching in joint space
    pub fn placej(&self, goal: JointPosition, params: MotionParams, gripper: GripperSettings) -> AppResult<()> {
        self.run_transfer(&transfer::placej(goal, gripper), params, gripper)
    }

    /// Pick at `goal`, approaching along a line
    pub fn pickl(&self, goal: CartesianPose, params: MotionParams, gripper: GripperSettings) -> AppResult<()> {
        self.run_transfer(&transfer::pickl(goal, gripper), params, gripper)
    }

    /// Place at `goal`, approaching along a line
    pub fn placel(&self, goal: CartesianPose, params: MotionParams, gripper: GripperSettings) -> AppResult<()> {
        self.run_transfer(&transfer::placel(goal, gripper), params, gripper)
    }

    /// Execute a planned sequence, stopping at the first failed step
    pub fn run_transfer(
        &self,
        steps: &[TransferStep],
        params: MotionParams,
        gripper: GripperSettings,
    ) -> AppResult<()> {
        for (i, step) in steps.iter().enumerate() {
            debug!(step = i, ?step, "Transfer step");
            match *step {
                TransferStep::MoveJ(target) => acquire(&self.arm, "arm")?.movej(target, params, false)?,
                TransferStep::MoveJRelative(delta) => {
                    acquire(&self.arm, "arm")?.movej(delta, params, true)?
                }
                TransferStep::MoveL(target) => acquire(&self.arm, "arm")?.movel(target, params, false)?,
                TransferStep::Gripper(position) => {
                    acquire(&self.gripper, "gripper")?.move_and_wait_for_pos(
                        position,
                        gripper.speed,
                        gripper.force,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Async handle that runs driver calls on the blocking pool
#[derive(Clone)]
pub struct DriverHandle {
    inner: Arc<RobotDriver>,
}

impl DriverHandle {
    /// Share `driver` between tasks
    pub fn new(driver: RobotDriver) -> Self {
        Self {
            inner: Arc::new(driver),
        }
    }

    /// Run `f` against the driver on a blocking worker and await the result
    pub async fn call<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RobotDriver) -> AppResult<T> + Send + 'static,
    {
        let driver = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&driver)).await?
    }

    /// Async form of [`RobotDriver::send_and_receive`]
    pub async fn send_and_receive(&self, command: impl Into<String>) -> AppResult<String> {
        let command = command.into();
        self.call(move |d| d.send_and_receive(&command)).await
    }

    /// Async form of [`RobotDriver::get_joints`]
    pub async fn get_joints(&self) -> AppResult<JointPosition> {
        self.call(|d| d.get_joints()).await
    }

    /// Async form of [`RobotDriver::get_position`]
    pub async fn get_position(&self) -> AppResult<CartesianPose> {
        self.call(|d| d.get_position()).await
    }
}

impl From<RobotDriver> for DriverHandle {
    fn from(driver: RobotDriver) -> Self {
        Self::new(driver)
    }
}
