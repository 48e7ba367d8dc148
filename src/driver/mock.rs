//! Simulated robot links
//!
//! The mocks keep their state behind an `Arc<Mutex<_>>` so a test can hold a clone
//! and inspect or rearrange the robot while the driver owns another clone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::driver::transfer::TransferStep;
use crate::driver::{
    ArmControl, CartesianPose, DashboardLink, GripperControl, JointPosition, MotionParams,
    ObjectStatus,
};
use crate::error::{AppResult, IocError};
use crate::kinematics::{forward, RobotModel};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn disconnected(link: &str) -> IocError {
    IocError::RobotDisconnected(format!(
        "The connection was lost to the robot (simulated {link}). Please connect and try running again."
    ))
}

// =============================================================================
// Dashboard
// =============================================================================

#[derive(Debug)]
struct DashboardState {
    connected: bool,
    remote_control: bool,
    robot_mode: &'static str,
    program: Option<String>,
    program_state: &'static str,
    operational_mode: &'static str,
    safety_status: &'static str,
    sent: Vec<String>,
    overrides: HashMap<String, String>,
}

/// Simulated dashboard server with controller-style replies
#[derive(Debug, Clone)]
pub struct MockDashboard {
    state: Arc<Mutex<DashboardState>>,
}

impl Default for MockDashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDashboard {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DashboardState {
                connected: true,
                remote_control: true,
                robot_mode: "POWER_OFF",
                program: Some("austin.urp".to_string()),
                program_state: "STOPPED",
                operational_mode: "NONE",
                safety_status: "NORMAL",
                sent: Vec::new(),
                overrides: HashMap::new(),
            })),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Answer `command` with `reply` instead of the simulated behaviour
    pub fn set_reply(&self, command: impl Into<String>, reply: impl Into<String>) {
        lock(&self.state).overrides.insert(command.into(), reply.into());
    }

    /// Every command received so far, oldest first
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }

    fn reply(state: &mut DashboardState, command: &str) -> String {
        if let Some(reply) = state.overrides.get(command) {
            return reply.clone();
        }

        match command {
            "is in remote control" => state.remote_control.to_string(),
            "get loaded program" => match &state.program {
                Some(program) => format!("Loaded program: {program}"),
                None => "No program loaded".to_string(),
            },
            "play" => {
                let powered = matches!(state.robot_mode, "RUNNING" | "IDLE");
                if state.program.is_some() && powered {
                    state.program_state = "PLAYING";
                    state.robot_mode = "RUNNING";
                    "Starting program".to_string()
                } else {
                    "Failed to execute: play".to_string()
                }
            }
            "stop" => {
                state.program_state = "STOPPED";
                "Stopped".to_string()
            }
            "pause" => {
                state.program_state = "PAUSED";
                "Pausing program".to_string()
            }
            "quit" => "Disconnected".to_string(),
            "shutdown" => "Shutting down".to_string(),
            "brake release" => {
                state.robot_mode = "IDLE";
                "Brake releasing".to_string()
            }
            "close safety popup" => "closing safety popup".to_string(),
            "unlock protective stop" => {
                state.safety_status = "NORMAL";
                "Protective stop releasing".to_string()
            }
            "restart safety" => "Restarting safety".to_string(),
            "get serial number" => "20205500000".to_string(),
            "get robot model" => "UR5".to_string(),
            "PolyscopeVersion" => "URSoftware 5.11.1.108318 (Jun 29 2021)".to_string(),
            "running" => format!("Program running: {}", state.program_state == "PLAYING"),
            "isProgramSaved" => match &state.program {
                Some(program) => format!("true {program}"),
                None => "false <unnamed>".to_string(),
            },
            "safetystatus" => format!("Safetystatus: {}", state.safety_status),
            "robotmode" => format!("Robotmode: {}", state.robot_mode),
            "programState" => match &state.program {
                Some(program) => format!("{} {program}", state.program_state),
                None => state.program_state.to_string(),
            },
            "power on" => {
                state.robot_mode = "IDLE";
                "Powering on".to_string()
            }
            "power off" => {
                state.robot_mode = "POWER_OFF";
                state.program_state = "STOPPED";
                "Powering off".to_string()
            }
            "get operational mode" => state.operational_mode.to_string(),
            other => {
                if let Some(installation) = other.strip_prefix("load installation ") {
                    format!("Loading installation: {installation}")
                } else if let Some(program) = other.strip_prefix("load ") {
                    state.program = Some(program.to_string());
                    format!("Loading program: {program}")
                } else if let Some(mode) = other.strip_prefix("set operational mode ") {
                    match mode {
                        "manual" => state.operational_mode = "MANUAL",
                        "automatic" => state.operational_mode = "AUTOMATIC",
                        _ => return format!("Failed setting operational mode: '{mode}'"),
                    }
                    format!("Operational mode '{mode}' is set")
                } else {
                    format!("could not understand: '{other}'")
                }
            }
        }
    }
}

impl DashboardLink for MockDashboard {
    fn send_and_receive(&mut self, command: &str) -> AppResult<String> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(disconnected("dashboard"));
        }
        state.sent.push(command.to_string());
        Ok(Self::reply(&mut state, command))
    }
}

// =============================================================================
// Arm
// =============================================================================

#[derive(Debug)]
struct ArmState {
    connected: bool,
    joints: JointPosition,
    pose: CartesianPose,
    moves: Vec<(TransferStep, MotionParams)>,
}

/// Simulated arm that reaches every target instantly
#[derive(Debug, Clone)]
pub struct MockArm {
    model: RobotModel,
    state: Arc<Mutex<ArmState>>,
}

impl MockArm {
    pub fn new(model: RobotModel) -> Self {
        Self::at(model, JointPosition::default())
    }

    /// Start at the given joints
    pub fn at(model: RobotModel, joints: JointPosition) -> Self {
        Self {
            model,
            state: Arc::new(Mutex::new(ArmState {
                connected: true,
                joints,
                pose: forward(model, &joints),
                moves: Vec::new(),
            })),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Absolute targets of every completed move, with the parameters used
    pub fn moves(&self) -> Vec<(TransferStep, MotionParams)> {
        lock(&self.state).moves.clone()
    }

    fn connected_state(&self) -> AppResult<MutexGuard<'_, ArmState>> {
        let state = lock(&self.state);
        if state.connected {
            Ok(state)
        } else {
            Err(disconnected("arm"))
        }
    }
}

impl ArmControl for MockArm {
    fn joints(&mut self) -> AppResult<JointPosition> {
        Ok(self.connected_state()?.joints)
    }

    fn pose(&mut self) -> AppResult<CartesianPose> {
        Ok(self.connected_state()?.pose)
    }

    fn movej(
        &mut self,
        target: JointPosition,
        params: MotionParams,
        relative: bool,
    ) -> AppResult<()> {
        let model = self.model;
        let mut state = self.connected_state()?;
        let target = if relative {
            state.joints.offset(&target)
        } else {
            target
        };
        state.joints = target;
        state.pose = forward(model, &target);
        state.moves.push((TransferStep::MoveJ(target), params));
        Ok(())
    }

    fn movel(
        &mut self,
        target: CartesianPose,
        params: MotionParams,
        relative: bool,
    ) -> AppResult<()> {
        let mut state = self.connected_state()?;
        let target = if relative {
            state.pose.offset(&target)
        } else {
            target
        };
        state.pose = target;
        state.moves.push((TransferStep::MoveL(target), params));
        Ok(())
    }
}

// =============================================================================
// Gripper
// =============================================================================

#[derive(Debug)]
struct GripperState {
    connected: bool,
    active: bool,
    position: u8,
    open: u8,
    closed: u8,
    /// Stop here while closing, as if an object were held
    object_at: Option<u8>,
    moves: Vec<(u8, u8, u8)>,
}

/// Simulated Hand-E gripper
#[derive(Debug, Clone)]
pub struct MockGripper {
    state: Arc<Mutex<GripperState>>,
}

impl Default for MockGripper {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGripper {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GripperState {
                connected: true,
                active: false,
                position: 0,
                open: 0,
                closed: 255,
                object_at: None,
                moves: Vec::new(),
            })),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Place an object between the fingers at the given position
    pub fn set_object_at(&self, position: Option<u8>) {
        lock(&self.state).object_at = position;
    }

    /// `(position, speed, force)` of every move request
    pub fn moves(&self) -> Vec<(u8, u8, u8)> {
        lock(&self.state).moves.clone()
    }

    fn connected_state(&self) -> AppResult<MutexGuard<'_, GripperState>> {
        let state = lock(&self.state);
        if state.connected {
            Ok(state)
        } else {
            Err(disconnected("gripper"))
        }
    }
}

impl GripperControl for MockGripper {
    fn is_active(&mut self) -> AppResult<bool> {
        Ok(self.connected_state()?.active)
    }

    fn activate(&mut self) -> AppResult<()> {
        self.connected_state()?.active = true;
        Ok(())
    }

    fn disconnect(&mut self) -> AppResult<()> {
        lock(&self.state).active = false;
        Ok(())
    }

    fn open_position(&self) -> u8 {
        lock(&self.state).open
    }

    fn closed_position(&self) -> u8 {
        lock(&self.state).closed
    }

    fn auto_calibrate(&mut self) -> AppResult<()> {
        let mut state = self.connected_state()?;
        state.open = 3;
        state.closed = 229;
        state.position = state.open;
        Ok(())
    }

    fn current_position(&mut self) -> AppResult<u8> {
        Ok(self.connected_state()?.position)
    }

    fn move_and_wait_for_pos(
        &mut self,
        position: u8,
        speed: u8,
        force: u8,
    ) -> AppResult<(u8, ObjectStatus)> {
        let mut state = self.connected_state()?;
        if !state.active {
            return Err(IocError::Driver("Gripper is not activated".into()));
        }
        state.moves.push((position, speed, force));

        let target = position.clamp(state.open, state.closed);
        let (reached, status) = match state.object_at {
            Some(object) if target > object && state.position <= object => {
                (object, ObjectStatus::StoppedInnerObject)
            }
            _ => (target, ObjectStatus::AtDest),
        };
        state.position = reached;
        Ok((reached, status))
    }
}
