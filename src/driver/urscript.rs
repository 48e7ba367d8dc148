//! URScript motion over the secondary interface, with state from the realtime port
//!
//! Motion commands are single-line URScript programs written to port 30002. The
//! controller does not acknowledge them, so completion is detected by watching
//! the realtime stream (port 30003) until the arm is within `GOAL_THRESHOLD` of
//! the target.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::RobotConfig;
use crate::driver::dashboard::open_stream;
use crate::driver::realtime::{read_packet, RealtimeState};
use crate::driver::{ArmControl, CartesianPose, JointPosition, MotionParams};
use crate::error::{AppResult, IocError};

/// Distance below which a move counts as finished
pub const GOAL_THRESHOLD: f64 = 0.001;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type SharedState = Arc<Mutex<Option<(RealtimeState, Instant)>>>;

/// `movej([q0, ..., q5], a=ACC, v=VEL)`
pub fn movej_script(target: &JointPosition, params: MotionParams) -> String {
    format!(
        "movej([{}], a={}, v={})\n",
        join(target.as_array()),
        params.acceleration,
        params.velocity
    )
}

/// `movel(p[x, y, z, rx, ry, rz], a=ACC, v=VEL)`
pub fn movel_script(target: &CartesianPose, params: MotionParams) -> String {
    format!(
        "movel(p[{}], a={}, v={})\n",
        join(&target.to_array()),
        params.acceleration,
        params.velocity
    )
}

fn join(values: &[f64; 6]) -> String {
    values
        .iter()
        .map(|v| format!("{v:.6}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Arm link: script socket plus a background realtime reader
pub struct UrArm {
    host: String,
    script_port: u16,
    timeout: Duration,
    move_timeout: Duration,
    script: Option<TcpStream>,
    state: SharedState,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl UrArm {
    /// Start the realtime reader; the script socket opens on the first move
    pub fn connect(config: &RobotConfig) -> Self {
        let state: SharedState = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let host = config.host.clone();
            let port = config.realtime_port;
            let timeout = config.timeout;
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("ur-realtime".into())
                .spawn(move || run_state_reader(&host, port, timeout, state, stop))
                .map_err(|e| warn!(error = %e, "Failed to start realtime reader"))
                .ok()
        };

        Self {
            host: config.host.clone(),
            script_port: config.script_port,
            timeout: config.timeout,
            move_timeout: config.move_timeout,
            script: None,
            state,
            stop,
            reader,
        }
    }

    fn latest(&self) -> AppResult<RealtimeState> {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some((state, at)) if at.elapsed() <= self.timeout => Ok(state),
            _ => Err(IocError::RobotDisconnected(format!(
                "No realtime data from the robot ({}). Please connect and try running again.",
                self.host
            ))),
        }
    }

    fn send_script(&mut self, program: &str) -> AppResult<()> {
        if self.script.is_none() {
            let stream = open_stream(&self.host, self.script_port, self.timeout).map_err(|e| {
                IocError::RobotDisconnected(format!(
                    "Could not open the script interface ({}:{}): {e}",
                    self.host, self.script_port
                ))
            })?;
            self.script = Some(stream);
        }

        let Some(stream) = self.script.as_mut() else {
            return Err(IocError::Driver("script stream missing".into()));
        };

        debug!(program = program.trim_end(), "Sending URScript");
        if let Err(e) = stream.write_all(program.as_bytes()).and_then(|_| stream.flush()) {
            self.script = None;
            return Err(IocError::RobotDisconnected(format!(
                "The connection was lost to the robot ({}:{}). Please connect and try running again. ({e})",
                self.host, self.script_port
            )));
        }
        Ok(())
    }

    fn wait_until(&self, what: &str, distance: impl Fn(&RealtimeState) -> f64) -> AppResult<()> {
        let deadline = Instant::now() + self.move_timeout;
        loop {
            let state = self.latest()?;
            if distance(&state) < GOAL_THRESHOLD {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(IocError::MotionTimeout(format!(
                    "{what} did not finish within {:?}",
                    self.move_timeout
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ArmControl for UrArm {
    fn joints(&mut self) -> AppResult<JointPosition> {
        Ok(self.latest()?.joints)
    }

    fn pose(&mut self) -> AppResult<CartesianPose> {
        Ok(self.latest()?.pose)
    }

    fn movej(
        &mut self,
        target: JointPosition,
        params: MotionParams,
        relative: bool,
    ) -> AppResult<()> {
        let target = if relative {
            self.latest()?.joints.offset(&target)
        } else {
            target
        };
        self.send_script(&movej_script(&target, params))?;
        self.wait_until("movej", |s| s.joints.distance(&target))
    }

    fn movel(
        &mut self,
        target: CartesianPose,
        params: MotionParams,
        relative: bool,
    ) -> AppResult<()> {
        let target = if relative {
            self.latest()?.pose.offset(&target)
        } else {
            target
        };
        self.send_script(&movel_script(&target, params))?;
        self.wait_until("movel", |s| s.pose.distance(&target))
    }
}

impl Drop for UrArm {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            // The reader wakes up within one read timeout
            let _ = handle.join();
        }
    }
}

fn run_state_reader(
    host: &str,
    port: u16,
    timeout: Duration,
    state: SharedState,
    stop: Arc<AtomicBool>,
) {
    info!(host, port, "Realtime reader started");
    while !stop.load(Ordering::Relaxed) {
        let mut stream = match open_stream(host, port, timeout) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "Realtime connect failed");
                std::thread::sleep(RECONNECT_DELAY);
                continue;
            }
        };

        while !stop.load(Ordering::Relaxed) {
            match read_packet(&mut stream).and_then(|p| RealtimeState::parse(&p)) {
                Ok(parsed) => {
                    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                    *guard = Some((parsed, Instant::now()));
                }
                Err(e) => {
                    warn!(error = %e, "Realtime stream lost");
                    break;
                }
            }
        }
    }
    info!("Realtime reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movej_program_text() {
        let q = JointPosition::new([0.0, -1.5, 1.5, 0.0, 1.0, 0.25]);
        let params = MotionParams {
            acceleration: 0.5,
            velocity: 0.2,
        };
        assert_eq!(
            movej_script(&q, params),
            "movej([0.000000, -1.500000, 1.500000, 0.000000, 1.000000, 0.250000], a=0.5, v=0.2)\n"
        );
    }

    #[test]
    fn movel_program_uses_pose_literal() {
        let p = CartesianPose::new(0.1, 0.2, 0.3, 0.0, 3.14, 0.0);
        let script = movel_script(&p, MotionParams::default());
        assert!(script.starts_with("movel(p[0.100000, 0.200000, 0.300000,"));
        assert!(script.ends_with("a=0.5, v=0.2)\n"));
    }
}
