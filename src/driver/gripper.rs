//! Robotiq Hand-E gripper over the URCap socket
//!
//! Protocol Overview:
//! - Format: ASCII over TCP (port 63352)
//! - Set: `SET POS 255 SPE 64 FOR 1 GTO 1\n` -> `ack`
//! - Get: `GET STA\n` -> `STA 3`
//! - Raw positions run from 0 (open) to 255 (closed)

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::driver::dashboard::open_stream;
use crate::driver::{GripperControl, ObjectStatus};
use crate::error::{AppResult, IocError};

/// Activation
pub const ACT: &str = "ACT";
/// Go-to: start moving to the requested position
pub const GTO: &str = "GTO";
/// Automatic release
pub const ATR: &str = "ATR";
/// Automatic release direction
pub const ADR: &str = "ADR";
/// Force, 0..=255
pub const FOR: &str = "FOR";
/// Speed, 0..=255
pub const SPE: &str = "SPE";
/// Requested position on `SET`, measured position on `GET`
pub const POS: &str = "POS";
/// Status: 0 = reset, 1 = activating, 3 = active
pub const STA: &str = "STA";
/// Echo of the requested position
pub const PRE: &str = "PRE";
/// Object detection
pub const OBJ: &str = "OBJ";
/// Fault code
pub const FLT: &str = "FLT";

const STATUS_RESET: i32 = 0;
const STATUS_ACTIVE: i32 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Blocking gripper link
pub struct RobotiqGripper {
    host: String,
    port: u16,
    timeout: Duration,
    move_timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
    min_position: u8,
    max_position: u8,
}

impl RobotiqGripper {
    /// Nothing is opened until the first command
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration, move_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            move_timeout,
            stream: None,
            min_position: 0,
            max_position: 255,
        }
    }

    fn lost_connection(&self) -> IocError {
        IocError::RobotDisconnected(format!(
            "The connection was lost to the gripper ({}:{}). Please connect and try running again.",
            self.host, self.port
        ))
    }

    fn command(&mut self, line: &str) -> AppResult<String> {
        if self.stream.is_none() {
            match open_stream(&self.host, self.port, self.timeout) {
                Ok(stream) => {
                    debug!(host = %self.host, port = self.port, "Gripper connected");
                    self.stream = Some(BufReader::new(stream));
                }
                Err(e) => {
                    debug!(error = %e, "Gripper connect failed");
                    return Err(self.lost_connection());
                }
            }
        }

        let result = (|| -> std::io::Result<String> {
            let reader = self
                .stream
                .as_mut()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
            reader.get_mut().write_all(format!("{line}\n").as_bytes())?;
            let mut reply = String::new();
            if reader.read_line(&mut reply)? == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
            }
            Ok(reply.trim().to_string())
        })();

        result.map_err(|e| {
            self.stream = None;
            let err = self.lost_connection();
            warn!(error = %e, "{err}");
            err
        })
    }

    /// Set one or more variables in a single command
    pub fn set_vars(&mut self, vars: &[(&str, i32)]) -> AppResult<()> {
        let mut line = String::from("SET");
        for (name, value) in vars {
            line.push_str(&format!(" {name} {value}"));
        }
        let reply = self.command(&line)?;
        if reply == "ack" {
            Ok(())
        } else {
            Err(IocError::Driver(format!(
                "Gripper rejected '{line}': {reply}"
            )))
        }
    }

    /// Read one variable
    pub fn get_var(&mut self, name: &str) -> AppResult<i32> {
        let reply = self.command(&format!("GET {name}"))?;
        parse_get_reply(name, &reply)
    }

    fn wait_for(&mut self, what: &str, mut done: impl FnMut(&mut Self) -> AppResult<bool>) -> AppResult<()> {
        let deadline = Instant::now() + self.move_timeout;
        while !done(self)? {
            if Instant::now() >= deadline {
                return Err(IocError::MotionTimeout(format!("gripper {what}")));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    fn reset(&mut self) -> AppResult<()> {
        self.set_vars(&[(ACT, 0), (ATR, 0)])?;
        self.wait_for("reset", |g| {
            let done = g.get_var(ACT)? == 0 && g.get_var(STA)? == STATUS_RESET;
            if !done {
                g.set_vars(&[(ACT, 0), (ATR, 0)])?;
            }
            Ok(done)
        })
    }

    /// Start a move; returns the position actually requested after clipping
    pub fn move_to(&mut self, position: u8, speed: u8, force: u8) -> AppResult<u8> {
        let clipped = position.clamp(self.min_position, self.max_position);
        self.set_vars(&[
            (POS, i32::from(clipped)),
            (SPE, i32::from(speed)),
            (FOR, i32::from(force)),
            (GTO, 1),
        ])?;
        Ok(clipped)
    }
}

impl GripperControl for RobotiqGripper {
    fn is_active(&mut self) -> AppResult<bool> {
        Ok(self.get_var(STA)? == STATUS_ACTIVE)
    }

    fn activate(&mut self) -> AppResult<()> {
        info!("Activating gripper");
        self.reset()?;
        self.set_vars(&[(ACT, 1)])?;
        self.wait_for("activation", |g| {
            Ok(g.get_var(ACT)? == 1 && g.get_var(STA)? == STATUS_ACTIVE)
        })
    }

    fn disconnect(&mut self) -> AppResult<()> {
        if self.stream.take().is_some() {
            info!("Gripper disconnected");
        }
        Ok(())
    }

    fn open_position(&self) -> u8 {
        self.min_position
    }

    fn closed_position(&self) -> u8 {
        self.max_position
    }

    /// Open fully, close fully to find the closed stop, then open again and
    /// take the open stop from where the fingers actually come to rest
    fn auto_calibrate(&mut self) -> AppResult<()> {
        self.min_position = 0;
        self.max_position = 255;

        let (_, status) = self.move_and_wait_for_pos(0, 64, 1)?;
        if status != ObjectStatus::AtDest {
            return Err(IocError::Driver(format!(
                "Gripper calibration failed opening: {status:?}"
            )));
        }

        let (position, status) = self.move_and_wait_for_pos(255, 64, 1)?;
        if status != ObjectStatus::AtDest {
            return Err(IocError::Driver(format!(
                "Gripper calibration failed closing: {status:?}"
            )));
        }
        self.max_position = position;

        let (position, status) = self.move_and_wait_for_pos(0, 64, 1)?;
        if status != ObjectStatus::AtDest {
            return Err(IocError::Driver(format!(
                "Gripper calibration failed reopening: {status:?}"
            )));
        }
        self.min_position = position;

        info!(
            open = self.min_position,
            closed = self.max_position,
            "Gripper calibrated"
        );
        Ok(())
    }

    fn current_position(&mut self) -> AppResult<u8> {
        let raw = self.get_var(POS)?;
        Ok(raw.clamp(0, 255) as u8)
    }

    fn move_and_wait_for_pos(
        &mut self,
        position: u8,
        speed: u8,
        force: u8,
    ) -> AppResult<(u8, ObjectStatus)> {
        let requested = i32::from(self.move_to(position, speed, force)?);
        self.wait_for("request", |g| Ok(g.get_var(PRE)? == requested))?;

        let mut status = ObjectStatus::Moving;
        self.wait_for("move", |g| {
            status = ObjectStatus::from_code(g.get_var(OBJ)?)?;
            Ok(status != ObjectStatus::Moving)
        })?;

        let final_position = self.current_position()?;
        debug!(requested, final_position, ?status, "Gripper stopped");
        Ok((final_position, status))
    }
}

/// Parse a `VAR VAL` reply to `GET VAR`
pub fn parse_get_reply(name: &str, reply: &str) -> AppResult<i32> {
    let mut parts = reply.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(var), Some(value)) if var == name => value
            .parse()
            .map_err(|_| IocError::Driver(format!("Gripper sent a bad value: {reply}"))),
        _ => Err(IocError::Driver(format!(
            "Unexpected gripper reply to GET {name}: {reply}"
        ))),
    }
}
