//! Universal Robots Dashboard Server client
//!
//! Protocol Overview:
//! - Format: ASCII command/response over TCP (port 29999)
//! - On connect the server sends one greeting line ("Connected: Universal Robots Dashboard Server")
//! - Each command is terminated by `\n` and answered with exactly one line
//! - Example: `robotmode` -> `Robotmode: POWER_OFF`

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::driver::DashboardLink;
use crate::error::{AppResult, IocError};

/// Blocking dashboard connection that reconnects on the next command after a failure
pub struct DashboardClient {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl DashboardClient {
    /// Create a client; no connection is made until `connect` or the first command
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            stream: None,
        }
    }

    /// Open the socket and consume the greeting line
    pub fn connect(&mut self) -> AppResult<()> {
        let stream = open_stream(&self.host, self.port, self.timeout)?;
        let mut reader = BufReader::new(stream);
        let mut greeting = String::new();
        reader.read_line(&mut greeting)?;
        debug!(host = %self.host, port = self.port, greeting = greeting.trim(), "Dashboard connected");
        self.stream = Some(reader);
        Ok(())
    }

    fn lost_connection(&self) -> IocError {
        IocError::RobotDisconnected(format!(
            "The connection was lost to the robot ({}:{}). Please connect and try running again.",
            self.host, self.port
        ))
    }

    fn exchange(&mut self, command: &str) -> std::io::Result<String> {
        let reader = self
            .stream
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;

        reader
            .get_mut()
            .write_all(format!("{command}\n").as_bytes())?;

        let mut reply = String::new();
        if reader.read_line(&mut reply)? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        Ok(reply.trim_end_matches(|c: char| c == '\r' || c == '\n').to_string())
    }
}

impl DashboardLink for DashboardClient {
    fn send_and_receive(&mut self, command: &str) -> AppResult<String> {
        if self.stream.is_none() {
            if let Err(e) = self.connect() {
                debug!(error = %e, "Dashboard reconnect failed");
                return Err(self.lost_connection());
            }
        }

        trace!(command, "Dashboard send");
        match self.exchange(command) {
            Ok(reply) => {
                trace!(reply = reply.as_str(), "Dashboard reply");
                Ok(reply)
            }
            Err(e) => {
                self.stream = None;
                let err = self.lost_connection();
                warn!(error = %e, "{err}");
                Err(err)
            }
        }
    }
}

/// Connect with timeouts applied to the connect, reads and writes.
pub(crate) fn open_stream(host: &str, port: u16, timeout: Duration) -> AppResult<TcpStream> {
    let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        IocError::RobotDisconnected(format!("Could not resolve robot host {host}:{port}"))
    })?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
