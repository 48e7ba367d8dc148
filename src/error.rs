//! Custom error types for the IOC.
//!
//! This module defines the primary error type, `IocError`, used across the driver,
//! the PV binding layer and the PV server. Using the `thiserror` crate, it provides
//! a centralized way to describe what went wrong, from configuration problems to a
//! robot that stopped answering.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while layering the configuration sources.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine
//!   (e.g. a duplicate sample index). Caught by `IocConfig::validate`.
//! - **`Io`**: Wraps `std::io::Error` for file and socket work outside the robot links.
//! - **`RobotDisconnected`**: A robot link (dashboard, arm, gripper) is down. The
//!   driver reconnects on the next call.
//! - **`RobotCommandFailed`**: The robot answered a dashboard command with an
//!   unexpected reply. Carries the reply text.
//! - **`RobotBusy`**: Another directed operation holds the run lock.
//! - **`PvNotFound` / `PvReadOnly` / `InvalidValue`**: Rejected client requests.
//!
//! By using `#[from]`, `IocError` converts from the underlying error types, so the
//! `?` operator works throughout.

use thiserror::Error;

/// Convenience alias for results using the IOC error type.
pub type AppResult<T> = std::result::Result<T, IocError>;

#[derive(Error, Debug)]
pub enum IocError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    RobotDisconnected(String),

    #[error("Robot command failed: {0}")]
    RobotCommandFailed(String),

    #[error("{0}")]
    RobotBusy(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Motion timed out: {0}")]
    MotionTimeout(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("No such process variable: {0}")]
    PvNotFound(String),

    #[error("Process variable is read-only: {0}")]
    PvReadOnly(String),

    #[error("Invalid value for {pv}: {reason}")]
    InvalidValue { pv: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Worker task failed: {0}")]
    TaskJoin(String),
}

impl IocError {
    /// Whether the IOC can keep serving after this error.
    ///
    /// Configuration and local I/O problems are fatal at startup; everything the
    /// robot or a client can cause is not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            IocError::Config(_) | IocError::Configuration(_) | IocError::Io(_)
        )
    }

    pub(crate) fn invalid_value(pv: &str, reason: impl Into<String>) -> Self {
        IocError::InvalidValue {
            pv: pv.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for IocError {
    fn from(value: figment::Error) -> Self {
        IocError::Config(Box::new(value))
    }
}

impl From<tokio::task::JoinError> for IocError {
    fn from(value: tokio::task::JoinError) -> Self {
        IocError::TaskJoin(value.to_string())
    }
}

impl From<serde_json::Error> for IocError {
    fn from(value: serde_json::Error) -> Self {
        IocError::Protocol(value.to_string())
    }
}
