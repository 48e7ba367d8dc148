//! IOC configuration using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults (the 25-ID-C installation)
//! 2. A TOML file (`config/austin.toml` by default)
//! 3. Environment variables prefixed with `AUSTIN_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use austin::config::IocConfig;
//!
//! let config = IocConfig::load()?;
//! config.validate()?;
//! println!("Serving PVs under {}", config.ioc.prefix);
//! # Ok::<(), austin::error::IocError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::GripperSettings;
use crate::error::{AppResult, IocError};
use crate::kinematics::RobotModel;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/austin.toml";

/// Top-level IOC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IocConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// PV naming, serving and persistence
    pub ioc: ServerConfig,
    /// Robot controller connection
    pub robot: RobotConfig,
    /// Scan periods
    pub polling: PollingConfig,
    /// Sample transfer geometry and gripper settings
    pub transfer: TransferConfig,
    /// Sample slots exposed as PV groups
    pub samples: Vec<SampleSlotConfig>,
    /// Alive heartbeat settings
    pub alive: AliveConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// PV server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Prefix prepended to every PV name
    pub prefix: String,
    /// Address the PV server listens on
    pub listen: String,
    /// File holding autosaved PV values
    pub autosave_path: PathBuf,
    /// How often autosaved PVs are checked for changes
    #[serde(with = "humantime_serde")]
    pub autosave_period: Duration,
}

/// Robot controller connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Controller host name or IP address
    pub host: String,
    /// Arm model, used for simulation kinematics
    pub model: RobotModel,
    /// Dashboard server port
    pub dashboard_port: u16,
    /// Robotiq gripper URCap port
    pub gripper_port: u16,
    /// Secondary interface port for URScript
    pub script_port: u16,
    /// Realtime interface port for joint/pose state
    pub realtime_port: u16,
    /// Socket I/O timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Longest time a single move may take
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,
}

/// Scan periods for each PV group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    #[serde(with = "humantime_serde")]
    pub dashboard: Duration,
    #[serde(with = "humantime_serde")]
    pub status: Duration,
    #[serde(with = "humantime_serde")]
    pub gripper: Duration,
}

/// Transfer geometry and gripper counts (0 = open, 255 = closed)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Joint position visited between pick and place, radians
    pub home_joints: [f64; 6],
    /// Cartesian pose of the sample stage (place goal)
    pub stage_position: [f64; 6],
    /// Open count used when releasing
    pub gripper_open: u16,
    /// Closed count used when gripping
    pub gripper_closed: u16,
    /// Gripper speed count
    pub gripper_speed: u16,
    /// Gripper force count
    pub gripper_force: u16,
}

fn count(value: u16) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

impl TransferConfig {
    /// Gripper counts as the driver takes them; values are range-checked by `validate`
    pub fn gripper_settings(&self) -> GripperSettings {
        GripperSettings {
            open: count(self.gripper_open),
            closed: count(self.gripper_closed),
            speed: count(self.gripper_speed),
            force: count(self.gripper_force),
        }
    }
}

/// One sample slot on the storage board
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleSlotConfig {
    /// Slot number, used in the PV prefix (`sample<index>:`)
    pub index: u32,
    /// Cartesian pick pose; all zeros means not yet calibrated
    pub position: [f64; 6],
}

/// Alive record heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliveConfig {
    /// Heartbeat server host (resolved at startup)
    pub remote_host: String,
    /// Heartbeat server UDP port
    pub remote_port: u16,
    /// Heartbeat period in seconds
    pub period: u16,
    /// Magic number identifying alive datagrams
    pub magic: u32,
    /// IOC name reported in each heartbeat
    pub ioc_name: String,
    /// Start with heartbeating enabled
    pub enabled: bool,
}

impl Default for IocConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            ioc: ServerConfig::default(),
            robot: RobotConfig::default(),
            polling: PollingConfig::default(),
            transfer: TransferConfig::default(),
            samples: vec![
                SampleSlotConfig {
                    index: 0,
                    position: [0.0; 6],
                },
                SampleSlotConfig {
                    index: 8,
                    position: [-0.06858, 0.35933, 0.29582, 2.215, -2.230, 0.009],
                },
            ],
            alive: AliveConfig::default(),
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "austin".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            prefix: "25idAustin:".to_string(),
            listen: "0.0.0.0:5064".to_string(),
            autosave_path: PathBuf::from("austin_autosave.json"),
            autosave_period: Duration::from_secs(5),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            host: "164.54.119.60".to_string(),
            model: RobotModel::Ur5e,
            dashboard_port: 29999,
            gripper_port: 63352,
            script_port: 30002,
            realtime_port: 30003,
            timeout: Duration::from_secs(5),
            move_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            dashboard: Duration::from_millis(500),
            status: Duration::from_millis(500),
            gripper: Duration::from_secs(5),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            home_joints: [-0.40457, -1.3645, 2.40279, -2.68152, -1.54601, 4.96319],
            stage_position: [0.19676, -0.42392, 0.17796, 2.909, 1.187, 0.003],
            gripper_open: 0,
            gripper_closed: 255,
            gripper_speed: 255,
            gripper_force: 50,
        }
    }
}

impl Default for AliveConfig {
    fn default() -> Self {
        Self {
            remote_host: "xapps2.xray.aps.anl.gov".to_string(),
            remote_port: 5678,
            period: 15,
            magic: 305_419_896,
            ioc_name: "25idAustin".to_string(),
            enabled: true,
        }
    }
}

impl IocConfig {
    /// Load configuration from `config/austin.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `AUSTIN_`.
    /// Example: `AUSTIN_ROBOT__HOST=192.168.1.6`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; the defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(IocConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("AUSTIN_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| IocError::Configuration(e.to_string()))
    }

    /// Parsed PV server listen address
    pub fn listen_addr(&self) -> AppResult<SocketAddr> {
        self.ioc.listen.parse().map_err(|_| {
            IocError::Configuration(format!("Invalid listen address '{}'", self.ioc.listen))
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(IocError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.ioc.prefix.trim().is_empty() {
            return Err(IocError::Configuration("PV prefix must not be empty".into()));
        }
        self.listen_addr()?;

        if self.robot.host.trim().is_empty() {
            return Err(IocError::Configuration("Robot host must not be empty".into()));
        }

        let periods = [
            ("ioc.autosave_period", self.ioc.autosave_period),
            ("robot.timeout", self.robot.timeout),
            ("robot.move_timeout", self.robot.move_timeout),
            ("polling.dashboard", self.polling.dashboard),
            ("polling.status", self.polling.status),
            ("polling.gripper", self.polling.gripper),
        ];
        for (key, period) in periods {
            if period.is_zero() {
                return Err(IocError::Configuration(format!("{key} must be non-zero")));
            }
        }
        if self.alive.period == 0 {
            return Err(IocError::Configuration("alive.period must be non-zero".into()));
        }

        let counts = [
            ("transfer.gripper_open", self.transfer.gripper_open),
            ("transfer.gripper_closed", self.transfer.gripper_closed),
            ("transfer.gripper_speed", self.transfer.gripper_speed),
            ("transfer.gripper_force", self.transfer.gripper_force),
        ];
        for (key, count) in counts {
            if count > 255 {
                return Err(IocError::Configuration(format!(
                    "{key} is {count}, must be 0-255"
                )));
            }
        }

        let mut indices = HashSet::new();
        for slot in &self.samples {
            if !indices.insert(slot.index) {
                return Err(IocError::Configuration(format!(
                    "Duplicate sample index: {}",
                    slot.index
                )));
            }
        }

        Ok(())
    }
}
