//! Dashboard server PVs
//!
//! Each PV is bound to one dashboard command and a reply pattern. Scans poll the
//! read-only status PVs; puts send program-control commands.
//!
//! Reply patterns match at the start of the reply. A reply that does not match is
//! copied to `:message` and fails the request with `RobotCommandFailed`.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::driver::DriverHandle;
use crate::error::{AppResult, IocError};
use crate::pv::{ProcessVariable, PvGroup, PvValue, ScanSpec, MAX_STRING_LENGTH};

macro_rules! dashboard_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Controller names, in index order
            pub const NAMES: &'static [&'static str] = &[$($text),+];
            const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Look up a controller name, ignoring case
            pub fn from_name(name: &str) -> Option<Self> {
                Self::NAMES
                    .iter()
                    .position(|n| n.eq_ignore_ascii_case(name.trim()))
                    .map(|i| Self::ALL[i])
            }

            pub fn name(self) -> &'static str {
                Self::NAMES[self as usize]
            }

            pub fn index(self) -> u16 {
                self as u16
            }
        }
    };
}

dashboard_enum!(
    /// Robot power/boot state reported by `robotmode`
    RobotMode {
        Unknown => "UNKNOWN",
        NoController => "NO_CONTROLLER",
        Disconnected => "DISCONNECTED",
        ConfirmSafety => "CONFIRM_SAFETY",
        Booting => "BOOTING",
        PowerOff => "POWER_OFF",
        PowerOn => "POWER_ON",
        Idle => "IDLE",
        Backdrive => "BACKDRIVE",
        Running => "RUNNING",
    }
);

dashboard_enum!(
    ProgramState {
        Unknown => "UNKNOWN",
        Stopped => "STOPPED",
        Playing => "PLAYING",
        Paused => "PAUSED",
    }
);

dashboard_enum!(
    OperationalMode {
        Manual => "MANUAL",
        Automatic => "AUTOMATIC",
        None => "NONE",
    }
);

dashboard_enum!(
    /// Served as a string PV; several names are longer than an EPICS enum string
    SafetyStatus {
        Unknown => "UNKNOWN",
        Normal => "NORMAL",
        Reduced => "REDUCED",
        ProtectiveStop => "PROTECTIVE_STOP",
        Recovery => "RECOVERY",
        SafeguardStop => "SAFEGUARD_STOP",
        SystemEmergencyStop => "SYSTEM_EMERGENCY_STOP",
        RobotEmergencyStop => "ROBOT_EMERGENCY_STOP",
        Violation => "VIOLATION",
        Fault => "FAULT",
        AutomaticModeSafeguardStop => "AUTOMATIC_MODE_SAFEGUARD_STOP",
        SystemThreePositionEnablingStop => "SYSTEM_THREE_POSITION_ENABLING_STOP",
    }
);

fn anchored(pattern: &str) -> AppResult<Regex> {
    Regex::new(&format!("^(?:{pattern})"))
        .map_err(|e| IocError::Configuration(format!("bad reply pattern {pattern}: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Convert {
    Text,
    IsTrue,
    RobotMode,
    ProgramState,
    OperationalMode,
    SafetyStatus,
}

/// A read-only PV refreshed from one command
struct Binding {
    id: &'static str,
    pv: Arc<ProcessVariable>,
    command: &'static str,
    pattern: Regex,
    convert: Convert,
}

/// A bool PV that sends a command when set and then resets
struct Trigger {
    pv: Arc<ProcessVariable>,
    command: &'static str,
    pattern: Regex,
}

/// PVs backed by the robot's dashboard server
pub struct DashboardGroup {
    driver: DriverHandle,
    period: Duration,

    scans: Vec<Binding>,
    startup: Vec<Binding>,
    triggers: Vec<Trigger>,

    program: Arc<ProcessVariable>,
    program_pattern: Regex,
    installation: Arc<ProcessVariable>,
    installation_pattern: Regex,
    power: Arc<ProcessVariable>,
    power_pattern: Regex,
    power_rbv: Arc<ProcessVariable>,
    operational_mode: Arc<ProcessVariable>,
    operational_mode_pattern: Regex,
    message: Arc<ProcessVariable>,
}

impl DashboardGroup {
    /// `prefix` is the full PV prefix, e.g. `25idAustin:dashboard`
    pub fn new(prefix: &str, driver: DriverHandle, period: Duration) -> AppResult<Self> {
        let name = |suffix: &str| format!("{prefix}{suffix}");
        let ro_string = |suffix: &str, doc: &str| {
            Arc::new(ProcessVariable::string(name(suffix), "").with_doc(doc).read_only())
        };
        let ro_bool = |suffix: &str, doc: &str| {
            Arc::new(ProcessVariable::bool(name(suffix), false).with_doc(doc).read_only())
        };
        let ro_enum = |suffix: &str, doc: &str, choices: &[&str]| {
            Arc::new(
                ProcessVariable::enumeration(name(suffix), choices, 0)
                    .with_doc(doc)
                    .read_only(),
            )
        };
        let bind = |id: &'static str,
                    pv: Arc<ProcessVariable>,
                    command: &'static str,
                    pattern: &str,
                    convert: Convert|
         -> AppResult<Binding> {
            Ok(Binding {
                id,
                pv,
                command,
                pattern: anchored(pattern)?,
                convert,
            })
        };

        let scans = vec![
            bind(
                "remote_control",
                ro_bool(":remote_control", "Whether the robot is in remote control mode"),
                "is in remote control",
                "(.+)",
                Convert::IsTrue,
            )?,
            bind(
                "program_rbv",
                ro_string(":program_rbv", "The currently loaded program"),
                "get loaded program",
                "Loaded program: (.+)",
                Convert::Text,
            )?,
            bind(
                "program_running",
                ro_bool(":program_running", "Whether a program is executing"),
                "running",
                "Program running: (true|false)",
                Convert::IsTrue,
            )?,
            bind(
                "program_saved",
                ro_bool(":program_saved", "Whether the loaded program is saved"),
                "isProgramSaved",
                "(true|false) .+",
                Convert::IsTrue,
            )?,
            bind(
                "safety_status",
                ro_string(":safety_status", "Safety status of the robot"),
                "safetystatus",
                "Safetystatus: (.+)",
                Convert::SafetyStatus,
            )?,
            bind(
                "robot_mode",
                ro_enum(":robot_mode", "Robot mode", RobotMode::NAMES),
                "robotmode",
                "Robotmode: (.+)",
                Convert::RobotMode,
            )?,
            bind(
                "program_state",
                ro_enum(":program_state", "State of the loaded program", ProgramState::NAMES),
                "programState",
                "([A-Z_]+)( .*)?",
                Convert::ProgramState,
            )?,
            bind(
                "operational_mode_rbv",
                ro_enum(
                    ":operational_mode_rbv",
                    "Operational mode readback",
                    OperationalMode::NAMES,
                ),
                "get operational mode",
                "(.+)",
                Convert::OperationalMode,
            )?,
        ];

        let startup = vec![
            bind(
                "serial_number",
                ro_string(":serial_number", "Serial number of the robot"),
                "get serial number",
                "(.+)",
                Convert::Text,
            )?,
            bind(
                "model_number",
                ro_string(":model_number", "Model of the robot"),
                "get robot model",
                "(.+)",
                Convert::Text,
            )?,
            bind(
                "software_version",
                ro_string(":software_version", "Polyscope software version"),
                "PolyscopeVersion",
                "(.+)",
                Convert::Text,
            )?,
        ];

        let trigger = |suffix: &str,
                       doc: &str,
                       command: &'static str,
                       pattern: &str|
         -> AppResult<Trigger> {
            Ok(Trigger {
                pv: Arc::new(ProcessVariable::bool(name(suffix), false).with_doc(doc)),
                command,
                pattern: anchored(pattern)?,
            })
        };
        let triggers = vec![
            trigger(":play", "Start the loaded program", "play", "Starting program")?,
            trigger(":stop", "Stop the running program", "stop", "Stopped")?,
            trigger(":pause", "Pause the running program", "pause", "Pausing program")?,
            trigger(":quit", "Close the dashboard connection", "quit", "Disconnected")?,
            trigger(":shutdown", "Shut down the robot controller", "shutdown", "Shutting down")?,
            trigger(":release_brake", "Release the robot's brakes", "brake release", "Brake releasing")?,
            trigger(
                ":close_safety_popup",
                "Close the safety popup on the teach pendant",
                "close safety popup",
                "closing safety popup",
            )?,
            trigger(
                ":unlock_protective_stop",
                "Release a protective stop",
                "unlock protective stop",
                "Protective stop releasing",
            )?,
            trigger(":restart_safety", "Restart the safety system", "restart safety", "Restarting safety")?,
        ];

        Ok(Self {
            driver,
            period,
            scans,
            startup,
            triggers,
            program: Arc::new(
                ProcessVariable::string(name(":program"), "")
                    .with_doc("Load a program by file name")
                    .with_max_length(MAX_STRING_LENGTH),
            ),
            program_pattern: anchored("Loading program: (.+)")?,
            installation: Arc::new(
                ProcessVariable::string(name(":installation"), "")
                    .with_doc("Load an installation by file name")
                    .with_max_length(MAX_STRING_LENGTH),
            ),
            installation_pattern: anchored("Loading installation: (.+)")?,
            power: Arc::new(ProcessVariable::bool(name(":power"), false).with_doc("Power the robot arm")),
            power_pattern: anchored("Powering (.+)")?,
            power_rbv: ro_bool(":power_rbv", "Whether the robot arm is powered"),
            operational_mode: Arc::new(
                ProcessVariable::enumeration(name(":operational_mode"), OperationalMode::NAMES, 2)
                    .with_doc("Requested operational mode"),
            ),
            operational_mode_pattern: anchored("Operational mode '(.+)' is set")?,
            message: Arc::new(
                ProcessVariable::string(name(":message"), "")
                    .with_doc("Most recent dashboard reply")
                    .with_max_length(MAX_STRING_LENGTH)
                    .read_only(),
            ),
        })
    }

    /// Copy a reply to `:message`, cut to the PV's length limit
    fn note(&self, reply: &str) -> AppResult<()> {
        let end = reply
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .take_while(|end| *end <= MAX_STRING_LENGTH)
            .last()
            .unwrap_or(0);
        self.message.write(PvValue::Str(reply[..end].to_string()))
    }

    /// Send a command and match the reply.
    ///
    /// Returns the first capture group, or `None` if the pattern has no groups.
    async fn request(&self, command: &str, pattern: &Regex) -> AppResult<Option<String>> {
        let reply = self.driver.send_and_receive(command).await?;
        match pattern.captures(&reply) {
            Some(caps) => Ok(caps.get(1).map(|m| m.as_str().to_string())),
            None => {
                self.note(&reply)?;
                Err(IocError::RobotCommandFailed(reply))
            }
        }
    }

    /// Put variant: disconnects become `None`, and every reply lands in `:message`
    async fn put_command(&self, command: &str, pattern: &Regex) -> AppResult<Option<String>> {
        info!(command, "Sending dashboard command");
        match self.driver.send_and_receive(command).await {
            Ok(reply) => {
                self.note(&reply)?;
                match pattern.captures(&reply) {
                    Some(caps) => Ok(caps.get(1).map(|m| m.as_str().to_string())),
                    None => Err(IocError::RobotCommandFailed(reply)),
                }
            }
            Err(e @ IocError::RobotDisconnected(_)) => {
                warn!(command, error = %e, "Dashboard command not sent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn convert(binding: &Binding, text: &str) -> AppResult<PvValue> {
        let unknown = |what: &str| IocError::RobotCommandFailed(format!("Unknown {what}: {text}"));
        Ok(match binding.convert {
            Convert::Text => PvValue::Str(text.to_string()),
            Convert::IsTrue => PvValue::Bool(text == "true"),
            Convert::RobotMode => PvValue::Enum(
                RobotMode::from_name(text)
                    .ok_or_else(|| unknown("robot mode"))?
                    .index(),
            ),
            Convert::ProgramState => PvValue::Enum(
                ProgramState::from_name(text)
                    .ok_or_else(|| unknown("program state"))?
                    .index(),
            ),
            Convert::OperationalMode => PvValue::Enum(
                OperationalMode::from_name(text)
                    .ok_or_else(|| unknown("operational mode"))?
                    .index(),
            ),
            Convert::SafetyStatus => {
                if SafetyStatus::from_name(text).is_none() {
                    warn!(status = text, "Unrecognised safety status");
                }
                PvValue::Str(text.to_string())
            }
        })
    }

    async fn refresh(&self, binding: &Binding) -> AppResult<()> {
        let text = self
            .request(binding.command, &binding.pattern)
            .await?
            .unwrap_or_default();
        let value = Self::convert(binding, &text)?;
        if binding.pv.write_if_changed(value)? {
            debug!(pv = binding.pv.name(), value = text.as_str(), "Dashboard readback changed");
        }

        if binding.convert == Convert::RobotMode {
            let powered = RobotMode::from_name(&text).is_some_and(|m| m >= RobotMode::PowerOn);
            self.power_rbv.write_if_changed(PvValue::Bool(powered))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PvGroup for DashboardGroup {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn pvs(&self) -> Vec<Arc<ProcessVariable>> {
        let mut pvs: Vec<_> = self
            .scans
            .iter()
            .chain(self.startup.iter())
            .map(|b| Arc::clone(&b.pv))
            .collect();
        pvs.extend(self.triggers.iter().map(|t| Arc::clone(&t.pv)));
        pvs.extend([
            Arc::clone(&self.program),
            Arc::clone(&self.installation),
            Arc::clone(&self.power),
            Arc::clone(&self.power_rbv),
            Arc::clone(&self.operational_mode),
            Arc::clone(&self.message),
        ]);
        pvs
    }

    fn scans(&self) -> Vec<ScanSpec> {
        self.scans
            .iter()
            .map(|b| ScanSpec::new(b.id, self.period))
            .collect()
    }

    async fn startup(&self) -> AppResult<()> {
        for binding in &self.startup {
            if let Err(e) = self.refresh(binding).await {
                warn!(pv = binding.pv.name(), error = %e, "Could not read robot information");
            }
        }
        Ok(())
    }

    async fn scan(&self, id: &str) -> AppResult<()> {
        match self.scans.iter().find(|b| b.id == id) {
            Some(binding) => self.refresh(binding).await,
            None => Ok(()),
        }
    }

    async fn put(&self, pv: &Arc<ProcessVariable>, value: PvValue) -> AppResult<Option<PvValue>> {
        if let Some(trigger) = self.triggers.iter().find(|t| Arc::ptr_eq(&t.pv, pv)) {
            if value.as_bool() {
                self.put_command(trigger.command, &trigger.pattern).await?;
            }
            return Ok(Some(PvValue::Bool(false)));
        }

        if Arc::ptr_eq(pv, &self.program) {
            self.put_command(&format!("load {value}"), &self.program_pattern)
                .await?;
            return Ok(None);
        }

        if Arc::ptr_eq(pv, &self.installation) {
            self.put_command(&format!("load installation {value}"), &self.installation_pattern)
                .await?;
            return Ok(None);
        }

        if Arc::ptr_eq(pv, &self.power) {
            let command = if value.as_bool() { "power on" } else { "power off" };
            let state = self.put_command(command, &self.power_pattern).await?;
            return Ok(Some(PvValue::Bool(state.as_deref() == Some("on"))));
        }

        if Arc::ptr_eq(pv, &self.operational_mode) {
            let mode = OperationalMode::ALL
                .get(value.as_i64() as usize)
                .copied()
                .ok_or_else(|| IocError::invalid_value(pv.name(), "unknown operational mode"))?;
            let command = format!("set operational mode {}", mode.name().to_lowercase());
            self.put_command(&command, &self.operational_mode_pattern)
                .await?;
            return Ok(None);
        }

        Err(IocError::PvReadOnly(pv.name().to_string()))
    }
}
