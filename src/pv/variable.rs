//! ProcessVariable - a named, typed, observable control point
//!
//! The current value lives in a `tokio::sync::watch` channel, so any number of
//! monitors can follow it independently:
//!
//! ```rust
//! use austin::pv::{ProcessVariable, PvValue};
//!
//! let velocity = ProcessVariable::float("25idAustin:velocity", 0.2)
//!     .with_doc("Velocity used for every move")
//!     .with_precision(3)
//!     .autosaved();
//!
//! let mut rx = velocity.subscribe();
//! velocity.write(PvValue::Float(0.3)).unwrap();
//! assert!(rx.has_changed().unwrap());
//! assert_eq!(rx.borrow_and_update().as_f64(), 0.3);
//! ```

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{AppResult, IocError};
use crate::pv::{PvType, PvValue};

/// Longest value accepted by the free-text string PVs
pub const MAX_STRING_LENGTH: usize = 255;

/// Process variable with metadata and an observable value
#[derive(Debug)]
pub struct ProcessVariable {
    /// Full name including the IOC prefix
    name: String,

    pv_type: PvType,

    /// Documentation string (shown to clients by `info`)
    doc: String,

    /// Rejects client puts; IOC-side `write` still works
    read_only: bool,

    precision: Option<u16>,
    units: Option<String>,
    enum_strings: Vec<String>,
    max_length: Option<usize>,

    /// Restored at startup and saved on change
    autosave: bool,

    value_tx: watch::Sender<PvValue>,
    value_rx: watch::Receiver<PvValue>,
}

/// Client-facing description of a PV
#[derive(Debug, Clone, Serialize)]
pub struct PvInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub pv_type: PvType,
    pub read_only: bool,
    pub doc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_strings: Vec<String>,
}

impl ProcessVariable {
    /// Create a PV whose type follows the initial value
    pub fn new(name: impl Into<String>, initial: PvValue) -> Self {
        let pv_type = initial.pv_type();
        let (value_tx, value_rx) = watch::channel(initial);
        Self {
            name: name.into(),
            pv_type,
            doc: String::new(),
            read_only: false,
            precision: None,
            units: None,
            enum_strings: Vec::new(),
            max_length: None,
            autosave: false,
            value_tx,
            value_rx,
        }
    }

    pub fn bool(name: impl Into<String>, initial: bool) -> Self {
        Self::new(name, PvValue::Bool(initial))
    }

    pub fn float(name: impl Into<String>, initial: f64) -> Self {
        Self::new(name, PvValue::Float(initial))
    }

    pub fn int(name: impl Into<String>, initial: i64) -> Self {
        Self::new(name, PvValue::Int(initial))
    }

    pub fn string(name: impl Into<String>, initial: impl Into<String>) -> Self {
        Self::new(name, PvValue::Str(initial.into()))
    }

    /// Enumerated PV; `choices` gives the name of each index
    pub fn enumeration<S: AsRef<str>>(name: impl Into<String>, choices: &[S], initial: u16) -> Self {
        let mut pv = Self::new(name, PvValue::Enum(initial));
        pv.enum_strings = choices.iter().map(|c| c.as_ref().to_string()).collect();
        pv
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_precision(mut self, precision: u16) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn autosaved(mut self) -> Self {
        self.autosave = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pv_type(&self) -> PvType {
        self.pv_type
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_autosaved(&self) -> bool {
        self.autosave
    }

    pub fn enum_strings(&self) -> &[String] {
        &self.enum_strings
    }

    pub fn info(&self) -> PvInfo {
        PvInfo {
            name: self.name.clone(),
            pv_type: self.pv_type,
            read_only: self.read_only,
            doc: self.doc.clone(),
            units: self.units.clone(),
            precision: self.precision,
            enum_strings: self.enum_strings.clone(),
        }
    }

    /// Convert a value to this PV's type without storing it
    pub fn coerce(&self, value: PvValue) -> AppResult<PvValue> {
        let value = value
            .coerce(self.pv_type, &self.enum_strings)
            .map_err(|reason| IocError::invalid_value(&self.name, reason))?;
        if let (PvValue::Str(s), Some(max)) = (&value, self.max_length) {
            if s.len() > max {
                return Err(IocError::invalid_value(
                    &self.name,
                    format!("string longer than {max} characters"),
                ));
            }
        }
        Ok(value)
    }

    /// Get current value
    pub fn get(&self) -> PvValue {
        self.value_rx.borrow().clone()
    }

    /// Current value rendered for people
    pub fn text(&self) -> String {
        self.get().display(&self.enum_strings, self.precision)
    }

    /// Store a value and notify monitors. Ignores the read-only flag.
    pub fn write(&self, value: PvValue) -> AppResult<()> {
        let value = self.coerce(value)?;
        self.value_tx.send_replace(value);
        Ok(())
    }

    /// Like `write`, but monitors are only notified if the value differs.
    ///
    /// Returns whether the value changed.
    pub fn write_if_changed(&self, value: PvValue) -> AppResult<bool> {
        let value = self.coerce(value)?;
        Ok(self.value_tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        }))
    }

    /// Subscribe to value changes
    pub fn subscribe(&self) -> watch::Receiver<PvValue> {
        self.value_rx.clone()
    }
}
