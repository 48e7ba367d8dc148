//! PV values and type coercion
//!
//! Client puts arrive loosely typed (JSON numbers, strings, `"On"`/`"Off"`). Every
//! value is coerced to the PV's declared type before it reaches a put handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Declared data type of a process variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PvType {
    Bool,
    Enum,
    Int,
    Float,
    String,
}

/// Current value of a process variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PvValue {
    Bool(bool),
    Enum(u16),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PvValue {
    pub fn pv_type(&self) -> PvType {
        match self {
            PvValue::Bool(_) => PvType::Bool,
            PvValue::Enum(_) => PvType::Enum,
            PvValue::Int(_) => PvType::Int,
            PvValue::Float(_) => PvType::Float,
            PvValue::Str(_) => PvType::String,
        }
    }

    /// Interpret a JSON value from a client without a target type
    pub fn from_json(value: &Value) -> Result<PvValue, String> {
        match value {
            Value::Bool(b) => Ok(PvValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(PvValue::Int(i)),
                None => n
                    .as_f64()
                    .map(PvValue::Float)
                    .ok_or_else(|| format!("unsupported number {n}")),
            },
            Value::String(s) => Ok(PvValue::Str(s.clone())),
            other => Err(format!("unsupported value {other}")),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PvValue::Bool(b) => Value::Bool(*b),
            PvValue::Enum(i) => Value::from(*i),
            PvValue::Int(i) => Value::from(*i),
            PvValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            PvValue::Str(s) => Value::String(s.clone()),
        }
    }

    /// Convert to `target`, using `choices` for enum names
    pub fn coerce(self, target: PvType, choices: &[String]) -> Result<PvValue, String> {
        match target {
            PvType::Bool => self.coerce_bool().map(PvValue::Bool),
            PvType::Enum => self.coerce_enum(choices).map(PvValue::Enum),
            PvType::Int => self.coerce_int().map(PvValue::Int),
            PvType::Float => self.coerce_float().map(PvValue::Float),
            PvType::String => Ok(PvValue::Str(match self {
                PvValue::Str(s) => s,
                other => other.to_string(),
            })),
        }
    }

    fn coerce_bool(self) -> Result<bool, String> {
        match self {
            PvValue::Bool(b) => Ok(b),
            PvValue::Int(0) | PvValue::Enum(0) => Ok(false),
            PvValue::Int(1) | PvValue::Enum(1) => Ok(true),
            PvValue::Float(f) if f == 0.0 => Ok(false),
            PvValue::Float(f) if f == 1.0 => Ok(true),
            PvValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => Ok(true),
                "off" | "false" | "0" => Ok(false),
                _ => Err(format!("'{s}' is not On/Off")),
            },
            other => Err(format!("{other} is not On/Off")),
        }
    }

    fn coerce_enum(self, choices: &[String]) -> Result<u16, String> {
        let index = match self {
            PvValue::Enum(i) => i64::from(i),
            PvValue::Int(i) => i,
            PvValue::Bool(b) => i64::from(b),
            PvValue::Float(f) if f.fract() == 0.0 => f as i64,
            PvValue::Str(s) => {
                let wanted = s.trim();
                match choices.iter().position(|c| c.eq_ignore_ascii_case(wanted)) {
                    Some(i) => i as i64,
                    None => wanted
                        .parse::<i64>()
                        .map_err(|_| format!("'{s}' is not one of {choices:?}"))?,
                }
            }
            other => return Err(format!("{other} is not an enum index")),
        };
        if index < 0 || index as usize >= choices.len() {
            return Err(format!("index {index} outside 0..{}", choices.len()));
        }
        Ok(index as u16)
    }

    fn coerce_int(self) -> Result<i64, String> {
        match self {
            PvValue::Int(i) => Ok(i),
            PvValue::Enum(i) => Ok(i64::from(i)),
            PvValue::Bool(b) => Ok(i64::from(b)),
            PvValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(f as i64),
            PvValue::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("'{s}' is not an integer")),
            other => Err(format!("{other} is not an integer")),
        }
    }

    fn coerce_float(self) -> Result<f64, String> {
        let f = match self {
            PvValue::Float(f) => f,
            PvValue::Int(i) => i as f64,
            PvValue::Enum(i) => f64::from(i),
            PvValue::Bool(b) => f64::from(u8::from(b)),
            PvValue::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("'{s}' is not a number"))?,
        };
        if f.is_finite() {
            Ok(f)
        } else {
            Err(format!("{f} is not finite"))
        }
    }

    // Lenient accessors for IOC-side reads of a PV whose type is known

    pub fn as_bool(&self) -> bool {
        match self {
            PvValue::Bool(b) => *b,
            PvValue::Enum(i) => *i != 0,
            PvValue::Int(i) => *i != 0,
            PvValue::Float(f) => *f != 0.0,
            PvValue::Str(s) => s.eq_ignore_ascii_case("on") || s.eq_ignore_ascii_case("true"),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            PvValue::Bool(b) => f64::from(u8::from(*b)),
            PvValue::Enum(i) => f64::from(*i),
            PvValue::Int(i) => *i as f64,
            PvValue::Float(f) => *f,
            PvValue::Str(s) => s.trim().parse().unwrap_or(0.0),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            PvValue::Bool(b) => i64::from(*b),
            PvValue::Enum(i) => i64::from(*i),
            PvValue::Int(i) => *i,
            PvValue::Float(f) => f.round() as i64,
            PvValue::Str(s) => s.trim().parse().unwrap_or(0),
        }
    }

    /// Human-readable text: `On`/`Off`, enum names, fixed precision floats
    pub fn display(&self, choices: &[String], precision: Option<u16>) -> String {
        match (self, precision) {
            (PvValue::Bool(true), _) => "On".to_string(),
            (PvValue::Bool(false), _) => "Off".to_string(),
            (PvValue::Enum(i), _) => choices
                .get(usize::from(*i))
                .cloned()
                .unwrap_or_else(|| i.to_string()),
            (PvValue::Float(f), Some(p)) => format!("{f:.*}", usize::from(p)),
            (other, _) => other.to_string(),
        }
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Bool(b) => write!(f, "{b}"),
            PvValue::Enum(i) => write!(f, "{i}"),
            PvValue::Int(i) => write!(f, "{i}"),
            PvValue::Float(x) => write!(f, "{x}"),
            PvValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for PvValue {
    fn from(value: bool) -> Self {
        PvValue::Bool(value)
    }
}

impl From<f64> for PvValue {
    fn from(value: f64) -> Self {
        PvValue::Float(value)
    }
}

impl From<i64> for PvValue {
    fn from(value: i64) -> Self {
        PvValue::Int(value)
    }
}

impl From<&str> for PvValue {
    fn from(value: &str) -> Self {
        PvValue::Str(value.to_string())
    }
}

impl From<String> for PvValue {
    fn from(value: String) -> Self {
        PvValue::Str(value)
    }
}
