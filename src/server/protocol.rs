//! Request/response messages of the PV server
//!
//! One JSON object per line in each direction. Requests are tagged by `op`,
//! responses by `status`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pv::{ProcessVariable, PvInfo};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    Get { name: String },
    Put { name: String, value: Value },
    Info { name: String },
    List,
    Monitor { name: String },
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, String> {
        serde_json::from_str(line).map_err(|e| format!("Invalid request: {e}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Update,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<PvInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    fn new(status: ResponseStatus) -> Self {
        Self {
            status,
            name: None,
            value: None,
            text: None,
            info: None,
            names: None,
            message: None,
        }
    }

    /// Current value of `pv`, raw and rendered
    pub fn reading(pv: &ProcessVariable) -> Self {
        Self::reading_with(ResponseStatus::Ok, pv)
    }

    /// Monitor notification for `pv`
    pub fn update(pv: &ProcessVariable) -> Self {
        Self::reading_with(ResponseStatus::Update, pv)
    }

    fn reading_with(status: ResponseStatus, pv: &ProcessVariable) -> Self {
        Self {
            name: Some(pv.name().to_string()),
            value: Some(pv.get().to_json()),
            text: Some(pv.text()),
            ..Self::new(status)
        }
    }

    pub fn info(info: PvInfo) -> Self {
        Self {
            name: Some(info.name.clone()),
            info: Some(info),
            ..Self::new(ResponseStatus::Ok)
        }
    }

    pub fn list(names: Vec<String>) -> Self {
        Self {
            names: Some(names),
            ..Self::new(ResponseStatus::Ok)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(ResponseStatus::Error)
        }
    }

    /// One line of output, newline included
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"status":"error","message":"{e}"}}"#));
        line.push('\n');
        line
    }
}
