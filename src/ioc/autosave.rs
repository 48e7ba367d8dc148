//! Persist tunable PVs across restarts
//!
//! Autosaved PVs (motion settings, gripper speed and force) are written to a JSON
//! object keyed by PV name. The file is restored once at startup, rewritten
//! whenever a value changes, and written one last time at shutdown.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::pv::{ProcessVariable, PvValue};

pub struct Autosave {
    path: PathBuf,
    pvs: Vec<Arc<ProcessVariable>>,
    last_saved: Mutex<Option<Map<String, Value>>>,
}

impl Autosave {
    pub fn new(path: impl Into<PathBuf>, pvs: Vec<Arc<ProcessVariable>>) -> Self {
        Self {
            path: path.into(),
            pvs,
            last_saved: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current values of every autosaved PV
    pub fn snapshot(&self) -> Map<String, Value> {
        self.pvs
            .iter()
            .map(|pv| (pv.name().to_string(), pv.get().to_json()))
            .collect()
    }

    /// Load saved values into the PVs, returning how many were applied.
    ///
    /// A missing file restores nothing. Entries for unknown PVs and values that no
    /// longer fit their PV are skipped.
    pub fn restore(&self) -> AppResult<usize> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No autosave file");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let saved: Map<String, Value> = serde_json::from_str(&text)?;

        let mut restored = 0;
        for pv in &self.pvs {
            let Some(raw) = saved.get(pv.name()) else {
                continue;
            };
            match PvValue::from_json(raw).and_then(|v| pv.coerce(v).map_err(|e| e.to_string())) {
                Ok(value) => {
                    pv.write(value)?;
                    restored += 1;
                }
                Err(reason) => warn!(pv = pv.name(), %reason, "Skipping autosaved value"),
            }
        }

        *self.last_saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(self.snapshot());
        info!(path = %self.path.display(), restored, "Restored autosaved PVs");
        Ok(restored)
    }

    /// Write all values unconditionally
    pub fn save(&self) -> AppResult<()> {
        let snapshot = self.snapshot();
        self.write(&snapshot)?;
        *self.last_saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        Ok(())
    }

    /// Write only when something changed since the last save or restore
    pub fn save_if_changed(&self) -> AppResult<bool> {
        let snapshot = self.snapshot();
        let mut last = self.last_saved.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&snapshot) {
            return Ok(false);
        }
        self.write(&snapshot)?;
        *last = Some(snapshot);
        Ok(true)
    }

    fn write(&self, snapshot: &Map<String, Value>) -> AppResult<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Autosave written");
        Ok(())
    }

    /// Check for changes every `period` until the task is aborted
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.save_if_changed() {
                    warn!(path = %self.path.display(), error = %e, "Autosave failed");
                }
            }
        })
    }
}
