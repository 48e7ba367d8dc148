//! Name → PV lookup and the client put path

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{AppResult, IocError};
use crate::pv::{ProcessVariable, PvGroup, PvValue};

struct Entry {
    pv: Arc<ProcessVariable>,
    group: usize,
}

/// All PVs served by the IOC, keyed by full name
#[derive(Default)]
pub struct PvDatabase {
    entries: HashMap<String, Entry>,
    groups: Vec<Arc<dyn PvGroup>>,
}

impl PvDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group and all of its PVs; duplicate names are rejected
    pub fn add_group(&mut self, group: Arc<dyn PvGroup>) -> AppResult<()> {
        let pvs = group.pvs();
        if let Some(pv) = pvs.iter().find(|pv| self.entries.contains_key(pv.name())) {
            return Err(IocError::Configuration(format!(
                "Duplicate PV name {}",
                pv.name()
            )));
        }

        let index = self.groups.len();
        for pv in pvs {
            let name = pv.name().to_string();
            if self.entries.insert(name.clone(), Entry { pv, group: index }).is_some() {
                return Err(IocError::Configuration(format!("Duplicate PV name {name}")));
            }
        }
        debug!(group = group.name(), "Registered PV group");
        self.groups.push(group);
        Ok(())
    }

    pub fn groups(&self) -> &[Arc<dyn PvGroup>] {
        &self.groups
    }

    pub fn pv(&self, name: &str) -> AppResult<&Arc<ProcessVariable>> {
        self.entries
            .get(name)
            .map(|e| &e.pv)
            .ok_or_else(|| IocError::PvNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> AppResult<PvValue> {
        Ok(self.pv(name)?.get())
    }

    /// Client put: check, coerce, run the group's handler, then store
    pub async fn put(&self, name: &str, value: PvValue) -> AppResult<PvValue> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| IocError::PvNotFound(name.to_string()))?;
        if entry.pv.is_read_only() {
            return Err(IocError::PvReadOnly(name.to_string()));
        }

        let value = entry.pv.coerce(value)?;
        let group = &self.groups[entry.group];
        debug!(pv = name, %value, "Put");
        let stored = group.put(&entry.pv, value.clone()).await?.unwrap_or(value);

        entry.pv.write(stored)?;
        Ok(entry.pv.get())
    }

    pub fn subscribe(&self, name: &str) -> AppResult<watch::Receiver<PvValue>> {
        Ok(self.pv(name)?.subscribe())
    }

    /// All PV names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn autosaved(&self) -> Vec<Arc<ProcessVariable>> {
        let mut pvs: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.pv.is_autosaved())
            .map(|e| Arc::clone(&e.pv))
            .collect();
        pvs.sort_by(|a, b| a.name().cmp(b.name()));
        pvs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
