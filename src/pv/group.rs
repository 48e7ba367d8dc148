//! PV groups
//!
//! A group owns a set of PVs and the behaviour behind them: what happens when a
//! client writes one, and which periodic scans refresh them.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppResult;
use crate::pv::{ProcessVariable, PvValue};

/// One periodic scan declared by a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSpec {
    pub id: &'static str,
    pub period: Duration,
}

impl ScanSpec {
    pub const fn new(id: &'static str, period: Duration) -> Self {
        Self { id, period }
    }
}

#[async_trait]
pub trait PvGroup: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Every PV the group owns
    fn pvs(&self) -> Vec<Arc<ProcessVariable>>;

    fn scans(&self) -> Vec<ScanSpec> {
        Vec::new()
    }

    /// Runs once before any scan starts
    async fn startup(&self) -> AppResult<()> {
        Ok(())
    }

    async fn scan(&self, _id: &str) -> AppResult<()> {
        Ok(())
    }

    /// Handle a client put on one of this group's PVs.
    ///
    /// `value` is already coerced to the PV's type. Return `Some(v)` to store `v`
    /// instead of the written value. An error leaves the PV unchanged.
    async fn put(&self, pv: &Arc<ProcessVariable>, value: PvValue) -> AppResult<Option<PvValue>>;
}
