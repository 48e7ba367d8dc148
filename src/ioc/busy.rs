//! Global run lock and the `busy` PV
//!
//! Only one directed robot operation (a move, a gripper command, an action or a
//! sample load) may run at a time. Acquisition never waits: a second request
//! fails straight away with `RobotBusy`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{AppResult, IocError};
use crate::pv::{ProcessVariable, PvGroup, PvValue};

/// Message returned when the lock is already held
pub const BUSY_MESSAGE: &str = "Another action is already being executed on this robot.";

/// Non-blocking lock that mirrors its state into the `busy` PV
#[derive(Clone)]
pub struct RunLock {
    lock: Arc<Mutex<()>>,
    busy: Arc<ProcessVariable>,
}

impl RunLock {
    pub fn new(busy: Arc<ProcessVariable>) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            busy,
        }
    }

    pub fn try_acquire(&self) -> AppResult<RunGuard> {
        let guard = Arc::clone(&self.lock)
            .try_lock_owned()
            .map_err(|_| IocError::RobotBusy(BUSY_MESSAGE.to_string()))?;
        self.busy.write(PvValue::Bool(true))?;
        debug!("Run lock acquired");
        Ok(RunGuard {
            _guard: guard,
            busy: Arc::clone(&self.busy),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub fn busy_pv(&self) -> &Arc<ProcessVariable> {
        &self.busy
    }
}

/// Held for the duration of one operation; releases on drop
pub struct RunGuard {
    _guard: OwnedMutexGuard<()>,
    busy: Arc<ProcessVariable>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(e) = self.busy.write(PvValue::Bool(false)) {
            warn!(error = %e, "Could not clear busy flag");
        }
        debug!("Run lock released");
    }
}

/// Serves the top-level `busy` PV
pub struct BusyGroup {
    busy: Arc<ProcessVariable>,
}

impl BusyGroup {
    pub fn new(prefix: &str) -> Self {
        Self {
            busy: Arc::new(
                ProcessVariable::bool(format!("{prefix}busy"), false)
                    .with_doc("Whether the robot is executing a directed operation")
                    .read_only(),
            ),
        }
    }

    pub fn run_lock(&self) -> RunLock {
        RunLock::new(Arc::clone(&self.busy))
    }
}

#[async_trait]
impl PvGroup for BusyGroup {
    fn name(&self) -> &str {
        "busy"
    }

    fn pvs(&self) -> Vec<Arc<ProcessVariable>> {
        vec![Arc::clone(&self.busy)]
    }

    async fn put(&self, pv: &Arc<ProcessVariable>, _value: PvValue) -> AppResult<Option<PvValue>> {
        Err(IocError::PvReadOnly(pv.name().to_string()))
    }
}
