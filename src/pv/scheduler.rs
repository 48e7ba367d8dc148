//! Periodic scans
//!
//! Every declared scan runs as its own task on the current runtime. A scan that
//! fails is logged and tried again on the next tick.

use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::IocError;
use crate::pv::{PvDatabase, PvGroup, ScanSpec};

/// Owns the scan tasks; dropping it aborts them
pub struct ScanScheduler {
    tasks: JoinSet<()>,
}

impl ScanScheduler {
    /// Run every group's startup hook, then start all scans
    pub async fn start(database: &PvDatabase) -> Self {
        let hooks = database.groups().iter().map(|group| async move {
            if let Err(e) = group.startup().await {
                warn!(group = group.name(), error = %e, "Startup hook failed");
            }
        });
        join_all(hooks).await;

        let mut tasks = JoinSet::new();
        for group in database.groups() {
            for spec in group.scans() {
                tasks.spawn(run_scan(Arc::clone(group), spec));
            }
        }
        info!(scans = tasks.len(), "Scan tasks started");
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort all scans and wait for them to finish
    pub async fn shutdown(&mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        debug!("Scan tasks stopped");
    }
}

async fn run_scan(group: Arc<dyn PvGroup>, spec: ScanSpec) {
    let mut ticker = tokio::time::interval(spec.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match group.scan(spec.id).await {
            Ok(()) => {}
            Err(e @ IocError::RobotDisconnected(_)) => {
                debug!(group = group.name(), scan = spec.id, error = %e, "Scan skipped")
            }
            Err(e) if e.is_recoverable() => {
                warn!(group = group.name(), scan = spec.id, error = %e, "Scan failed")
            }
            Err(e) => error!(group = group.name(), scan = spec.id, error = %e, "Scan failed, check the IOC host"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::pv::{ProcessVariable, PvValue};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counter {
        count: Arc<ProcessVariable>,
        started: AtomicUsize,
        fail_every_other: bool,
    }

    #[async_trait]
    impl PvGroup for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn pvs(&self) -> Vec<Arc<ProcessVariable>> {
            vec![Arc::clone(&self.count)]
        }

        fn scans(&self) -> Vec<ScanSpec> {
            vec![ScanSpec::new("tick", Duration::from_millis(10))]
        }

        async fn startup(&self) -> AppResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn scan(&self, _id: &str) -> AppResult<()> {
            let next = self.count.get().as_i64() + 1;
            self.count.write(PvValue::Int(next))?;
            if self.fail_every_other && next % 2 == 0 {
                return Err(IocError::Driver("flaky".into()));
            }
            if self.fail_every_other && next % 3 == 0 {
                let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
                return Err(IocError::from(io));
            }
            Ok(())
        }

        async fn put(&self, _pv: &Arc<ProcessVariable>, _value: PvValue) -> AppResult<Option<PvValue>> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_scans_keep_running() {
        let group = Arc::new(Counter {
            count: Arc::new(ProcessVariable::int("count", 0)),
            started: AtomicUsize::new(0),
            fail_every_other: true,
        });
        let mut db = PvDatabase::new();
        db.add_group(group.clone()).unwrap();

        let mut scheduler = ScanScheduler::start(&db).await;
        assert_eq!(scheduler.len(), 1);
        assert_eq!(group.started.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(group.count.get().as_i64() >= 5);

        scheduler.shutdown().await;
        let stopped_at = group.count.get();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(group.count.get(), stopped_at);
        assert!(scheduler.is_empty());
    }
}
