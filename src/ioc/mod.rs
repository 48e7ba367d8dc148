//! The Austin IOC: every PV group wired to one robot driver
//!
//! `AustinIoc::new` builds the PV database. `start` restores autosaved values,
//! runs the startup hooks and scans, and begins periodic autosave. `shutdown`
//! stops both and writes the autosave file one last time.

pub mod actions;
pub mod alive;
pub mod autosave;
pub mod busy;
pub mod dashboard;
pub mod gripper;
pub mod samples;
pub mod status;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::IocConfig;
use crate::driver::{CartesianPose, DriverHandle, JointPosition};
use crate::error::AppResult;
use crate::pv::{PvDatabase, ScanScheduler};
use actions::{ActionGroup, ActionKind};
use alive::{AliveGroup, HeartbeatSink, UdpHeartbeat};
use autosave::Autosave;
use busy::BusyGroup;
use dashboard::DashboardGroup;
use gripper::GripperGroup;
use samples::{LoadPlan, SampleGroup};
use status::StatusGroup;

pub struct AustinIoc {
    database: Arc<PvDatabase>,
    autosave: Arc<Autosave>,
    autosave_period: Duration,
    scheduler: Option<ScanScheduler>,
    autosave_task: Option<JoinHandle<()>>,
}

impl AustinIoc {
    /// Build the IOC with a UDP heartbeat sink
    pub fn new(config: &IocConfig, driver: DriverHandle) -> AppResult<Self> {
        Self::with_heartbeat(config, driver, Arc::new(UdpHeartbeat::default()))
    }

    pub fn with_heartbeat(
        config: &IocConfig,
        driver: DriverHandle,
        heartbeat: Arc<dyn HeartbeatSink>,
    ) -> AppResult<Self> {
        let prefix = config.ioc.prefix.as_str();
        let gripper_settings = config.transfer.gripper_settings();
        let mut database = PvDatabase::new();

        let busy = BusyGroup::new(prefix);
        let run_lock = busy.run_lock();
        database.add_group(Arc::new(busy))?;

        database.add_group(Arc::new(DashboardGroup::new(
            &format!("{prefix}dashboard"),
            driver.clone(),
            config.polling.dashboard,
        )?))?;

        let status = StatusGroup::new(prefix, driver.clone(), run_lock.clone(), config.polling.status);
        let motion = status.motion();
        database.add_group(Arc::new(status))?;

        database.add_group(Arc::new(GripperGroup::new(
            &format!("{prefix}gripper"),
            driver.clone(),
            run_lock.clone(),
            config.polling.gripper,
            gripper_settings,
        )))?;

        for kind in [ActionKind::Pick, ActionKind::Place, ActionKind::Home] {
            database.add_group(Arc::new(ActionGroup::new(
                &format!("{prefix}{}:", kind.name()),
                kind,
                driver.clone(),
                run_lock.clone(),
                motion.clone(),
                gripper_settings,
            )))?;
        }

        let plan = LoadPlan {
            home: JointPosition::new(config.transfer.home_joints),
            stage: CartesianPose::from(config.transfer.stage_position),
            gripper: gripper_settings,
        };
        for slot in &config.samples {
            database.add_group(Arc::new(SampleGroup::new(
                prefix,
                slot.index,
                CartesianPose::from(slot.position),
                plan,
                driver.clone(),
                run_lock.clone(),
                motion.clone(),
            )))?;
        }

        database.add_group(Arc::new(AliveGroup::new(
            &format!("{prefix}alive"),
            &config.alive,
            heartbeat,
        )))?;

        let autosave = Arc::new(Autosave::new(&config.ioc.autosave_path, database.autosaved()));
        info!(pvs = database.len(), groups = database.groups().len(), "IOC built");

        Ok(Self {
            database: Arc::new(database),
            autosave,
            autosave_period: config.ioc.autosave_period,
            scheduler: None,
            autosave_task: None,
        })
    }

    pub fn database(&self) -> Arc<PvDatabase> {
        Arc::clone(&self.database)
    }

    pub fn autosave(&self) -> &Autosave {
        &self.autosave
    }

    /// Restore autosaved values, then start scans and periodic autosave
    pub async fn start(&mut self) {
        if let Err(e) = self.autosave.restore() {
            warn!(path = %self.autosave.path().display(), error = %e, "Could not restore autosave file");
        }
        self.scheduler = Some(ScanScheduler::start(&self.database).await);
        self.autosave_task = Some(Arc::clone(&self.autosave).spawn(self.autosave_period));
        info!("IOC started");
    }

    /// Stop scans and autosave, then save once more
    pub async fn shutdown(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        if let Some(task) = self.autosave_task.take() {
            task.abort();
        }
        if let Err(e) = self.autosave.save() {
            warn!(path = %self.autosave.path().display(), error = %e, "Final autosave failed");
        }
        info!("IOC stopped");
    }
}
