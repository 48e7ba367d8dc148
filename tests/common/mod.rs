//! Shared fixtures: an IOC wired to simulated robot links

#![allow(dead_code)]

use austin::config::IocConfig;
use austin::driver::mock::{MockArm, MockDashboard, MockGripper};
use austin::driver::{DriverHandle, RobotDriver};
use austin::error::AppResult;
use austin::ioc::alive::RecordingSink;
use austin::ioc::AustinIoc;
use austin::kinematics::RobotModel;
use austin::pv::PvDatabase;
use std::sync::Arc;
use tempfile::TempDir;

pub const PREFIX: &str = "test:";

pub struct Rig {
    pub ioc: AustinIoc,
    pub db: Arc<PvDatabase>,
    pub dashboard: MockDashboard,
    pub arm: MockArm,
    pub gripper: MockGripper,
    pub heartbeat: Arc<RecordingSink>,
    pub config: IocConfig,
    pub dir: TempDir,
}

pub fn config(dir: &TempDir) -> IocConfig {
    let mut config = IocConfig::default();
    config.ioc.prefix = PREFIX.to_string();
    config.ioc.autosave_path = dir.path().join("autosave.json");
    config.alive.remote_host = String::new();
    config.alive.enabled = false;
    config
}

pub fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    rig_with(config(&dir), dir)
}

pub fn rig_with(config: IocConfig, dir: TempDir) -> Rig {
    let dashboard = MockDashboard::new();
    let arm = MockArm::new(RobotModel::Ur5e);
    let gripper = MockGripper::new();
    let driver = RobotDriver::new(
        Box::new(dashboard.clone()),
        Box::new(arm.clone()),
        Box::new(gripper.clone()),
    );
    let heartbeat = Arc::new(RecordingSink::default());
    let ioc = AustinIoc::with_heartbeat(&config, DriverHandle::new(driver), heartbeat.clone()).unwrap();
    let db = ioc.database();
    Rig {
        ioc,
        db,
        dashboard,
        arm,
        gripper,
        heartbeat,
        config,
        dir,
    }
}

pub fn pv(name: &str) -> String {
    format!("{PREFIX}{name}")
}

/// Run one scan of `group` by hand
pub async fn scan(db: &PvDatabase, group: &str, id: &str) -> AppResult<()> {
    let group = db
        .groups()
        .iter()
        .find(|g| g.name() == group)
        .unwrap_or_else(|| panic!("no group {group}"));
    group.scan(id).await
}

pub async fn startup(db: &PvDatabase, group: &str) -> AppResult<()> {
    let group = db
        .groups()
        .iter()
        .find(|g| g.name() == group)
        .unwrap_or_else(|| panic!("no group {group}"));
    group.startup().await
}
