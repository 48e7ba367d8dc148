//! Gripper PVs
//!
//! Positions are raw counts (0 = open, 255 = closed). `.VEL` and `.FRC` are
//! fractions of the gripper's maximum speed and force.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::driver::{DriverHandle, GripperSettings};
use crate::error::{AppResult, IocError};
use crate::ioc::busy::RunLock;
use crate::pv::{ProcessVariable, PvGroup, PvValue, ScanSpec};

const SCAN_STATE: &str = "state";

/// Fraction in 0..=1 to a raw 0..=255 count
pub fn fraction_to_count(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn position_to_count(position: f64) -> u8 {
    position.round().clamp(0.0, 255.0) as u8
}

pub struct GripperGroup {
    driver: DriverHandle,
    run_lock: RunLock,
    period: Duration,
    settings: GripperSettings,

    act: Arc<ProcessVariable>,
    cls: Arc<ProcessVariable>,
    opn: Arc<ProcessVariable>,
    cal: Arc<ProcessVariable>,
    rbv: Arc<ProcessVariable>,
    val: Arc<ProcessVariable>,
    vel: Arc<ProcessVariable>,
    frc: Arc<ProcessVariable>,
}

impl GripperGroup {
    /// `prefix` is the full PV prefix, e.g. `25idAustin:gripper`
    pub fn new(
        prefix: &str,
        driver: DriverHandle,
        run_lock: RunLock,
        period: Duration,
        settings: GripperSettings,
    ) -> Self {
        let name = |suffix: &str| format!("{prefix}{suffix}");
        Self {
            driver,
            run_lock,
            period,
            settings,
            act: Arc::new(
                ProcessVariable::bool(name(".ACT"), false).with_doc("Whether the gripper is activated"),
            ),
            cls: Arc::new(
                ProcessVariable::float(name(".CLS"), f64::from(settings.closed))
                    .with_doc("Calibrated 'closed' position")
                    .read_only(),
            ),
            opn: Arc::new(
                ProcessVariable::float(name(".OPN"), f64::from(settings.open))
                    .with_doc("Calibrated 'open' position")
                    .read_only(),
            ),
            cal: Arc::new(
                ProcessVariable::bool(name(".CAL"), false)
                    .with_doc("Calibrate the gripper's open/closed range"),
            ),
            rbv: Arc::new(
                ProcessVariable::float(name(".RBV"), 0.0)
                    .with_doc("Current gripper position readback value")
                    .read_only(),
            ),
            val: Arc::new(ProcessVariable::float(name(".VAL"), 0.0).with_doc("Desired position set point")),
            vel: Arc::new(
                ProcessVariable::float(name(".VEL"), f64::from(settings.speed) / 255.0)
                    .with_doc("How fast the gripper should move (0-1)")
                    .with_precision(2)
                    .autosaved(),
            ),
            frc: Arc::new(
                ProcessVariable::float(name(".FRC"), f64::from(settings.force) / 255.0)
                    .with_doc("How much force the gripper may apply (0-1)")
                    .with_precision(2)
                    .autosaved(),
            ),
        }
    }

    async fn refresh(&self) -> AppResult<()> {
        let (active, open, closed, position) = self
            .driver
            .call(|d| {
                Ok((
                    d.gripper_is_active()?,
                    d.gripper_open_position()?,
                    d.gripper_closed_position()?,
                    d.gripper_position()?,
                ))
            })
            .await?;
        self.act.write_if_changed(PvValue::Bool(active))?;
        self.opn.write_if_changed(PvValue::Float(f64::from(open)))?;
        self.cls.write_if_changed(PvValue::Float(f64::from(closed)))?;
        self.rbv.write_if_changed(PvValue::Float(f64::from(position)))?;
        Ok(())
    }
}

#[async_trait]
impl PvGroup for GripperGroup {
    fn name(&self) -> &str {
        "gripper"
    }

    fn pvs(&self) -> Vec<Arc<ProcessVariable>> {
        [
            &self.act, &self.cls, &self.opn, &self.cal, &self.rbv, &self.val, &self.vel, &self.frc,
        ]
        .into_iter()
        .map(Arc::clone)
        .collect()
    }

    fn scans(&self) -> Vec<ScanSpec> {
        vec![ScanSpec::new(SCAN_STATE, self.period)]
    }

    async fn scan(&self, _id: &str) -> AppResult<()> {
        self.refresh().await
    }

    async fn put(&self, pv: &Arc<ProcessVariable>, value: PvValue) -> AppResult<Option<PvValue>> {
        if Arc::ptr_eq(pv, &self.act) {
            let _guard = self.run_lock.try_acquire()?;
            if value.as_bool() {
                info!("Activating the gripper");
                let settings = self.settings;
                let active = self
                    .driver
                    .call(move |d| {
                        d.activate_gripper(settings)?;
                        d.gripper_is_active()
                    })
                    .await?;
                return Ok(Some(PvValue::Bool(active)));
            }
            info!("Deactivating the gripper");
            self.driver.call(|d| d.disconnect_gripper()).await?;
            return Ok(Some(PvValue::Bool(false)));
        }

        if Arc::ptr_eq(pv, &self.cal) {
            if value.as_bool() {
                let _guard = self.run_lock.try_acquire()?;
                info!("Starting gripper calibration");
                let (open, closed) = self
                    .driver
                    .call(|d| {
                        d.calibrate_gripper()?;
                        Ok((d.gripper_open_position()?, d.gripper_closed_position()?))
                    })
                    .await?;
                self.opn.write(PvValue::Float(f64::from(open)))?;
                self.cls.write(PvValue::Float(f64::from(closed)))?;
            }
            return Ok(Some(PvValue::Bool(false)));
        }

        if Arc::ptr_eq(pv, &self.val) {
            let _guard = self.run_lock.try_acquire()?;
            let position = position_to_count(value.as_f64());
            let speed = fraction_to_count(self.vel.get().as_f64());
            let force = fraction_to_count(self.frc.get().as_f64());
            let (reached, status) = self
                .driver
                .call(move |d| d.gripper_move(position, speed, force))
                .await?;
            info!(position, reached, ?status, "Gripper moved");
            self.rbv.write(PvValue::Float(f64::from(reached)))?;
            return Ok(None);
        }

        if Arc::ptr_eq(pv, &self.vel) || Arc::ptr_eq(pv, &self.frc) {
            let fraction = value.as_f64();
            if !(0.0..=1.0).contains(&fraction) {
                return Err(IocError::invalid_value(pv.name(), "must be between 0 and 1"));
            }
            return Ok(None);
        }

        Err(IocError::PvReadOnly(pv.name().to_string()))
    }
}
