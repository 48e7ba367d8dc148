//! Process variable layer
//!
//! - `ProcessVariable`: named, typed value with watch-channel monitors
//! - `PvGroup`: put handlers and scans for a set of PVs
//! - `PvDatabase`: name lookup and the client put path
//! - `ScanScheduler`: periodic scan tasks

pub mod database;
pub mod group;
pub mod scheduler;
pub mod value;
pub mod variable;

pub use database::PvDatabase;
pub use group::{PvGroup, ScanSpec};
pub use scheduler::ScanScheduler;
pub use value::{PvType, PvValue};
pub use variable::{ProcessVariable, PvInfo, MAX_STRING_LENGTH};
