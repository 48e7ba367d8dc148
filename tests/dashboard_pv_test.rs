//! Dashboard PVs against the simulated dashboard server

mod common;

use austin::error::IocError;
use austin::pv::PvValue;
use common::{pv, rig, scan, startup};

#[tokio::test]
async fn trigger_sends_command_and_resets() {
    let rig = rig();
    let stored = rig
        .db
        .put(&pv("dashboard:release_brake"), PvValue::Bool(true))
        .await
        .unwrap();

    assert_eq!(stored, PvValue::Bool(false));
    assert_eq!(rig.dashboard.sent(), vec!["brake release".to_string()]);
    assert_eq!(
        rig.db.get(&pv("dashboard:message")).unwrap(),
        PvValue::from("Brake releasing")
    );
}

#[tokio::test]
async fn false_trigger_sends_nothing() {
    let rig = rig();
    let stored = rig.db.put(&pv("dashboard:stop"), PvValue::from("Off")).await.unwrap();
    assert_eq!(stored, PvValue::Bool(false));
    assert!(rig.dashboard.sent().is_empty());
}

#[tokio::test]
async fn mismatched_reply_fails_the_put() {
    let rig = rig();
    // Powered off, so the controller refuses to play
    let err = rig
        .db
        .put(&pv("dashboard:play"), PvValue::Bool(true))
        .await
        .unwrap_err();

    assert!(matches!(err, IocError::RobotCommandFailed(ref reply) if reply == "Failed to execute: play"));
    assert_eq!(
        rig.db.get(&pv("dashboard:message")).unwrap(),
        PvValue::from("Failed to execute: play")
    );
    assert_eq!(rig.db.get(&pv("dashboard:play")).unwrap(), PvValue::Bool(false));
}

#[tokio::test]
async fn power_follows_robot_mode() {
    let rig = rig();
    scan(&rig.db, "dashboard", "robot_mode").await.unwrap();
    assert_eq!(rig.db.get(&pv("dashboard:power_rbv")).unwrap(), PvValue::Bool(false));

    let stored = rig.db.put(&pv("dashboard:power"), PvValue::Bool(true)).await.unwrap();
    assert_eq!(stored, PvValue::Bool(true));
    assert_eq!(rig.dashboard.sent(), vec!["robotmode", "power on"]);

    scan(&rig.db, "dashboard", "robot_mode").await.unwrap();
    let mode = rig.db.pv(&pv("dashboard:robot_mode")).unwrap();
    assert_eq!(mode.text(), "IDLE");
    assert_eq!(rig.db.get(&pv("dashboard:power_rbv")).unwrap(), PvValue::Bool(true));

    // Now the program can start
    rig.db.put(&pv("dashboard:play"), PvValue::Bool(true)).await.unwrap();
    scan(&rig.db, "dashboard", "program_running").await.unwrap();
    scan(&rig.db, "dashboard", "program_state").await.unwrap();
    assert_eq!(rig.db.get(&pv("dashboard:program_running")).unwrap(), PvValue::Bool(true));
    assert_eq!(rig.db.pv(&pv("dashboard:program_state")).unwrap().text(), "PLAYING");
}

#[tokio::test]
async fn loading_a_program_updates_the_readback() {
    let rig = rig();
    scan(&rig.db, "dashboard", "program_rbv").await.unwrap();
    assert_eq!(rig.db.get(&pv("dashboard:program_rbv")).unwrap(), PvValue::from("austin.urp"));

    let stored = rig
        .db
        .put(&pv("dashboard:program"), PvValue::from("transfer.urp"))
        .await
        .unwrap();
    assert_eq!(stored, PvValue::from("transfer.urp"));
    assert_eq!(rig.dashboard.sent().last().unwrap(), "load transfer.urp");

    scan(&rig.db, "dashboard", "program_rbv").await.unwrap();
    assert_eq!(rig.db.get(&pv("dashboard:program_rbv")).unwrap(), PvValue::from("transfer.urp"));
}

#[tokio::test]
async fn operational_mode_is_sent_lowercase() {
    let rig = rig();
    rig.db
        .put(&pv("dashboard:operational_mode"), PvValue::from("AUTOMATIC"))
        .await
        .unwrap();
    assert_eq!(rig.dashboard.sent(), vec!["set operational mode automatic"]);

    scan(&rig.db, "dashboard", "operational_mode_rbv").await.unwrap();
    assert_eq!(
        rig.db.pv(&pv("dashboard:operational_mode_rbv")).unwrap().text(),
        "AUTOMATIC"
    );
}

#[tokio::test]
async fn startup_reads_robot_information() {
    let rig = rig();
    startup(&rig.db, "dashboard").await.unwrap();
    assert_eq!(rig.db.get(&pv("dashboard:serial_number")).unwrap(), PvValue::from("20205500000"));
    assert_eq!(rig.db.get(&pv("dashboard:model_number")).unwrap(), PvValue::from("UR5"));
    assert!(rig
        .db
        .get(&pv("dashboard:software_version"))
        .unwrap()
        .to_string()
        .starts_with("URSoftware 5.11"));
}

#[tokio::test]
async fn disconnected_dashboard() {
    let rig = rig();
    scan(&rig.db, "dashboard", "safety_status").await.unwrap();
    rig.dashboard.set_connected(false);

    // Scans fail and leave the last value alone
    let err = scan(&rig.db, "dashboard", "safety_status").await.unwrap_err();
    assert!(matches!(err, IocError::RobotDisconnected(_)));
    assert_eq!(rig.db.get(&pv("dashboard:safety_status")).unwrap(), PvValue::from("NORMAL"));

    // Puts store their "no reply" conversion
    let power = rig.db.put(&pv("dashboard:power"), PvValue::Bool(true)).await.unwrap();
    assert_eq!(power, PvValue::Bool(false));
    let program = rig
        .db
        .put(&pv("dashboard:program"), PvValue::from("other.urp"))
        .await
        .unwrap();
    assert_eq!(program, PvValue::from("other.urp"));
    let trigger = rig.db.put(&pv("dashboard:pause"), PvValue::Bool(true)).await.unwrap();
    assert_eq!(trigger, PvValue::Bool(false));
}

#[tokio::test]
async fn readbacks_reject_puts() {
    let rig = rig();
    let err = rig
        .db
        .put(&pv("dashboard:robot_mode"), PvValue::Int(1))
        .await
        .unwrap_err();
    assert!(matches!(err, IocError::PvReadOnly(_)));
}

#[tokio::test]
async fn oversized_program_name_is_rejected() {
    let rig = rig();
    let name = "p".repeat(256);
    let err = rig
        .db
        .put(&pv("dashboard:program"), PvValue::from(name.as_str()))
        .await
        .unwrap_err();
    assert!(matches!(err, IocError::InvalidValue { .. }));
    assert!(rig.dashboard.sent().is_empty());
    assert_eq!(rig.db.get(&pv("dashboard:program")).unwrap(), PvValue::from(""));

    let name = "p".repeat(255);
    rig.db
        .put(&pv("dashboard:installation"), PvValue::from(name.as_str()))
        .await
        .unwrap();
    assert_eq!(rig.dashboard.sent(), vec![format!("load installation {name}")]);
}
