//! Arm, gripper, action and sample PVs against simulated links

mod common;

use austin::driver::transfer::TransferStep;
use austin::driver::{JointPosition, MotionParams};
use austin::error::IocError;
use austin::ioc::actions::{STATUS_RUNNING, STATUS_SUCCESS};
use austin::ioc::busy::BUSY_MESSAGE;
use austin::pv::PvValue;
use common::{pv, rig, rig_with, scan, Rig};

async fn activate_gripper(rig: &Rig) {
    let stored = rig.db.put(&pv("gripper.ACT"), PvValue::Bool(true)).await.unwrap();
    assert_eq!(stored, PvValue::Bool(true));
}

async fn set_args(rig: &Rig, action: &str, joints: [f64; 6]) {
    for (axis, value) in ["i", "j", "k", "l", "m", "n"].iter().zip(joints) {
        rig.db
            .put(&pv(&format!("{action}:{axis}")), PvValue::Float(value))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn joint_put_moves_from_readbacks() {
    let rig = rig();
    scan(&rig.db, "status", "joints").await.unwrap();

    rig.db.put(&pv("j"), PvValue::Float(-1.2)).await.unwrap();

    let moves = rig.arm.moves();
    assert_eq!(moves.len(), 1);
    assert_eq!(
        moves[0],
        (
            TransferStep::MoveJ(JointPosition::new([0.0, -1.2, 0.0, 0.0, 0.0, 0.0])),
            MotionParams::default()
        )
    );
    assert_eq!(rig.db.get(&pv("j.RBV")).unwrap(), PvValue::Float(-1.2));
    assert_eq!(rig.db.get(&pv("busy")).unwrap(), PvValue::Bool(false));
}

#[tokio::test]
async fn pose_put_keeps_other_axes() {
    let rig = rig();
    scan(&rig.db, "status", "pose").await.unwrap();
    let before_y = rig.db.get(&pv("y.RBV")).unwrap().as_f64();

    rig.db.put(&pv("x"), PvValue::Float(0.3)).await.unwrap();

    let Some((TransferStep::MoveL(target), _)) = rig.arm.moves().last().copied() else {
        panic!("expected a linear move");
    };
    assert_eq!(target.x, 0.3);
    assert_eq!(target.y, before_y);
    assert_eq!(rig.db.get(&pv("x.RBV")).unwrap(), PvValue::Float(0.3));
}

#[tokio::test]
async fn motion_settings_apply_and_validate() {
    let rig = rig();
    rig.db.put(&pv("velocity"), PvValue::Float(0.05)).await.unwrap();
    rig.db.put(&pv("i"), PvValue::Float(0.5)).await.unwrap();
    assert_eq!(rig.arm.moves()[0].1.velocity, 0.05);

    let err = rig.db.put(&pv("acceleration"), PvValue::Float(0.0)).await.unwrap_err();
    assert!(matches!(err, IocError::InvalidValue { .. }));
    assert_eq!(rig.db.get(&pv("acceleration")).unwrap(), PvValue::Float(0.5));
}

#[tokio::test]
async fn concurrent_requests_are_refused() {
    let rig = rig();
    set_args(&rig, "home", [0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).await;

    let home = pv("home:Process");
    let joint = pv("i");
    let (first, second) = tokio::join!(
        rig.db.put(&home, PvValue::Bool(true)),
        rig.db.put(&joint, PvValue::Float(1.0)),
    );

    assert_eq!(first.unwrap(), PvValue::Bool(false));
    match second {
        Err(IocError::RobotBusy(message)) => assert_eq!(message, BUSY_MESSAGE),
        other => panic!("expected RobotBusy, got {other:?}"),
    }
    assert_eq!(rig.arm.moves().len(), 1);
    assert_eq!(rig.db.get(&pv("busy")).unwrap(), PvValue::Bool(false));
}

#[tokio::test]
async fn busy_is_read_only() {
    let rig = rig();
    let err = rig.db.put(&pv("busy"), PvValue::Bool(true)).await.unwrap_err();
    assert!(matches!(err, IocError::PvReadOnly(_)));
}

#[tokio::test]
async fn gripper_activation_and_moves() {
    let rig = rig();
    scan(&rig.db, "gripper", "state").await.unwrap();
    assert_eq!(rig.db.get(&pv("gripper.ACT")).unwrap(), PvValue::Bool(false));

    activate_gripper(&rig).await;
    rig.db.put(&pv("gripper.VAL"), PvValue::Float(128.0)).await.unwrap();

    // Activation opens the gripper, then the set point
    assert_eq!(rig.gripper.moves(), vec![(0, 255, 50), (128, 255, 50)]);
    assert_eq!(rig.db.get(&pv("gripper.RBV")).unwrap(), PvValue::Float(128.0));

    rig.db.put(&pv("gripper.ACT"), PvValue::Bool(false)).await.unwrap();
    scan(&rig.db, "gripper", "state").await.unwrap();
    assert_eq!(rig.db.get(&pv("gripper.ACT")).unwrap(), PvValue::Bool(false));
}

#[tokio::test]
async fn gripper_speed_and_force_scale() {
    let rig = rig();
    activate_gripper(&rig).await;
    rig.db.put(&pv("gripper.VEL"), PvValue::Float(0.5)).await.unwrap();
    rig.db.put(&pv("gripper.FRC"), PvValue::Float(1.0)).await.unwrap();
    rig.db.put(&pv("gripper.VAL"), PvValue::Float(255.0)).await.unwrap();
    assert_eq!(rig.gripper.moves().last(), Some(&(255, 128, 255)));

    let err = rig.db.put(&pv("gripper.VEL"), PvValue::Float(1.5)).await.unwrap_err();
    assert!(matches!(err, IocError::InvalidValue { .. }));
}

#[tokio::test]
async fn gripper_calibration_updates_range() {
    let rig = rig();
    activate_gripper(&rig).await;
    let stored = rig.db.put(&pv("gripper.CAL"), PvValue::Bool(true)).await.unwrap();
    assert_eq!(stored, PvValue::Bool(false));
    assert_eq!(rig.db.get(&pv("gripper.OPN")).unwrap(), PvValue::Float(3.0));
    assert_eq!(rig.db.get(&pv("gripper.CLS")).unwrap(), PvValue::Float(229.0));
}

#[tokio::test]
async fn failed_action_reports_error() {
    let rig = rig();
    // Gripper never activated, so the pick fails at its first gripper step
    let err = rig
        .db
        .put(&pv("pick:Process"), PvValue::Bool(true))
        .await
        .unwrap_err();
    assert!(matches!(err, IocError::Driver(_)));

    let status = rig.db.get(&pv("pick:Status")).unwrap().to_string();
    assert_eq!(status, format!("Error: {err}"));
    assert_eq!(rig.db.get(&pv("pick:Retval")).unwrap(), PvValue::Int(1));
    assert_eq!(rig.db.get(&pv("pick:Process")).unwrap(), PvValue::Bool(false));
    assert_eq!(rig.db.get(&pv("busy")).unwrap(), PvValue::Bool(false));
}

#[tokio::test]
async fn pick_and_place_actions() {
    let rig = rig();
    activate_gripper(&rig).await;
    let goal = [0.5, -1.0, 1.5, -2.0, -1.5, 3.0];

    set_args(&rig, "pick", goal).await;
    let mut status = rig.db.subscribe(&pv("pick:Status")).unwrap();
    let stored = rig.db.put(&pv("pick:Process"), PvValue::Bool(true)).await.unwrap();
    assert_eq!(stored, PvValue::Bool(false));
    assert_eq!(rig.db.get(&pv("pick:Status")).unwrap(), PvValue::from(STATUS_SUCCESS));
    assert_eq!(rig.db.get(&pv("pick:Retval")).unwrap(), PvValue::Int(0));
    assert!(status.has_changed().unwrap());
    assert_ne!(*status.borrow_and_update(), PvValue::from(STATUS_RUNNING));

    let goal = JointPosition::new(goal);
    assert!(rig
        .arm
        .moves()
        .iter()
        .any(|(step, _)| *step == TransferStep::MoveJ(goal)));
    // Open, then close on the sample
    assert_eq!(
        rig.gripper.moves().iter().map(|m| m.0).collect::<Vec<_>>(),
        vec![0, 0, 255]
    );

    set_args(&rig, "place", [0.0, -1.0, 1.0, -1.0, -1.5, 0.0]).await;
    rig.db.put(&pv("place:Process"), PvValue::Bool(true)).await.unwrap();
    assert_eq!(rig.db.get(&pv("place:Status")).unwrap(), PvValue::from(STATUS_SUCCESS));
    assert_eq!(rig.gripper.moves().last().map(|m| m.0), Some(0));
}

#[tokio::test]
async fn sample_load_runs_pick_home_place() {
    let rig = rig();
    activate_gripper(&rig).await;

    let stored = rig.db.put(&pv("sample8:load"), PvValue::Bool(true)).await.unwrap();
    assert_eq!(stored, PvValue::Bool(false));

    let home = JointPosition::new(rig.config.transfer.home_joints);
    let moves = rig.arm.moves();
    let home_at = moves
        .iter()
        .position(|(step, _)| *step == TransferStep::MoveJ(home))
        .expect("home move");
    // Linear pick before home, linear place after
    assert!(matches!(moves[0].0, TransferStep::MoveL(_)));
    assert!(matches!(moves[home_at + 1].0, TransferStep::MoveL(_)));
    assert_eq!(rig.gripper.moves().last().map(|m| m.0), Some(0));
    assert_eq!(rig.db.get(&pv("busy")).unwrap(), PvValue::Bool(false));
}

#[tokio::test]
async fn uncalibrated_sample_slot_is_refused() {
    let rig = rig();
    let err = rig
        .db
        .put(&pv("sample0:load"), PvValue::Bool(true))
        .await
        .unwrap_err();
    assert!(matches!(err, IocError::InvalidPosition(_)));
    assert!(rig.arm.moves().is_empty());

    let err = rig.db.put(&pv("sample0:x"), PvValue::Float(1.0)).await.unwrap_err();
    assert!(matches!(err, IocError::PvReadOnly(_)));
    rig.db.put(&pv("sample0:present"), PvValue::Bool(true)).await.unwrap();
}

#[tokio::test]
async fn autosave_survives_restart() {
    let mut rig = rig();
    rig.ioc.start().await;
    rig.db.put(&pv("velocity"), PvValue::Float(0.07)).await.unwrap();
    rig.db.put(&pv("gripper.FRC"), PvValue::Float(0.25)).await.unwrap();
    rig.ioc.shutdown().await;

    let Rig { config, dir, .. } = rig;
    let mut restarted = rig_with(config, dir);
    assert_eq!(restarted.db.get(&pv("velocity")).unwrap(), PvValue::Float(0.2));
    restarted.ioc.start().await;
    assert_eq!(restarted.db.get(&pv("velocity")).unwrap(), PvValue::Float(0.07));
    assert_eq!(restarted.db.get(&pv("gripper.FRC")).unwrap(), PvValue::Float(0.25));
    restarted.ioc.shutdown().await;
}
