//! Socket drivers against in-process fake controllers

use austin::config::RobotConfig;
use austin::driver::dashboard::DashboardClient;
use austin::driver::gripper::RobotiqGripper;
use austin::driver::realtime::RealtimeState;
use austin::driver::urscript::UrArm;
use austin::driver::{
    ArmControl, CartesianPose, DashboardLink, GripperControl, JointPosition, MotionParams,
    ObjectStatus,
};
use austin::error::IocError;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);

fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Serve one line-based client; `reply` returns `None` to hang up
fn serve_lines(
    stream: TcpStream,
    greeting: Option<&str>,
    mut reply: impl FnMut(&str) -> Option<String>,
) {
    let mut writer = stream.try_clone().unwrap();
    if let Some(greeting) = greeting {
        writer.write_all(format!("{greeting}\n").as_bytes()).unwrap();
    }
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        match reply(&line) {
            Some(answer) => {
                if writer.write_all(format!("{answer}\n").as_bytes()).is_err() {
                    break;
                }
            }
            None => break,
        }
    }
}

#[test]
fn dashboard_round_trip_and_lost_connection() {
    let (listener, port) = listener();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve_lines(
            stream,
            Some("Connected: Universal Robots Dashboard Server"),
            |command| match command {
                "robotmode" => Some("Robotmode: IDLE".into()),
                "get loaded program" => Some("Loaded program: /programs/austin.urp".into()),
                _ => None,
            },
        );
    });

    let mut client = DashboardClient::new("127.0.0.1", port, TIMEOUT);
    client.connect().unwrap();
    assert_eq!(client.send_and_receive("robotmode").unwrap(), "Robotmode: IDLE");
    assert_eq!(
        client.send_and_receive("get loaded program").unwrap(),
        "Loaded program: /programs/austin.urp"
    );

    // The fake hangs up on anything else
    let err = client.send_and_receive("play").unwrap_err();
    assert!(matches!(err, IocError::RobotDisconnected(_)));
    server.join().unwrap();

    // Nobody listening any more: reconnect fails the same way
    let err = client.send_and_receive("robotmode").unwrap_err();
    assert!(matches!(err, IocError::RobotDisconnected(_)));
}

/// Minimal Robotiq register model
#[derive(Default)]
struct FakeGripper {
    vars: HashMap<String, i32>,
    commands: Vec<String>,
    /// Mechanical open and closed stops; fingers come to rest inside them
    stops: Option<(i32, i32)>,
}

impl FakeGripper {
    fn handle(&mut self, line: &str) -> String {
        self.commands.push(line.to_string());
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("SET") => {
                let words: Vec<&str> = parts.collect();
                for pair in words.chunks(2) {
                    let value: i32 = pair[1].parse().unwrap();
                    self.vars.insert(pair[0].to_string(), value);
                    match pair[0] {
                        "ACT" => {
                            self.vars.insert("STA".into(), if value == 1 { 3 } else { 0 });
                        }
                        "POS" => {
                            self.vars.insert("PRE".into(), value);
                            self.vars.insert("OBJ".into(), 3);
                            if let Some((open, closed)) = self.stops {
                                self.vars.insert("POS".into(), value.clamp(open, closed));
                            }
                        }
                        _ => {}
                    }
                }
                "ack".to_string()
            }
            Some("GET") => {
                let name = parts.next().unwrap_or_default();
                format!("{name} {}", self.vars.get(name).copied().unwrap_or(0))
            }
            _ => "?".to_string(),
        }
    }
}

#[test]
fn gripper_activates_and_moves() {
    let (listener, port) = listener();
    let fake = Arc::new(Mutex::new(FakeGripper::default()));
    let server = {
        let fake = Arc::clone(&fake);
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_lines(stream, None, |line| Some(fake.lock().unwrap().handle(line)));
        })
    };

    let mut gripper = RobotiqGripper::new("127.0.0.1", port, TIMEOUT, TIMEOUT);
    assert!(!gripper.is_active().unwrap());
    gripper.activate().unwrap();
    assert!(gripper.is_active().unwrap());

    let (position, status) = gripper.move_and_wait_for_pos(100, 255, 50).unwrap();
    assert_eq!(position, 100);
    assert_eq!(status, ObjectStatus::AtDest);
    assert_eq!(gripper.current_position().unwrap(), 100);

    let commands = fake.lock().unwrap().commands.clone();
    assert!(commands.contains(&"SET ACT 0 ATR 0".to_string()));
    assert!(commands.contains(&"SET ACT 1".to_string()));
    assert!(commands.contains(&"SET POS 100 SPE 255 FOR 50 GTO 1".to_string()));

    gripper.disconnect().unwrap();
    server.join().unwrap();
}

#[test]
fn gripper_calibration_finds_both_stops() {
    let (listener, port) = listener();
    let fake = Arc::new(Mutex::new(FakeGripper {
        stops: Some((3, 228)),
        ..FakeGripper::default()
    }));
    let server = {
        let fake = Arc::clone(&fake);
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_lines(stream, None, |line| Some(fake.lock().unwrap().handle(line)));
        })
    };

    let mut gripper = RobotiqGripper::new("127.0.0.1", port, TIMEOUT, TIMEOUT);
    gripper.activate().unwrap();
    gripper.auto_calibrate().unwrap();
    assert_eq!(gripper.open_position(), 3);
    assert_eq!(gripper.closed_position(), 228);

    // Ends open, and later moves are clipped to the calibrated range
    assert_eq!(gripper.current_position().unwrap(), 3);
    gripper.move_and_wait_for_pos(250, 255, 50).unwrap();
    let commands = fake.lock().unwrap().commands.clone();
    assert_eq!(commands.last().map(String::as_str), Some("GET POS"));
    assert!(commands.contains(&"SET POS 228 SPE 255 FOR 50 GTO 1".to_string()));

    gripper.disconnect().unwrap();
    server.join().unwrap();
}

fn parse_list(script: &str, open: &str) -> [f64; 6] {
    let start = script.find(open).unwrap() + open.len();
    let end = start + script[start..].find(']').unwrap();
    let mut out = [0.0; 6];
    for (slot, value) in out.iter_mut().zip(script[start..end].split(", ")) {
        *slot = value.parse().unwrap();
    }
    out
}

/// Rewrite a rotation vector longer than π the way the controller reports it:
/// the same rotation as `2π - θ` about the opposite axis
fn renormalised(pose: CartesianPose) -> CartesianPose {
    let theta = (pose.rx.powi(2) + pose.ry.powi(2) + pose.rz.powi(2)).sqrt();
    if theta <= std::f64::consts::PI {
        return pose;
    }
    let scale = -(2.0 * std::f64::consts::PI - theta) / theta;
    CartesianPose {
        rx: pose.rx * scale,
        ry: pose.ry * scale,
        rz: pose.rz * scale,
        ..pose
    }
}

struct FakeArm {
    config: RobotConfig,
    state: Arc<Mutex<RealtimeState>>,
    scripts: Arc<Mutex<Vec<String>>>,
}

/// Realtime stream plus a script server that applies moves instantly
fn fake_arm(initial: RealtimeState) -> FakeArm {
    let (script_listener, script_port) = listener();
    let (realtime_listener, realtime_port) = listener();
    let state = Arc::new(Mutex::new(initial));

    {
        let state = Arc::clone(&state);
        thread::spawn(move || {
            let (mut stream, _) = realtime_listener.accept().unwrap();
            loop {
                let packet = state.lock().unwrap().encode();
                if stream.write_all(&packet).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
        });
    }
    let scripts = Arc::new(Mutex::new(Vec::new()));
    {
        let state = Arc::clone(&state);
        let scripts = Arc::clone(&scripts);
        thread::spawn(move || {
            let (stream, _) = script_listener.accept().unwrap();
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else { break };
                let mut state = state.lock().unwrap();
                if line.starts_with("movej(") {
                    state.joints = JointPosition::new(parse_list(&line, "movej(["));
                } else if line.starts_with("movel(") {
                    state.pose = renormalised(CartesianPose::from(parse_list(&line, "movel(p[")));
                }
                scripts.lock().unwrap().push(line);
            }
        });
    }

    let config = RobotConfig {
        host: "127.0.0.1".into(),
        script_port,
        realtime_port,
        timeout: TIMEOUT,
        move_timeout: Duration::from_secs(5),
        ..RobotConfig::default()
    };
    FakeArm {
        config,
        state,
        scripts,
    }
}

fn wait_for_stream(arm: &mut UrArm) -> JointPosition {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match arm.joints() {
            Ok(joints) => return joints,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
            Err(e) => panic!("no realtime data: {e}"),
        }
    }
}

#[test]
fn arm_moves_follow_the_realtime_stream() {
    let fake = fake_arm(RealtimeState {
        joints: JointPosition::new([0.1, -1.5, 1.5, -1.5, -1.5, 0.0]),
        pose: CartesianPose::new(0.2, -0.4, 0.3, 3.14, 0.0, 0.0),
        robot_mode: 7.0,
    });
    let mut arm = UrArm::connect(&fake.config);

    let joints = wait_for_stream(&mut arm);
    assert_eq!(joints.as_array()[0], 0.1);

    let target = JointPosition::new([0.2, -1.4, 1.4, -1.6, -1.5, 0.5]);
    arm.movej(target, MotionParams::default(), false).unwrap();
    assert!(arm.joints().unwrap().distance(&target) < 1e-6);

    let goal = CartesianPose::new(0.25, -0.35, 0.3, 3.14, 0.0, 0.0);
    arm.movel(goal, MotionParams::default(), false).unwrap();
    assert!(arm.pose().unwrap().distance(&goal) < 1e-6);

    let scripts = fake.scripts.lock().unwrap().clone();
    assert_eq!(scripts.len(), 2);
    assert!(scripts[0].starts_with("movej([0.200000, -1.400000, 1.400000, -1.600000, -1.500000, 0.500000]"));
    assert!(scripts[1].starts_with("movel(p[0.250000, -0.350000"));
    drop(arm);
}

#[test]
fn movel_converges_when_controller_flips_the_rotation_vector() {
    let fake = fake_arm(RealtimeState {
        joints: JointPosition::new([0.0; 6]),
        pose: CartesianPose::new(0.2, -0.4, 0.3, 0.0, 3.0, 0.0),
        robot_mode: 7.0,
    });
    let mut arm = UrArm::connect(&fake.config);
    wait_for_stream(&mut arm);

    // Default stage pose, rotation angle just over π
    let stage = CartesianPose::new(0.19676, -0.42392, 0.17796, 2.909, 1.187, 0.003);
    arm.movel(stage, MotionParams::default(), false).unwrap();

    let reported = fake.state.lock().unwrap().pose;
    assert!((reported.rx - stage.rx).abs() > 5.0);
    assert!(arm.pose().unwrap().distance(&stage) < 1e-6);
    drop(arm);
}
