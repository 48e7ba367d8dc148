//! JSON-lines PV server over a real TCP socket

mod common;

use austin::server::{PvServer, MAX_LINE_BYTES};
use common::{pv, rig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("response in time")
            .unwrap()
            .expect("connection open");
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, request: Value) -> Value {
        self.send_raw(&request.to_string()).await;
        self.recv().await
    }
}

async fn serve() -> (common::Rig, SocketAddr) {
    let rig = rig();
    let server = PvServer::bind("127.0.0.1:0".parse().unwrap(), rig.db.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (rig, addr)
}

#[tokio::test]
async fn get_put_info_and_list() {
    let (_rig, addr) = serve().await;
    let mut client = Client::connect(addr).await;

    let reply = client.request(json!({"op": "get", "name": pv("velocity")})).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["value"], 0.2);
    assert_eq!(reply["text"], "0.200");

    let reply = client
        .request(json!({"op": "put", "name": pv("velocity"), "value": "0.15"}))
        .await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["value"], 0.15);

    let reply = client.request(json!({"op": "info", "name": pv("dashboard:robot_mode")})).await;
    assert_eq!(reply["info"]["type"], "enum");
    assert_eq!(reply["info"]["read_only"], true);
    assert_eq!(reply["info"]["enum_strings"][6], "POWER_ON");

    let reply = client.request(json!({"op": "list"})).await;
    let names: Vec<String> = serde_json::from_value(reply["names"].clone()).unwrap();
    assert!(names.contains(&pv("busy")));
    assert!(names.contains(&pv("alive.HRTBT")));
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[tokio::test]
async fn errors_keep_the_connection_open() {
    let (_rig, addr) = serve().await;
    let mut client = Client::connect(addr).await;

    client.send_raw("this is not json").await;
    let reply = client.recv().await;
    assert_eq!(reply["status"], "error");

    let reply = client.request(json!({"op": "get", "name": "nope"})).await;
    assert_eq!(reply["status"], "error");
    assert!(reply["message"].as_str().unwrap().contains("nope"));

    let reply = client
        .request(json!({"op": "put", "name": pv("i.RBV"), "value": 1.0}))
        .await;
    assert_eq!(reply["status"], "error");

    let reply = client
        .request(json!({"op": "put", "name": pv("velocity"), "value": [1, 2]}))
        .await;
    assert_eq!(reply["status"], "error");

    let reply = client.request(json!({"op": "get", "name": pv("busy")})).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["text"], "Off");
}

#[tokio::test]
async fn monitors_see_other_clients_puts() {
    let (_rig, addr) = serve().await;
    let mut watcher = Client::connect(addr).await;
    let mut writer = Client::connect(addr).await;

    let reply = watcher
        .request(json!({"op": "monitor", "name": pv("gripper.VEL")}))
        .await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["value"], 1.0);

    let reply = writer
        .request(json!({"op": "put", "name": pv("gripper.VEL"), "value": 0.5}))
        .await;
    assert_eq!(reply["status"], "ok");

    let update = watcher.recv().await;
    assert_eq!(update["status"], "update");
    assert_eq!(update["name"], pv("gripper.VEL"));
    assert_eq!(update["value"], 0.5);
    assert_eq!(update["text"], "0.50");
}

#[tokio::test]
async fn robot_puts_go_through_the_server() {
    let (rig, addr) = serve().await;
    let mut client = Client::connect(addr).await;

    let reply = client
        .request(json!({"op": "put", "name": pv("dashboard:release_brake"), "value": "On"}))
        .await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["value"], false);
    assert_eq!(rig.dashboard.sent(), vec!["brake release"]);
}

#[tokio::test]
async fn overlong_request_closes_the_connection() {
    let (_rig, addr) = serve().await;
    let mut client = Client::connect(addr).await;

    let flood = vec![b'x'; MAX_LINE_BYTES + 1];
    client.writer.write_all(&flood).await.unwrap();

    let reply = client.recv().await;
    assert_eq!(reply["status"], "error");
    assert!(reply["message"].as_str().unwrap().contains("exceeds"));

    let after = tokio::time::timeout(Duration::from_secs(5), client.lines.next_line())
        .await
        .expect("close in time")
        .unwrap();
    assert!(after.is_none());

    // Other clients are unaffected
    let mut other = Client::connect(addr).await;
    let reply = other.request(json!({"op": "get", "name": pv("busy")})).await;
    assert_eq!(reply["status"], "ok");
}

#[tokio::test]
async fn request_at_the_limit_is_accepted() {
    let (_rig, addr) = serve().await;
    let mut client = Client::connect(addr).await;

    let request = json!({"op": "get", "name": pv("velocity")}).to_string();
    // Same as `format!("{request:<width$}")`, which newer rustc rejects for widths > u16::MAX.
    let mut padded = request.clone();
    padded.push_str(&" ".repeat(MAX_LINE_BYTES.saturating_sub(request.chars().count())));
    client.send_raw(&padded).await;
    let reply = client.recv().await;
    assert_eq!(reply["status"], "ok");
}
