//! EPICS alive-record heartbeat
//!
//! Every heartbeat period the IOC sends one UDP datagram to the alive server so the
//! facility can tell which IOCs are running. Wire layout (big endian):
//!
//! | bytes | field |
//! |---|---|
//! | 0..4 | magic number |
//! | 4..6 | protocol version (5) |
//! | 6..10 | incarnation (EPICS seconds) |
//! | 10..14 | current time (EPICS seconds) |
//! | 14..18 | heartbeat value |
//! | 18..20 | period (s) |
//! | 20..22 | flags: bit 0 = ITRIG, bit 1 = ISUP |
//! | 22..24 | TCP information port |
//! | 24..28 | user message |
//! | 28.. | IOC name, NUL terminated |

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::AliveConfig;
use crate::error::{AppResult, IocError};
use crate::pv::{ProcessVariable, PvGroup, PvValue, ScanSpec, MAX_STRING_LENGTH};

pub const PROTOCOL_VERSION: u16 = 5;
/// Seconds between the Unix epoch and the EPICS epoch (1990-01-01)
pub const EPICS_EPOCH_OFFSET: i64 = 631_152_000;

const FLAG_ITRIG: u16 = 0b01;
const FLAG_ISUP: u16 = 0b10;
const SCAN_HEARTBEAT: &str = "heartbeat";

const HOST_READ_STATUS: [&str; 4] = ["IDLE", "QUEUED", "DUE", "OVERDUE"];
const INFO_PORT_STATUS: [&str; 3] = ["UNDETERMINED", "OPERABLE", "INOPERABLE"];

/// Unix seconds to EPICS seconds, rounded to the nearest second
pub fn epics_time(unix_seconds: f64) -> u32 {
    (unix_seconds.round() as i64 - EPICS_EPOCH_OFFSET) as u32
}

fn now_unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Fields of one heartbeat datagram
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat<'a> {
    pub magic: u32,
    pub incarnation: u32,
    pub current_time: u32,
    pub value: u32,
    pub period: u16,
    pub flags: u16,
    pub return_port: u16,
    pub user_message: u32,
    pub ioc_name: &'a str,
}

impl Heartbeat<'_> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(29 + self.ioc_name.len());
        buf.put_u32(self.magic);
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u32(self.incarnation);
        buf.put_u32(self.current_time);
        buf.put_u32(self.value);
        buf.put_u16(self.period);
        buf.put_u16(self.flags);
        buf.put_u16(self.return_port);
        buf.put_u32(self.user_message);
        buf.put_slice(self.ioc_name.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }
}

/// Where heartbeats go
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> AppResult<()>;
}

/// UDP sink; the socket is bound on first use
#[derive(Default)]
pub struct UdpHeartbeat {
    socket: OnceCell<UdpSocket>,
}

#[async_trait]
impl HeartbeatSink for UdpHeartbeat {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> AppResult<()> {
        let socket = self
            .socket
            .get_or_try_init(|| UdpSocket::bind("0.0.0.0:0"))
            .await?;
        socket.send_to(datagram, target).await?;
        Ok(())
    }
}

/// Keeps every datagram instead of sending it
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HeartbeatSink for RecordingSink {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> AppResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((datagram.to_vec(), target));
        Ok(())
    }
}

/// First IPv4 address for `host`
async fn resolve_ipv4(host: &str) -> AppResult<IpAddr> {
    let addrs = tokio::net::lookup_host((host, 0)).await?;
    addrs
        .map(|a| a.ip())
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| IocError::Configuration(format!("{host} has no IPv4 address")))
}

pub struct AliveGroup {
    sink: Arc<dyn HeartbeatSink>,
    incarnation: u32,
    remote_host: String,

    val: Arc<ProcessVariable>,
    rhost: Arc<ProcessVariable>,
    raddr: Arc<ProcessVariable>,
    rport: Arc<ProcessVariable>,
    rrsts: Arc<ProcessVariable>,
    ahost: Arc<ProcessVariable>,
    aaddr: Arc<ProcessVariable>,
    aport: Arc<ProcessVariable>,
    arsts: Arc<ProcessVariable>,
    hrtbt: Arc<ProcessVariable>,
    hprd: Arc<ProcessVariable>,
    iocnm: Arc<ProcessVariable>,
    hmag: Arc<ProcessVariable>,
    msg: Arc<ProcessVariable>,
    iport: Arc<ProcessVariable>,
    ipsts: Arc<ProcessVariable>,
    itrig: Arc<ProcessVariable>,
    isup: Arc<ProcessVariable>,
    ver: Arc<ProcessVariable>,
    evd1: Arc<ProcessVariable>,
    evd16: Arc<ProcessVariable>,
    ev1: Arc<ProcessVariable>,
    ev16: Arc<ProcessVariable>,
}

impl AliveGroup {
    /// `prefix` is the full PV prefix, e.g. `25idAustin:alive`
    pub fn new(prefix: &str, config: &AliveConfig, sink: Arc<dyn HeartbeatSink>) -> Self {
        let name = |suffix: &str| format!("{prefix}{suffix}");
        let string = |suffix: &str, doc: &str| {
            ProcessVariable::string(name(suffix), "")
                .with_doc(doc)
                .with_max_length(MAX_STRING_LENGTH)
        };
        let int = |suffix: &str, value: i64, doc: &str| ProcessVariable::int(name(suffix), value).with_doc(doc);

        Self {
            sink,
            incarnation: epics_time(now_unix_seconds()),
            remote_host: config.remote_host.clone(),
            val: Arc::new(int(".VAL", 0, "Heartbeat Value").read_only()),
            rhost: Arc::new(string(".RHOST", "Remote Host Name or IP Address").read_only()),
            raddr: Arc::new(string(".RADDR", "Remote Host IP Address").read_only()),
            rport: Arc::new(
                int(".RPORT", i64::from(config.remote_port), "Remote Host UDP Port Number").read_only(),
            ),
            rrsts: Arc::new(
                ProcessVariable::enumeration(name(".RRSTS"), &HOST_READ_STATUS, 0)
                    .with_doc("Remote Host Read Status")
                    .read_only(),
            ),
            ahost: Arc::new(string(".AHOST", "Aux. Remote Host Name or IP Address")),
            aaddr: Arc::new(string(".AADDR", "Aux. Remote Host IP Address").read_only()),
            aport: Arc::new(int(".APORT", 0, "Aux. Remote Host UDP Port Number")),
            arsts: Arc::new(
                ProcessVariable::enumeration(name(".ARSTS"), &HOST_READ_STATUS, 0)
                    .with_doc("Aux. Remote Host Read Status")
                    .read_only(),
            ),
            hrtbt: Arc::new(
                ProcessVariable::bool(name(".HRTBT"), config.enabled).with_doc("Heartbeating State"),
            ),
            hprd: Arc::new(int(".HPRD", i64::from(config.period), "Heartbeat Period").read_only()),
            iocnm: Arc::new(
                ProcessVariable::string(name(".IOCNM"), config.ioc_name.clone())
                    .with_doc("IOC Name Value")
                    .read_only(),
            ),
            hmag: Arc::new(int(".HMAG", i64::from(config.magic), "Heartbeat Magic Number").read_only()),
            msg: Arc::new(int(".MSG", 0, "Message to Send")),
            iport: Arc::new(int(".IPORT", 0, "TCP Information Port Number").read_only()),
            ipsts: Arc::new(
                ProcessVariable::enumeration(name(".IPSTS"), &INFO_PORT_STATUS, 0)
                    .with_doc("Information Port Status")
                    .read_only(),
            ),
            itrig: Arc::new(ProcessVariable::bool(name(".ITRIG"), false).with_doc("Trigger Information Request")),
            isup: Arc::new(ProcessVariable::bool(name(".ISUP"), false).with_doc("Suppress Information Requests")),
            ver: Arc::new(
                ProcessVariable::string(name(".VER"), env!("CARGO_PKG_VERSION"))
                    .with_doc("Record Version")
                    .read_only(),
            ),
            evd1: Arc::new(string(".EVD1", "Default Environment Variable Name 1").read_only()),
            evd16: Arc::new(string(".EVD16", "Default Environment Variable Name 16").read_only()),
            ev1: Arc::new(string(".EV1", "Environment Variable Name 1")),
            ev16: Arc::new(string(".EV16", "Environment Variable Name 16")),
        }
    }

    /// Set `.RHOST` and resolve it into `.RADDR`
    pub async fn set_remote_host(&self, host: &str) -> AppResult<()> {
        self.rhost.write(PvValue::from(host))?;
        let addr = resolve_ipv4(host).await?;
        self.raddr.write(PvValue::Str(addr.to_string()))?;
        info!(host, %addr, "Alive server resolved");
        Ok(())
    }

    /// Aux server when fully set, else the remote server, else none
    pub fn server_address(&self) -> Option<SocketAddr> {
        let pick = |addr: &ProcessVariable, port: &ProcessVariable| -> Option<SocketAddr> {
            let ip: IpAddr = addr.get().to_string().parse().ok()?;
            let port = u16::try_from(port.get().as_i64()).ok().filter(|p| *p > 0)?;
            Some(SocketAddr::new(ip, port))
        };
        pick(&self.aaddr, &self.aport).or_else(|| pick(&self.raddr, &self.rport))
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        if self.itrig.get().as_bool() {
            flags |= FLAG_ITRIG;
        }
        if self.isup.get().as_bool() {
            flags |= FLAG_ISUP;
        }
        flags
    }

    /// One heartbeat period: bump `.VAL` and send, if heartbeating is on
    pub async fn send_heartbeat(&self) -> AppResult<()> {
        if !self.hrtbt.get().as_bool() {
            return Ok(());
        }

        let value = self.val.get().as_i64().wrapping_add(1) & i64::from(u32::MAX);
        self.val.write(PvValue::Int(value))?;

        let Some(target) = self.server_address() else {
            debug!("No alive server configured");
            return Ok(());
        };

        let ioc_name = self.iocnm.get().to_string();
        let datagram = Heartbeat {
            magic: self.hmag.get().as_i64() as u32,
            incarnation: self.incarnation,
            current_time: epics_time(now_unix_seconds()),
            value: value as u32,
            period: self.hprd.get().as_i64() as u16,
            flags: self.flags(),
            return_port: self.iport.get().as_i64() as u16,
            user_message: self.msg.get().as_i64() as u32,
            ioc_name: &ioc_name,
        }
        .encode();
        self.sink.send_to(&datagram, target).await
    }
}

#[async_trait]
impl PvGroup for AliveGroup {
    fn name(&self) -> &str {
        "alive"
    }

    fn pvs(&self) -> Vec<Arc<ProcessVariable>> {
        [
            &self.val, &self.rhost, &self.raddr, &self.rport, &self.rrsts, &self.ahost,
            &self.aaddr, &self.aport, &self.arsts, &self.hrtbt, &self.hprd, &self.iocnm,
            &self.hmag, &self.msg, &self.iport, &self.ipsts, &self.itrig, &self.isup,
            &self.ver, &self.evd1, &self.evd16, &self.ev1, &self.ev16,
        ]
        .into_iter()
        .map(Arc::clone)
        .collect()
    }

    fn scans(&self) -> Vec<ScanSpec> {
        let period = self.hprd.get().as_i64().max(1) as u64;
        vec![ScanSpec::new(SCAN_HEARTBEAT, Duration::from_secs(period))]
    }

    async fn startup(&self) -> AppResult<()> {
        if self.remote_host.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.set_remote_host(&self.remote_host).await {
            warn!(host = %self.remote_host, error = %e, "Could not resolve alive server");
        }
        Ok(())
    }

    async fn scan(&self, _id: &str) -> AppResult<()> {
        self.send_heartbeat().await
    }

    async fn put(&self, pv: &Arc<ProcessVariable>, value: PvValue) -> AppResult<Option<PvValue>> {
        if Arc::ptr_eq(pv, &self.ahost) {
            let host = value.to_string();
            if host.is_empty() {
                self.aaddr.write(PvValue::from(""))?;
            } else {
                let addr = resolve_ipv4(&host)
                    .await
                    .map_err(|e| IocError::invalid_value(pv.name(), e.to_string()))?;
                self.aaddr.write(PvValue::Str(addr.to_string()))?;
            }
            return Ok(None);
        }

        let writable = [
            &self.aport, &self.hrtbt, &self.msg, &self.itrig, &self.isup, &self.ev1, &self.ev16,
        ];
        if writable.iter().any(|w| Arc::ptr_eq(w, pv)) {
            return Ok(None);
        }

        Err(IocError::PvReadOnly(pv.name().to_string()))
    }
}
