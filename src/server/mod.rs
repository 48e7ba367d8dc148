//! PV server: newline-delimited JSON over TCP
//!
//! Each client connection runs in its own task, so a put that drives the robot
//! only holds up the client that sent it. Monitors forward every change of a PV
//! to the client until it disconnects.

pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::pv::{PvDatabase, PvValue};
use protocol::{Request, Response};

/// Queued monitor updates per client before the forwarders wait
const UPDATE_QUEUE: usize = 256;

/// Longest request line accepted; longer lines close the connection
pub const MAX_LINE_BYTES: usize = 64 * 1024;

enum Line {
    Request(String),
    TooLong,
    Closed,
}

/// Read one request line into `buf`, never buffering more than `MAX_LINE_BYTES + 1`.
///
/// Partial data stays in `buf` if the future is dropped, so this can sit in a
/// `select!` branch.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let limit = (MAX_LINE_BYTES + 1).saturating_sub(buf.len()) as u64;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

    if buf.last() != Some(&b'\n') {
        if buf.len() > MAX_LINE_BYTES {
            return Ok(Line::TooLong);
        }
        if read == 0 && buf.is_empty() {
            return Ok(Line::Closed);
        }
    }
    let line = String::from_utf8_lossy(buf).trim_end().to_string();
    buf.clear();
    Ok(Line::Request(line))
}

pub struct PvServer {
    listener: TcpListener,
    database: Arc<PvDatabase>,
}

impl PvServer {
    pub async fn bind(addr: SocketAddr, database: Arc<PvDatabase>) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "PV server listening");
        Ok(Self { listener, database })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the future is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    let database = Arc::clone(&self.database);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, addr, database).await {
                            warn!(client = %addr, error = %e, "Client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Accept error"),
            }
        }
    }
}

async fn handle_client(socket: TcpStream, addr: SocketAddr, database: Arc<PvDatabase>) -> AppResult<()> {
    let session = Uuid::new_v4();
    info!(client = %addr, %session, "Client connected");

    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let (updates_tx, mut updates_rx) = mpsc::channel::<Response>(UPDATE_QUEUE);
    let mut monitors = JoinSet::new();

    loop {
        tokio::select! {
            line = next_line(&mut reader, &mut buf) => {
                let line = match line? {
                    Line::Request(line) => line,
                    Line::Closed => break,
                    Line::TooLong => {
                        warn!(client = %addr, limit = MAX_LINE_BYTES, "Request line too long, dropping client");
                        let response = Response::error(format!(
                            "Request exceeds {MAX_LINE_BYTES} bytes"
                        ));
                        writer.write_all(response.to_line().as_bytes()).await?;
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match Request::parse(&line) {
                    Ok(request) => {
                        handle_request(request, &database, &updates_tx, &mut monitors).await
                    }
                    Err(message) => Response::error(message),
                };
                writer.write_all(response.to_line().as_bytes()).await?;
            }
            Some(update) = updates_rx.recv() => {
                writer.write_all(update.to_line().as_bytes()).await?;
            }
        }
    }

    monitors.abort_all();
    info!(client = %addr, %session, "Client disconnected");
    Ok(())
}

async fn handle_request(
    request: Request,
    database: &Arc<PvDatabase>,
    updates: &mpsc::Sender<Response>,
    monitors: &mut JoinSet<()>,
) -> Response {
    debug!(?request, "Request");
    match request {
        Request::List => Response::list(database.names()),
        Request::Get { name } => match database.pv(&name) {
            Ok(pv) => Response::reading(pv),
            Err(e) => Response::error(e.to_string()),
        },
        Request::Info { name } => match database.pv(&name) {
            Ok(pv) => Response::info(pv.info()),
            Err(e) => Response::error(e.to_string()),
        },
        Request::Put { name, value } => {
            let value = match PvValue::from_json(&value) {
                Ok(value) => value,
                Err(reason) => return Response::error(format!("Invalid value for {name}: {reason}")),
            };
            match database.put(&name, value).await {
                Ok(_) => match database.pv(&name) {
                    Ok(pv) => Response::reading(pv),
                    Err(e) => Response::error(e.to_string()),
                },
                Err(e) => {
                    if e.is_recoverable() {
                        debug!(pv = %name, error = %e, "Put rejected");
                    } else {
                        error!(pv = %name, error = %e, "Put failed");
                    }
                    Response::error(e.to_string())
                }
            }
        }
        Request::Monitor { name } => match database.pv(&name) {
            Ok(pv) => {
                let pv = Arc::clone(pv);
                let mut rx = pv.subscribe();
                rx.borrow_and_update();
                let updates = updates.clone();
                let reply = Response::reading(&pv);
                monitors.spawn(async move {
                    while rx.changed().await.is_ok() {
                        if updates.send(Response::update(&pv)).await.is_err() {
                            break;
                        }
                    }
                });
                reply
            }
            Err(e) => Response::error(e.to_string()),
        },
    }
}
