//! mpv IPC engine, adapted from a JSON-IPC driver with separated reader and
//! writer tasks.
//!
//! Architecture:
//!
//! ```text
//!   MpvDriver::spawn_and_connect()
//!         │
//!         ├── writer_task   ← receives requests via mpsc, serialises → socket
//!         └── reader_task   ← reads JSON lines from socket
//!                                ├── response (has request_id) → matched oneshot::Sender
//!                                └── event / property-change   → observed state
//! ```
//!
//! Platform notes:
//! - Unix: Unix domain sockets
//! - Windows: named pipes `\\.\pipe\<name>`

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use podliner_proto::PlayerCapabilities;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

use super::{AudioEngine, EngineError, EngineKind, EngineStateChanged};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const OBS_CORE_IDLE: u64 = 1;
const OBS_PAUSE: u64 = 2;
const OBS_TIME_POS: u64 = 3;
const OBS_DURATION: u64 = 4;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

#[derive(Debug, Clone)]
struct MpvEvent {
    raw: Value,
}

impl MpvEvent {
    fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }
}

#[derive(Clone)]
struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    async fn observe_all_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
        ];
        for (id, name) in &props {
            if let Err(e) = self.send(json!(["observe_property", id, name])).await {
                warn!("mpv: observe_property {} failed: {}", name, e);
            }
        }
    }
}

/// Observed property values, updated by the reader task.
#[derive(Default)]
struct Observed {
    core_idle: Option<bool>,
    pause: bool,
    time_pos: Option<f64>,
    duration: Option<f64>,
}

struct Connection {
    handle: MpvHandle,
    observed: Arc<Mutex<Observed>>,
}

pub struct MpvEngine {
    binary: std::path::PathBuf,
    socket_name: String,
    inner: Mutex<MpvInner>,
}

#[derive(Default)]
struct MpvInner {
    process: Option<tokio::process::Child>,
    connection: Option<Connection>,
}

impl MpvEngine {
    pub fn new() -> Option<Self> {
        let binary = podliner_proto::platform::find_mpv_binary()?;
        Some(Self {
            binary,
            socket_name: podliner_proto::platform::mpv_socket_name(),
            inner: Mutex::new(MpvInner::default()),
        })
    }

    async fn ensure_connection(&self) -> Result<Connection, EngineError> {
        let mut inner = self.inner.lock().await;

        if let Some(conn) = &inner.connection {
            let alive = inner
                .process
                .as_mut()
                .map(|c| matches!(c.try_wait(), Ok(None)))
                .unwrap_or(false);
            if alive {
                return Ok(Connection {
                    handle: conn.handle.clone(),
                    observed: conn.observed.clone(),
                });
            }
            inner.connection = None;
        }

        #[cfg(unix)]
        {
            let socket_path = std::path::PathBuf::from(&self.socket_name);
            let _ = tokio::fs::remove_file(&socket_path).await;

            let ipc_arg = podliner_proto::platform::mpv_socket_arg();
            let stderr_path = podliner_proto::platform::log_dir().join("mpv-stderr.log");
            let _ = std::fs::create_dir_all(podliner_proto::platform::log_dir());
            let stderr_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&stderr_path)
                .map_err(EngineError::Io)?;

            let child = tokio::process::Command::new(&self.binary)
                .arg("--no-video")
                .arg("--idle=yes")
                .arg(&ipc_arg)
                .arg("--quiet")
                .stdout(std::process::Stdio::null())
                .stderr(stderr_file)
                .spawn()
                .map_err(EngineError::Io)?;
            inner.process = Some(child);

            for _ in 0..50 {
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                if socket_path.exists() {
                    break;
                }
            }
            if !socket_path.exists() {
                return Err(EngineError::Ipc("mpv IPC socket did not appear".into()));
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

            let stream = UnixStream::connect(&socket_path)
                .await
                .map_err(EngineError::Io)?;
            let conn = start_io_tasks(stream);
            conn.handle.observe_all_properties().await;
            inner.connection = Some(Connection {
                handle: conn.handle.clone(),
                observed: conn.observed.clone(),
            });
            Ok(conn)
        }

        #[cfg(windows)]
        {
            Err(EngineError::Ipc("mpv named-pipe transport not wired up".into()))
        }
    }
}

#[cfg(unix)]
fn start_io_tasks(stream: UnixStream) -> Connection {
    let (read_half, write_half) = stream.into_split();
    let reader = BufReader::new(read_half);

    let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let observed = Arc::new(Mutex::new(Observed::default()));

    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, observed.clone()));

    Connection {
        handle: MpvHandle { tx: cmd_tx },
        observed,
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
    observed: Arc<Mutex<Observed>>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    let evt = MpvEvent { raw: val };
                    if let Some((id, data)) = evt.as_property_change() {
                        let mut obs = observed.lock().await;
                        match id {
                            OBS_CORE_IDLE => obs.core_idle = data.as_bool(),
                            OBS_PAUSE => obs.pause = data.as_bool().unwrap_or(false),
                            OBS_TIME_POS => obs.time_pos = data.as_f64(),
                            OBS_DURATION => obs.duration = data.as_f64(),
                            _ => {}
                        }
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
}

fn ipc_err(e: anyhow::Error) -> EngineError {
    EngineError::Ipc(e.to_string())
}

#[async_trait]
impl AudioEngine for MpvEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mpv
    }

    fn name(&self) -> &'static str {
        "mpv"
    }

    fn capabilities(&self) -> PlayerCapabilities {
        EngineKind::Mpv.capability_floor()
    }

    async fn play(&self, url: &str, start_ms: Option<i64>) -> Result<(), EngineError> {
        let conn = self.ensure_connection().await?;
        conn.handle
            .send(json!(["loadfile", url]))
            .await
            .map_err(ipc_err)?;
        if let Some(start_ms) = start_ms {
            if start_ms > 0 {
                let secs = start_ms as f64 / 1000.0;
                let _ = conn
                    .handle
                    .send(json!(["set_property", "time-pos", secs]))
                    .await;
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let conn = self.ensure_connection().await?;
        let _ = conn.handle.send(json!(["stop"])).await;
        Ok(())
    }

    async fn toggle_pause(&self) -> Result<(), EngineError> {
        let conn = self.ensure_connection().await?;
        let paused = conn.observed.lock().await.pause;
        conn.handle
            .send(json!(["set_property", "pause", !paused]))
            .await
            .map_err(ipc_err)?;
        Ok(())
    }

    async fn seek_to(&self, position_ms: i64) -> Result<(), EngineError> {
        let conn = self.ensure_connection().await?;
        let secs = position_ms as f64 / 1000.0;
        conn.handle
            .send(json!(["set_property", "time-pos", secs]))
            .await
            .map_err(ipc_err)?;
        Ok(())
    }

    async fn seek_relative(&self, delta_ms: i64) -> Result<(), EngineError> {
        let conn = self.ensure_connection().await?;
        let secs = delta_ms as f64 / 1000.0;
        conn.handle
            .send(json!(["seek", secs, "relative"]))
            .await
            .map_err(ipc_err)?;
        Ok(())
    }

    async fn set_volume(&self, volume_0_100: u8) -> Result<(), EngineError> {
        let conn = self.ensure_connection().await?;
        conn.handle
            .send(json!(["set_property", "volume", volume_0_100 as f64]))
            .await
            .map_err(ipc_err)?;
        Ok(())
    }

    async fn set_speed(&self, speed: f32) -> Result<(), EngineError> {
        let conn = self.ensure_connection().await?;
        conn.handle
            .send(json!(["set_property", "speed", speed as f64]))
            .await
            .map_err(ipc_err)?;
        Ok(())
    }

    async fn poll_state(&self) -> Result<EngineStateChanged, EngineError> {
        let conn = self.ensure_connection().await?;
        let obs = conn.observed.lock().await;
        let position_ms = obs.time_pos.map(|s| (s * 1000.0) as i64).unwrap_or(0);
        let length_ms = obs.duration.map(|s| (s * 1000.0) as i64);
        let is_playing = obs.core_idle == Some(false) && !obs.pause;
        Ok(EngineStateChanged {
            position_ms,
            length_ms,
            is_playing,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}
