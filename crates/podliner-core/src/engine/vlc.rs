//! VLC engine, driven over its `rc` (remote control) text interface on a
//! loopback TCP socket (`cvlc --intf rc --rc-host 127.0.0.1:<port>`).
//!
//! Unlike mpv's JSON-IPC, `rc` has no request/response correlation — each
//! command's reply is just the next line(s) written to the socket. Commands
//! are therefore serialised behind a single connection mutex rather than
//! routed through a reader/writer task pair.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use podliner_proto::PlayerCapabilities;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{AudioEngine, EngineError, EngineKind, EngineStateChanged};

struct Rc {
    stream: BufReader<TcpStream>,
}

impl Rc {
    async fn command(&mut self, line: &str) -> anyhow::Result<String> {
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        self.stream.get_mut().write_all(b"\n").await?;
        let mut reply = String::new();
        let _ = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            self.stream.read_line(&mut reply),
        )
        .await;
        Ok(reply.trim().to_string())
    }
}

pub struct VlcEngine {
    binary: std::path::PathBuf,
    port: u16,
    process: Mutex<Option<tokio::process::Child>>,
    conn: Mutex<Option<Rc>>,
    last_volume: AtomicU32,
}

impl VlcEngine {
    pub fn new() -> Option<Self> {
        let binary = podliner_proto::platform::find_vlc_binary()?;
        Some(Self {
            binary,
            port: 4212,
            process: Mutex::new(None),
            conn: Mutex::new(None),
            last_volume: AtomicU32::new(256), // VLC volume is 0..320, 256 ~ 100%
        })
    }

    async fn ensure_connection(&self) -> Result<(), EngineError> {
        {
            let conn = self.conn.lock().await;
            if conn.is_some() {
                return Ok(());
            }
        }

        let mut process = self.process.lock().await;
        let alive = process
            .as_mut()
            .map(|c| matches!(c.try_wait(), Ok(None)))
            .unwrap_or(false);

        if !alive {
            let child = tokio::process::Command::new(&self.binary)
                .arg("--intf")
                .arg("rc")
                .arg("--rc-host")
                .arg(format!("127.0.0.1:{}", self.port))
                .arg("--no-video")
                .arg("--quiet")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .spawn()
                .map_err(EngineError::Io)?;
            *process = Some(child);
            tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        }

        let mut last_err = None;
        for _ in 0..20 {
            match TcpStream::connect(("127.0.0.1", self.port)).await {
                Ok(stream) => {
                    let mut conn = self.conn.lock().await;
                    *conn = Some(Rc {
                        stream: BufReader::new(stream),
                    });
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
        Err(EngineError::Ipc(format!(
            "vlc rc connect failed: {:?}",
            last_err
        )))
    }
}

#[async_trait]
impl AudioEngine for VlcEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Vlc
    }

    fn name(&self) -> &'static str {
        "vlc"
    }

    fn capabilities(&self) -> PlayerCapabilities {
        EngineKind::Vlc.capability_floor()
    }

    async fn play(&self, url: &str, start_ms: Option<i64>) -> Result<(), EngineError> {
        self.ensure_connection().await?;
        let mut conn = self.conn.lock().await;
        if let Some(rc) = conn.as_mut() {
            let _ = rc.command(&format!("add {url}")).await;
            if let Some(start_ms) = start_ms {
                if start_ms > 0 {
                    let _ = rc.command(&format!("seek {}", start_ms / 1000)).await;
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let mut conn = self.conn.lock().await;
        if let Some(rc) = conn.as_mut() {
            let _ = rc.command("stop").await;
        }
        Ok(())
    }

    async fn toggle_pause(&self) -> Result<(), EngineError> {
        let mut conn = self.conn.lock().await;
        if let Some(rc) = conn.as_mut() {
            let _ = rc.command("pause").await;
        }
        Ok(())
    }

    async fn seek_to(&self, position_ms: i64) -> Result<(), EngineError> {
        let mut conn = self.conn.lock().await;
        if let Some(rc) = conn.as_mut() {
            let _ = rc.command(&format!("seek {}", position_ms / 1000)).await;
        }
        Ok(())
    }

    async fn seek_relative(&self, delta_ms: i64) -> Result<(), EngineError> {
        let current = self.poll_state().await.map(|s| s.position_ms).unwrap_or(0);
        self.seek_to((current + delta_ms).max(0)).await
    }

    async fn set_volume(&self, volume_0_100: u8) -> Result<(), EngineError> {
        let vlc_vol = (volume_0_100 as u32 * 320 / 100).min(320);
        self.last_volume.store(vlc_vol, Ordering::Relaxed);
        let mut conn = self.conn.lock().await;
        if let Some(rc) = conn.as_mut() {
            let _ = rc.command(&format!("volume {vlc_vol}")).await;
        }
        Ok(())
    }

    async fn set_speed(&self, speed: f32) -> Result<(), EngineError> {
        let mut conn = self.conn.lock().await;
        if let Some(rc) = conn.as_mut() {
            let _ = rc.command(&format!("rate {speed}")).await;
        }
        Ok(())
    }

    async fn poll_state(&self) -> Result<EngineStateChanged, EngineError> {
        let mut conn = self.conn.lock().await;
        let Some(rc) = conn.as_mut() else {
            return Ok(EngineStateChanged {
                position_ms: 0,
                length_ms: None,
                is_playing: false,
            });
        };
        let time_s = rc
            .command("get_time")
            .await
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let length_s = rc
            .command("get_length")
            .await
            .ok()
            .and_then(|s| s.parse::<i64>().ok());
        let status = rc.command("status").await.unwrap_or_default();
        let is_playing = status.to_lowercase().contains("state playing")
            || status.to_lowercase().contains("( state playing )");
        Ok(EngineStateChanged {
            position_ms: time_s * 1000,
            length_ms: length_s.map(|s| s * 1000),
            is_playing,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}
