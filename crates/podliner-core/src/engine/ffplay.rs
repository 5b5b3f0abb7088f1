//! `ffplay` fallback engine: no IPC control surface at all, so "seek" is
//! implemented by killing and respawning the process with a new `-ss`
//! offset, and volume/speed are only applied at spawn time (§4.1 table:
//! coarse seek, start-only volume/speed, no pause).

use std::sync::Mutex as StdMutex;
use std::time::Instant;

use async_trait::async_trait;
use podliner_proto::PlayerCapabilities;
use tokio::sync::Mutex;

use super::{AudioEngine, EngineError, EngineKind, EngineStateChanged};

struct Playing {
    process: tokio::process::Child,
    url: String,
    started_at: Instant,
    start_offset_ms: i64,
}

pub struct FFplayEngine {
    binary: std::path::PathBuf,
    playing: Mutex<Option<Playing>>,
    volume_0_100: StdMutex<u8>,
    speed: StdMutex<f32>,
}

impl FFplayEngine {
    pub fn new() -> Option<Self> {
        let binary = podliner_proto::platform::find_ffplay_binary()?;
        Some(Self {
            binary,
            playing: Mutex::new(None),
            volume_0_100: StdMutex::new(80),
            speed: StdMutex::new(1.0),
        })
    }

    async fn spawn_at(&self, url: &str, start_ms: i64) -> Result<Playing, EngineError> {
        let volume = *self.volume_0_100.lock().unwrap();
        let speed = *self.speed.lock().unwrap();

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg("-nodisp").arg("-autoexit").arg("-loglevel").arg("error");
        if start_ms > 0 {
            cmd.arg("-ss").arg(format!("{:.3}", start_ms as f64 / 1000.0));
        }
        cmd.arg("-volume").arg(volume.to_string());
        if (speed - 1.0).abs() > f32::EPSILON {
            cmd.arg("-af").arg(format!("atempo={speed}"));
        }
        cmd.arg(url);
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::null());
        cmd.kill_on_drop(true);

        let process = cmd.spawn().map_err(EngineError::Io)?;
        Ok(Playing {
            process,
            url: url.to_string(),
            started_at: Instant::now(),
            start_offset_ms: start_ms,
        })
    }
}

#[async_trait]
impl AudioEngine for FFplayEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::FFplay
    }

    fn name(&self) -> &'static str {
        "ffplay"
    }

    fn capabilities(&self) -> PlayerCapabilities {
        EngineKind::FFplay.capability_floor()
    }

    async fn play(&self, url: &str, start_ms: Option<i64>) -> Result<(), EngineError> {
        let mut guard = self.playing.lock().await;
        if let Some(mut prev) = guard.take() {
            let _ = prev.process.kill().await;
        }
        *guard = Some(self.spawn_at(url, start_ms.unwrap_or(0)).await?);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let mut guard = self.playing.lock().await;
        if let Some(mut p) = guard.take() {
            let _ = p.process.kill().await;
        }
        Ok(())
    }

    async fn toggle_pause(&self) -> Result<(), EngineError> {
        Err(EngineError::OperationNotSupported)
    }

    async fn seek_to(&self, position_ms: i64) -> Result<(), EngineError> {
        let url = {
            let guard = self.playing.lock().await;
            guard.as_ref().map(|p| p.url.clone())
        };
        let Some(url) = url else {
            return Err(EngineError::OperationNotSupported);
        };
        self.play(&url, Some(position_ms.max(0))).await
    }

    async fn seek_relative(&self, delta_ms: i64) -> Result<(), EngineError> {
        let current = self.poll_state().await.map(|s| s.position_ms).unwrap_or(0);
        self.seek_to((current + delta_ms).max(0)).await
    }

    async fn set_volume(&self, volume_0_100: u8) -> Result<(), EngineError> {
        *self.volume_0_100.lock().unwrap() = volume_0_100.min(100);
        Err(EngineError::OperationNotSupported)
    }

    async fn set_speed(&self, speed: f32) -> Result<(), EngineError> {
        *self.speed.lock().unwrap() = speed.clamp(0.25, 3.0);
        Err(EngineError::OperationNotSupported)
    }

    async fn poll_state(&self) -> Result<EngineStateChanged, EngineError> {
        let mut guard = self.playing.lock().await;
        let Some(p) = guard.as_mut() else {
            return Ok(EngineStateChanged {
                position_ms: 0,
                length_ms: None,
                is_playing: false,
            });
        };
        let alive = matches!(p.process.try_wait(), Ok(None));
        let elapsed_ms = p.started_at.elapsed().as_millis() as i64;
        Ok(EngineStateChanged {
            position_ms: p.start_offset_ms + elapsed_ms,
            length_ms: None,
            is_playing: alive,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}
