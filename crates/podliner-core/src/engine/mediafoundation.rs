//! Windows Media Foundation engine.
//!
//! A full COM/MF binding is out of scope here — no MF wrapper crate is part
//! of this project's dependency stack, and fabricating one would mean a
//! fake implementation pretending to talk to a real API. This stub keeps
//! the `EngineKind::MediaFoundation` variant, its position in the selection
//! order (§4.1), and its reduced capability floor (no Speed) addressable by
//! the rest of the system, while honestly reporting itself unavailable so
//! `select_engine` falls through to the next candidate.
//!
//! TODO: back this with `windows::Win32::Media::MediaFoundation` once that
//! dependency is added to the stack.

use async_trait::async_trait;
use podliner_proto::PlayerCapabilities;

use super::{AudioEngine, EngineError, EngineKind, EngineStateChanged};

pub struct MediaFoundationEngine;

impl MediaFoundationEngine {
    #[cfg(windows)]
    pub fn new() -> Option<Self> {
        Some(Self)
    }

    #[cfg(not(windows))]
    pub fn new() -> Option<Self> {
        None
    }
}

#[async_trait]
impl AudioEngine for MediaFoundationEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::MediaFoundation
    }

    fn name(&self) -> &'static str {
        "mediafoundation"
    }

    fn capabilities(&self) -> PlayerCapabilities {
        EngineKind::MediaFoundation.capability_floor()
    }

    async fn play(&self, _url: &str, _start_ms: Option<i64>) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    async fn stop(&self) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    async fn toggle_pause(&self) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    async fn seek_to(&self, _position_ms: i64) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    async fn seek_relative(&self, _delta_ms: i64) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    async fn set_volume(&self, _volume_0_100: u8) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    async fn set_speed(&self, _speed: f32) -> Result<(), EngineError> {
        Err(EngineError::OperationNotSupported)
    }

    async fn poll_state(&self) -> Result<EngineStateChanged, EngineError> {
        Err(EngineError::Unavailable)
    }

    async fn is_available(&self) -> bool {
        false
    }
}
