//! Capability-gated audio engine abstraction and the swap protocol (§4.1).

pub mod ffplay;
pub mod mediafoundation;
pub mod mpv;
pub mod vlc;

use async_trait::async_trait;
use podliner_proto::PlayerCapabilities;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no engine satisfies capability Play")]
    Unavailable,
    #[error("operation not supported by the active engine")]
    OperationNotSupported,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("engine IPC error: {0}")]
    Ipc(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Vlc,
    Mpv,
    MediaFoundation,
    FFplay,
}

impl EngineKind {
    /// Selection order for `auto` (§4.1 Engine selection).
    pub const AUTO_ORDER: &'static [EngineKind] = &[
        EngineKind::Vlc,
        EngineKind::Mpv,
        #[cfg(windows)]
        EngineKind::MediaFoundation,
        EngineKind::FFplay,
    ];

    /// The capability floor each engine must honour (§4.1 table).
    pub fn capability_floor(self) -> PlayerCapabilities {
        use PlayerCapabilities as C;
        match self {
            EngineKind::Vlc | EngineKind::Mpv => {
                C::PLAY | C::PAUSE | C::STOP | C::SEEK | C::VOLUME | C::SPEED | C::NETWORK | C::LOCAL
            }
            EngineKind::MediaFoundation => {
                C::PLAY | C::PAUSE | C::STOP | C::SEEK | C::VOLUME | C::NETWORK | C::LOCAL
            }
            // Seek is "coarse" (achieved by restarting the process at a new
            // start offset) but is functionally available; Volume/Speed are
            // start-only — they take effect on the next restart, not live,
            // so they are not advertised as a runtime capability here.
            EngineKind::FFplay => C::PLAY | C::STOP | C::SEEK | C::NETWORK | C::LOCAL,
        }
    }

    pub fn as_preference_str(self) -> &'static str {
        match self {
            EngineKind::Vlc => "vlc",
            EngineKind::Mpv => "mpv",
            EngineKind::MediaFoundation => "mediafoundation",
            EngineKind::FFplay => "ffplay",
        }
    }

    pub fn from_preference_str(s: &str) -> Option<EngineKind> {
        match s {
            "vlc" | "libvlc" => Some(EngineKind::Vlc),
            "mpv" => Some(EngineKind::Mpv),
            "mediafoundation" => Some(EngineKind::MediaFoundation),
            "ffplay" => Some(EngineKind::FFplay),
            _ => None,
        }
    }
}

/// A state change pushed out of the engine, independent of the Coordinator's
/// own snapshot fan-out — consumed by `Swappable` to track liveness.
#[derive(Debug, Clone)]
pub struct EngineStateChanged {
    pub position_ms: i64,
    pub length_ms: Option<i64>,
    pub is_playing: bool,
}

/// The audio engine contract (§4.1). Object-safe via `async_trait` so a
/// `Swappable` can hold `Box<dyn AudioEngine>` and swap it at runtime.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    fn kind(&self) -> EngineKind;
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> PlayerCapabilities;

    async fn play(&self, url: &str, start_ms: Option<i64>) -> Result<(), EngineError>;
    async fn stop(&self) -> Result<(), EngineError>;
    async fn toggle_pause(&self) -> Result<(), EngineError>;
    async fn seek_to(&self, position_ms: i64) -> Result<(), EngineError>;
    async fn seek_relative(&self, delta_ms: i64) -> Result<(), EngineError>;
    async fn set_volume(&self, volume_0_100: u8) -> Result<(), EngineError>;
    async fn set_speed(&self, speed: f32) -> Result<(), EngineError>;

    /// Current position/length/playing, best-effort (used by the Coordinator's
    /// progress tick, not pushed).
    async fn poll_state(&self) -> Result<EngineStateChanged, EngineError>;

    /// Probe whether this engine's backend is available on this machine
    /// (binary found, IPC reachable) without starting playback.
    async fn is_available(&self) -> bool;
}

fn reject(cap: PlayerCapabilities, floor: PlayerCapabilities) -> Result<(), EngineError> {
    if floor.contains(cap) {
        Ok(())
    } else {
        Err(EngineError::OperationNotSupported)
    }
}

/// Wraps a current engine and exposes the same contract, allowing the
/// delegate to be replaced live while preserving Volume/Speed (§4.1
/// Swappable player).
pub struct Swappable {
    current: tokio::sync::RwLock<Box<dyn AudioEngine>>,
    volume_0_100: std::sync::atomic::AtomicU8,
    speed_bits: std::sync::atomic::AtomicU32,
    state_tx: broadcast::Sender<EngineStateChanged>,
}

impl Swappable {
    pub fn new(initial: Box<dyn AudioEngine>) -> Self {
        let (state_tx, _) = broadcast::channel(32);
        Self {
            current: tokio::sync::RwLock::new(initial),
            volume_0_100: std::sync::atomic::AtomicU8::new(80),
            speed_bits: std::sync::atomic::AtomicU32::new(1.0f32.to_bits()),
            state_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineStateChanged> {
        self.state_tx.subscribe()
    }

    pub async fn kind(&self) -> EngineKind {
        self.current.read().await.kind()
    }

    pub async fn capabilities(&self) -> PlayerCapabilities {
        self.current.read().await.capabilities()
    }

    /// Atomically swaps the delegate: stops the old engine, installs `next`,
    /// then re-applies the persisted Volume and Speed. A write-lock is held
    /// for the whole operation so an in-flight `seek_to`/etc. on the old
    /// engine either completes before the swap starts or is observed never
    /// to have started — never both delivered (§4.1 Swappable player).
    pub async fn swap_to(&self, next: Box<dyn AudioEngine>) -> Result<(), EngineError> {
        let mut guard = self.current.write().await;
        let _ = guard.stop().await;
        *guard = next;
        let volume = self.volume_0_100.load(std::sync::atomic::Ordering::Relaxed);
        let speed = f32::from_bits(self.speed_bits.load(std::sync::atomic::Ordering::Relaxed));
        let _ = guard.set_volume(volume).await;
        let _ = guard.set_speed(speed).await;
        Ok(())
    }

    pub async fn play(&self, url: &str, start_ms: Option<i64>) -> Result<(), EngineError> {
        let guard = self.current.read().await;
        reject(PlayerCapabilities::PLAY, guard.capabilities())?;
        guard.play(url, start_ms).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.current.read().await.stop().await
    }

    pub async fn toggle_pause(&self) -> Result<(), EngineError> {
        let guard = self.current.read().await;
        reject(PlayerCapabilities::PAUSE, guard.capabilities())?;
        guard.toggle_pause().await
    }

    pub async fn seek_to(&self, position_ms: i64) -> Result<(), EngineError> {
        let guard = self.current.read().await;
        reject(PlayerCapabilities::SEEK, guard.capabilities())?;
        guard.seek_to(position_ms).await
    }

    pub async fn seek_relative(&self, delta_ms: i64) -> Result<(), EngineError> {
        let guard = self.current.read().await;
        reject(PlayerCapabilities::SEEK, guard.capabilities())?;
        guard.seek_relative(delta_ms).await
    }

    pub async fn set_volume(&self, volume_0_100: u8) -> Result<(), EngineError> {
        let volume = volume_0_100.min(100);
        self.volume_0_100
            .store(volume, std::sync::atomic::Ordering::Relaxed);
        let guard = self.current.read().await;
        reject(PlayerCapabilities::VOLUME, guard.capabilities())?;
        guard.set_volume(volume).await
    }

    pub async fn set_speed(&self, speed: f32) -> Result<(), EngineError> {
        let speed = speed.clamp(0.25, 3.0);
        self.speed_bits
            .store(speed.to_bits(), std::sync::atomic::Ordering::Relaxed);
        let guard = self.current.read().await;
        reject(PlayerCapabilities::SPEED, guard.capabilities())?;
        guard.set_speed(speed).await
    }

    pub async fn poll_state(&self) -> Result<EngineStateChanged, EngineError> {
        self.current.read().await.poll_state().await
    }
}

/// Picks the first available engine per `preference`, falling back through
/// `EngineKind::AUTO_ORDER` when the preference is `auto` or unavailable
/// (§4.1 Engine selection). Returns the selected kind alongside the boxed
/// engine so callers can record the effective engine for diagnostics.
pub async fn select_engine(
    preference: Option<EngineKind>,
) -> Result<(EngineKind, Box<dyn AudioEngine>), EngineError> {
    let mut order: Vec<EngineKind> = Vec::new();
    if let Some(pref) = preference {
        order.push(pref);
    }
    order.extend(EngineKind::AUTO_ORDER.iter().copied());

    let mut tried = std::collections::HashSet::new();
    for kind in order {
        if !tried.insert(kind) {
            continue;
        }
        if let Some(engine) = try_construct(kind).await {
            if engine.is_available().await {
                return Ok((kind, engine));
            }
        }
    }
    Err(EngineError::Unavailable)
}

/// Builds `kind` and probes its availability, for an explicit (non-`auto`)
/// engine request such as the `:engine` command (§4.4, §4.1).
pub async fn construct_if_available(kind: EngineKind) -> Option<Box<dyn AudioEngine>> {
    let engine = try_construct(kind).await?;
    if engine.is_available().await {
        Some(engine)
    } else {
        None
    }
}

async fn try_construct(kind: EngineKind) -> Option<Box<dyn AudioEngine>> {
    match kind {
        EngineKind::Vlc => vlc::VlcEngine::new().map(|e| Box::new(e) as Box<dyn AudioEngine>),
        EngineKind::Mpv => mpv::MpvEngine::new().map(|e| Box::new(e) as Box<dyn AudioEngine>),
        EngineKind::MediaFoundation => mediafoundation::MediaFoundationEngine::new()
            .map(|e| Box::new(e) as Box<dyn AudioEngine>),
        EngineKind::FFplay => {
            ffplay::FFplayEngine::new().map(|e| Box::new(e) as Box<dyn AudioEngine>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_floor_matches_spec_table() {
        assert!(EngineKind::Vlc.capability_floor().contains(PlayerCapabilities::SPEED));
        assert!(EngineKind::Mpv.capability_floor().contains(PlayerCapabilities::SEEK));
        assert!(!EngineKind::MediaFoundation
            .capability_floor()
            .contains(PlayerCapabilities::SPEED));
        assert!(!EngineKind::FFplay.capability_floor().contains(PlayerCapabilities::PAUSE));
        assert!(EngineKind::FFplay.capability_floor().contains(PlayerCapabilities::SEEK));
        assert!(!EngineKind::FFplay.capability_floor().contains(PlayerCapabilities::VOLUME));
    }

    #[test]
    fn preference_str_roundtrips() {
        for kind in [EngineKind::Vlc, EngineKind::Mpv, EngineKind::FFplay] {
            let s = kind.as_preference_str();
            assert_eq!(EngineKind::from_preference_str(s), Some(kind));
        }
    }
}
