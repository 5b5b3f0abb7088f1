//! Core data model entities (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type FeedId = Uuid;
pub type EpisodeId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feed {
    pub id: FeedId,
    pub title: String,
    /// Absolute http(s) URL, canonicalised: lowercase host, fragment stripped.
    pub url: String,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Feed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            url: canonicalize_url(&url.into()),
            last_checked: None,
        }
    }
}

/// Lower-cases the host and strips any fragment, per §3's Feed invariant
/// and §10's Canonical URL glossary entry.
pub fn canonicalize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut u) => {
            u.set_fragment(None);
            if let Some(host) = u.host_str() {
                let host = host.to_lowercase();
                let _ = u.set_host(Some(&host));
            }
            u.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub last_pos_ms: i64,
    pub last_played_at: Option<DateTime<Utc>>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            last_pos_ms: 0,
            last_played_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Episode {
    pub id: EpisodeId,
    pub feed_id: FeedId,
    pub audio_url: String,
    pub rss_guid: Option<String>,
    pub title: String,
    pub pub_date: Option<DateTime<Utc>>,
    /// 0 = unknown; never negative.
    pub duration_ms: i64,
    pub description: String,
    pub saved: bool,
    pub manually_marked_played: bool,
    pub progress: Progress,
}

// `Progress` carries `f64`-free fields only, so deriving Eq on Episode is
// sound as long as duration_ms/last_pos_ms stay integral (they do, by type).
impl Eq for Progress {}

impl Episode {
    pub fn new(feed_id: FeedId, audio_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            feed_id,
            audio_url: audio_url.into(),
            rss_guid: None,
            title: String::new(),
            pub_date: None,
            duration_ms: 0,
            description: String::new(),
            saved: false,
            manually_marked_played: false,
            progress: Progress::default(),
        }
    }

    /// Clamps `Progress.last_pos_ms` into `[0, duration_ms]` when the
    /// duration is known (§3 Episode invariant).
    pub fn clamp_progress(&mut self) {
        if self.progress.last_pos_ms < 0 {
            self.progress.last_pos_ms = 0;
        }
        if self.duration_ms > 0 && self.progress.last_pos_ms > self.duration_ms {
            self.progress.last_pos_ms = self.duration_ms;
        }
    }

    pub fn is_played(&self) -> bool {
        self.manually_marked_played
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    None,
    Queued,
    Running,
    Verifying,
    Done,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadStatus {
    pub state: DownloadState,
    pub bytes_received: u64,
    pub total_bytes: Option<u64>,
    pub local_path: Option<std::path::PathBuf>,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self {
            state: DownloadState::None,
            bytes_received: 0,
            total_bytes: None,
            local_path: None,
            error: None,
            updated_at: None,
        }
    }
}

impl DownloadStatus {
    /// `state == Done` AND a non-empty `local_path` that exists on disk is
    /// the sole truth for "downloaded" (§4.3 Is-downloaded lookup); not a
    /// persisted Episode flag.
    pub fn is_downloaded(&self) -> bool {
        self.state == DownloadState::Done
            && self
                .local_path
                .as_ref()
                .is_some_and(|p| !p.as_os_str().is_empty() && p.exists())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub episode_id: EpisodeId,
    pub at: DateTime<Utc>,
}

pub const HISTORY_DEFAULT_SIZE: usize = 200;
pub const HISTORY_MIN_SIZE: usize = 10;
pub const HISTORY_MAX_SIZE: usize = 10_000;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PlayerCapabilities: u8 {
        const PLAY    = 0b0000_0001;
        const PAUSE   = 0b0000_0010;
        const STOP    = 0b0000_0100;
        const SEEK    = 0b0000_1000;
        const VOLUME  = 0b0001_0000;
        const SPEED   = 0b0010_0000;
        const NETWORK = 0b0100_0000;
        const LOCAL   = 0b1000_0000;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerState {
    pub episode_id: Option<EpisodeId>,
    pub is_playing: bool,
    pub volume_0_100: u8,
    pub speed: f32,
    pub position_ms: i64,
    pub length_ms: Option<i64>,
    pub capabilities: PlayerCapabilities,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            episode_id: None,
            is_playing: false,
            volume_0_100: 80,
            speed: 1.0,
            position_ms: 0,
            length_ms: None,
            capabilities: PlayerCapabilities::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    SlowNetwork,
    Playing,
    Ended,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        PlaybackStatus::Idle
    }
}

/// An immutable playback progress value, the single source of truth fanned
/// out to the UI, MPRIS, and sync observers (§4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlaybackSnapshot {
    pub session_id: u64,
    pub episode_id: Option<EpisodeId>,
    pub position_ms: i64,
    pub length_ms: i64,
    pub is_playing: bool,
    pub speed: f32,
    pub timestamp: DateTime<Utc>,
}

impl PlaybackSnapshot {
    /// Constructs a snapshot with all the clamping/defaulting invariants
    /// from §3 applied: non-negative position/length, speed defaulted to
    /// 1.0 when non-positive.
    pub fn from(
        session_id: u64,
        episode_id: Option<EpisodeId>,
        position_ms: i64,
        length_ms: i64,
        is_playing: bool,
        speed: f32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            episode_id,
            position_ms: position_ms.max(0),
            length_ms: length_ms.max(0),
            is_playing,
            speed: if speed > 0.0 { speed } else { 1.0 },
            timestamp,
        }
    }
}

/// Returns true when `snap` represents a seek relative to `prev` for the
/// same episode: not a small natural drift, not a pause, not a track
/// change (§8 invariant).
pub fn is_seek_detected(prev: &PlaybackSnapshot, snap: &PlaybackSnapshot) -> bool {
    if prev.episode_id != snap.episode_id {
        return false;
    }
    if !prev.is_playing {
        return false;
    }
    let elapsed = (snap.timestamp - prev.timestamp).num_milliseconds();
    if elapsed <= 0 || elapsed > 10_000 {
        return false;
    }
    let predicted = prev.position_ms + elapsed;
    (snap.position_ms - predicted).abs() > 1_500
}

/// Well-known synthetic feed ids addressing virtual views (§3).
pub mod virtual_feeds {
    use super::Uuid;

    pub const ALL: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0001);
    pub const SAVED: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0002);
    pub const DOWNLOADED: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0003);
    pub const HISTORY: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0004);
    pub const QUEUE: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0005);

    pub fn all() -> [Uuid; 5] {
        [ALL, SAVED, DOWNLOADED, HISTORY, QUEUE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_lowercases_host_and_strips_fragment() {
        assert_eq!(
            canonicalize_url("https://Example.COM/feed.xml#top"),
            "https://example.com/feed.xml"
        );
    }

    #[test]
    fn snapshot_from_clamps_and_defaults_speed() {
        let snap = PlaybackSnapshot::from(1, None, -5, -5, true, 0.0, Utc::now());
        assert_eq!(snap.position_ms, 0);
        assert_eq!(snap.length_ms, 0);
        assert_eq!(snap.speed, 1.0);
    }

    #[test]
    fn virtual_feed_ids_are_pairwise_distinct() {
        let ids = virtual_feeds::all();
        for i in 0..ids.len() {
            for j in 0..ids.len() {
                if i != j {
                    assert_ne!(ids[i], ids[j]);
                }
            }
        }
    }

    #[test]
    fn is_downloaded_requires_done_state_and_existing_file() {
        let mut status = DownloadStatus::default();
        assert!(!status.is_downloaded());
        status.state = DownloadState::Done;
        status.local_path = Some(std::path::PathBuf::from("/nonexistent/path/episode.mp3"));
        assert!(!status.is_downloaded());
    }

    #[test]
    fn seek_detected_ignores_episode_change() {
        let now = Utc::now();
        let prev = PlaybackSnapshot::from(1, Some(Uuid::new_v4()), 1000, 600_000, true, 1.0, now);
        let snap = PlaybackSnapshot::from(
            1,
            Some(Uuid::new_v4()),
            50_000,
            600_000,
            true,
            1.0,
            now + chrono::Duration::milliseconds(500),
        );
        assert!(!is_seek_detected(&prev, &snap));
    }

    #[test]
    fn seek_detected_ignores_when_not_playing() {
        let now = Utc::now();
        let ep = Uuid::new_v4();
        let prev = PlaybackSnapshot::from(1, Some(ep), 1000, 600_000, false, 1.0, now);
        let snap = PlaybackSnapshot::from(
            1,
            Some(ep),
            50_000,
            600_000,
            false,
            1.0,
            now + chrono::Duration::milliseconds(500),
        );
        assert!(!is_seek_detected(&prev, &snap));
    }
}
