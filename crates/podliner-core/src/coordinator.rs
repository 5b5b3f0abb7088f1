//! Playback Coordinator — session-scoped playback orchestration, progress
//! persistence, auto-advance, stall detection, end-of-stream detection, and
//! snapshot fan-out to observers (§4.2).
//!
//! All session state lives behind one `Mutex` here; the progress tick is
//! driven by an external timer that feeds in the engine's current
//! `PlayerState`. Background tasks (stall watchdog, resume seek) are guarded
//! by `SessionId` rather than cancelled on handle, since a session id bump is
//! already sufficient to make a stale task's check a no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use podliner_proto::model::{Episode, EpisodeId, PlaybackSnapshot, PlaybackStatus, PlayerState};
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use crate::engine::Swappable;
use crate::stores::{ConfigStore, LibraryStore};

const STALL_WATCHDOG: Duration = Duration::from_secs(5);
const RESUME_SEEK_DELAY: Duration = Duration::from_millis(350);
const VIEW_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const SAVE_REQUEST_INTERVAL: Duration = Duration::from_secs(3);
const AUTO_ADVANCE_RATE_LIMIT: Duration = Duration::from_millis(500);

const LONG_EPISODE_FLOOR_MS: i64 = 60_000;

/// Fan-out events (§4.2 Events). Consumers (UI, MPRIS, sync) subscribe via
/// `PlaybackCoordinator::subscribe`; a lagging or dropped receiver never
/// affects playback.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    SnapshotAvailable(PlaybackSnapshot),
    StatusChanged(PlaybackStatus),
    AutoAdvanceSuggested(Episode),
    QueueChanged,
}

struct Session {
    session_id: u64,
    episode_id: Option<EpisodeId>,
    status: PlaybackStatus,
    end_handled: bool,
    last_view_refresh: Option<Instant>,
    last_save_request: Option<Instant>,
    last_autoadvance_at: Option<Instant>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            session_id: 0,
            episode_id: None,
            status: PlaybackStatus::Idle,
            end_handled: false,
            last_view_refresh: None,
            last_save_request: None,
            last_autoadvance_at: None,
        }
    }
}

pub struct PlaybackCoordinator {
    engine: Arc<Swappable>,
    library: Arc<LibraryStore>,
    config: Arc<ConfigStore>,
    events: broadcast::Sender<CoordinatorEvent>,
    session: Mutex<Session>,
}

impl PlaybackCoordinator {
    pub fn new(engine: Arc<Swappable>, library: Arc<LibraryStore>, config: Arc<ConfigStore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            engine,
            library,
            config,
            events,
            session: Mutex::new(Session::default()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.events.send(event);
    }

    pub async fn current_status(&self) -> PlaybackStatus {
        self.session.lock().await.status
    }

    pub async fn current_episode(&self) -> Option<EpisodeId> {
        self.session.lock().await.episode_id
    }

    /// Begins a new session for `episode_id` (§4.2 `Play(ep)` transition):
    /// bumps the SessionId, trims the queue up to and including the episode
    /// if it's queued, starts playback, and arms the stall watchdog and
    /// resume-seek one-shot.
    pub async fn play(self: &Arc<Self>, episode_id: EpisodeId) -> anyhow::Result<()> {
        let episode = self
            .library
            .get()
            .await
            .find_episode(episode_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown episode {episode_id}"))?;

        self.trim_queue_to(episode_id).await;

        let session_id = {
            let mut session = self.session.lock().await;
            session.session_id += 1;
            session.episode_id = Some(episode_id);
            session.status = PlaybackStatus::Loading;
            session.end_handled = false;
            session.session_id
        };
        self.emit(CoordinatorEvent::StatusChanged(PlaybackStatus::Loading));

        self.library
            .mutate(|lib| lib.history_push(episode_id, Utc::now()))
            .await;
        self.library.request_save(false).await;

        self.engine.play(&episode.audio_url, None).await?;

        self.spawn_watchdog(session_id);
        self.spawn_resume_seek(session_id, &episode);

        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.engine.stop().await?;
        let mut session = self.session.lock().await;
        session.session_id += 1;
        session.episode_id = None;
        session.status = PlaybackStatus::Idle;
        drop(session);
        self.emit(CoordinatorEvent::StatusChanged(PlaybackStatus::Idle));
        Ok(())
    }

    pub async fn toggle_pause(&self) -> anyhow::Result<()> {
        self.engine.toggle_pause().await?;
        Ok(())
    }

    pub async fn seek_to(&self, position_ms: i64) -> anyhow::Result<()> {
        self.engine.seek_to(position_ms).await?;
        Ok(())
    }

    pub async fn seek_relative(&self, delta_ms: i64) -> anyhow::Result<()> {
        self.engine.seek_relative(delta_ms).await?;
        Ok(())
    }

    async fn trim_queue_to(&self, episode_id: EpisodeId) {
        let queued = self.library.get().await.queue.iter().any(|id| *id == episode_id);
        if !queued {
            return;
        }
        self.library
            .mutate(|lib| {
                while let Some(front) = lib.queue.first().copied() {
                    lib.queue.remove(0);
                    if front == episode_id {
                        break;
                    }
                }
            })
            .await;
        self.emit(CoordinatorEvent::QueueChanged);
        self.library.request_save(false).await;
    }

    fn spawn_watchdog(self: &Arc<Self>, session_id: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STALL_WATCHDOG).await;
            let mut session = this.session.lock().await;
            if session.session_id == session_id && session.status == PlaybackStatus::Loading {
                session.status = PlaybackStatus::SlowNetwork;
                drop(session);
                this.emit(CoordinatorEvent::StatusChanged(PlaybackStatus::SlowNetwork));
            }
        });
    }

    /// Schedules the resume-seek one-shot (§4.2 Resume policy) if the
    /// episode's stored position clears the eligibility window.
    fn spawn_resume_seek(self: &Arc<Self>, session_id: u64, episode: &Episode) {
        let pos_ms = episode.progress.last_pos_ms;
        let eligible = if episode.duration_ms > 0 {
            pos_ms >= 5_000 && pos_ms <= episode.duration_ms - 10_000
        } else {
            pos_ms >= 5_000
        };
        if !eligible {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RESUME_SEEK_DELAY).await;
            if this.session.lock().await.session_id != session_id {
                return;
            }
            let _ = this.engine.seek_to(pos_ms).await;
        });
    }

    /// Progress tick (§4.2), invoked at most once per UI frame by an
    /// external timer with the engine's current `PlayerState`.
    pub async fn progress_tick(self: &Arc<Self>, state: &PlayerState) {
        let now = Instant::now();
        let (session_id, episode_id, status, end_handled) = {
            let session = self.session.lock().await;
            (session.session_id, session.episode_id, session.status, session.end_handled)
        };
        let Some(episode_id) = episode_id else { return };
        if status == PlaybackStatus::Idle {
            return;
        }

        let Some(episode) = self.library.get().await.find_episode(episode_id).cloned() else {
            return;
        };

        // Step 1
        let pos_ms = state.position_ms.max(0);
        let eff_len_ms = state
            .length_ms
            .unwrap_or(0)
            .max(episode.duration_ms)
            .max(pos_ms);

        // Loading/SlowNetwork -> Playing on first observed progress.
        if matches!(status, PlaybackStatus::Loading | PlaybackStatus::SlowNetwork) {
            let observed = pos_ms > 0 || (state.is_playing && eff_len_ms > 0);
            if observed {
                self.set_status(session_id, PlaybackStatus::Playing).await;
            }
        }

        // Step 2: persist duration/progress.
        self.library
            .mutate(|lib| {
                if let Some(ep) = lib.find_episode_mut(episode_id) {
                    ep.duration_ms = ep.duration_ms.max(eff_len_ms);
                    ep.progress.last_pos_ms = pos_ms;
                    ep.clamp_progress();
                }
            })
            .await;

        // Step 3: snapshot.
        let snapshot = PlaybackSnapshot::from(
            session_id,
            Some(episode_id),
            pos_ms,
            eff_len_ms,
            state.is_playing,
            state.speed,
            Utc::now(),
        );
        self.emit(CoordinatorEvent::SnapshotAvailable(snapshot));

        // Step 4: played mark.
        self.maybe_mark_played(episode_id, pos_ms, eff_len_ms).await;

        // Step 5: end detection.
        if !end_handled && detect_end(state.length_ms, eff_len_ms, pos_ms, state.is_playing) {
            self.handle_end(session_id, episode_id).await;
        }

        // Step 6: throttle.
        let (view_due, save_due) = {
            let session = self.session.lock().await;
            (
                session
                    .last_view_refresh
                    .map(|t| now.duration_since(t) >= VIEW_REFRESH_INTERVAL)
                    .unwrap_or(true),
                session
                    .last_save_request
                    .map(|t| now.duration_since(t) >= SAVE_REQUEST_INTERVAL)
                    .unwrap_or(true),
            )
        };
        if view_due || save_due {
            let mut session = self.session.lock().await;
            if view_due {
                session.last_view_refresh = Some(now);
            }
            if save_due {
                session.last_save_request = Some(now);
            }
        }
        if save_due {
            self.library.request_save(false).await;
        }
    }

    async fn set_status(&self, session_id: u64, status: PlaybackStatus) {
        let mut session = self.session.lock().await;
        if session.session_id != session_id || session.status == status {
            return;
        }
        session.status = status;
        drop(session);
        self.emit(CoordinatorEvent::StatusChanged(status));
    }

    /// Played mark (§4.2): thresholds tighten for episodes at or under a
    /// minute. Idempotent — only flips `manually_marked_played` once.
    async fn maybe_mark_played(&self, episode_id: EpisodeId, pos_ms: i64, eff_len_ms: i64) {
        if eff_len_ms <= 0 {
            return;
        }
        let ratio = pos_ms as f64 / eff_len_ms as f64;
        let remaining_ms = eff_len_ms - pos_ms;
        let threshold_met = if eff_len_ms > LONG_EPISODE_FLOOR_MS {
            ratio >= 0.90 || remaining_ms <= 30_000
        } else {
            ratio >= 0.98 || remaining_ms <= 5_000
        };
        if !threshold_met {
            return;
        }
        self.library
            .mutate(|lib| {
                if let Some(ep) = lib.find_episode_mut(episode_id) {
                    if !ep.manually_marked_played {
                        ep.manually_marked_played = true;
                        ep.progress.last_played_at = Some(Utc::now());
                    }
                }
            })
            .await;
    }

    async fn handle_end(self: &Arc<Self>, session_id: u64, episode_id: EpisodeId) {
        {
            let mut session = self.session.lock().await;
            if session.session_id != session_id {
                return;
            }
            session.end_handled = true;
            session.status = PlaybackStatus::Ended;
        }
        self.emit(CoordinatorEvent::StatusChanged(PlaybackStatus::Ended));

        let now = Instant::now();
        let due = {
            let mut session = self.session.lock().await;
            let due = session
                .last_autoadvance_at
                .map(|t| now.duration_since(t) >= AUTO_ADVANCE_RATE_LIMIT)
                .unwrap_or(true);
            if due {
                session.last_autoadvance_at = Some(now);
            }
            due
        };
        if !due {
            return;
        }
        if let Some(next) = self.select_next_episode(episode_id).await {
            self.emit(CoordinatorEvent::AutoAdvanceSuggested(next));
        }
    }

    /// Next-episode selection (§4.2): queue head first (skipping stale
    /// entries), then same-feed order by `PubDate DESC` with optional
    /// unplayed-only filtering and wrap-around.
    async fn select_next_episode(&self, current_episode_id: EpisodeId) -> Option<Episode> {
        loop {
            let popped = self.library.mutate(|lib| lib.queue_pop_front()).await;
            match popped {
                Some(id) => {
                    self.emit(CoordinatorEvent::QueueChanged);
                    if let Some(ep) = self.library.get().await.find_episode(id) {
                        return Some(ep.clone());
                    }
                    continue;
                }
                None => break,
            }
        }

        let config = self.config.get().await;
        let library = self.library.get().await;
        let current = library.find_episode(current_episode_id)?;
        let feed_id = current.feed_id;

        let mut feed_episodes: Vec<&Episode> = library.episodes_for_feed(feed_id);
        feed_episodes.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        let pos = feed_episodes.iter().position(|e| e.id == current_episode_id)?;

        let pick = |slice: &[&Episode]| -> Option<EpisodeId> {
            if config.view_defaults.unplayed_only {
                slice.iter().find(|e| !e.is_played()).map(|e| e.id)
            } else {
                slice.first().map(|e| e.id)
            }
        };

        if let Some(id) = pick(&feed_episodes[pos + 1..]) {
            return library.find_episode(id).cloned();
        }
        if config.view_defaults.wrap_advance {
            if let Some(id) = pick(&feed_episodes[..pos]) {
                return library.find_episode(id).cloned();
            }
        }
        None
    }
}

/// End detection (§4.2), preferring the engine-reported length when known.
fn detect_end(engine_length_ms: Option<i64>, eff_len_ms: i64, pos_ms: i64, is_playing: bool) -> bool {
    if let Some(length) = engine_length_ms.filter(|l| *l > 0) {
        let remaining = length - pos_ms;
        pos_ms as f64 / length as f64 >= 0.995
            || (!is_playing && remaining <= 2_000)
            || (!is_playing && pos_ms >= length - 250)
    } else if eff_len_ms > 0 {
        let remaining = eff_len_ms - pos_ms;
        pos_ms as f64 / eff_len_ms as f64 >= 0.995 || (!is_playing && remaining <= 500)
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_end_uses_engine_length_ratio() {
        assert!(detect_end(Some(100_000), 100_000, 99_600, true));
        assert!(!detect_end(Some(100_000), 100_000, 50_000, true));
    }

    #[test]
    fn detect_end_falls_back_to_effective_length_when_stopped_near_end() {
        assert!(detect_end(None, 60_000, 59_600, false));
        assert!(!detect_end(None, 60_000, 30_000, true));
    }

    #[test]
    fn detect_end_treats_stopped_near_engine_length_as_ended() {
        assert!(detect_end(Some(100_000), 100_000, 99_900, false));
    }
}
