//! gPodder Sync Engine: subscription delta pull/push, queued episode-action
//! upload, OS-keyring credential storage, and the snapshot observer that
//! turns playback sessions into play actions (§4.8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use podliner_proto::gpodder::{
    EpisodeAction, SubscriptionChanges, SubscriptionUpdate, UploadEpisodeActionsResponse,
};
use podliner_proto::sync_config::SyncConfig;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::coordinator::CoordinatorEvent;
use crate::error::SyncError;
use crate::stores::LibraryStore;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const KEYRING_SERVICE: &str = "podliner";

pub struct SyncService {
    library: Arc<LibraryStore>,
    http: reqwest::Client,
    config: Mutex<SyncConfig>,
    offline: AtomicBool,
    last_session: Mutex<Option<(u64, podliner_proto::model::EpisodeId, i64, i64)>>,
}

impl SyncService {
    /// `start_offline` seeds the offline flag from `AppConfig::start_offline`
    /// (§6), the user's persisted "start in offline mode" preference — kept
    /// distinct from "not yet configured", which surfaces as
    /// `SyncError::NotConfigured` from `require_configured` instead.
    pub fn new(library: Arc<LibraryStore>, start_offline: bool) -> Arc<Self> {
        let config = SyncConfig::load_or_default();
        Arc::new(Self {
            library,
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            config: Mutex::new(config),
            offline: AtomicBool::new(start_offline),
            last_session: Mutex::new(None),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    /// Stores credentials and configuration, preferring the OS keyring and
    /// falling back to a plaintext field with a one-time warning (§4.8
    /// Credential storage).
    pub async fn login(&self, server_url: String, username: String, password: String) -> Result<(), SyncError> {
        let mut cfg = self.config.lock().await;
        cfg.server_url = Some(server_url);
        cfg.username = Some(username.clone());

        match keyring_entry(&username).and_then(|entry| entry.set_password(&password).map_err(|e| e.to_string())) {
            Ok(()) => {
                cfg.password_plaintext = None;
                cfg.credential_fallback_warned = false;
            }
            Err(e) => {
                warn!("keyring unavailable, storing credential in plaintext: {}", e);
                cfg.password_plaintext = Some(password);
                cfg.credential_fallback_warned = true;
            }
        }

        cfg.save().map_err(|e| SyncError::Protocol(e.to_string()))?;
        self.offline.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn password(&self, cfg: &SyncConfig) -> Option<String> {
        if let Some(username) = &cfg.username {
            if let Ok(entry) = keyring_entry(username) {
                if let Ok(password) = entry.get_password() {
                    return Some(password);
                }
            }
        }
        cfg.password_plaintext.clone()
    }

    fn require_configured(cfg: &SyncConfig) -> Result<(&str, &str), SyncError> {
        let server = cfg.server_url.as_deref().ok_or(SyncError::NotConfigured)?;
        let user = cfg.username.as_deref().ok_or(SyncError::NotConfigured)?;
        Ok((server, user))
    }

    /// Pulls the subscription delta since the stored timestamp and applies
    /// it to the library (§4.8 Pull).
    pub async fn pull(&self) -> Result<(), SyncError> {
        if self.is_offline() {
            return Err(SyncError::Offline);
        }
        let mut cfg = self.config.lock().await;
        let (server, user) = Self::require_configured(&cfg)?;
        let password = self.password(&cfg).await;
        let url = format!(
            "{server}/api/2/subscriptions/{user}/{device}.json?since={since}",
            device = cfg.device_id,
            since = cfg.subs_timestamp,
        );

        let mut request = self.http.get(&url);
        if let Some(password) = &password {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await.map_err(map_reqwest_err)?;
        if !response.status().is_success() {
            return Err(status_to_error(response.status()));
        }
        let changes: SubscriptionChanges = response.json().await.map_err(map_reqwest_err)?;

        self.library
            .mutate(|lib| {
                for url in &changes.add {
                    let already_present = lib
                        .feeds
                        .iter()
                        .any(|f| f.url.eq_ignore_ascii_case(url));
                    if !already_present {
                        lib.feeds.push(podliner_proto::model::Feed::new(url.clone()));
                    }
                }
                for url in &changes.remove {
                    if let Some(feed) = lib
                        .feeds
                        .iter()
                        .find(|f| f.url.eq_ignore_ascii_case(url))
                        .map(|f| f.id)
                    {
                        lib.remove_feed(feed);
                    }
                }
            })
            .await;
        self.library.request_save(false).await;

        cfg.subs_timestamp = changes.timestamp;
        cfg.last_known_server_feeds = self
            .library
            .get()
            .await
            .feeds
            .iter()
            .map(|f| f.url.clone())
            .collect();
        cfg.save().map_err(|e| SyncError::Protocol(e.to_string()))?;
        Ok(())
    }

    /// Diffs the current feed set against `LastKnownServerFeeds`, pushes the
    /// delta, then uploads any pending episode actions (§4.8 Push).
    pub async fn push(&self) -> Result<(), SyncError> {
        if self.is_offline() {
            return Err(SyncError::Offline);
        }
        let mut cfg = self.config.lock().await;
        let (server, user) = Self::require_configured(&cfg)?;
        let password = self.password(&cfg).await;

        let current: Vec<String> = self.library.get().await.feeds.iter().map(|f| f.url.clone()).collect();
        let known = &cfg.last_known_server_feeds;
        let add: Vec<String> = current.iter().filter(|u| !known.contains(u)).cloned().collect();
        let remove: Vec<String> = known.iter().filter(|u| !current.contains(u)).cloned().collect();

        if !add.is_empty() || !remove.is_empty() {
            let url = format!(
                "{server}/api/2/subscriptions/{user}/{device}.json",
                device = cfg.device_id
            );
            let mut request = self.http.post(&url).json(&SubscriptionUpdate {
                add: add.clone(),
                remove: remove.clone(),
            });
            if let Some(password) = &password {
                request = request.basic_auth(user, Some(password));
            }
            let response = request.send().await.map_err(map_reqwest_err)?;
            if !response.status().is_success() {
                return Err(status_to_error(response.status()));
            }
            let body: podliner_proto::gpodder::SubscriptionUpdateResponse =
                response.json().await.map_err(map_reqwest_err)?;
            cfg.subs_timestamp = body.timestamp;
            cfg.last_known_server_feeds = current;
        }

        if !cfg.pending_actions.is_empty() {
            let url = format!(
                "{server}/api/2/episodes/{user}.json",
                user = user
            );
            let mut request = self.http.post(&url).json(&cfg.pending_actions);
            if let Some(password) = &password {
                request = request.basic_auth(user, Some(password));
            }
            let response = request.send().await.map_err(map_reqwest_err)?;
            if !response.status().is_success() {
                return Err(status_to_error(response.status()));
            }
            let body: UploadEpisodeActionsResponse = response.json().await.map_err(map_reqwest_err)?;
            cfg.actions_timestamp = body.timestamp;
            cfg.pending_actions.clear();
        }

        cfg.save().map_err(|e| SyncError::Protocol(e.to_string()))?;
        Ok(())
    }

    /// Appends a play action to the pending queue (§4.8 Offline: actions
    /// accumulate until the next successful push).
    async fn queue_play_action(&self, feed_url: String, episode_url: String, position_ms: i64, total_ms: i64) {
        let mut cfg = self.config.lock().await;
        let device_id = cfg.device_id.clone();
        let mut action = EpisodeAction::new_play(
            feed_url,
            episode_url,
            device_id,
            (position_ms / 1000).max(0) as u32,
            if total_ms > 0 { Some((total_ms / 1000) as u32) } else { None },
        );
        action.timestamp = Some(Utc::now().naive_utc());
        cfg.pending_actions.push(action);
    }

    /// Drains coordinator events, queuing play actions on session change and
    /// on end-of-stream (§4.8 Snapshot observer). Runs until the sender side
    /// is dropped.
    pub fn spawn_snapshot_observer(self: &Arc<Self>, mut events: broadcast::Receiver<CoordinatorEvent>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                match event {
                    CoordinatorEvent::SnapshotAvailable(snap) => {
                        let Some(episode_id) = snap.episode_id else { continue };
                        let mut last = this.last_session.lock().await;
                        let changed_session = last.map(|(sid, ..)| sid != snap.session_id).unwrap_or(false);
                        if changed_session {
                            if let Some((_, prev_episode, prev_pos, prev_len)) = *last {
                                this.queue_episode_action(prev_episode, prev_pos, prev_len).await;
                            }
                        }
                        *last = Some((snap.session_id, episode_id, snap.position_ms, snap.length_ms));
                    }
                    CoordinatorEvent::StatusChanged(podliner_proto::model::PlaybackStatus::Ended) => {
                        let last = *this.last_session.lock().await;
                        if let Some((_, episode_id, pos, len)) = last {
                            this.queue_episode_action(episode_id, pos, len).await;
                        }
                    }
                    _ => {}
                }
            }
        });
    }

    async fn queue_episode_action(&self, episode_id: podliner_proto::model::EpisodeId, pos_ms: i64, len_ms: i64) {
        let library = self.library.get().await;
        let Some(episode) = library.find_episode(episode_id) else { return };
        let Some(feed) = library.find_feed(episode.feed_id) else { return };
        self.queue_play_action(feed.url.clone(), episode.audio_url.clone(), pos_ms, len_ms)
            .await;
        info!("queued play action for {}", episode.audio_url);
    }
}

fn keyring_entry(username: &str) -> Result<keyring::Entry, String> {
    keyring::Entry::new(KEYRING_SERVICE, username).map_err(|e| e.to_string())
}

fn map_reqwest_err(e: reqwest::Error) -> SyncError {
    if e.is_timeout() || e.is_connect() {
        SyncError::Transient(e.to_string())
    } else {
        SyncError::Protocol(e.to_string())
    }
}

fn status_to_error(status: reqwest::StatusCode) -> SyncError {
    if status.as_u16() == 401 || status.as_u16() == 403 {
        SyncError::AuthFailed
    } else if status.is_server_error() {
        SyncError::Transient(format!("HTTP {status}"))
    } else {
        SyncError::Protocol(format!("HTTP {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_configured_rejects_missing_server_or_username() {
        let cfg = SyncConfig::default();
        assert!(matches!(
            SyncService::require_configured(&cfg),
            Err(SyncError::NotConfigured)
        ));
    }

    #[test]
    fn status_to_error_maps_auth_and_server_errors() {
        assert!(matches!(
            status_to_error(reqwest::StatusCode::UNAUTHORIZED),
            SyncError::AuthFailed
        ));
        assert!(matches!(
            status_to_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            SyncError::Transient(_)
        ));
    }
}
