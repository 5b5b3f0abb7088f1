//! `Library`: the feeds/episodes/queue/history aggregate persisted to
//! `library.json` (§3, §4.5, §6).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::error::PersistError;
use crate::model::{
    Episode, EpisodeId, Feed, FeedId, HistoryEntry, HISTORY_DEFAULT_SIZE, HISTORY_MAX_SIZE,
    HISTORY_MIN_SIZE,
};
use crate::platform;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Library {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub feeds: Vec<Feed>,
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(default)]
    pub queue: Vec<EpisodeId>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_history_limit() -> usize {
    HISTORY_DEFAULT_SIZE
}

impl Default for Library {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            feeds: Vec::new(),
            episodes: Vec::new(),
            queue: Vec::new(),
            history: Vec::new(),
            history_limit: default_history_limit(),
        }
    }
}

impl Library {
    pub fn path() -> PathBuf {
        platform::library_path()
    }

    /// Loads the library from disk, clearing any orphan `.tmp` first and
    /// parsing as relaxed JSON (comments/trailing commas tolerated).
    /// Returns `PersistError` on a missing or corrupt file rather than
    /// swallowing it (§4.5, §7).
    pub fn load() -> Result<Self, PersistError> {
        let mut lib: Self = crate::atomic::read_relaxed_json(&Self::path())?;
        lib.normalise();
        Ok(lib)
    }

    /// Loads the library from disk, tolerating a missing or corrupt file by
    /// falling back to an empty library rather than failing startup (§4.5, §7).
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(lib) => lib,
            Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!("library load failed, using empty library: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        crate::atomic::write_json_atomic(&Self::path(), self)
    }

    pub fn find_feed(&self, id: FeedId) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.id == id)
    }

    pub fn find_episode(&self, id: EpisodeId) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.id == id)
    }

    pub fn find_episode_mut(&mut self, id: EpisodeId) -> Option<&mut Episode> {
        self.episodes.iter_mut().find(|e| e.id == id)
    }

    pub fn episodes_for_feed(&self, feed_id: FeedId) -> Vec<&Episode> {
        self.episodes.iter().filter(|e| e.feed_id == feed_id).collect()
    }

    /// Cascades removal of a feed to its episodes and any queue entries
    /// referencing them (§3 Lifecycle).
    pub fn remove_feed(&mut self, feed_id: FeedId) {
        let removed_ids: HashSet<EpisodeId> = self
            .episodes
            .iter()
            .filter(|e| e.feed_id == feed_id)
            .map(|e| e.id)
            .collect();
        self.feeds.retain(|f| f.id != feed_id);
        self.episodes.retain(|e| e.feed_id != feed_id);
        self.queue.retain(|id| !removed_ids.contains(id));
    }

    pub fn queue_push(&mut self, episode_id: EpisodeId) {
        self.queue.push(episode_id);
    }

    /// Removes the first matching entry. Net no-op when `episode_id` was
    /// not previously present (§8 round-trip law).
    pub fn queue_remove(&mut self, episode_id: EpisodeId) {
        if let Some(pos) = self.queue.iter().position(|id| *id == episode_id) {
            self.queue.remove(pos);
        }
    }

    pub fn queue_pop_front(&mut self) -> Option<EpisodeId> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }

    pub fn history_push(&mut self, episode_id: EpisodeId, at: chrono::DateTime<chrono::Utc>) {
        self.history.push(HistoryEntry { episode_id, at });
        let limit = self.history_limit.clamp(HISTORY_MIN_SIZE, HISTORY_MAX_SIZE);
        if self.history.len() > limit {
            let overflow = self.history.len() - limit;
            self.history.drain(0..overflow);
        }
    }

    /// Normalises the library after load (§4.5 Load contract):
    /// dedups feeds/episodes by id, discards orphan episodes, re-clamps
    /// progress, and filters queue/history against existing episode ids.
    pub fn normalise(&mut self) {
        self.history_limit = self
            .history_limit
            .clamp(HISTORY_MIN_SIZE, HISTORY_MAX_SIZE);

        let mut seen_feeds = HashSet::new();
        self.feeds.retain(|f| seen_feeds.insert(f.id));

        let valid_feed_ids: HashSet<FeedId> = self.feeds.iter().map(|f| f.id).collect();

        let mut seen_episodes = HashSet::new();
        self.episodes.retain(|e| {
            seen_episodes.insert(e.id) && valid_feed_ids.contains(&e.feed_id)
        });

        for ep in &mut self.episodes {
            if ep.duration_ms < 0 {
                ep.duration_ms = 0;
            }
            ep.clamp_progress();
        }

        let valid_episode_ids: HashSet<EpisodeId> = self.episodes.iter().map(|e| e.id).collect();
        self.queue.retain(|id| valid_episode_ids.contains(id));
        self.history
            .retain(|h| valid_episode_ids.contains(&h.episode_id));

        if self.history.len() > self.history_limit {
            let overflow = self.history.len() - self.history_limit;
            self.history.drain(0..overflow);
        }
    }

    /// `true` when every invariant in §8 holds; used by tests and as a
    /// post-load sanity assertion.
    pub fn is_consistent(&self) -> bool {
        let feed_ids: HashSet<FeedId> = self.feeds.iter().map(|f| f.id).collect();
        let episode_ids: HashMap<EpisodeId, &Episode> =
            self.episodes.iter().map(|e| (e.id, e)).collect();

        self.episodes.iter().all(|e| feed_ids.contains(&e.feed_id))
            && self
                .episodes
                .iter()
                .all(|e| e.progress.last_pos_ms >= 0
                    && (e.duration_ms == 0 || e.progress.last_pos_ms <= e.duration_ms))
            && self.queue.iter().all(|id| episode_ids.contains_key(id))
            && self
                .history
                .iter()
                .all(|h| episode_ids.contains_key(&h.episode_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Episode, Feed};

    fn feed_and_episode() -> (Feed, Episode) {
        let feed = Feed::new("https://example.com/feed.xml");
        let ep = Episode::new(feed.id, "https://example.com/ep1.mp3");
        (feed, ep)
    }

    #[test]
    fn normalise_discards_orphan_episodes() {
        let mut lib = Library::default();
        let orphan = Episode::new(uuid::Uuid::new_v4(), "https://x/ep.mp3");
        lib.episodes.push(orphan);
        lib.normalise();
        assert!(lib.episodes.is_empty());
    }

    #[test]
    fn normalise_filters_queue_and_history_against_episodes() {
        let (feed, ep) = feed_and_episode();
        let mut lib = Library::default();
        lib.feeds.push(feed);
        lib.episodes.push(ep.clone());
        lib.queue.push(ep.id);
        lib.queue.push(uuid::Uuid::new_v4());
        lib.history.push(HistoryEntry {
            episode_id: uuid::Uuid::new_v4(),
            at: chrono::Utc::now(),
        });
        lib.normalise();
        assert_eq!(lib.queue, vec![ep.id]);
        assert!(lib.history.is_empty());
        assert!(lib.is_consistent());
    }

    #[test]
    fn queue_push_then_remove_is_a_net_no_op() {
        let mut lib = Library::default();
        let id = uuid::Uuid::new_v4();
        assert!(!lib.queue.contains(&id));
        lib.queue_push(id);
        lib.queue_remove(id);
        assert!(!lib.queue.contains(&id));
    }

    #[test]
    fn remove_feed_cascades_to_episodes_and_queue() {
        let (feed, ep) = feed_and_episode();
        let mut lib = Library::default();
        lib.feeds.push(feed.clone());
        lib.episodes.push(ep.clone());
        lib.queue.push(ep.id);

        lib.remove_feed(feed.id);
        assert!(lib.find_feed(feed.id).is_none());
        assert!(lib.find_episode(ep.id).is_none());
        assert!(lib.queue.is_empty());
    }

    #[test]
    fn history_push_respects_limit() {
        let mut lib = Library::default();
        lib.history_limit = HISTORY_MIN_SIZE;
        let (feed, ep) = feed_and_episode();
        lib.feeds.push(feed);
        lib.episodes.push(ep.clone());
        for _ in 0..(HISTORY_MIN_SIZE + 5) {
            lib.history_push(ep.id, chrono::Utc::now());
        }
        assert_eq!(lib.history.len(), HISTORY_MIN_SIZE);
    }
}
