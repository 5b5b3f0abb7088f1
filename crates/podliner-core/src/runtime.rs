//! Explicit wiring context replacing the ambient global state an older
//! design would reach for (§9 Design notes, "Global mutable state").
//!
//! Construction order is fixed: ConfigStore -> LibraryStore -> Engine ->
//! PlaybackCoordinator -> DownloadManager -> Dispatcher -> SyncService.
//! Each component only ever depends on ones constructed before it.

use std::sync::Arc;

use podliner_proto::model::EpisodeId;
use tracing::{info, warn};

use crate::coordinator::PlaybackCoordinator;
use crate::downloads::{DownloadJob, DownloadManager};
use crate::engine::{select_engine, EngineKind, Swappable};
use crate::sync::SyncService;
use crate::stores::{ConfigStore, LibraryStore};

pub struct Runtime {
    pub config: Arc<ConfigStore>,
    pub library: Arc<LibraryStore>,
    pub engine: Arc<Swappable>,
    pub coordinator: Arc<PlaybackCoordinator>,
    pub downloads: DownloadManager,
    pub sync: Arc<SyncService>,
}

impl Runtime {
    pub async fn bootstrap() -> anyhow::Result<Self> {
        let config = Arc::new(ConfigStore::load());
        let library = Arc::new(LibraryStore::load());

        let preference = EngineKind::from_preference_str(&config.get().await.engine_preference);
        let (effective_kind, initial_engine) = select_engine(preference).await?;
        info!("selected audio engine: {}", effective_kind.as_preference_str());
        if Some(effective_kind) != preference {
            config
                .mutate(|cfg| {
                    cfg.engine_preference = effective_kind.as_preference_str().to_string();
                })
                .await;
            config.request_save(false).await;
        }
        let engine = Arc::new(Swappable::new(initial_engine));

        let coordinator = PlaybackCoordinator::new(engine.clone(), library.clone(), config.clone());

        let downloads_library = library.clone();
        let downloads = DownloadManager::new(move |episode_id: EpisodeId| {
            let library = downloads_library.clone();
            resolve_download_job(&library, episode_id)
        });

        let start_offline = config.get().await.start_offline;
        let sync = SyncService::new(library.clone(), start_offline);
        sync.spawn_snapshot_observer(coordinator.subscribe());

        Ok(Self {
            config,
            library,
            engine,
            coordinator,
            downloads,
            sync,
        })
    }

    /// Best-effort teardown in reverse construction order: flush both
    /// stores so no pending debounced save is lost on exit.
    pub async fn shutdown(&self) {
        self.config.save_now().await;
        self.library.save_now().await;
        if let Err(e) = self.engine.stop().await {
            warn!("engine stop during shutdown failed: {}", e);
        }
    }
}

/// Resolves a queued episode id to a download job, synchronously reading
/// the library snapshot the download worker needs — kept free of async so
/// `DownloadManager::new`'s closure bound stays simple (§4.3 job_source).
fn resolve_download_job(
    library: &Arc<LibraryStore>,
    episode_id: EpisodeId,
) -> Option<DownloadJob> {
    let library = library.try_get()?;
    let episode = library.find_episode(episode_id)?;
    let feed = library.find_feed(episode.feed_id)?;

    let feed_title = if feed.title.is_empty() {
        feed.id.to_string()
    } else {
        feed.title.clone()
    };
    let episode_title = if episode.title.is_empty() {
        episode.id.to_string()
    } else {
        episode.title.clone()
    };
    let ext = guess_extension(&episode.audio_url);
    let dest_path = podliner_proto::sanitize::episode_download_path(
        &podliner_proto::platform::downloads_dir(),
        &feed_title,
        &episode_title,
        &ext,
    );

    Some(DownloadJob {
        episode_id,
        url: episode.audio_url.clone(),
        dest_path,
    })
}

fn guess_extension(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
        .and_then(|leaf| leaf.rsplit('.').next().map(str::to_string))
        .filter(|ext| ext.len() <= 5 && !ext.is_empty())
        .unwrap_or_else(|| "mp3".to_string())
}
