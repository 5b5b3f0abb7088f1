//! Linux MPRIS bridge: projects playback snapshots onto
//! `org.mpris.MediaPlayer2(.Player)` D-Bus properties (§4, §6 MPRIS).

use std::sync::Arc;
use std::sync::Mutex;

use mpris_server::{
    zbus::fdo, LoopStatus, Metadata, PlaybackRate, PlaybackStatus as MprisPlaybackStatus,
    PlayerInterface, Property, RootInterface, Time, TrackId, Volume,
};
use podliner_core::Runtime;
use podliner_core::CoordinatorEvent;
use podliner_proto::model::{is_seek_detected, PlaybackSnapshot, PlaybackStatus};
use tracing::warn;

const ERROR: fdo::Error = fdo::Error::Failed(String::new());

pub struct Player {
    runtime: Arc<Runtime>,
    latest: Mutex<Option<PlaybackSnapshot>>,
}

impl Player {
    fn snapshot(&self) -> Option<PlaybackSnapshot> {
        *self.latest.lock().unwrap()
    }
}

impl RootInterface for Player {
    async fn raise(&self) -> fdo::Result<()> {
        Err(ERROR)
    }

    async fn quit(&self) -> fdo::Result<()> {
        Err(ERROR)
    }

    async fn can_quit(&self) -> fdo::Result<bool> {
        Ok(false)
    }

    async fn fullscreen(&self) -> fdo::Result<bool> {
        Ok(false)
    }

    async fn set_fullscreen(&self, _: bool) -> mpris_server::zbus::Result<()> {
        Ok(())
    }

    async fn can_set_fullscreen(&self) -> fdo::Result<bool> {
        Ok(false)
    }

    async fn can_raise(&self) -> fdo::Result<bool> {
        Ok(false)
    }

    async fn has_track_list(&self) -> fdo::Result<bool> {
        Ok(false)
    }

    async fn identity(&self) -> fdo::Result<String> {
        Ok("podliner".to_owned())
    }

    async fn desktop_entry(&self) -> fdo::Result<String> {
        Ok("podliner".to_owned())
    }

    async fn supported_uri_schemes(&self) -> fdo::Result<Vec<String>> {
        Ok(vec!["https".to_owned(), "http".to_owned()])
    }

    async fn supported_mime_types(&self) -> fdo::Result<Vec<String>> {
        Ok(vec!["audio/mpeg".to_owned(), "audio/mp4".to_owned()])
    }
}

impl PlayerInterface for Player {
    async fn next(&self) -> fdo::Result<()> {
        Err(ERROR)
    }

    async fn previous(&self) -> fdo::Result<()> {
        Err(ERROR)
    }

    async fn pause(&self) -> fdo::Result<()> {
        self.runtime.coordinator.toggle_pause().await.map_err(|_| ERROR)
    }

    async fn play_pause(&self) -> fdo::Result<()> {
        self.runtime.coordinator.toggle_pause().await.map_err(|_| ERROR)
    }

    async fn stop(&self) -> fdo::Result<()> {
        self.runtime.coordinator.stop().await.map_err(|_| ERROR)
    }

    async fn play(&self) -> fdo::Result<()> {
        self.runtime.coordinator.toggle_pause().await.map_err(|_| ERROR)
    }

    async fn seek(&self, offset: Time) -> fdo::Result<()> {
        self.runtime
            .coordinator
            .seek_relative(offset.as_micros() / 1_000)
            .await
            .map_err(|_| ERROR)
    }

    async fn set_position(&self, _track_id: TrackId, position: Time) -> fdo::Result<()> {
        self.runtime
            .coordinator
            .seek_to(position.as_micros() / 1_000)
            .await
            .map_err(|_| ERROR)
    }

    async fn open_uri(&self, _uri: String) -> fdo::Result<()> {
        Err(ERROR)
    }

    async fn playback_status(&self) -> fdo::Result<MprisPlaybackStatus> {
        Ok(match self.runtime.coordinator.current_status().await {
            PlaybackStatus::Playing | PlaybackStatus::Loading | PlaybackStatus::SlowNetwork => {
                MprisPlaybackStatus::Playing
            }
            PlaybackStatus::Idle | PlaybackStatus::Ended => MprisPlaybackStatus::Stopped,
        })
    }

    async fn loop_status(&self) -> fdo::Result<LoopStatus> {
        Ok(LoopStatus::None)
    }

    async fn set_loop_status(&self, _loop_status: LoopStatus) -> mpris_server::zbus::Result<()> {
        Ok(())
    }

    async fn rate(&self) -> fdo::Result<PlaybackRate> {
        Ok(self.runtime.config.get().await.speed as f64)
    }

    async fn set_rate(&self, rate: PlaybackRate) -> mpris_server::zbus::Result<()> {
        let _ = self.runtime.engine.set_speed(rate as f32).await;
        Ok(())
    }

    async fn shuffle(&self) -> fdo::Result<bool> {
        Ok(false)
    }

    async fn set_shuffle(&self, _shuffle: bool) -> mpris_server::zbus::Result<()> {
        Ok(())
    }

    async fn metadata(&self) -> fdo::Result<Metadata> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(Metadata::new());
        };
        let Some(episode_id) = snapshot.episode_id else {
            return Ok(Metadata::new());
        };
        let library = self.runtime.library.get().await;
        let mut builder = Metadata::builder();
        if let Ok(path) = mpris_server::zbus::zvariant::ObjectPath::try_from(format!(
            "/org/podliner/track/{}",
            episode_id.simple()
        )) {
            builder = builder.trackid(path);
        }
        if let Some(episode) = library.find_episode(episode_id) {
            builder = builder.title(episode.title.clone()).url(episode.audio_url.clone());
            if let Some(feed) = library.find_feed(episode.feed_id) {
                builder = builder.album(feed.title.clone()).artist(vec![feed.title.clone()]);
            }
        }
        let mut metadata = builder.build();
        if snapshot.length_ms > 0 {
            metadata.set_length(Some(Time::from_millis(snapshot.length_ms)));
        }
        Ok(metadata)
    }

    async fn volume(&self) -> fdo::Result<Volume> {
        Ok(self.runtime.config.get().await.volume_0_100 as f64 / 100.0)
    }

    async fn set_volume(&self, volume: Volume) -> mpris_server::zbus::Result<()> {
        let percent = (volume.clamp(0.0, 1.0) * 100.0).round() as u8;
        let _ = self.runtime.engine.set_volume(percent).await;
        Ok(())
    }

    async fn position(&self) -> fdo::Result<Time> {
        Ok(Time::from_millis(self.snapshot().map(|s| s.position_ms).unwrap_or(0)))
    }

    async fn minimum_rate(&self) -> fdo::Result<PlaybackRate> {
        Ok(0.25)
    }

    async fn maximum_rate(&self) -> fdo::Result<PlaybackRate> {
        Ok(3.0)
    }

    async fn can_go_next(&self) -> fdo::Result<bool> {
        Ok(false)
    }

    async fn can_go_previous(&self) -> fdo::Result<bool> {
        Ok(false)
    }

    async fn can_play(&self) -> fdo::Result<bool> {
        Ok(true)
    }

    async fn can_pause(&self) -> fdo::Result<bool> {
        Ok(true)
    }

    async fn can_seek(&self) -> fdo::Result<bool> {
        Ok(true)
    }

    async fn can_control(&self) -> fdo::Result<bool> {
        Ok(true)
    }
}

/// Starts the MPRIS server and a background task that emits
/// `PropertiesChanged`/`Seeked` signals as coordinator events arrive.
pub async fn spawn(runtime: Arc<Runtime>) -> anyhow::Result<()> {
    let suffix = format!("podliner.instance{}", std::process::id());
    let player = Player {
        runtime: runtime.clone(),
        latest: Mutex::new(None),
    };
    let server = mpris_server::Server::new(&suffix, player).await?;

    let mut events = runtime.coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            match event {
                CoordinatorEvent::SnapshotAvailable(snapshot) => {
                    let seek_detected = server
                        .imp()
                        .latest
                        .lock()
                        .unwrap()
                        .replace(snapshot)
                        .map(|prev| is_seek_detected(&prev, &snapshot))
                        .unwrap_or(false);
                    if seek_detected {
                        let _ = server.emit(mpris_server::Signal::Seeked {
                            position: Time::from_millis(snapshot.position_ms),
                        }).await;
                    }
                    if let Err(e) = server
                        .properties_changed(vec![Property::Metadata(
                            server.imp().metadata().await.unwrap_or_else(|_| Metadata::new()),
                        )])
                        .await
                    {
                        warn!("mpris properties_changed failed: {}", e);
                    }
                }
                CoordinatorEvent::StatusChanged(status) => {
                    let mpris_status = match status {
                        PlaybackStatus::Playing | PlaybackStatus::Loading | PlaybackStatus::SlowNetwork => {
                            MprisPlaybackStatus::Playing
                        }
                        PlaybackStatus::Idle | PlaybackStatus::Ended => MprisPlaybackStatus::Stopped,
                    };
                    if let Err(e) = server
                        .properties_changed(vec![Property::PlaybackStatus(mpris_status)])
                        .await
                    {
                        warn!("mpris properties_changed failed: {}", e);
                    }
                }
                _ => {}
            }
        }
    });

    Ok(())
}
