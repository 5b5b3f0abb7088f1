#[cfg(target_os = "linux")]
mod mpris;

use std::sync::Arc;
use std::time::Duration;

use podliner_core::{Runtime, RuntimeCommandHandler};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const PROGRESS_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Warnings/errors forwarded off the `tracing` pipeline, the same notice
/// channel a TUI (out of scope here) would subscribe to for on-screen toasts.
#[derive(Debug, Clone)]
pub enum Notice {
    Log(String),
}

struct NoticeLayer {
    sender: broadcast::Sender<Notice>,
}

impl<S> tracing_subscriber::Layer<S> for NoticeLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }
        let mut message = format!("[{level}] ");
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);
        let _ = self.sender.send(Notice::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{value:?}"));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (notice_tx, _) = broadcast::channel::<Notice>(100);

    let log_dir = podliner_proto::platform::log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "podliner.log");
    let (log_writer, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(log_writer).with_ansi(false))
        .with(NoticeLayer { sender: notice_tx.clone() })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,podliner_core=debug")),
        )
        .init();

    info!("log directory: {:?}", log_dir);

    let runtime = Arc::new(Runtime::bootstrap().await?);
    let _dispatcher_handler = RuntimeCommandHandler::new(runtime.clone());

    #[cfg(target_os = "linux")]
    if let Err(e) = mpris::spawn(runtime.clone()).await {
        warn!("MPRIS bridge failed to start: {}", e);
    }

    let tick_runtime = runtime.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_TICK_INTERVAL);
        loop {
            interval.tick().await;
            if let Ok(state) = tick_runtime.engine.poll_state().await {
                let config = tick_runtime.config.get().await;
                let player_state = podliner_proto::model::PlayerState {
                    episode_id: tick_runtime.coordinator.current_episode().await,
                    is_playing: state.is_playing,
                    volume_0_100: config.volume_0_100,
                    speed: config.speed,
                    position_ms: state.position_ms,
                    length_ms: state.length_ms,
                    capabilities: tick_runtime.engine.capabilities().await,
                };
                tick_runtime.coordinator.progress_tick(&player_state).await;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    runtime.shutdown().await;

    Ok(())
}
