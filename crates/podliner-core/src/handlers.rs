//! Concrete `CommandHandler` wiring `:` commands to a `Runtime` (§4.4
//! Routing). View-only command kinds (sorting, filtering, theming, and
//! other on-screen state) belong to the TUI layer and are out of scope here;
//! this handler reports them as `NotSupported` rather than silently no-op.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

use crate::dispatcher::{parse_delta_arg, parse_seek_arg, CommandHandler, CommandKind, DeltaArg, ParsedCommand, SeekArg};
use crate::engine::EngineKind;
use crate::error::DispatchError;
use crate::feed_service;
use crate::runtime::Runtime;

/// Bridges the dispatcher's synchronous `CommandHandler` contract onto the
/// async `Runtime`. Call sites run on a multi-thread tokio runtime, so
/// `block_in_place` is safe here; it would panic on a current-thread one.
pub struct RuntimeCommandHandler {
    runtime: Arc<Runtime>,
}

impl RuntimeCommandHandler {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| Handle::current().block_on(fut))
    }
}

impl CommandHandler for RuntimeCommandHandler {
    fn accepts(&self, kind: CommandKind) -> bool {
        matches!(
            kind,
            CommandKind::Add
                | CommandKind::RemoveFeed
                | CommandKind::Seek
                | CommandKind::Volume
                | CommandKind::Speed
                | CommandKind::Engine
                | CommandKind::Sync
                | CommandKind::Save
                | CommandKind::Write
                | CommandKind::WriteQuit
                | CommandKind::Quit
                | CommandKind::QuitForce
        )
    }

    fn handle(&self, cmd: &ParsedCommand) -> Result<(), DispatchError> {
        match cmd.kind {
            CommandKind::Add => self.handle_add(cmd),
            CommandKind::RemoveFeed => self.handle_remove_feed(cmd),
            CommandKind::Seek => self.handle_seek(cmd),
            CommandKind::Volume => self.handle_volume(cmd),
            CommandKind::Speed => self.handle_speed(cmd),
            CommandKind::Engine => self.handle_engine(cmd),
            CommandKind::Sync => self.handle_sync(cmd),
            CommandKind::Save | CommandKind::Write | CommandKind::WriteQuit => self.handle_save(),
            CommandKind::Quit | CommandKind::QuitForce => self.handle_quit(),
            _ => Err(DispatchError::NotSupported(cmd.name.clone())),
        }
    }
}

impl RuntimeCommandHandler {
    fn handle_add(&self, cmd: &ParsedCommand) -> Result<(), DispatchError> {
        let url = cmd
            .args
            .first()
            .ok_or_else(|| DispatchError::InvalidArgument(":add requires a feed URL".into()))?;
        self.block_on(async {
            self.runtime
                .library
                .mutate(|lib| feed_service::add_feed(lib, url))
                .await;
            self.runtime.library.request_save(false).await;
        });
        Ok(())
    }

    fn handle_remove_feed(&self, cmd: &ParsedCommand) -> Result<(), DispatchError> {
        let raw = cmd
            .args
            .first()
            .ok_or_else(|| DispatchError::InvalidArgument(":remove-feed requires a feed id".into()))?;
        let feed_id = uuid::Uuid::parse_str(raw)
            .map_err(|_| DispatchError::InvalidArgument(format!("not a feed id: {raw}")))?;
        self.block_on(async {
            self.runtime.library.mutate(|lib| lib.remove_feed(feed_id)).await;
            self.runtime.library.request_save(false).await;
        });
        Ok(())
    }

    fn handle_seek(&self, cmd: &ParsedCommand) -> Result<(), DispatchError> {
        let arg = cmd
            .args
            .first()
            .and_then(|a| parse_seek_arg(a))
            .ok_or_else(|| DispatchError::InvalidArgument("unparseable :seek argument".into()))?;
        self.block_on(async {
            match arg {
                SeekArg::RelativeSeconds(secs) => {
                    self.runtime.coordinator.seek_relative((secs * 1000.0) as i64).await
                }
                SeekArg::AbsoluteSeconds(secs) => {
                    self.runtime.coordinator.seek_to((secs * 1000.0) as i64).await
                }
                SeekArg::Percent(pct) => {
                    let length_ms = self
                        .runtime
                        .engine
                        .poll_state()
                        .await
                        .map(|s| s.length_ms.unwrap_or(0))
                        .unwrap_or(0);
                    let target = ((pct.clamp(0.0, 100.0) / 100.0) * length_ms as f64) as i64;
                    self.runtime.coordinator.seek_to(target).await
                }
            }
        })
        .map_err(|e| DispatchError::NotSupported(e.to_string()))
    }

    fn handle_volume(&self, cmd: &ParsedCommand) -> Result<(), DispatchError> {
        let arg = cmd
            .args
            .first()
            .and_then(|a| parse_delta_arg(a))
            .ok_or_else(|| DispatchError::InvalidArgument("unparseable :vol argument".into()))?;
        self.block_on(async {
            let current = self.runtime.config.get().await.volume_0_100 as f64;
            let target = match arg {
                DeltaArg::Absolute(v) => v,
                DeltaArg::Relative(delta) => current + delta,
            }
            .clamp(0.0, 100.0) as u8;
            self.runtime
                .config
                .mutate(|cfg| cfg.volume_0_100 = target)
                .await;
            self.runtime.config.request_save(false).await;
            self.runtime.engine.set_volume(target).await
        })
        .map_err(|e| DispatchError::NotSupported(e.to_string()))
    }

    fn handle_speed(&self, cmd: &ParsedCommand) -> Result<(), DispatchError> {
        let arg = cmd
            .args
            .first()
            .and_then(|a| parse_delta_arg(a))
            .ok_or_else(|| DispatchError::InvalidArgument("unparseable :speed argument".into()))?;
        self.block_on(async {
            let current = self.runtime.config.get().await.speed as f64;
            let target = match arg {
                DeltaArg::Absolute(v) => v,
                DeltaArg::Relative(delta) => current + delta,
            }
            .clamp(0.25, 3.0) as f32;
            self.runtime
                .config
                .mutate(|cfg| cfg.speed = target)
                .await;
            self.runtime.config.request_save(false).await;
            self.runtime.engine.set_speed(target).await
        })
        .map_err(|e| DispatchError::NotSupported(e.to_string()))
    }

    fn handle_engine(&self, cmd: &ParsedCommand) -> Result<(), DispatchError> {
        let requested = cmd
            .args
            .first()
            .and_then(|a| EngineKind::from_preference_str(a))
            .ok_or_else(|| DispatchError::InvalidArgument("unknown engine name".into()))?;
        self.block_on(async {
            match crate::engine::construct_if_available(requested).await {
                Some(engine) => {
                    if let Err(e) = self.runtime.engine.swap_to(engine).await {
                        warn!("engine swap failed: {}", e);
                        return Err(DispatchError::NotSupported(e.to_string()));
                    }
                    self.runtime
                        .config
                        .mutate(|cfg| cfg.engine_preference = requested.as_preference_str().to_string())
                        .await;
                    self.runtime.config.request_save(false).await;
                    Ok(())
                }
                None => Err(DispatchError::NotSupported(format!(
                    "{} is not available on this machine",
                    requested.as_preference_str()
                ))),
            }
        })
    }

    fn handle_sync(&self, cmd: &ParsedCommand) -> Result<(), DispatchError> {
        let sub = cmd
            .args
            .first()
            .map(String::as_str)
            .ok_or_else(|| DispatchError::InvalidArgument(":sync requires a subcommand".into()))?;
        self.block_on(async {
            match sub {
                "login" => {
                    let [server, user, pass] = match &cmd.args[1..] {
                        [a, b, c] => [a.clone(), b.clone(), c.clone()],
                        _ => {
                            return Err(DispatchError::InvalidArgument(
                                ":sync login requires server, username, password".into(),
                            ))
                        }
                    };
                    self.runtime
                        .sync
                        .login(server, user, pass)
                        .await
                        .map_err(|e| DispatchError::NotSupported(e.to_string()))
                }
                "pull" => self
                    .runtime
                    .sync
                    .pull()
                    .await
                    .map_err(|e| DispatchError::NotSupported(e.to_string())),
                "push" => self
                    .runtime
                    .sync
                    .push()
                    .await
                    .map_err(|e| DispatchError::NotSupported(e.to_string())),
                "offline" | "online" => {
                    let offline = sub == "offline";
                    self.runtime.sync.set_offline(offline);
                    self.runtime
                        .config
                        .mutate(|cfg| cfg.start_offline = offline)
                        .await;
                    self.runtime.config.request_save(false).await;
                    Ok(())
                }
                other => Err(DispatchError::InvalidArgument(format!("unknown :sync subcommand: {other}"))),
            }
        })
    }

    fn handle_save(&self) -> Result<(), DispatchError> {
        self.block_on(async {
            self.runtime.config.save_now().await;
            self.runtime.library.save_now().await;
        });
        Ok(())
    }

    fn handle_quit(&self) -> Result<(), DispatchError> {
        self.block_on(self.runtime.shutdown());
        Ok(())
    }
}
