//! ConfigStore / LibraryStore + Save Scheduler facade (§4.5).
//!
//! Each store owns a single in-memory value behind an `RwLock`, persisted
//! atomically via `podliner_proto::atomic`, with debounced background saves
//! and read-only detection once a save fails with a permission error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use podliner_proto::atomic::is_permission_error;
use podliner_proto::{config::AppConfig, Library};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Shared state backing both `ConfigStore` and `LibraryStore`: the debounce
/// interval, read-only flag, and in-flight/pending-save coordination are
/// identical for both, only the serialised value type differs.
struct SaveState {
    read_only: AtomicBool,
    read_only_reason: Mutex<Option<String>>,
    saving: Mutex<bool>,
    pending: AtomicBool,
    debounce: Duration,
}

impl SaveState {
    fn new(debounce: Duration) -> Self {
        Self {
            read_only: AtomicBool::new(false),
            read_only_reason: Mutex::new(None),
            saving: Mutex::new(false),
            pending: AtomicBool::new(false),
            debounce,
        }
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    async fn mark_read_only(&self, reason: String) {
        self.read_only.store(true, Ordering::Relaxed);
        *self.read_only_reason.lock().await = Some(reason);
    }
}

macro_rules! define_store {
    ($name:ident, $value:ty, $debounce_secs:expr) => {
        pub struct $name {
            value: Arc<RwLock<$value>>,
            save_state: Arc<SaveState>,
        }

        impl $name {
            pub fn load() -> Self {
                let value = <$value>::load_or_default();
                Self {
                    value: Arc::new(RwLock::new(value)),
                    save_state: Arc::new(SaveState::new(Duration::from_millis($debounce_secs))),
                }
            }

            pub async fn get(&self) -> $value {
                self.value.read().await.clone()
            }

            /// Non-blocking read for synchronous call sites (e.g. a
            /// `DownloadManager` job-source closure). Returns `None` only
            /// when a writer currently holds the lock.
            pub fn try_get(&self) -> Option<$value> {
                self.value.try_read().ok().map(|g| g.clone())
            }

            pub async fn mutate<R>(&self, f: impl FnOnce(&mut $value) -> R) -> R {
                let mut guard = self.value.write().await;
                f(&mut guard)
            }

            pub fn is_read_only(&self) -> bool {
                self.save_state.is_read_only()
            }

            /// Debounced save (§4.5 SaveAsync): coalesces bursts of requests
            /// within the store's debounce window into at most one write,
            /// plus at most one queued follow-up if a save is already running.
            pub async fn request_save(&self, flush: bool) {
                if self.save_state.is_read_only() {
                    return;
                }
                if flush {
                    self.save_now().await;
                    return;
                }

                {
                    let mut saving = self.save_state.saving.lock().await;
                    if *saving {
                        self.save_state.pending.store(true, Ordering::Relaxed);
                        return;
                    }
                    *saving = true;
                }

                let value = self.value.clone();
                let save_state = self.save_state.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(save_state.debounce).await;
                    loop {
                        let snapshot = value.read().await.clone();
                        if let Err(e) = snapshot.save() {
                            if is_permission_error_anyhow(&e) {
                                save_state
                                    .mark_read_only(e.to_string())
                                    .await;
                                warn!("store flipped to read-only: {}", e);
                            } else {
                                warn!("save failed: {}", e);
                            }
                        }
                        if !save_state.pending.swap(false, Ordering::Relaxed) {
                            break;
                        }
                    }
                    *save_state.saving.lock().await = false;
                });
            }

            /// Immediate flush, bypassing the debounce timer (§4.5 SaveNow).
            pub async fn save_now(&self) {
                if self.save_state.is_read_only() {
                    return;
                }
                let snapshot = self.value.read().await.clone();
                if let Err(e) = snapshot.save() {
                    if is_permission_error_anyhow(&e) {
                        self.save_state.mark_read_only(e.to_string()).await;
                        warn!("store flipped to read-only: {}", e);
                    } else {
                        warn!("save failed: {}", e);
                    }
                } else {
                    info!("saved {}", stringify!($name));
                }
            }
        }
    };
}

fn is_permission_error_anyhow(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .map(is_permission_error)
        .unwrap_or(false)
}

define_store!(ConfigStore, AppConfig, 1_000);
define_store!(LibraryStore, Library, 2_500);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_store_mutate_and_save_now_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("PODLINER_DATA_DIR", dir.path());
        let store = ConfigStore::load();
        store.mutate(|cfg| cfg.volume_0_100 = 55).await;
        store.save_now().await;
        let reloaded = AppConfig::load_or_default();
        assert_eq!(reloaded.volume_0_100, 55);
        std::env::remove_var("PODLINER_DATA_DIR");
    }
}
