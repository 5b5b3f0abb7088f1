//! Download Manager: a persisted FIFO queue with a single worker and
//! single-flight-per-episode semantics (§4.3).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use podliner_proto::model::EpisodeId;
use podliner_proto::{DownloadState, DownloadStatus};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{info, warn};

use crate::error::DownloadError;

/// One request the worker needs to resolve an episode id into a source URL
/// and a sanitised destination path.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub episode_id: EpisodeId,
    pub url: String,
    pub dest_path: std::path::PathBuf,
}

struct CancelTokens {
    tokens: HashMap<EpisodeId, Arc<Notify>>,
}

/// Owns the download queue, the per-episode status map, and the single
/// worker loop. Cheap to clone (internals are `Arc`-shared).
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Mutex<VecDeque<EpisodeId>>,
    statuses: Mutex<HashMap<EpisodeId, DownloadStatus>>,
    cancels: Mutex<CancelTokens>,
    worker_running: Mutex<bool>,
    job_source: Box<dyn Fn(EpisodeId) -> Option<DownloadJob> + Send + Sync>,
    http: reqwest::Client,
}

impl DownloadManager {
    /// `job_source` resolves an episode id to its audio URL and sanitised
    /// destination path; it is owned by the caller's feed/library layer, not
    /// this module (§4.3 keeps the download queue itself library-agnostic).
    pub fn new(job_source: impl Fn(EpisodeId) -> Option<DownloadJob> + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                statuses: Mutex::new(HashMap::new()),
                cancels: Mutex::new(CancelTokens {
                    tokens: HashMap::new(),
                }),
                worker_running: Mutex::new(false),
                job_source: Box::new(job_source),
                http: reqwest::Client::new(),
            }),
        }
    }

    /// Appends `id` to the queue unless it is already queued or Done
    /// (§4.3 Operations: Enqueue).
    pub async fn enqueue(&self, id: EpisodeId) {
        let statuses = self.inner.statuses.lock().await;
        if matches!(
            statuses.get(&id).map(|s| s.state),
            Some(DownloadState::Done) | Some(DownloadState::Running)
        ) {
            return;
        }
        drop(statuses);

        let mut queue = self.inner.queue.lock().await;
        if !queue.contains(&id) {
            queue.push_back(id);
            drop(queue);
            self.set_state(id, DownloadState::Queued).await;
            self.ensure_running();
        }
    }

    /// Inserts `id` at the head of the queue (§4.3 ForceFront).
    pub async fn force_front(&self, id: EpisodeId) {
        let mut queue = self.inner.queue.lock().await;
        queue.retain(|existing| existing != &id);
        queue.push_front(id);
        drop(queue);
        self.set_state(id, DownloadState::Queued).await;
        self.ensure_running();
    }

    /// Removes `id` from the queue, transitions to Canceled, and signals the
    /// worker to abort an in-flight transfer. The partial file is left on
    /// disk (§9 resolved Open Question).
    pub async fn cancel(&self, id: EpisodeId) {
        {
            let mut queue = self.inner.queue.lock().await;
            queue.retain(|existing| existing != &id);
        }
        {
            let cancels = self.inner.cancels.lock().await;
            if let Some(token) = cancels.tokens.get(&id) {
                token.notify_waiters();
            }
        }
        self.set_state(id, DownloadState::Canceled).await;
    }

    pub async fn get_state(&self, id: EpisodeId) -> DownloadStatus {
        self.inner
            .statuses
            .lock()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Re-enqueues all entries currently in `Failed` state.
    pub async fn retry_failed(&self) {
        let failed: Vec<EpisodeId> = {
            let statuses = self.inner.statuses.lock().await;
            statuses
                .iter()
                .filter(|(_, s)| s.state == DownloadState::Failed)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in failed {
            self.enqueue(id).await;
        }
    }

    /// Starts the worker if it is not already running (§4.3 EnsureRunning).
    pub fn ensure_running(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            {
                let mut running = inner.worker_running.lock().await;
                if *running {
                    return;
                }
                *running = true;
            }
            worker_loop(inner.clone()).await;
            *inner.worker_running.lock().await = false;
        });
    }

    async fn set_state(&self, id: EpisodeId, state: DownloadState) {
        let mut statuses = self.inner.statuses.lock().await;
        let entry = statuses.entry(id).or_default();
        entry.state = state;
        entry.updated_at = Some(Utc::now());
    }
}

async fn worker_loop(inner: Arc<Inner>) {
    loop {
        let next = { inner.queue.lock().await.pop_front() };
        let Some(id) = next else {
            break;
        };

        let Some(job) = (inner.job_source)(id) else {
            let mut statuses = inner.statuses.lock().await;
            let entry = statuses.entry(id).or_default();
            entry.state = DownloadState::Failed;
            entry.error = Some("no source URL for episode".into());
            continue;
        };

        let token = Arc::new(Notify::new());
        inner
            .cancels
            .lock()
            .await
            .tokens
            .insert(id, token.clone());

        {
            let mut statuses = inner.statuses.lock().await;
            let entry = statuses.entry(id).or_default();
            entry.state = DownloadState::Running;
            entry.bytes_received = 0;
            entry.error = None;
        }

        let result = run_download(&inner.http, &job, &inner.statuses, id, token).await;

        inner.cancels.lock().await.tokens.remove(&id);

        let mut statuses = inner.statuses.lock().await;
        let entry = statuses.entry(id).or_default();
        match result {
            Ok(()) => {
                entry.state = DownloadState::Done;
                entry.local_path = Some(job.dest_path.clone());
                entry.updated_at = Some(Utc::now());
                info!("download complete: {:?}", job.dest_path);
            }
            Err(DownloadError::Canceled) => {
                entry.state = DownloadState::Canceled;
            }
            Err(e) => {
                entry.state = DownloadState::Failed;
                entry.error = Some(e.to_string());
                warn!("download failed for {}: {}", id, e);
            }
        }
    }
}

async fn run_download(
    http: &reqwest::Client,
    job: &DownloadJob,
    statuses: &Mutex<HashMap<EpisodeId, DownloadStatus>>,
    id: EpisodeId,
    cancel: Arc<Notify>,
) -> Result<(), DownloadError> {
    if let Some(parent) = job.dest_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(DownloadError::Io)?;
    }

    let tmp_path = job.dest_path.with_extension("part");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(DownloadError::Io)?;

    let response = http
        .get(&job.url)
        .send()
        .await
        .map_err(|e| DownloadError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(DownloadError::Network(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    use tokio::io::AsyncWriteExt;

    loop {
        tokio::select! {
            biased;
            _ = cancel.notified() => {
                return Err(DownloadError::Canceled);
            }
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes).await.map_err(DownloadError::Io)?;
                        received += bytes.len() as u64;
                        let mut guard = statuses.lock().await;
                        let entry = guard.entry(id).or_default();
                        entry.bytes_received = received;
                    }
                    Some(Err(e)) => return Err(DownloadError::Network(e.to_string())),
                    None => break,
                }
            }
        }
    }

    file.flush().await.map_err(DownloadError::Io)?;
    drop(file);
    tokio::fs::rename(&tmp_path, &job.dest_path)
        .await
        .map_err(DownloadError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn enqueue_is_noop_for_done_episode() {
        let id = Uuid::new_v4();
        let mgr = DownloadManager::new(move |_| None);
        {
            let mut statuses = mgr.inner.statuses.lock().await;
            statuses.insert(
                id,
                DownloadStatus {
                    state: DownloadState::Done,
                    ..Default::default()
                },
            );
        }
        mgr.enqueue(id).await;
        let queue = mgr.inner.queue.lock().await;
        assert!(!queue.contains(&id));
    }

    #[tokio::test]
    async fn enqueue_does_not_duplicate_queued_entry() {
        let id = Uuid::new_v4();
        let mgr = DownloadManager::new(move |episode_id| {
            Some(DownloadJob {
                episode_id,
                url: "http://example.invalid/audio.mp3".into(),
                dest_path: std::env::temp_dir().join("never-started.mp3"),
            })
        });
        // Directly push to queue without starting the worker to test enqueue's own dedup.
        mgr.inner.queue.lock().await.push_back(id);
        mgr.enqueue(id).await;
        let queue = mgr.inner.queue.lock().await;
        assert_eq!(queue.iter().filter(|existing| **existing == id).count(), 1);
    }

    #[tokio::test]
    async fn cancel_transitions_state_and_clears_queue() {
        let id = Uuid::new_v4();
        let mgr = DownloadManager::new(move |_| None);
        mgr.inner.queue.lock().await.push_back(id);
        mgr.cancel(id).await;
        let status = mgr.get_state(id).await;
        assert_eq!(status.state, DownloadState::Canceled);
        assert!(!mgr.inner.queue.lock().await.contains(&id));
    }
}
