//! Per-module error kinds (§7), one `thiserror`-derived enum per owning
//! module. Library APIs return these concrete types; call sites that cross
//! module boundaries wrap them in `anyhow::Result` with `.context(...)`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(String),
    #[error("path too long after sanitisation")]
    PathTooLong,
    #[error("download canceled")]
    Canceled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to fetch feed: {0}")]
    Fetch(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("offline")]
    Offline,
    #[error("sync is not configured")]
    NotConfigured,
    #[error("authentication failed")]
    AuthFailed,
    #[error("transient sync error: {0}")]
    Transient(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("operation not supported: {0}")]
    NotSupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("failed to read OPML: {0}")]
    Read(String),
    #[error("failed to parse OPML: {0}")]
    Parse(String),
}
