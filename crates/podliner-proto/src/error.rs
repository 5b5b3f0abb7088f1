//! Shared error kinds used across persistence-adjacent modules (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("config is corrupt, replaced with defaults")]
    ConfigCorrupt,
    #[error("store is read-only: {reason}")]
    ReadOnly { reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
