//! Shared data model, wire types, and persistence primitives for podliner.
//!
//! This crate owns everything that is pure data or has no asynchronous
//! runtime dependency: the entity model (§3), config/library schemas
//! (§4.5, §6), the path sanitiser (§4.3), the gPodder wire format (§4.8),
//! and platform directory resolution.

pub mod atomic;
pub mod config;
pub mod error;
pub mod gpodder;
pub mod library;
pub mod model;
pub mod platform;
pub mod sanitize;
pub mod sync_config;

pub use library::Library;
pub use model::{
    DownloadState, DownloadStatus, Episode, EpisodeId, Feed, FeedId, HistoryEntry,
    PlaybackSnapshot, PlaybackStatus, PlayerCapabilities, PlayerState, Progress,
};
