//! Runtime logic for podliner: the playback coordinator, engine swap
//! protocol, download manager, persistence stores, command dispatcher,
//! feed service, OPML import planner, and gPodder sync engine (§4).
//!
//! Everything here depends on a tokio runtime; pure data types live in
//! `podliner-proto`.

pub mod coordinator;
pub mod dispatcher;
pub mod downloads;
pub mod engine;
pub mod error;
pub mod feed_service;
pub mod handlers;
pub mod opml;
pub mod runtime;
pub mod stores;
pub mod sync;

pub use coordinator::{CoordinatorEvent, PlaybackCoordinator};
pub use handlers::RuntimeCommandHandler;
pub use runtime::Runtime;
