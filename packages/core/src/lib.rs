//! Core domain types for the pipeline admission queue.
//!
//! This crate contains the pure, I/O-free pieces shared by every package:
//! - `PipelineEntry` and its identifiers for queued work
//! - `PipelineQueue`, the per-queue priority and concurrency algorithm
//! - `KeyLayout` for coordination-store keys and watched-event decoding
//! - Events for local observers

mod error;
mod events;
pub mod keys;
mod pipeline;
mod queue;

pub use error::QueueError;
pub use events::QueueEvent;
pub use keys::{
    KeyLayout, PopOutMarker, PriorityChange, PriorityUpdate, WatchedEvent, WatchedEventKind,
    parse_id_from_watched_key,
};
pub use pipeline::{EntryState, Outcome, PipelineEntry, PipelineId, Priority};
pub use queue::{PipelineQueue, QueueId, QueueSnapshot, QueueStats, SnapshotEntry};
