//! Coordination store used to replicate queue actions between replicas.
//!
//! Any backend exposing atomic `put`/`get`/`delete`, a prefix `list` and an
//! ordered prefix `watch` can back the queue manager. Two implementations
//! ship here:
//!
//! - [`MemoryStore`]: in-process store for tests and single-node runs
//! - [`SurrealStore`]: SurrealDB-backed store using live queries for watches
//!
//! # Features
//!
//! - `memory` (default): embedded in-memory SurrealDB engine
//! - `rocksdb`: embedded RocksDB engine for file-based storage
//! - `remote`: WebSocket client for a shared SurrealDB server

mod config;
mod error;
mod memory;
mod surreal;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::BoxStream;

pub use config::{StoreBackend, StoreConfig};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use surreal::{KV_TABLE, SurrealConfig, SurrealStore};

/// Future type returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Stream of events delivered by a prefix watch.
///
/// An `Err` item or the end of the stream means the subscription is gone and
/// the caller must watch again.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

/// Kind of change observed on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Updated,
    Deleted,
}

impl WatchEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchEventKind::Created => "created",
            WatchEventKind::Updated => "updated",
            WatchEventKind::Deleted => "deleted",
        }
    }
}

/// One change observed by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    /// Value after the change; the last value for deletes, when known.
    pub value: Option<String>,
}

/// Capability interface for a networked key-value store with prefix watches.
///
/// Watches deliver events at least once and in write order per key.
pub trait CoordinationStore: Send + Sync + 'static {
    /// Store a value, replacing any previous one.
    fn put<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

    /// Read the current value of a key.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Remove a key. Removing a missing key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    /// Current `(key, value)` pairs under `prefix`, ordered by key.
    ///
    /// Watchers list after subscribing to pick up writes made while they were
    /// not subscribed.
    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<(String, String)>>;

    /// Subscribe to changes of every key starting with `prefix`.
    ///
    /// Only changes made after the returned future resolves are delivered.
    fn watch<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, WatchStream>;
}

/// Connect to the backend selected by `config`.
pub async fn connect(config: StoreConfig) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-process coordination store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Surreal(db_config) => Ok(Arc::new(SurrealStore::connect(db_config).await?)),
    }
}
