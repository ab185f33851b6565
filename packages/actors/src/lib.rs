//! Actor system for the replicated pipeline queue.
//!
//! This crate provides the Ractor-based queue manager that runs on every
//! replica and keeps its queues in step through a coordination store.
//!
//! # Architecture
//!
//! - `QueueManager` - Replica entry point owning the queue registry
//! - `QueueActor` - Serializes every mutation of a single queue
//! - Admission loop - Starts promoted pipelines through a `PipelineExecutor`
//! - Watch loops - Apply priority updates and pop-outs read from the store,
//!   replaying the current keys after every (re)subscribe
//! - Publish loop - Writes snapshots and action requests with retries
//!
//! # Usage
//!
//! ```ignore
//! use actors::{ManagerConfig, QueueManager};
//!
//! let manager = QueueManager::start(ManagerConfig::default(), store, executor).await?;
//! manager.enqueue(QueueId(1), PipelineEntry::new(42, 10)).await?;
//! manager.request_priority_update(QueueId(1), &[PipelineId(42)], Priority(20))?;
//! ```

mod admission;
mod backoff;
mod config;
mod error;
mod executor;
mod health;
mod manager;
mod messages;
mod publisher;
mod queue_actor;
mod registry;
mod watcher;

pub use backoff::{BackoffPolicy, RetryPolicy};
pub use config::ManagerConfig;
pub use error::{ManagerError, ManagerResult};
pub use executor::{FnExecutor, PipelineExecutor, StartFuture, StartResult};
pub use health::Health;
pub use manager::QueueManager;
