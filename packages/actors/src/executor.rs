//! Execution collaborator trait.
//!
//! The admission loop calls [`PipelineExecutor::start`] for each admitted
//! pipeline. The executor later reports back through
//! [`QueueManager::complete`](crate::QueueManager::complete) or
//! [`QueueManager::fail`](crate::QueueManager::fail) to free the slot.

use std::future::Future;
use std::pin::Pin;

use queue_core::{PipelineEntry, QueueId};

/// Result of handing a pipeline to the executor.
pub type StartResult = Result<(), String>;

/// Future type for async start hooks.
pub type StartFuture = Pin<Box<dyn Future<Output = StartResult> + Send>>;

/// Starts admitted pipelines.
///
/// `start` should return once the pipeline is handed off, not when it
/// finishes. An `Err` releases the slot as a failure.
pub trait PipelineExecutor: Send + Sync + 'static {
    fn start(&self, queue_id: QueueId, entry: &PipelineEntry) -> StartFuture;
}

/// A simple function-based executor.
pub struct FnExecutor<F>
where
    F: Fn(QueueId, &PipelineEntry) -> StartFuture + Send + Sync + 'static,
{
    start: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(QueueId, &PipelineEntry) -> StartFuture + Send + Sync + 'static,
{
    /// Create a new function-based executor.
    pub fn new(start: F) -> Self {
        Self { start }
    }
}

impl<F> PipelineExecutor for FnExecutor<F>
where
    F: Fn(QueueId, &PipelineEntry) -> StartFuture + Send + Sync + 'static,
{
    fn start(&self, queue_id: QueueId, entry: &PipelineEntry) -> StartFuture {
        (self.start)(queue_id, entry)
    }
}
