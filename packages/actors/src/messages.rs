//! Message types for actor communication.

use std::time::Duration;

use queue_core::{Outcome, PipelineEntry, PipelineId, PriorityChange, QueueError, QueueSnapshot};
use ractor::rpc::CallResult;
use ractor::{ActorRef, RpcReplyPort};

use crate::error::{ManagerError, ManagerResult};

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Enqueue a new pipeline.
    Enqueue {
        entry: Box<PipelineEntry>,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Admit pending pipelines while capacity allows.
    Promote {
        reply: RpcReplyPort<Vec<PipelineEntry>>,
    },

    /// Apply a priority update delivered by the watch loop.
    ApplyPriorityUpdate { changes: Vec<PriorityChange> },

    /// Remove a pipeline wherever it is. Replies whether it was found.
    PopOut {
        pipeline_id: PipelineId,
        reply: RpcReplyPort<bool>,
    },

    /// Release a running pipeline. Replies whether it was running here.
    Finish {
        pipeline_id: PipelineId,
        outcome: Outcome,
        reply: Option<RpcReplyPort<bool>>,
    },

    /// Change the concurrency limit.
    SetMaxConcurrency { max_concurrency: usize },

    /// Get the current snapshot.
    GetSnapshot { reply: RpcReplyPort<QueueSnapshot> },

    /// Publish the current snapshot to the store.
    Publish,
}

/// Send a request to a queue actor and wait for its reply.
pub(crate) async fn ask<T, F>(
    actor: &ActorRef<QueueMessage>,
    build: F,
    timeout: Duration,
) -> ManagerResult<T>
where
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> QueueMessage,
{
    match ractor::rpc::call(actor, build, Some(timeout)).await {
        Ok(CallResult::Success(reply)) => Ok(reply),
        Ok(CallResult::Timeout) => Err(ManagerError::Timeout),
        Ok(CallResult::SenderError) => Err(ManagerError::Actor(
            "queue actor dropped the reply".into(),
        )),
        Err(e) => Err(ManagerError::Actor(e.to_string())),
    }
}
