//! Event types broadcast to local observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Outcome, PipelineId, Priority, QueueId};

/// Events emitted by a replica as its queues change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A queue was created on first reference.
    QueueCreated {
        queue_id: QueueId,
        max_concurrency: usize,
        timestamp: DateTime<Utc>,
    },
    /// A queue's concurrency limit changed.
    ConcurrencyChanged {
        queue_id: QueueId,
        max_concurrency: usize,
        timestamp: DateTime<Utc>,
    },
    /// A pipeline entered a queue.
    PipelineEnqueued {
        queue_id: QueueId,
        pipeline_id: PipelineId,
        priority: Priority,
        timestamp: DateTime<Utc>,
    },
    /// A pending pipeline was admitted.
    PipelineStarted {
        queue_id: QueueId,
        pipeline_id: PipelineId,
        timestamp: DateTime<Utc>,
    },
    /// A pending pipeline was re-prioritized.
    PriorityChanged {
        queue_id: QueueId,
        pipeline_id: PipelineId,
        priority: Priority,
        timestamp: DateTime<Utc>,
    },
    /// A pipeline was forcibly removed.
    PipelinePoppedOut {
        queue_id: QueueId,
        pipeline_id: PipelineId,
        timestamp: DateTime<Utc>,
    },
    /// A running pipeline released its slot.
    PipelineFinished {
        queue_id: QueueId,
        pipeline_id: PipelineId,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
    },
    /// A store write was given up after exhausting retries.
    PublishDropped {
        key: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::QueueCreated { timestamp, .. }
            | QueueEvent::ConcurrencyChanged { timestamp, .. }
            | QueueEvent::PipelineEnqueued { timestamp, .. }
            | QueueEvent::PipelineStarted { timestamp, .. }
            | QueueEvent::PriorityChanged { timestamp, .. }
            | QueueEvent::PipelinePoppedOut { timestamp, .. }
            | QueueEvent::PipelineFinished { timestamp, .. }
            | QueueEvent::PublishDropped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the queue ID associated with this event, if any.
    pub fn queue_id(&self) -> Option<QueueId> {
        match self {
            QueueEvent::QueueCreated { queue_id, .. }
            | QueueEvent::ConcurrencyChanged { queue_id, .. }
            | QueueEvent::PipelineEnqueued { queue_id, .. }
            | QueueEvent::PipelineStarted { queue_id, .. }
            | QueueEvent::PriorityChanged { queue_id, .. }
            | QueueEvent::PipelinePoppedOut { queue_id, .. }
            | QueueEvent::PipelineFinished { queue_id, .. } => Some(*queue_id),
            QueueEvent::PublishDropped { .. } => None,
        }
    }

    /// Get the pipeline ID associated with this event, if any.
    pub fn pipeline_id(&self) -> Option<PipelineId> {
        match self {
            QueueEvent::PipelineEnqueued { pipeline_id, .. }
            | QueueEvent::PipelineStarted { pipeline_id, .. }
            | QueueEvent::PriorityChanged { pipeline_id, .. }
            | QueueEvent::PipelinePoppedOut { pipeline_id, .. }
            | QueueEvent::PipelineFinished { pipeline_id, .. } => Some(*pipeline_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            QueueEvent::QueueCreated {
                queue_id,
                max_concurrency,
                ..
            } => format!("Queue {} created (concurrency {})", queue_id, max_concurrency),
            QueueEvent::ConcurrencyChanged {
                queue_id,
                max_concurrency,
                ..
            } => format!("Queue {} concurrency -> {}", queue_id, max_concurrency),
            QueueEvent::PipelineEnqueued {
                queue_id,
                pipeline_id,
                priority,
                ..
            } => format!(
                "Pipeline {} enqueued in {} at priority {}",
                pipeline_id, queue_id, priority
            ),
            QueueEvent::PipelineStarted {
                queue_id,
                pipeline_id,
                ..
            } => format!("Pipeline {} admitted in {}", pipeline_id, queue_id),
            QueueEvent::PriorityChanged {
                pipeline_id,
                priority,
                ..
            } => format!("Pipeline {} -> priority {}", pipeline_id, priority),
            QueueEvent::PipelinePoppedOut {
                queue_id,
                pipeline_id,
                ..
            } => format!("Pipeline {} popped out of {}", pipeline_id, queue_id),
            QueueEvent::PipelineFinished {
                pipeline_id,
                outcome,
                ..
            } => match outcome {
                Outcome::Completed => format!("Pipeline {} completed", pipeline_id),
                Outcome::Failed { reason } => {
                    format!("Pipeline {} failed: {}", pipeline_id, reason)
                }
            },
            QueueEvent::PublishDropped { key, attempts, .. } => {
                format!("Dropped write to {} after {} attempts", key, attempts)
            }
        }
    }
}
