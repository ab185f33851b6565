//! Errors raised by the queue core and key codec.

use thiserror::Error;

use crate::{PipelineId, QueueId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("pipeline {pipeline_id} is already queued in queue {queue_id}")]
    DuplicateId {
        queue_id: QueueId,
        pipeline_id: PipelineId,
    },

    #[error("malformed key {key:?} (expected prefix {expected_prefix:?})")]
    MalformedKey {
        key: String,
        expected_prefix: String,
    },

    #[error("malformed payload under {key:?}: {reason}")]
    MalformedPayload { key: String, reason: String },
}
