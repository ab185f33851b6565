use queue_core::QueueError;
use store::StoreError;

/// Result type for queue manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Error type for queue manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Failed to spawn queue actor: {0}")]
    Spawn(String),

    #[error("Queue actor did not reply in time")]
    Timeout,

    #[error("Queue manager is shutting down")]
    ShuttingDown,

    #[error("Invalid manager config: {0}")]
    InvalidConfig(String),
}

impl ManagerError {
    /// Whether this is a rejected duplicate enqueue.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ManagerError::Queue(QueueError::DuplicateId { .. }))
    }
}
