use thiserror::Error;

/// Coordination store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid store config: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Database(_))
    }
}
