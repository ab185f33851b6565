//! Pipeline entry types for work items held by a queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique numeric identifier for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub u64);

impl PipelineId {
    /// Get the raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for PipelineId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution priority. Higher values run sooner.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub i64);

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an entry is in its queue lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    /// Waiting for a concurrency slot.
    #[default]
    Pending,
    /// Admitted and handed to the executor.
    Running { started_at: DateTime<Utc> },
    /// Forcibly removed from its queue. Terminal.
    PoppedOut { popped_at: DateTime<Utc> },
}

impl EntryState {
    pub fn is_pending(&self) -> bool {
        matches!(self, EntryState::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, EntryState::Running { .. })
    }

    /// Get a simple state string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Running { .. } => "running",
            EntryState::PoppedOut { .. } => "popped_out",
        }
    }
}

/// How a running pipeline left its queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed { reason: String },
}

impl Outcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEntry {
    /// Unique identifier, immutable once assigned.
    pub id: PipelineId,
    /// Current priority; only changes while pending.
    pub priority: Priority,
    /// When the entry was enqueued. Earlier wins on equal priority.
    pub enqueued_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: EntryState,
}

impl PipelineEntry {
    /// Create a new pending entry enqueued now.
    pub fn new(id: impl Into<PipelineId>, priority: impl Into<Priority>) -> Self {
        Self {
            id: id.into(),
            priority: priority.into(),
            enqueued_at: Utc::now(),
            state: EntryState::Pending,
        }
    }

    /// Override the enqueue timestamp.
    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }
}
