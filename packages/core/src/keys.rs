//! Coordination-store key layout and watched-event decoding.
//!
//! Three key families live under a shared root:
//!
//! | Family | Key |
//! |---|---|
//! | queue snapshot | `<root>/snapshots/<queueID>` |
//! | priority update | `<root>/actions/update/<queueID>` |
//! | pop-out request | `<root>/actions/pop-out-pipeline/<pipelineID>` |
//!
//! None of the prefixes is a prefix of another, so a prefix watch on one
//! family never sees keys of the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PipelineId, Priority, QueueError, QueueId, QueueSnapshot};

/// Root used by deployed replicas.
pub const DEFAULT_KEY_ROOT: &str = "/devops/pipeline/queue_manager";

const SNAPSHOT_SEGMENT: &str = "snapshots/";
const UPDATE_SEGMENT: &str = "actions/update/";
const POP_OUT_SEGMENT: &str = "actions/pop-out-pipeline/";

/// Strip `expected_prefix` from `key` and parse the rest as an identifier.
///
/// The remainder must be a non-empty run of ASCII digits that fits in a u64.
pub fn parse_id_from_watched_key(key: &str, expected_prefix: &str) -> Result<u64, QueueError> {
    let malformed = || QueueError::MalformedKey {
        key: key.to_string(),
        expected_prefix: expected_prefix.to_string(),
    };

    let rest = key.strip_prefix(expected_prefix).ok_or_else(malformed)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    rest.parse::<u64>().map_err(|_| malformed())
}

/// One (pipeline, priority) pair of a priority update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityChange {
    pub pipeline_id: PipelineId,
    pub priority: Priority,
}

/// Body written under a queue's update key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityUpdate {
    pub changes: Vec<PriorityChange>,
    pub requested_at: DateTime<Utc>,
}

impl PriorityUpdate {
    /// Move every listed pipeline to the same priority.
    pub fn uniform(pipeline_ids: &[PipelineId], priority: Priority) -> Self {
        Self {
            changes: pipeline_ids
                .iter()
                .map(|&pipeline_id| PriorityChange {
                    pipeline_id,
                    priority,
                })
                .collect(),
            requested_at: Utc::now(),
        }
    }
}

/// Marker body written under a pop-out key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopOutMarker {
    pub requested_at: DateTime<Utc>,
}

impl PopOutMarker {
    pub fn now() -> Self {
        Self {
            requested_at: Utc::now(),
        }
    }
}

/// Family of a watched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedEventKind {
    QueueSnapshot,
    PriorityUpdate,
    PopOut,
}

/// A decoded store event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedEvent {
    QueueSnapshot {
        queue_id: QueueId,
        snapshot: QueueSnapshot,
    },
    PriorityUpdate {
        queue_id: QueueId,
        update: PriorityUpdate,
    },
    PopOut {
        pipeline_id: PipelineId,
    },
}

impl WatchedEvent {
    pub fn kind(&self) -> WatchedEventKind {
        match self {
            WatchedEvent::QueueSnapshot { .. } => WatchedEventKind::QueueSnapshot,
            WatchedEvent::PriorityUpdate { .. } => WatchedEventKind::PriorityUpdate,
            WatchedEvent::PopOut { .. } => WatchedEventKind::PopOut,
        }
    }

    /// Queue id for snapshot/update events, pipeline id for pop-out.
    pub fn target_id(&self) -> u64 {
        match self {
            WatchedEvent::QueueSnapshot { queue_id, .. }
            | WatchedEvent::PriorityUpdate { queue_id, .. } => queue_id.get(),
            WatchedEvent::PopOut { pipeline_id } => pipeline_id.get(),
        }
    }
}

/// Key layout rooted at a configurable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    snapshot_prefix: String,
    update_prefix: String,
    pop_out_prefix: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_ROOT)
    }
}

impl KeyLayout {
    pub fn new(root: impl AsRef<str>) -> Self {
        let root = root.as_ref().trim_end_matches('/');
        Self {
            snapshot_prefix: format!("{root}/{SNAPSHOT_SEGMENT}"),
            update_prefix: format!("{root}/{UPDATE_SEGMENT}"),
            pop_out_prefix: format!("{root}/{POP_OUT_SEGMENT}"),
        }
    }

    pub fn snapshot_prefix(&self) -> &str {
        &self.snapshot_prefix
    }

    pub fn update_prefix(&self) -> &str {
        &self.update_prefix
    }

    pub fn pop_out_prefix(&self) -> &str {
        &self.pop_out_prefix
    }

    pub fn snapshot_key(&self, queue_id: QueueId) -> String {
        format!("{}{}", self.snapshot_prefix, queue_id)
    }

    pub fn update_key(&self, queue_id: QueueId) -> String {
        format!("{}{}", self.update_prefix, queue_id)
    }

    pub fn pop_out_key(&self, pipeline_id: PipelineId) -> String {
        format!("{}{}", self.pop_out_prefix, pipeline_id)
    }

    /// Classify a key by family and recover its identifier.
    pub fn classify(&self, key: &str) -> Result<(WatchedEventKind, u64), QueueError> {
        let (kind, prefix) = if key.starts_with(&self.update_prefix) {
            (WatchedEventKind::PriorityUpdate, &self.update_prefix)
        } else if key.starts_with(&self.pop_out_prefix) {
            (WatchedEventKind::PopOut, &self.pop_out_prefix)
        } else if key.starts_with(&self.snapshot_prefix) {
            (WatchedEventKind::QueueSnapshot, &self.snapshot_prefix)
        } else {
            return Err(QueueError::MalformedKey {
                key: key.to_string(),
                expected_prefix: self.update_prefix.clone(),
            });
        };

        Ok((kind, parse_id_from_watched_key(key, prefix)?))
    }

    /// Decode a key and its JSON body into a [`WatchedEvent`].
    pub fn decode(&self, key: &str, value: &str) -> Result<WatchedEvent, QueueError> {
        let (kind, id) = self.classify(key)?;
        let malformed = |e: serde_json::Error| QueueError::MalformedPayload {
            key: key.to_string(),
            reason: e.to_string(),
        };

        Ok(match kind {
            WatchedEventKind::QueueSnapshot => WatchedEvent::QueueSnapshot {
                queue_id: QueueId(id),
                snapshot: serde_json::from_str(value).map_err(malformed)?,
            },
            WatchedEventKind::PriorityUpdate => WatchedEvent::PriorityUpdate {
                queue_id: QueueId(id),
                update: serde_json::from_str(value).map_err(malformed)?,
            },
            // The id travels in the key; the body is only a marker.
            WatchedEventKind::PopOut => WatchedEvent::PopOut {
                pipeline_id: PipelineId(id),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids_from_watched_keys() -> Result<(), QueueError> {
        let layout = KeyLayout::default();

        let queue_id = parse_id_from_watched_key(
            "/devops/pipeline/queue_manager/actions/update/123",
            layout.update_prefix(),
        )?;
        assert_eq!(queue_id, 123);

        let pipeline_id = parse_id_from_watched_key(
            "/devops/pipeline/queue_manager/actions/pop-out-pipeline/1001",
            layout.pop_out_prefix(),
        )?;
        assert_eq!(pipeline_id, 1001);
        Ok(())
    }

    #[test]
    fn rejects_keys_without_prefix_or_numeric_suffix() {
        let layout = KeyLayout::default();
        let prefix = layout.update_prefix();

        for key in [
            "/devops/pipeline/queue_manager/actions/pop-out-pipeline/1",
            "/devops/pipeline/queue_manager/actions/update/",
            "/devops/pipeline/queue_manager/actions/update/abc",
            "/devops/pipeline/queue_manager/actions/update/-4",
            "/devops/pipeline/queue_manager/actions/update/+4",
            "/devops/pipeline/queue_manager/actions/update/12/3",
            "/devops/pipeline/queue_manager/actions/update/99999999999999999999",
        ] {
            assert!(
                matches!(
                    parse_id_from_watched_key(key, prefix),
                    Err(QueueError::MalformedKey { .. })
                ),
                "{key} should be malformed"
            );
        }
    }

    #[test]
    fn key_families_do_not_overlap() {
        let layout = KeyLayout::new("/root/");
        let prefixes = [
            layout.snapshot_prefix(),
            layout.update_prefix(),
            layout.pop_out_prefix(),
        ];
        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j {
                    assert!(!a.starts_with(b), "{a} overlaps {b}");
                }
            }
        }

        assert_eq!(layout.update_key(QueueId(5)), "/root/actions/update/5");
        assert_eq!(layout.pop_out_key(PipelineId(8)), "/root/actions/pop-out-pipeline/8");
        assert_eq!(layout.snapshot_key(QueueId(5)), "/root/snapshots/5");
    }

    #[test]
    fn decodes_priority_update_and_pop_out() -> Result<(), Box<dyn std::error::Error>> {
        let layout = KeyLayout::default();
        let update = PriorityUpdate::uniform(&[PipelineId(1), PipelineId(2)], Priority(7));
        let body = serde_json::to_string(&update)?;

        let event = layout.decode(&layout.update_key(QueueId(4)), &body)?;
        assert_eq!(event.kind(), WatchedEventKind::PriorityUpdate);
        assert_eq!(event.target_id(), 4);
        assert_eq!(
            event,
            WatchedEvent::PriorityUpdate {
                queue_id: QueueId(4),
                update,
            }
        );

        let event = layout.decode(&layout.pop_out_key(PipelineId(9)), "")?;
        assert_eq!(event, WatchedEvent::PopOut { pipeline_id: PipelineId(9) });
        Ok(())
    }

    #[test]
    fn decode_reports_bad_bodies_and_unknown_keys() {
        let layout = KeyLayout::default();

        let bad_body = layout.decode(&layout.update_key(QueueId(1)), "{not json");
        assert!(matches!(bad_body, Err(QueueError::MalformedPayload { .. })));

        let unknown = layout.decode("/elsewhere/1", "{}");
        assert!(matches!(unknown, Err(QueueError::MalformedKey { .. })));
    }
}
