//! Queue core: priority ordering and concurrency bookkeeping for one queue.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{EntryState, PipelineEntry, PipelineId, Priority};
use crate::QueueError;

/// Unique numeric identifier for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(pub u64);

impl QueueId {
    /// Get the raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for QueueId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counters for a queue's current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Number of pending entries.
    pub pending: u64,
    /// Number of running entries.
    pub running: u64,
    /// Entries that finished successfully.
    pub completed: u64,
    /// Entries that finished with a failure.
    pub failed: u64,
    /// Entries removed by pop-out.
    pub popped_out: u64,
}

impl QueueStats {
    /// Entries currently held by the queue (pending + running).
    pub fn active(&self) -> u64 {
        self.pending + self.running
    }

    /// Entries that left the queue after running.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }
}

/// Ordering key for pending entries: higher priority first, then earlier
/// enqueue time. The pipeline id makes the order total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingKey {
    priority: Priority,
    enqueued_at: DateTime<Utc>,
    id: PipelineId,
}

impl PendingKey {
    fn of(entry: &PipelineEntry) -> Self {
        Self {
            priority: entry.priority,
            enqueued_at: entry.enqueued_at,
            id: entry.id,
        }
    }
}

impl PartialOrd for PendingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority sorts first
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.enqueued_at.cmp(&other.enqueued_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// One entry of a published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub pipeline_id: PipelineId,
    pub priority: Priority,
    #[serde(flatten)]
    pub state: EntryState,
    pub enqueued_at: DateTime<Utc>,
}

impl From<&PipelineEntry> for SnapshotEntry {
    fn from(entry: &PipelineEntry) -> Self {
        Self {
            pipeline_id: entry.id,
            priority: entry.priority,
            state: entry.state,
            enqueued_at: entry.enqueued_at,
        }
    }
}

/// Full serializable view of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queue_id: QueueId,
    pub max_concurrency: usize,
    pub stats: QueueStats,
    /// Running entries first, then pending entries in admission order.
    pub entries: Vec<SnapshotEntry>,
    pub taken_at: DateTime<Utc>,
}

impl QueueSnapshot {
    /// Pending pipeline ids in admission order.
    pub fn pending_ids(&self) -> Vec<PipelineId> {
        self.entries
            .iter()
            .filter(|e| e.state.is_pending())
            .map(|e| e.pipeline_id)
            .collect()
    }

    /// Running pipeline ids.
    pub fn running_ids(&self) -> Vec<PipelineId> {
        self.entries
            .iter()
            .filter(|e| e.state.is_running())
            .map(|e| e.pipeline_id)
            .collect()
    }
}

/// In-memory admission queue for one logical queue.
///
/// Holds pending entries ordered by [`PendingKey`] and the set of running
/// entries. Pure data structure: callers serialize access.
#[derive(Debug, Clone)]
pub struct PipelineQueue {
    id: QueueId,
    max_concurrency: usize,
    pending: BTreeMap<PendingKey, PipelineEntry>,
    /// Ordering key of each pending entry, by id.
    index: HashMap<PipelineId, PendingKey>,
    running: HashMap<PipelineId, PipelineEntry>,
    stats: QueueStats,
}

impl PipelineQueue {
    /// Create an empty queue.
    pub fn new(id: QueueId, max_concurrency: usize) -> Self {
        Self {
            id,
            max_concurrency,
            pending: BTreeMap::new(),
            index: HashMap::new(),
            running: HashMap::new(),
            stats: QueueStats::default(),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Change the concurrency limit. Running entries above a lowered limit
    /// keep running; promotion waits until the count drops.
    pub fn set_max_concurrency(&mut self, max_concurrency: usize) {
        self.max_concurrency = max_concurrency;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }

    pub fn contains(&self, id: PipelineId) -> bool {
        self.index.contains_key(&id) || self.running.contains_key(&id)
    }

    /// Get an entry by id, wherever it is.
    pub fn get(&self, id: PipelineId) -> Option<&PipelineEntry> {
        match self.index.get(&id) {
            Some(key) => self.pending.get(key),
            None => self.running.get(&id),
        }
    }

    /// Pending ids in admission order.
    pub fn pending_ids(&self) -> Vec<PipelineId> {
        self.pending.values().map(|e| e.id).collect()
    }

    /// Running ids, ordered by their ordering key.
    pub fn running_ids(&self) -> Vec<PipelineId> {
        self.running_sorted().into_iter().map(|e| e.id).collect()
    }

    /// Current counters, with live pending/running sizes.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len() as u64,
            running: self.running.len() as u64,
            ..self.stats.clone()
        }
    }

    /// Insert a new pending entry.
    pub fn push(&mut self, mut entry: PipelineEntry) -> Result<(), QueueError> {
        if self.contains(entry.id) {
            return Err(QueueError::DuplicateId {
                queue_id: self.id,
                pipeline_id: entry.id,
            });
        }

        entry.state = EntryState::Pending;
        let key = PendingKey::of(&entry);
        self.index.insert(entry.id, key);
        self.pending.insert(key, entry);
        Ok(())
    }

    /// Re-seat a pending entry under a new priority.
    ///
    /// Returns `false` without error when the entry is not pending here: it
    /// may already be running or gone.
    pub fn update_priority(&mut self, id: PipelineId, priority: Priority) -> bool {
        let Some(key) = self.index.get(&id).copied() else {
            return false;
        };
        if key.priority == priority {
            return false;
        }
        let Some(mut entry) = self.pending.remove(&key) else {
            return false;
        };

        entry.priority = priority;
        let key = PendingKey::of(&entry);
        self.index.insert(id, key);
        self.pending.insert(key, entry);
        true
    }

    /// Remove an entry wherever it is. Repeating on an absent id is a no-op.
    pub fn pop_out(&mut self, id: PipelineId) -> Option<PipelineEntry> {
        let mut entry = match self.index.remove(&id) {
            Some(key) => self.pending.remove(&key)?,
            None => self.running.remove(&id)?,
        };

        entry.state = EntryState::PoppedOut {
            popped_at: Utc::now(),
        };
        self.stats.popped_out += 1;
        Some(entry)
    }

    /// Move pending heads into running while capacity allows.
    ///
    /// Returns the promoted entries in promotion order.
    pub fn promote(&mut self) -> Vec<PipelineEntry> {
        let mut promoted = Vec::new();

        while self.running.len() < self.max_concurrency {
            let Some((_, mut entry)) = self.pending.pop_first() else {
                break;
            };
            self.index.remove(&entry.id);

            entry.state = EntryState::Running {
                started_at: Utc::now(),
            };
            self.running.insert(entry.id, entry.clone());
            promoted.push(entry);
        }

        promoted
    }

    /// Release a running entry after it completed.
    pub fn complete(&mut self, id: PipelineId) -> Option<PipelineEntry> {
        let entry = self.running.remove(&id)?;
        self.stats.completed += 1;
        Some(entry)
    }

    /// Release a running entry after it failed.
    pub fn fail(&mut self, id: PipelineId) -> Option<PipelineEntry> {
        let entry = self.running.remove(&id)?;
        self.stats.failed += 1;
        Some(entry)
    }

    /// Serializable view: running entries, then pending in admission order.
    pub fn snapshot(&self) -> QueueSnapshot {
        let entries = self
            .running_sorted()
            .into_iter()
            .chain(self.pending.values())
            .map(SnapshotEntry::from)
            .collect();

        QueueSnapshot {
            queue_id: self.id,
            max_concurrency: self.max_concurrency,
            stats: self.stats(),
            entries,
            taken_at: Utc::now(),
        }
    }

    fn running_sorted(&self) -> Vec<&PipelineEntry> {
        let mut running: Vec<&PipelineEntry> = self.running.values().collect();
        running.sort_by_key(|e| PendingKey::of(e));
        running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(id: u64, priority: i64, offset_secs: i64) -> PipelineEntry {
        let base = DateTime::<Utc>::UNIX_EPOCH;
        PipelineEntry::new(id, priority).with_enqueued_at(base + Duration::seconds(offset_secs))
    }

    #[test]
    fn higher_priority_runs_first_and_pop_out_frees_slot() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(1), 1);
        queue.push(entry(1, 5, 0))?;
        queue.push(entry(2, 10, 1))?;

        let promoted = queue.promote();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].id, PipelineId(2));
        assert!(promoted[0].state.is_running());
        assert_eq!(queue.pending_ids(), vec![PipelineId(1)]);

        let popped = queue.pop_out(PipelineId(2));
        assert!(matches!(
            popped.map(|e| e.state),
            Some(EntryState::PoppedOut { .. })
        ));

        let promoted = queue.promote();
        assert_eq!(promoted.iter().map(|e| e.id).collect::<Vec<_>>(), vec![PipelineId(1)]);
        Ok(())
    }

    #[test]
    fn equal_priority_breaks_ties_by_enqueue_time() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(1), 3);
        queue.push(entry(30, 1, 20))?;
        queue.push(entry(10, 1, 0))?;
        queue.push(entry(20, 1, 10))?;

        let order: Vec<_> = queue.promote().into_iter().map(|e| e.id).collect();
        assert_eq!(order, vec![PipelineId(10), PipelineId(20), PipelineId(30)]);
        Ok(())
    }

    #[test]
    fn duplicate_id_is_rejected_while_pending_or_running() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(7), 1);
        queue.push(entry(1, 0, 0))?;
        assert_eq!(
            queue.push(entry(1, 3, 1)),
            Err(QueueError::DuplicateId {
                queue_id: QueueId(7),
                pipeline_id: PipelineId(1),
            })
        );

        queue.promote();
        assert!(queue.push(entry(1, 0, 2)).is_err());

        queue.complete(PipelineId(1));
        assert!(queue.push(entry(1, 0, 3)).is_ok());
        Ok(())
    }

    #[test]
    fn pop_out_twice_is_a_no_op() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(1), 0);
        queue.push(entry(1, 0, 0))?;

        assert!(queue.pop_out(PipelineId(1)).is_some());
        assert!(queue.pop_out(PipelineId(1)).is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.stats().popped_out, 1);
        Ok(())
    }

    #[test]
    fn update_priority_ignores_unknown_and_running_entries() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(1), 1);
        assert!(!queue.update_priority(PipelineId(99), Priority(4)));

        queue.push(entry(1, 0, 0))?;
        queue.promote();
        assert!(!queue.update_priority(PipelineId(1), Priority(4)));
        assert_eq!(queue.get(PipelineId(1)).map(|e| e.priority), Some(Priority(0)));
        Ok(())
    }

    #[test]
    fn update_priority_reseats_pending_entry() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(1), 0);
        queue.push(entry(1, 1, 0))?;
        queue.push(entry(2, 2, 1))?;
        queue.push(entry(3, 3, 2))?;
        assert_eq!(queue.pending_ids(), vec![PipelineId(3), PipelineId(2), PipelineId(1)]);

        assert!(queue.update_priority(PipelineId(1), Priority(10)));
        assert!(!queue.update_priority(PipelineId(1), Priority(10)));
        assert_eq!(queue.pending_ids(), vec![PipelineId(1), PipelineId(3), PipelineId(2)]);
        Ok(())
    }

    #[test]
    fn zero_concurrency_never_promotes_until_raised() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(1), 0);
        queue.push(entry(1, 0, 0))?;
        queue.push(entry(2, 0, 1))?;
        assert!(queue.promote().is_empty());

        queue.set_max_concurrency(2);
        assert_eq!(queue.promote().len(), 2);
        assert_eq!(queue.running_len(), 2);
        assert!(queue.promote().is_empty());
        Ok(())
    }

    #[test]
    fn lowering_limit_keeps_running_entries() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(1), 2);
        for id in 1..=3 {
            queue.push(entry(id, 0, id as i64))?;
        }
        queue.promote();
        queue.set_max_concurrency(1);

        assert_eq!(queue.running_len(), 2);
        queue.complete(PipelineId(1));
        assert!(queue.promote().is_empty());
        queue.fail(PipelineId(2));
        assert_eq!(queue.promote().len(), 1);

        let stats = queue.stats();
        assert_eq!((stats.completed, stats.failed, stats.running), (1, 1, 1));
        Ok(())
    }

    #[test]
    fn complete_ignores_pending_entries() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(1), 0);
        queue.push(entry(1, 0, 0))?;
        assert!(queue.complete(PipelineId(1)).is_none());
        assert_eq!(queue.pending_len(), 1);
        Ok(())
    }

    #[test]
    fn snapshot_lists_running_then_pending() -> Result<(), QueueError> {
        let mut queue = PipelineQueue::new(QueueId(3), 1);
        queue.push(entry(1, 1, 0))?;
        queue.push(entry(2, 9, 1))?;
        queue.push(entry(3, 5, 2))?;
        queue.promote();

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.queue_id, QueueId(3));
        assert_eq!(snapshot.running_ids(), vec![PipelineId(2)]);
        assert_eq!(snapshot.pending_ids(), vec![PipelineId(3), PipelineId(1)]);
        assert_eq!(snapshot.entries[0].state.as_str(), "running");
        assert_eq!(snapshot.stats.active(), 3);
        Ok(())
    }
}
