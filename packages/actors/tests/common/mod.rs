#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use actors::{
    BackoffPolicy, FnExecutor, ManagerConfig, ManagerResult, PipelineExecutor, QueueManager,
    RetryPolicy, StartFuture,
};
use chrono::{DateTime, Utc};
use queue_core::{PipelineEntry, PipelineId, QueueId};
use store::MemoryStore;
use tokio::sync::mpsc;

pub const DEADLINE: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

pub type Started = mpsc::UnboundedReceiver<(QueueId, PipelineId)>;

/// Short retries so outage tests finish quickly.
pub fn fast_config() -> ManagerConfig {
    let backoff = BackoffPolicy {
        first: Duration::from_millis(10),
        max: Duration::from_millis(50),
        factor: 2.0,
    };
    ManagerConfig::default()
        .with_publish_retry(RetryPolicy {
            max_attempts: 2,
            backoff,
        })
        .with_watch_backoff(backoff)
}

/// Executor that reports every start on a channel and refuses `failing` ids.
pub fn recording_executor(failing: &[u64]) -> (Arc<dyn PipelineExecutor>, Started) {
    let (tx, rx) = mpsc::unbounded_channel();
    let failing: HashSet<PipelineId> = failing.iter().copied().map(PipelineId).collect();

    let executor = FnExecutor::new(move |queue_id: QueueId, entry: &PipelineEntry| -> StartFuture {
        let tx = tx.clone();
        let id = entry.id;
        let refuse = failing.contains(&id);
        Box::pin(async move {
            let _ = tx.send((queue_id, id));
            if refuse {
                Err(format!("executor refused pipeline {id}"))
            } else {
                Ok(())
            }
        })
    });
    (Arc::new(executor), rx)
}

pub async fn start_manager(
    store: &Arc<MemoryStore>,
    config: ManagerConfig,
) -> ManagerResult<(QueueManager, Started)> {
    let (executor, started) = recording_executor(&[]);
    let manager = QueueManager::start(config, store.clone(), executor).await?;
    Ok((manager, started))
}

pub fn entry(id: u64, priority: i64, offset_secs: i64) -> PipelineEntry {
    let enqueued_at = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(offset_secs);
    PipelineEntry::new(PipelineId(id), priority).with_enqueued_at(enqueued_at)
}

pub fn ids(raw: &[u64]) -> Vec<PipelineId> {
    raw.iter().copied().map(PipelineId).collect()
}

pub async fn pending_ids(manager: &QueueManager, queue_id: QueueId) -> Vec<PipelineId> {
    match manager.snapshot(queue_id).await {
        Ok(Some(snapshot)) => snapshot.pending_ids(),
        _ => Vec::new(),
    }
}

/// Poll until the queue's pending order equals `expected`.
pub async fn wait_for_pending(manager: &QueueManager, queue_id: QueueId, expected: &[u64]) -> bool {
    let expected = ids(expected);
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while tokio::time::Instant::now() < deadline {
        if pending_ids(manager, queue_id).await == expected {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

/// Poll until exactly `count` keys live under `prefix`.
pub async fn wait_for_keys(store: &MemoryStore, prefix: &str, count: usize) -> bool {
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while tokio::time::Instant::now() < deadline {
        if store.keys(prefix).await.len() == count {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

/// Poll a synchronous condition.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

/// Next pipeline handed to the executor.
pub async fn next_started(started: &mut Started) -> Option<PipelineId> {
    match tokio::time::timeout(DEADLINE, started.recv()).await {
        Ok(Some((_, id))) => Some(id),
        _ => None,
    }
}

/// Assert nothing is started for a short while.
pub async fn nothing_started(started: &mut Started) -> bool {
    tokio::time::timeout(Duration::from_millis(100), started.recv())
        .await
        .is_err()
}
