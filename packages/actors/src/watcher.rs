//! Watch loops applying store events to local queues.
//!
//! Every replica, including the one that wrote an action, applies it here.
//! A loop never ends on its own: read failures and closed streams lead to a
//! resubscribe with backoff until shutdown. After every subscribe the loop
//! lists its prefix and replays what is there, so writes made while it was
//! not subscribed are still applied.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use queue_core::{KeyLayout, PipelineId, PopOutMarker, PriorityUpdate, QueueId, WatchedEvent};
use store::{CoordinationStore, StoreError, WatchEvent, WatchEventKind, WatchStream};
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::health::HealthState;
use crate::messages::{QueueMessage, ask};
use crate::registry::QueueRegistry;

pub(crate) struct WatchLoop {
    pub prefix: String,
    pub layout: KeyLayout,
    pub store: Arc<dyn CoordinationStore>,
    pub registry: Arc<QueueRegistry>,
    pub health: Arc<HealthState>,
    pub backoff: BackoffPolicy,
    pub call_timeout: Duration,
    /// Pop-out markers older than this are deleted and no longer replayed.
    pub pop_out_retention: Option<Duration>,
}

impl WatchLoop {
    /// Attempt one subscription.
    pub(crate) async fn subscribe(&self) -> Option<WatchStream> {
        match self.store.watch(&self.prefix).await {
            Ok(stream) => {
                tracing::info!("Watching {}", self.prefix);
                self.health.watch_connected();
                Some(stream)
            }
            Err(e) => {
                tracing::warn!("Failed to watch {}: {}", self.prefix, e);
                None
            }
        }
    }

    pub(crate) async fn run(self, initial: Option<WatchStream>, shutdown: CancellationToken) {
        let mut pending = initial;
        let mut attempt: u32 = 0;

        let sweep_period = self.pop_out_retention.unwrap_or(Duration::from_secs(3600));
        let mut sweep =
            tokio::time::interval_at(tokio::time::Instant::now() + sweep_period, sweep_period);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !shutdown.is_cancelled() {
            let mut stream = match pending.take() {
                Some(stream) => stream,
                None => {
                    let delay = self.backoff.next(attempt);
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    match self.subscribe().await {
                        Some(stream) => stream,
                        None => continue,
                    }
                }
            };

            // Subscribed first, listed second: nothing written in between is lost
            match self.catch_up().await {
                Ok(replayed) => {
                    if replayed > 0 {
                        attempt = 0;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to list {}: {}; resubscribing", self.prefix, e);
                    self.health.watch_disconnected();
                    continue;
                }
            }

            loop {
                tokio::select! {
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            attempt = 0;
                            self.handle(event).await;
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Watch on {} failed: {}; resubscribing", self.prefix, e);
                            break;
                        }
                        None => {
                            tracing::warn!("Watch on {} ended; resubscribing", self.prefix);
                            break;
                        }
                    },
                    _ = sweep.tick(), if self.pop_out_retention.is_some() => {
                        self.expire_pop_outs().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            self.health.watch_disconnected();
        }

        tracing::debug!("Watch loop for {} stopped", self.prefix);
    }

    /// Replay every live key under the prefix. Returns how many were applied.
    async fn catch_up(&self) -> Result<usize, StoreError> {
        let pairs = self.store.list(&self.prefix).await?;
        let mut replayed = 0;

        for (key, value) in pairs {
            if self.is_expired(&value) {
                self.delete_expired(&key).await;
                continue;
            }
            self.handle(WatchEvent {
                kind: WatchEventKind::Updated,
                key,
                value: Some(value),
            })
            .await;
            replayed += 1;
        }

        if replayed > 0 {
            tracing::debug!("Replayed {} keys under {}", replayed, self.prefix);
        }
        Ok(replayed)
    }

    /// Whether `value` is a pop-out marker past its retention.
    fn is_expired(&self, value: &str) -> bool {
        let Some(retention) = self.pop_out_retention else {
            return false;
        };
        let Ok(marker) = serde_json::from_str::<PopOutMarker>(value) else {
            return false;
        };
        Utc::now()
            .signed_duration_since(marker.requested_at)
            .to_std()
            .is_ok_and(|age| age > retention)
    }

    async fn expire_pop_outs(&self) {
        let pairs = match self.store.list(&self.prefix).await {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::warn!("Failed to list {} for expiry: {}", self.prefix, e);
                return;
            }
        };
        for (key, value) in pairs {
            if self.is_expired(&value) {
                self.delete_expired(&key).await;
            }
        }
    }

    async fn delete_expired(&self, key: &str) {
        // Every replica sweeps; deleting a missing key is fine
        match self.store.delete(key).await {
            Ok(()) => tracing::debug!("Deleted expired {}", key),
            Err(e) => tracing::warn!("Failed to delete expired {}: {}", key, e),
        }
    }

    async fn handle(&self, event: WatchEvent) {
        if event.kind == WatchEventKind::Deleted {
            tracing::debug!("Ignoring delete of {}", event.key);
            return;
        }
        let Some(value) = event.value else {
            return;
        };

        match self.layout.decode(&event.key, &value) {
            Ok(WatchedEvent::PriorityUpdate { queue_id, update }) => {
                self.apply_priority_update(queue_id, update).await;
            }
            Ok(WatchedEvent::PopOut { pipeline_id }) => {
                self.apply_pop_out(pipeline_id).await;
            }
            Ok(WatchedEvent::QueueSnapshot { queue_id, .. }) => {
                tracing::debug!("Ignoring snapshot of queue {}", queue_id);
            }
            Err(e) => {
                tracing::error!("Skipping watched event: {}", e);
            }
        }
    }

    async fn apply_priority_update(&self, queue_id: QueueId, update: PriorityUpdate) {
        let Some(actor) = self.registry.get(queue_id).await else {
            tracing::debug!("Priority update for unknown queue {}", queue_id);
            return;
        };

        tracing::debug!(
            "Applying {} priority changes to queue {}",
            update.changes.len(),
            queue_id
        );
        if let Err(e) = actor.send_message(QueueMessage::ApplyPriorityUpdate {
            changes: update.changes,
        }) {
            tracing::warn!("Queue {} rejected priority update: {}", queue_id, e);
        }
    }

    async fn apply_pop_out(&self, pipeline_id: PipelineId) {
        for (queue_id, actor) in self.registry.all().await {
            let result = ask(
                &actor,
                |reply| QueueMessage::PopOut { pipeline_id, reply },
                self.call_timeout,
            )
            .await;

            match result {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => tracing::warn!("Pop-out lookup in queue {} failed: {}", queue_id, e),
            }
        }
        tracing::debug!("Pop-out of pipeline {} matched no queue", pipeline_id);
    }
}
