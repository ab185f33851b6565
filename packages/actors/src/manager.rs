//! Queue manager: the replica-level entry point.
//!
//! Owns the queue actors of one replica, routes caller operations to them,
//! and wires up the background tasks:
//!
//! - one publish loop writing snapshots and action requests to the store
//! - one watch loop per action prefix (priority updates, pop-outs)
//! - one admission loop per queue
//!
//! Priority updates and pop-outs are only ever written to the store here.
//! Local queues change when the watch loop sees the write come back, exactly
//! as on every other replica.

use std::sync::Arc;

use queue_core::{
    KeyLayout, Outcome, PipelineEntry, PipelineId, PopOutMarker, Priority, PriorityUpdate,
    QueueEvent, QueueId, QueueSnapshot,
};
use ractor::{Actor, ActorRef};
use store::CoordinationStore;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionLoop;
use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::executor::PipelineExecutor;
use crate::health::{Health, HealthState};
use crate::messages::{QueueMessage, ask};
use crate::publisher::{PublishLoop, Publisher};
use crate::queue_actor::{QueueActor, QueueActorArgs};
use crate::registry::{QueueHandle, QueueRegistry};
use crate::watcher::WatchLoop;

struct ManagerInner {
    config: ManagerConfig,
    layout: KeyLayout,
    store: Arc<dyn CoordinationStore>,
    executor: Arc<dyn PipelineExecutor>,
    registry: Arc<QueueRegistry>,
    publisher: Publisher,
    health: Arc<HealthState>,
    event_tx: broadcast::Sender<QueueEvent>,
    /// Root token: cancelling it stops the publish loop and everything below.
    shutdown: CancellationToken,
    /// Child of `shutdown` for watch and admission loops. Cancelled first so
    /// the publisher can still flush the queues' last writes.
    loops: CancellationToken,
    watch_tasks: Mutex<Vec<JoinHandle<()>>>,
    publish_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running queue manager replica. Cheap to clone.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<ManagerInner>,
}

impl QueueManager {
    /// Start a replica: publish loop, watch loops and an empty registry.
    ///
    /// Both watches are subscribed once before this returns; if the store is
    /// unreachable the loops keep retrying in the background.
    pub async fn start(
        config: ManagerConfig,
        store: Arc<dyn CoordinationStore>,
        executor: Arc<dyn PipelineExecutor>,
    ) -> ManagerResult<Self> {
        if config.publish_retry.max_attempts == 0 {
            return Err(ManagerError::InvalidConfig(
                "publish retry needs at least one attempt".into(),
            ));
        }
        if config.pop_out_retention.is_zero() {
            return Err(ManagerError::InvalidConfig(
                "pop-out retention must be positive".into(),
            ));
        }

        let layout = KeyLayout::new(&config.key_root);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let shutdown = CancellationToken::new();
        let loops = shutdown.child_token();
        let health = Arc::new(HealthState::default());
        let registry = Arc::new(QueueRegistry::default());

        let (publisher, publish_loop) = PublishLoop::new(
            store.clone(),
            config.publish_retry,
            health.clone(),
            event_tx.clone(),
        );
        let publish_task = tokio::spawn(publish_loop.run(shutdown.clone()));

        let mut watch_tasks = Vec::new();
        for prefix in [layout.update_prefix(), layout.pop_out_prefix()] {
            let watch_loop = WatchLoop {
                prefix: prefix.to_string(),
                layout: layout.clone(),
                store: store.clone(),
                registry: registry.clone(),
                health: health.clone(),
                backoff: config.watch_backoff,
                call_timeout: config.call_timeout,
                pop_out_retention: (prefix == layout.pop_out_prefix())
                    .then_some(config.pop_out_retention),
            };
            let initial = watch_loop.subscribe().await;
            watch_tasks.push(tokio::spawn(watch_loop.run(initial, loops.clone())));
        }

        tracing::info!("Queue manager started under {}", config.key_root);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                layout,
                store,
                executor,
                registry,
                publisher,
                health,
                event_tx,
                shutdown,
                loops,
                watch_tasks: Mutex::new(watch_tasks),
                publish_task: Mutex::new(Some(publish_task)),
            }),
        })
    }

    /// Key layout this replica reads and writes.
    pub fn keys(&self) -> &KeyLayout {
        &self.inner.layout
    }

    /// Add a pipeline to a queue, creating the queue on first reference.
    pub async fn enqueue(&self, queue_id: QueueId, entry: PipelineEntry) -> ManagerResult<()> {
        let (actor, _) = self.queue(queue_id, None).await?;
        self.ask(&actor, |reply| QueueMessage::Enqueue {
            entry: Box::new(entry),
            reply,
        })
        .await??;
        Ok(())
    }

    /// Ask every replica to move `pipeline_ids` of a queue to `priority`.
    ///
    /// Only writes the request. Pipelines that are no longer pending by the
    /// time it is applied are left alone.
    pub fn request_priority_update(
        &self,
        queue_id: QueueId,
        pipeline_ids: &[PipelineId],
        priority: Priority,
    ) -> ManagerResult<()> {
        self.ensure_running()?;
        if pipeline_ids.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            "Requesting priority {} for {} pipelines of queue {}",
            priority,
            pipeline_ids.len(),
            queue_id
        );
        self.inner.publisher.publish_json(
            self.inner.layout.update_key(queue_id),
            &PriorityUpdate::uniform(pipeline_ids, priority),
        )
    }

    /// Ask every replica to remove a pipeline from whichever queue holds it.
    pub fn request_pop_out(&self, pipeline_id: PipelineId) -> ManagerResult<()> {
        self.ensure_running()?;
        tracing::debug!("Requesting pop-out of pipeline {}", pipeline_id);
        self.inner
            .publisher
            .publish_json(self.inner.layout.pop_out_key(pipeline_id), &PopOutMarker::now())
    }

    /// Republish a queue's snapshot. Returns `false` for unknown queues.
    pub async fn publish_snapshot(&self, queue_id: QueueId) -> ManagerResult<bool> {
        self.ensure_running()?;
        let Some(actor) = self.inner.registry.get(queue_id).await else {
            return Ok(false);
        };
        actor
            .send_message(QueueMessage::Publish)
            .map_err(|e| ManagerError::Actor(e.to_string()))?;
        Ok(true)
    }

    /// Release a running pipeline that completed.
    ///
    /// Returns `false` if no queue has it running.
    pub async fn complete(&self, pipeline_id: PipelineId) -> ManagerResult<bool> {
        self.finish(pipeline_id, Outcome::Completed).await
    }

    /// Release a running pipeline that failed.
    pub async fn fail(
        &self,
        pipeline_id: PipelineId,
        reason: impl Into<String>,
    ) -> ManagerResult<bool> {
        self.finish(pipeline_id, Outcome::failed(reason)).await
    }

    /// Set a queue's concurrency limit, creating the queue if needed.
    pub async fn set_max_concurrency(
        &self,
        queue_id: QueueId,
        max_concurrency: usize,
    ) -> ManagerResult<()> {
        let (actor, created) = self.queue(queue_id, Some(max_concurrency)).await?;
        if !created {
            actor
                .send_message(QueueMessage::SetMaxConcurrency { max_concurrency })
                .map_err(|e| ManagerError::Actor(e.to_string()))?;
        }
        Ok(())
    }

    /// Local view of a queue.
    pub async fn snapshot(&self, queue_id: QueueId) -> ManagerResult<Option<QueueSnapshot>> {
        let Some(actor) = self.inner.registry.get(queue_id).await else {
            return Ok(None);
        };
        let snapshot = self
            .ask(&actor, |reply| QueueMessage::GetSnapshot { reply })
            .await?;
        Ok(Some(snapshot))
    }

    /// Last snapshot of a queue published to the store by any replica.
    pub async fn published_snapshot(
        &self,
        queue_id: QueueId,
    ) -> ManagerResult<Option<QueueSnapshot>> {
        let key = self.inner.layout.snapshot_key(queue_id);
        match self.inner.store.get(&key).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Queues known to this replica, ordered by id.
    pub async fn queue_ids(&self) -> Vec<QueueId> {
        self.inner.registry.ids().await
    }

    /// Subscribe to local queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn health(&self) -> Health {
        self.inner.health.snapshot()
    }

    /// Stop every background task and queue actor.
    ///
    /// Queue actors finish the message they are handling, and writes already
    /// handed to the publisher are flushed before this returns.
    pub async fn shutdown(&self) {
        if self.inner.loops.is_cancelled() {
            return;
        }
        self.inner.loops.cancel();
        tracing::info!("Shutting down queue manager");

        let watch_tasks = std::mem::take(&mut *self.inner.watch_tasks.lock().await);
        for task in watch_tasks {
            let _ = task.await;
        }

        for handle in self.inner.registry.drain().await {
            handle.stop().await;
        }

        self.inner.shutdown.cancel();
        if let Some(task) = self.inner.publish_task.lock().await.take() {
            let _ = task.await;
        }

        tracing::info!("Queue manager stopped");
    }

    fn ensure_running(&self) -> ManagerResult<()> {
        if self.inner.loops.is_cancelled() {
            Err(ManagerError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    async fn ask<T, F>(&self, actor: &ActorRef<QueueMessage>, build: F) -> ManagerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(ractor::RpcReplyPort<T>) -> QueueMessage,
    {
        ask(actor, build, self.inner.config.call_timeout).await
    }

    /// Offer the outcome to every queue until one releases the pipeline.
    ///
    /// A queue that fails to answer is skipped; its error is returned only
    /// when no other queue held the pipeline.
    async fn finish(&self, pipeline_id: PipelineId, outcome: Outcome) -> ManagerResult<bool> {
        self.ensure_running()?;
        let mut first_error = None;

        for (queue_id, actor) in self.inner.registry.all().await {
            let result = self
                .ask(&actor, |reply| QueueMessage::Finish {
                    pipeline_id,
                    outcome: outcome.clone(),
                    reply: Some(reply),
                })
                .await;

            match result {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Finish lookup in queue {} failed: {}", queue_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::debug!("Pipeline {} is not running in any queue", pipeline_id);
                Ok(false)
            }
        }
    }

    /// Look up a queue, creating it on first reference.
    ///
    /// `max_concurrency` overrides the configured limit for a new queue.
    async fn queue(
        &self,
        queue_id: QueueId,
        max_concurrency: Option<usize>,
    ) -> ManagerResult<(ActorRef<QueueMessage>, bool)> {
        self.ensure_running()?;
        let max_concurrency =
            max_concurrency.unwrap_or_else(|| self.inner.config.max_concurrency_for(queue_id));

        self.inner
            .registry
            .get_or_spawn(queue_id, || self.spawn_queue(queue_id, max_concurrency))
            .await
    }

    async fn spawn_queue(
        &self,
        queue_id: QueueId,
        max_concurrency: usize,
    ) -> ManagerResult<QueueHandle> {
        let wake = Arc::new(Notify::new());
        let args = QueueActorArgs {
            queue_id,
            max_concurrency,
            snapshot_key: self.inner.layout.snapshot_key(queue_id),
            publisher: self.inner.publisher.clone(),
            admission: wake.clone(),
            event_tx: self.inner.event_tx.clone(),
        };

        let (actor, actor_task) = Actor::spawn(None, QueueActor, args)
            .await
            .map_err(|e| ManagerError::Spawn(e.to_string()))?;

        let admission = AdmissionLoop {
            queue_id,
            actor: actor.clone(),
            wake,
            executor: self.inner.executor.clone(),
            call_timeout: self.inner.config.call_timeout,
        };
        let admission_task = tokio::spawn(admission.run(self.inner.loops.child_token()));

        Ok(QueueHandle::new(actor, actor_task, admission_task))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::error::Error;
    use std::time::Duration;

    use store::MemoryStore;

    use super::*;
    use crate::executor::{FnExecutor, StartFuture};

    async fn wait_for(mut check: impl AsyncFnMut() -> bool) -> bool {
        for _ in 0..500 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn finish_skips_a_queue_that_cannot_answer() -> Result<(), Box<dyn Error>> {
        let executor =
            FnExecutor::new(|_: QueueId, _: &PipelineEntry| -> StartFuture { Box::pin(async { Ok(()) }) });
        let mut config = ManagerConfig::default().with_default_max_concurrency(1);
        config.call_timeout = Duration::from_millis(200);
        let manager =
            QueueManager::start(config, Arc::new(MemoryStore::new()), Arc::new(executor)).await?;

        manager.enqueue(QueueId(1), PipelineEntry::new(PipelineId(1), Priority(0))).await?;
        manager.enqueue(QueueId(2), PipelineEntry::new(PipelineId(2), Priority(0))).await?;
        assert!(
            wait_for(async || {
                matches!(
                    manager.snapshot(QueueId(2)).await,
                    Ok(Some(s)) if s.running_ids() == vec![PipelineId(2)]
                )
            })
            .await
        );

        // Queue 1 is searched first and no longer answers
        let stuck = manager
            .inner
            .registry
            .get(QueueId(1))
            .await
            .ok_or("queue 1 missing")?;
        stuck.stop(None);
        assert!(wait_for(async || manager.snapshot(QueueId(1)).await.is_err()).await);

        assert!(manager.complete(PipelineId(2)).await?);
        let snapshot = manager.snapshot(QueueId(2)).await?.ok_or("queue 2 missing")?;
        assert_eq!(snapshot.stats.completed, 1);

        // Held by no reachable queue: the lookup failure surfaces
        assert!(manager.fail(PipelineId(3), "lost").await.is_err());

        manager.shutdown().await;
        Ok(())
    }
}
