//! Registry of the queue actors owned by a replica.

use std::collections::HashMap;
use std::future::Future;

use queue_core::QueueId;
use ractor::ActorRef;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::ManagerResult;
use crate::messages::QueueMessage;

/// A running queue: its actor and the admission loop feeding the executor.
pub(crate) struct QueueHandle {
    actor: ActorRef<QueueMessage>,
    actor_task: ractor::concurrency::JoinHandle<()>,
    admission_task: JoinHandle<()>,
}

impl QueueHandle {
    pub(crate) fn new(
        actor: ActorRef<QueueMessage>,
        actor_task: ractor::concurrency::JoinHandle<()>,
        admission_task: JoinHandle<()>,
    ) -> Self {
        Self {
            actor,
            actor_task,
            admission_task,
        }
    }

    /// Wait for the admission loop to observe shutdown, then stop the actor
    /// once it has finished its current message.
    pub(crate) async fn stop(self) {
        let _ = self.admission_task.await;
        self.actor.stop(None);
        let _ = self.actor_task.await;
    }
}

/// Map from queue id to queue actor, written only when a queue is created.
#[derive(Default)]
pub(crate) struct QueueRegistry {
    queues: RwLock<HashMap<QueueId, QueueHandle>>,
}

impl QueueRegistry {
    pub(crate) async fn get(&self, queue_id: QueueId) -> Option<ActorRef<QueueMessage>> {
        self.queues
            .read()
            .await
            .get(&queue_id)
            .map(|handle| handle.actor.clone())
    }

    /// Every queue, ordered by id.
    pub(crate) async fn all(&self) -> Vec<(QueueId, ActorRef<QueueMessage>)> {
        let mut queues: Vec<_> = self
            .queues
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.actor.clone()))
            .collect();
        queues.sort_by_key(|(id, _)| *id);
        queues
    }

    pub(crate) async fn ids(&self) -> Vec<QueueId> {
        self.all().await.into_iter().map(|(id, _)| id).collect()
    }

    /// Look up a queue, creating it with `spawn` on first reference.
    ///
    /// Returns the actor and whether it was created by this call. Concurrent
    /// callers for the same id see exactly one creation.
    pub(crate) async fn get_or_spawn<F, Fut>(
        &self,
        queue_id: QueueId,
        spawn: F,
    ) -> ManagerResult<(ActorRef<QueueMessage>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ManagerResult<QueueHandle>>,
    {
        if let Some(actor) = self.get(queue_id).await {
            return Ok((actor, false));
        }

        let mut queues = self.queues.write().await;
        if let Some(handle) = queues.get(&queue_id) {
            return Ok((handle.actor.clone(), false));
        }

        let handle = spawn().await?;
        let actor = handle.actor.clone();
        queues.insert(queue_id, handle);
        Ok((actor, true))
    }

    /// Remove every queue, for shutdown.
    pub(crate) async fn drain(&self) -> Vec<QueueHandle> {
        self.queues.write().await.drain().map(|(_, h)| h).collect()
    }
}
