//! Queue actor owning a single pipeline queue.
//!
//! The actor's mailbox is the queue's lock: every mutation of the
//! [`PipelineQueue`] happens inside `handle`, one message at a time.

use std::sync::Arc;

use chrono::Utc;
use queue_core::{Outcome, PipelineEntry, PipelineId, PipelineQueue, QueueEvent, QueueId};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::{Notify, broadcast};

use crate::messages::QueueMessage;
use crate::publisher::Publisher;

/// Arguments for spawning a queue actor.
pub(crate) struct QueueActorArgs {
    pub queue_id: QueueId,
    pub max_concurrency: usize,
    pub snapshot_key: String,
    pub publisher: Publisher,
    pub admission: Arc<Notify>,
    pub event_tx: broadcast::Sender<QueueEvent>,
}

/// State for the queue actor.
pub(crate) struct QueueActorState {
    queue: PipelineQueue,
    snapshot_key: String,
    publisher: Publisher,
    /// Wakes this queue's admission loop.
    admission: Arc<Notify>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl QueueActorState {
    fn broadcast(&self, event: QueueEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish_snapshot(&self) {
        let snapshot = self.queue.snapshot();
        if let Err(e) = self
            .publisher
            .publish_latest(self.snapshot_key.clone(), &snapshot)
        {
            tracing::warn!("Snapshot of queue {} not published: {}", self.queue.id(), e);
        }
    }

    /// Re-run admission and republish after a mutation.
    fn changed(&self) {
        self.admission.notify_one();
        self.publish_snapshot();
    }

    fn started(&self, entry: &PipelineEntry) {
        self.broadcast(QueueEvent::PipelineStarted {
            queue_id: self.queue.id(),
            pipeline_id: entry.id,
            timestamp: Utc::now(),
        });
    }

    fn finish(&mut self, entry_id: PipelineId, outcome: Outcome) -> bool {
        let released = if outcome.is_success() {
            self.queue.complete(entry_id)
        } else {
            self.queue.fail(entry_id)
        };

        if released.is_none() {
            return false;
        }

        tracing::info!(
            "Pipeline {} in queue {} finished: {:?}",
            entry_id,
            self.queue.id(),
            outcome
        );
        self.broadcast(QueueEvent::PipelineFinished {
            queue_id: self.queue.id(),
            pipeline_id: entry_id,
            outcome,
            timestamp: Utc::now(),
        });
        self.changed();
        true
    }
}

/// Queue actor that manages a single queue.
pub(crate) struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting queue actor {} (max concurrency {})",
            args.queue_id,
            args.max_concurrency
        );

        let state = QueueActorState {
            queue: PipelineQueue::new(args.queue_id, args.max_concurrency),
            snapshot_key: args.snapshot_key,
            publisher: args.publisher,
            admission: args.admission,
            event_tx: args.event_tx,
        };
        state.broadcast(QueueEvent::QueueCreated {
            queue_id: args.queue_id,
            max_concurrency: args.max_concurrency,
            timestamp: Utc::now(),
        });
        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { entry, reply } => {
                let entry = *entry;
                let (pipeline_id, priority) = (entry.id, entry.priority);

                match state.queue.push(entry) {
                    Ok(()) => {
                        tracing::debug!(
                            "Enqueued pipeline {} in queue {} at priority {}",
                            pipeline_id,
                            state.queue.id(),
                            priority
                        );
                        state.broadcast(QueueEvent::PipelineEnqueued {
                            queue_id: state.queue.id(),
                            pipeline_id,
                            priority,
                            timestamp: Utc::now(),
                        });
                        state.changed();
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            QueueMessage::Promote { reply } => {
                let promoted = state.queue.promote();
                for entry in &promoted {
                    state.started(entry);
                }
                if !promoted.is_empty() {
                    state.publish_snapshot();
                }
                let _ = reply.send(promoted);
            }

            QueueMessage::ApplyPriorityUpdate { changes } => {
                let mut applied = 0;
                for change in changes {
                    if state
                        .queue
                        .update_priority(change.pipeline_id, change.priority)
                    {
                        applied += 1;
                        state.broadcast(QueueEvent::PriorityChanged {
                            queue_id: state.queue.id(),
                            pipeline_id: change.pipeline_id,
                            priority: change.priority,
                            timestamp: Utc::now(),
                        });
                    } else {
                        tracing::debug!(
                            "Priority change for pipeline {} not applicable in queue {}",
                            change.pipeline_id,
                            state.queue.id()
                        );
                    }
                }
                if applied > 0 {
                    state.changed();
                }
            }

            QueueMessage::PopOut { pipeline_id, reply } => {
                let removed = state.queue.pop_out(pipeline_id).is_some();
                if removed {
                    tracing::info!(
                        "Popped pipeline {} out of queue {}",
                        pipeline_id,
                        state.queue.id()
                    );
                    state.broadcast(QueueEvent::PipelinePoppedOut {
                        queue_id: state.queue.id(),
                        pipeline_id,
                        timestamp: Utc::now(),
                    });
                    state.changed();
                }
                let _ = reply.send(removed);
            }

            QueueMessage::Finish {
                pipeline_id,
                outcome,
                reply,
            } => {
                let released = state.finish(pipeline_id, outcome);
                if let Some(reply) = reply {
                    let _ = reply.send(released);
                }
            }

            QueueMessage::SetMaxConcurrency { max_concurrency } => {
                if state.queue.max_concurrency() != max_concurrency {
                    state.queue.set_max_concurrency(max_concurrency);
                    state.broadcast(QueueEvent::ConcurrencyChanged {
                        queue_id: state.queue.id(),
                        max_concurrency,
                        timestamp: Utc::now(),
                    });
                    state.changed();
                }
            }

            QueueMessage::GetSnapshot { reply } => {
                let _ = reply.send(state.queue.snapshot());
            }

            QueueMessage::Publish => {
                state.publish_snapshot();
            }
        }

        Ok(())
    }
}
