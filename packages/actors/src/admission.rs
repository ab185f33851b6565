//! Per-queue admission loop.
//!
//! Sleeps until the queue actor signals a change, asks it to promote, then
//! hands the promoted pipelines to the executor. Starting happens here and
//! not inside the actor, so a slow executor never blocks queue mutations.

use std::sync::Arc;
use std::time::Duration;

use queue_core::{Outcome, PipelineEntry, QueueId};
use ractor::ActorRef;
use ractor::rpc::CallResult;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::executor::PipelineExecutor;
use crate::messages::QueueMessage;

pub(crate) struct AdmissionLoop {
    pub queue_id: QueueId,
    pub actor: ActorRef<QueueMessage>,
    pub wake: Arc<Notify>,
    pub executor: Arc<dyn PipelineExecutor>,
    pub call_timeout: Duration,
}

impl AdmissionLoop {
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        tracing::debug!("Admission loop for queue {} started", self.queue_id);

        while !shutdown.is_cancelled() {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = shutdown.cancelled() => break,
            }

            let result = ractor::rpc::call(
                &self.actor,
                |reply| QueueMessage::Promote { reply },
                Some(self.call_timeout),
            )
            .await;

            let promoted = match result {
                Ok(CallResult::Success(promoted)) => promoted,
                Ok(CallResult::Timeout) => {
                    tracing::warn!("Queue {} did not answer promote in time", self.queue_id);
                    self.wake.notify_one();
                    continue;
                }
                Ok(CallResult::SenderError) | Err(_) => break,
            };

            for entry in promoted {
                self.start(entry).await;
            }
        }

        tracing::debug!("Admission loop for queue {} stopped", self.queue_id);
    }

    async fn start(&self, entry: PipelineEntry) {
        tracing::info!(
            "Starting pipeline {} from queue {} (priority {})",
            entry.id,
            self.queue_id,
            entry.priority
        );

        if let Err(reason) = self.executor.start(self.queue_id, &entry).await {
            tracing::warn!("Pipeline {} failed to start: {}", entry.id, reason);
            let _ = self.actor.send_message(QueueMessage::Finish {
                pipeline_id: entry.id,
                outcome: Outcome::failed(reason),
                reply: None,
            });
        }
    }
}
