//! Background writer for snapshots and queue actions.
//!
//! Callers hand writes over a channel and return immediately; the publish
//! loop performs them in submission order with bounded retries. Snapshot
//! writes still waiting for their turn are replaced in place by newer
//! snapshots of the same key, so an outage never builds a backlog of stale
//! snapshots.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use queue_core::QueueEvent;
use serde::Serialize;
use store::CoordinationStore;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::backoff::RetryPolicy;
use crate::error::{ManagerError, ManagerResult};
use crate::health::HealthState;

#[derive(Debug)]
struct Publication {
    key: String,
    value: String,
    /// Only the latest value matters; older pending values may be skipped.
    latest_wins: bool,
}

/// Handle for submitting store writes.
#[derive(Clone)]
pub(crate) struct Publisher {
    tx: mpsc::UnboundedSender<Publication>,
}

impl Publisher {
    /// Queue a JSON-encoded write of `value` under `key`.
    ///
    /// Every submitted action is written, in order.
    pub(crate) fn publish_json<T: Serialize>(&self, key: String, value: &T) -> ManagerResult<()> {
        self.send(key, value, false)
    }

    /// Queue a write that supersedes any not yet written value of `key`.
    pub(crate) fn publish_latest<T: Serialize>(
        &self,
        key: String,
        value: &T,
    ) -> ManagerResult<()> {
        self.send(key, value, true)
    }

    fn send<T: Serialize>(&self, key: String, value: &T, latest_wins: bool) -> ManagerResult<()> {
        let value = serde_json::to_string(value)?;
        self.tx
            .send(Publication {
                key,
                value,
                latest_wins,
            })
            .map_err(|_| ManagerError::ShuttingDown)
    }
}

pub(crate) struct PublishLoop {
    store: Arc<dyn CoordinationStore>,
    retry: RetryPolicy,
    health: Arc<HealthState>,
    events: broadcast::Sender<QueueEvent>,
    rx: mpsc::UnboundedReceiver<Publication>,
    backlog: VecDeque<Publication>,
}

impl PublishLoop {
    pub(crate) fn new(
        store: Arc<dyn CoordinationStore>,
        retry: RetryPolicy,
        health: Arc<HealthState>,
        events: broadcast::Sender<QueueEvent>,
    ) -> (Publisher, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publish_loop = Self {
            store,
            retry,
            health,
            events,
            rx,
            backlog: VecDeque::new(),
        };
        (Publisher { tx }, publish_loop)
    }

    /// Write until cancelled, then flush what was already submitted.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        let mut closing = false;

        loop {
            if self.backlog.is_empty() && !closing {
                tokio::select! {
                    next = self.rx.recv() => match next {
                        Some(publication) => self.push(publication),
                        None => break,
                    },
                    _ = shutdown.cancelled() => {
                        self.rx.close();
                        closing = true;
                    }
                }
            }

            while let Ok(publication) = self.rx.try_recv() {
                self.push(publication);
            }

            match self.backlog.pop_front() {
                Some(publication) => self.write(publication).await,
                None if closing => break,
                None => {}
            }
        }
        tracing::debug!("Publish loop stopped");
    }

    fn push(&mut self, publication: Publication) {
        if publication.latest_wins {
            if let Some(pending) = self
                .backlog
                .iter_mut()
                .find(|p| p.latest_wins && p.key == publication.key)
            {
                tracing::trace!("Superseding pending write to {}", publication.key);
                pending.value = publication.value;
                return;
            }
        }
        self.backlog.push_back(publication);
    }

    async fn write(&self, publication: Publication) {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            let err = match self
                .store
                .put(&publication.key, publication.value.clone())
                .await
            {
                Ok(()) => {
                    tracing::debug!("Published {}", publication.key);
                    self.health.record_write_ok();
                    return;
                }
                Err(e) => e,
            };

            if !err.is_transient() || attempts == max_attempts {
                tracing::error!(
                    "Dropping write to {} after {} attempts: {}",
                    publication.key,
                    attempts,
                    err
                );
                break;
            }

            let delay = self.retry.backoff.next(attempts - 1);
            tracing::warn!(
                "Write to {} failed (attempt {}/{}): {}; retrying in {:?}",
                publication.key,
                attempts,
                max_attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        self.health.record_write_dropped();
        let _ = self.events.send(QueueEvent::PublishDropped {
            key: publication.key,
            attempts,
            timestamp: Utc::now(),
        });
    }
}
