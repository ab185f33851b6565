//! In-process coordination store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::{Mutex, broadcast};

use crate::{CoordinationStore, StoreError, StoreFuture, WatchEvent, WatchEventKind, WatchStream};

const WATCH_BUFFER: usize = 1024;

struct Inner {
    entries: BTreeMap<String, String>,
    events: broadcast::Sender<WatchEvent>,
}

/// Coordination store kept in process memory.
///
/// Every write is broadcast to watchers while the store lock is held, so
/// watchers observe writes in commit order. Share one instance (behind an
/// `Arc`) between managers to simulate several replicas.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                events,
            }),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// End every open watch stream, as a dropped connection would.
    pub async fn disconnect_watchers(&self) {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        self.inner.lock().await.events = events;
    }

    /// Make every open watch lag, as a stalled consumer would.
    ///
    /// Pushes more unrelated events than the watch buffer holds, so each open
    /// stream reports an error on its next read.
    pub async fn lag_watchers(&self) {
        let inner = self.inner.lock().await;
        for _ in 0..=WATCH_BUFFER {
            let _ = inner.events.send(WatchEvent {
                kind: WatchEventKind::Updated,
                key: String::new(),
                value: None,
            });
        }
    }

    /// Keys currently stored under `prefix`.
    pub async fn keys(&self, prefix: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".into()))
        }
    }
}

impl CoordinationStore for MemoryStore {
    fn put<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            let mut inner = self.inner.lock().await;
            let kind = match inner.entries.insert(key.to_string(), value.clone()) {
                Some(_) => WatchEventKind::Updated,
                None => WatchEventKind::Created,
            };
            // No receivers is fine
            let _ = inner.events.send(WatchEvent {
                kind,
                key: key.to_string(),
                value: Some(value),
            });
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.inner.lock().await.entries.get(key).cloned())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            let mut inner = self.inner.lock().await;
            if let Some(previous) = inner.entries.remove(key) {
                let _ = inner.events.send(WatchEvent {
                    kind: WatchEventKind::Deleted,
                    key: key.to_string(),
                    value: Some(previous),
                });
            }
            Ok(())
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<(String, String)>> {
        Box::pin(async move {
            self.check_available()?;
            let inner = self.inner.lock().await;
            Ok(inner
                .entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }

    fn watch<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, WatchStream> {
        Box::pin(async move {
            self.check_available()?;
            let rx = self.inner.lock().await.events.subscribe();
            let prefix = prefix.to_string();

            let stream = futures_util::stream::unfold(rx, move |mut rx| {
                let prefix = prefix.clone();
                async move {
                    loop {
                        match rx.recv().await {
                            Ok(event) if event.key.starts_with(&prefix) => {
                                return Some((Ok(event), rx));
                            }
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                let err = StoreError::Unavailable(format!(
                                    "watch on {prefix} lagged by {missed} events"
                                ));
                                return Some((Err(err), rx));
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                }
            });

            Ok(stream.boxed())
        })
    }
}
