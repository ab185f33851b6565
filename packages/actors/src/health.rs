//! Replica health signals.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Number of watch loops a replica runs (priority updates and pop-outs).
pub(crate) const WATCH_LOOPS: usize = 2;

/// Point-in-time health of a replica's store integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Health {
    /// The last store write was dropped after exhausting retries.
    pub publish_degraded: bool,
    /// Writes dropped since start.
    pub dropped_writes: u64,
    /// Watch loops currently subscribed.
    pub watches_connected: usize,
}

impl Health {
    /// Local queues keep working while degraded; this only reports whether
    /// cross-replica propagation is currently intact.
    pub fn is_healthy(&self) -> bool {
        !self.publish_degraded && self.watches_connected == WATCH_LOOPS
    }
}

#[derive(Debug, Default)]
pub(crate) struct HealthState {
    publish_degraded: AtomicBool,
    dropped_writes: AtomicU64,
    watches_connected: AtomicUsize,
}

impl HealthState {
    pub(crate) fn record_write_ok(&self) {
        if self.publish_degraded.swap(false, Ordering::SeqCst) {
            tracing::info!("Coordination store writes recovered");
        }
    }

    pub(crate) fn record_write_dropped(&self) {
        self.publish_degraded.store(true, Ordering::SeqCst);
        self.dropped_writes.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn watch_connected(&self) {
        self.watches_connected.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn watch_disconnected(&self) {
        self.watches_connected.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> Health {
        Health {
            publish_degraded: self.publish_degraded.load(Ordering::SeqCst),
            dropped_writes: self.dropped_writes.load(Ordering::SeqCst),
            watches_connected: self.watches_connected.load(Ordering::SeqCst),
        }
    }
}
