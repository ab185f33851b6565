//! Queue manager configuration.

use std::collections::HashMap;
use std::time::Duration;

use queue_core::QueueId;
use queue_core::keys::DEFAULT_KEY_ROOT;

use crate::backoff::{BackoffPolicy, RetryPolicy};
use crate::error::ManagerError;

/// Configuration for a queue manager replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Root path of every coordination-store key.
    pub key_root: String,
    /// Concurrency limit for queues without an override.
    pub default_max_concurrency: usize,
    /// Per-queue concurrency limits.
    pub queue_concurrency: HashMap<QueueId, usize>,
    /// Retry policy for snapshot and action writes.
    pub publish_retry: RetryPolicy,
    /// Backoff between watch resubscriptions. Retries never stop.
    pub watch_backoff: BackoffPolicy,
    /// How long to wait for a queue actor to answer.
    pub call_timeout: Duration,
    /// Capacity of the local event broadcast channel.
    pub event_capacity: usize,
    /// Age after which pop-out markers are deleted from the store.
    ///
    /// A replica disconnected for longer than this may miss pop-outs.
    pub pop_out_retention: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            key_root: DEFAULT_KEY_ROOT.to_string(),
            default_max_concurrency: 4,
            queue_concurrency: HashMap::new(),
            publish_retry: RetryPolicy::default(),
            watch_backoff: BackoffPolicy {
                first: Duration::from_millis(200),
                max: Duration::from_secs(30),
                factor: 2.0,
            },
            call_timeout: Duration::from_secs(5),
            event_capacity: 1024,
            pop_out_retention: Duration::from_secs(600),
        }
    }
}

impl ManagerConfig {
    /// Set the key root.
    pub fn with_key_root(mut self, key_root: impl Into<String>) -> Self {
        self.key_root = key_root.into();
        self
    }

    /// Set the default concurrency limit.
    pub fn with_default_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.default_max_concurrency = max_concurrency;
        self
    }

    /// Override the concurrency limit of one queue.
    pub fn with_queue_concurrency(mut self, queue_id: QueueId, max_concurrency: usize) -> Self {
        self.queue_concurrency.insert(queue_id, max_concurrency);
        self
    }

    /// Set the publish retry policy.
    pub fn with_publish_retry(mut self, retry: RetryPolicy) -> Self {
        self.publish_retry = retry;
        self
    }

    /// Set the watch resubscribe backoff.
    pub fn with_watch_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.watch_backoff = backoff;
        self
    }

    /// Set how long pop-out markers stay in the store.
    pub fn with_pop_out_retention(mut self, retention: Duration) -> Self {
        self.pop_out_retention = retention;
        self
    }

    /// Concurrency limit for a queue created on first reference.
    pub fn max_concurrency_for(&self, queue_id: QueueId) -> usize {
        self.queue_concurrency
            .get(&queue_id)
            .copied()
            .unwrap_or(self.default_max_concurrency)
    }

    /// Build a config from environment variables, starting from defaults.
    ///
    /// - `QUEUE_KEY_ROOT`: key root (default: `/devops/pipeline/queue_manager`)
    /// - `QUEUE_DEFAULT_CONCURRENCY`: default per-queue limit
    /// - `QUEUE_CONCURRENCY_OVERRIDES`: `queueID=limit` pairs, comma separated
    /// - `QUEUE_PUBLISH_MAX_ATTEMPTS`: store write attempts before dropping
    /// - `QUEUE_CALL_TIMEOUT_MS`: queue actor reply timeout
    /// - `QUEUE_POP_OUT_RETENTION_SECS`: lifetime of pop-out markers
    pub fn from_env() -> Result<Self, ManagerError> {
        let mut config = Self::default();

        if let Some(root) = env_var("QUEUE_KEY_ROOT") {
            config.key_root = root;
        }
        if let Some(limit) = env_var("QUEUE_DEFAULT_CONCURRENCY") {
            config.default_max_concurrency = parse_number("QUEUE_DEFAULT_CONCURRENCY", &limit)?;
        }
        if let Some(overrides) = env_var("QUEUE_CONCURRENCY_OVERRIDES") {
            config.queue_concurrency = parse_overrides(&overrides)?;
        }
        if let Some(attempts) = env_var("QUEUE_PUBLISH_MAX_ATTEMPTS") {
            config.publish_retry.max_attempts = parse_number("QUEUE_PUBLISH_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(timeout) = env_var("QUEUE_CALL_TIMEOUT_MS") {
            config.call_timeout =
                Duration::from_millis(parse_number("QUEUE_CALL_TIMEOUT_MS", &timeout)?);
        }
        if let Some(retention) = env_var("QUEUE_POP_OUT_RETENTION_SECS") {
            config.pop_out_retention =
                Duration::from_secs(parse_number("QUEUE_POP_OUT_RETENTION_SECS", &retention)?);
        }

        if config.publish_retry.max_attempts == 0 {
            return Err(ManagerError::InvalidConfig(
                "QUEUE_PUBLISH_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }

        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ManagerError> {
    raw.parse()
        .map_err(|_| ManagerError::InvalidConfig(format!("invalid number for {name}={raw}")))
}

/// Parse `1=2,7=0` into per-queue limits.
fn parse_overrides(raw: &str) -> Result<HashMap<QueueId, usize>, ManagerError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (queue, limit) = pair.split_once('=').ok_or_else(|| {
                ManagerError::InvalidConfig(format!("expected queueID=limit, got {pair:?}"))
            })?;
            let queue_id = parse_number::<u64>("QUEUE_CONCURRENCY_OVERRIDES", queue.trim())?;
            let limit = parse_number::<usize>("QUEUE_CONCURRENCY_OVERRIDES", limit.trim())?;
            Ok((QueueId(queue_id), limit))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_fall_back_to_default() {
        let config = ManagerConfig::default()
            .with_default_max_concurrency(2)
            .with_queue_concurrency(QueueId(9), 0);
        assert_eq!(config.max_concurrency_for(QueueId(9)), 0);
        assert_eq!(config.max_concurrency_for(QueueId(1)), 2);
    }

    #[test]
    fn parses_override_lists() -> Result<(), ManagerError> {
        let parsed = parse_overrides(" 1=2, 7=0 ,")?;
        assert_eq!(parsed.get(&QueueId(1)), Some(&2));
        assert_eq!(parsed.get(&QueueId(7)), Some(&0));

        assert!(parse_overrides("1:2").is_err());
        assert!(parse_overrides("x=2").is_err());
        Ok(())
    }
}
