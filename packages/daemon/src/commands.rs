//! Line commands read from stdin.
//!
//! ```text
//! enqueue <queue> <pipeline> <priority>
//! priority <queue> <priority> <pipeline>...
//! pop <pipeline>
//! complete <pipeline>
//! fail <pipeline> [reason...]
//! limit <queue> <max_concurrency>
//! publish <queue>
//! snapshot <queue>
//! queues
//! health
//! ```

use actors::{ManagerResult, QueueManager};
use queue_core::{PipelineEntry, PipelineId, Priority, QueueId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enqueue {
        queue_id: QueueId,
        pipeline_id: PipelineId,
        priority: Priority,
    },
    Priority {
        queue_id: QueueId,
        priority: Priority,
        pipeline_ids: Vec<PipelineId>,
    },
    PopOut(PipelineId),
    Complete(PipelineId),
    Fail {
        pipeline_id: PipelineId,
        reason: String,
    },
    Limit {
        queue_id: QueueId,
        max_concurrency: usize,
    },
    Publish(QueueId),
    Snapshot(QueueId),
    Queues,
    Health,
}

fn number<T: std::str::FromStr>(word: Option<&str>, what: &str) -> Result<T, String> {
    let word = word.ok_or_else(|| format!("missing {what}"))?;
    word.parse().map_err(|_| format!("invalid {what}: {word}"))
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or("empty command")?;

        let command = match verb {
            "enqueue" => Command::Enqueue {
                queue_id: QueueId(number(words.next(), "queue id")?),
                pipeline_id: PipelineId(number(words.next(), "pipeline id")?),
                priority: Priority(number(words.next(), "priority")?),
            },
            "priority" => {
                let queue_id = QueueId(number(words.next(), "queue id")?);
                let priority = Priority(number(words.next(), "priority")?);
                let pipeline_ids = words
                    .map(|w| number(Some(w), "pipeline id").map(PipelineId))
                    .collect::<Result<Vec<_>, _>>()?;
                if pipeline_ids.is_empty() {
                    return Err("missing pipeline id".into());
                }
                Command::Priority {
                    queue_id,
                    priority,
                    pipeline_ids,
                }
            }
            "pop" => Command::PopOut(PipelineId(number(words.next(), "pipeline id")?)),
            "complete" => Command::Complete(PipelineId(number(words.next(), "pipeline id")?)),
            "fail" => {
                let pipeline_id = PipelineId(number(words.next(), "pipeline id")?);
                let reason = words.collect::<Vec<_>>().join(" ");
                Command::Fail {
                    pipeline_id,
                    reason: if reason.is_empty() {
                        "failed".to_string()
                    } else {
                        reason
                    },
                }
            }
            "limit" => Command::Limit {
                queue_id: QueueId(number(words.next(), "queue id")?),
                max_concurrency: number(words.next(), "max concurrency")?,
            },
            "publish" => Command::Publish(QueueId(number(words.next(), "queue id")?)),
            "snapshot" => Command::Snapshot(QueueId(number(words.next(), "queue id")?)),
            "queues" => Command::Queues,
            "health" => Command::Health,
            other => return Err(format!("unknown command: {other}")),
        };

        Ok(command)
    }

    /// Run against the manager, returning the text to print.
    pub async fn run(self, manager: &QueueManager) -> ManagerResult<String> {
        match self {
            Command::Enqueue {
                queue_id,
                pipeline_id,
                priority,
            } => {
                manager
                    .enqueue(queue_id, PipelineEntry::new(pipeline_id, priority))
                    .await?;
                Ok(format!("enqueued {pipeline_id} in queue {queue_id}"))
            }
            Command::Priority {
                queue_id,
                priority,
                pipeline_ids,
            } => {
                manager.request_priority_update(queue_id, &pipeline_ids, priority)?;
                Ok(format!("requested priority {priority} for {} pipelines", pipeline_ids.len()))
            }
            Command::PopOut(pipeline_id) => {
                manager.request_pop_out(pipeline_id)?;
                Ok(format!("requested pop-out of {pipeline_id}"))
            }
            Command::Complete(pipeline_id) => {
                let released = manager.complete(pipeline_id).await?;
                Ok(format!("complete {pipeline_id}: released={released}"))
            }
            Command::Fail {
                pipeline_id,
                reason,
            } => {
                let released = manager.fail(pipeline_id, reason).await?;
                Ok(format!("fail {pipeline_id}: released={released}"))
            }
            Command::Limit {
                queue_id,
                max_concurrency,
            } => {
                manager.set_max_concurrency(queue_id, max_concurrency).await?;
                Ok(format!("queue {queue_id} limit set to {max_concurrency}"))
            }
            Command::Publish(queue_id) => {
                let known = manager.publish_snapshot(queue_id).await?;
                Ok(format!("publish queue {queue_id}: known={known}"))
            }
            Command::Snapshot(queue_id) => match manager.snapshot(queue_id).await? {
                Some(snapshot) => Ok(serde_json::to_string_pretty(&snapshot)?),
                None => Ok(format!("queue {queue_id} unknown")),
            },
            Command::Queues => {
                let ids: Vec<String> = manager
                    .queue_ids()
                    .await
                    .into_iter()
                    .map(|id| id.to_string())
                    .collect();
                Ok(ids.join(" "))
            }
            Command::Health => Ok(format!("{:?}", manager.health())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() -> Result<(), String> {
        assert_eq!(
            Command::parse("enqueue 1 42 -3")?,
            Command::Enqueue {
                queue_id: QueueId(1),
                pipeline_id: PipelineId(42),
                priority: Priority(-3),
            }
        );
        assert_eq!(
            Command::parse("priority 1 20 4 5")?,
            Command::Priority {
                queue_id: QueueId(1),
                priority: Priority(20),
                pipeline_ids: vec![PipelineId(4), PipelineId(5)],
            }
        );
        assert_eq!(
            Command::parse("fail 9 exit code 2")?,
            Command::Fail {
                pipeline_id: PipelineId(9),
                reason: "exit code 2".into(),
            }
        );
        assert_eq!(Command::parse("  pop 7 ")?, Command::PopOut(PipelineId(7)));
        Ok(())
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("enqueue 1 x 3").is_err());
        assert!(Command::parse("priority 1 20").is_err());
        assert!(Command::parse("drop 1").is_err());
    }
}
