//! Queue manager replica.
//!
//! Connects to the coordination store, starts a `QueueManager` and reads
//! commands from stdin until Ctrl-C. Started pipelines are only
//! logged; report their end with `complete` or `fail`.

mod commands;

use std::sync::Arc;

use actors::{FnExecutor, ManagerConfig, QueueManager, StartFuture};
use queue_core::{PipelineEntry, QueueId};
use store::StoreConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use commands::Command;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store_config = StoreConfig::from_env()?;
    let manager_config = ManagerConfig::from_env()?;

    let store = store::connect(store_config).await?;
    let executor = FnExecutor::new(|queue_id: QueueId, entry: &PipelineEntry| -> StartFuture {
        let (pipeline_id, priority) = (entry.id, entry.priority);
        Box::pin(async move {
            tracing::info!(
                "Pipeline {} of queue {} admitted (priority {})",
                pipeline_id,
                queue_id,
                priority
            );
            Ok(())
        })
    });

    let manager = QueueManager::start(manager_config, store, Arc::new(executor)).await?;

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!("{}", event.description()),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Event log skipped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match Command::parse(&line) {
                    Ok(command) => match command.run(&manager).await {
                        Ok(output) => println!("{output}"),
                        Err(e) => println!("error: {e}"),
                    },
                    Err(e) => println!("error: {e}"),
                },
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.shutdown().await;
    Ok(())
}
