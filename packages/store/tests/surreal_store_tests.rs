#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use futures_util::StreamExt;
use store::{CoordinationStore, WatchEventKind};

#[tokio::test]
async fn test_put_get_delete() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store("kv_round_trip").await?;
    let key = "/devops/pipeline/queue_manager/snapshots/1";

    assert_eq!(store.get(key).await?, None);

    store.put(key, r#"{"entries":[]}"#.to_string()).await?;
    assert_eq!(store.get(key).await?.as_deref(), Some(r#"{"entries":[]}"#));

    // Overwrite keeps a single record
    store.put(key, "second".to_string()).await?;
    assert_eq!(store.get(key).await?.as_deref(), Some("second"));

    store.delete(key).await?;
    assert_eq!(store.get(key).await?, None);

    // Deleting a missing key is not an error
    store.delete(key).await?;

    Ok(())
}

#[tokio::test]
async fn test_watch_filters_by_prefix() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store("kv_watch").await?;
    let mut watch = store.watch("/q/actions/update/").await?;

    store.put("/q/actions/pop-out-pipeline/9", "{}".to_string()).await?;
    store.put("/q/actions/update/1", "first".to_string()).await?;
    store.put("/q/actions/update/1", "second".to_string()).await?;

    let first = tokio::time::timeout(Duration::from_secs(5), watch.next())
        .await?
        .ok_or("watch ended")??;
    assert_eq!(first.kind, WatchEventKind::Created);
    assert_eq!(first.key, "/q/actions/update/1");
    assert_eq!(first.value.as_deref(), Some("first"));

    let second = tokio::time::timeout(Duration::from_secs(5), watch.next())
        .await?
        .ok_or("watch ended")??;
    assert_eq!(second.kind, WatchEventKind::Updated);
    assert_eq!(second.value.as_deref(), Some("second"));

    Ok(())
}

#[tokio::test]
async fn test_watch_reports_deletes() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store("kv_watch_delete").await?;
    let key = "/q/actions/pop-out-pipeline/4";
    let mut watch = store.watch("/q/actions/pop-out-pipeline/").await?;

    store.put(key, "marker".to_string()).await?;
    store.delete(key).await?;

    let created = tokio::time::timeout(Duration::from_secs(5), watch.next())
        .await?
        .ok_or("watch ended")??;
    assert_eq!(created.kind, WatchEventKind::Created);

    let deleted = tokio::time::timeout(Duration::from_secs(5), watch.next())
        .await?
        .ok_or("watch ended")??;
    assert_eq!(deleted.kind, WatchEventKind::Deleted);
    assert_eq!(deleted.key, key);

    Ok(())
}

#[tokio::test]
async fn test_list_by_prefix() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store("kv_list").await?;

    store.put("/q/actions/update/2", "two".to_string()).await?;
    store.put("/q/actions/update/1", "one".to_string()).await?;
    store.put("/q/actions/pop-out-pipeline/1", "{}".to_string()).await?;

    assert_eq!(
        store.list("/q/actions/update/").await?,
        vec![
            ("/q/actions/update/1".to_string(), "one".to_string()),
            ("/q/actions/update/2".to_string(), "two".to_string()),
        ]
    );
    assert!(store.list("/q/snapshots/").await?.is_empty());

    Ok(())
}
