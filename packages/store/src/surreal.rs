//! SurrealDB-backed coordination store.
//!
//! Keys are records of the `coord_kv` table, with the key itself as the
//! record id. Watches are live queries on that table, filtered by prefix;
//! listings filter the same table with `string::starts_with`.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::{Any, connect};
use surrealdb::method::Stream as LiveStream;
use surrealdb::opt::auth::Root;
use surrealdb::sql::Thing;
use surrealdb::{Action, Notification, Surreal};

use crate::{CoordinationStore, StoreError, StoreFuture, WatchEvent, WatchEventKind, WatchStream};

/// Table holding coordination keys.
pub const KV_TABLE: &str = "coord_kv";

const KV_SCHEMA: &str = r#"
-- Coordination keys shared by all replicas
DEFINE TABLE IF NOT EXISTS coord_kv SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS key ON coord_kv TYPE string;
DEFINE FIELD IF NOT EXISTS value ON coord_kv TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON coord_kv TYPE datetime VALUE time::now();

DEFINE INDEX IF NOT EXISTS coord_kv_key ON coord_kv FIELDS key UNIQUE;
"#;

/// SurrealDB connection settings.
#[derive(Debug, Clone)]
pub struct SurrealConfig {
    /// Connection endpoint: "mem://", "rocksdb://path" or "ws://host:port"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for SurrealConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "pipeline".to_string(),
            database: "queue_manager".to_string(),
            credentials: None,
        }
    }
}

impl SurrealConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for a shared server (requires remote feature).
    pub fn remote(address: impl Into<String>) -> Self {
        Self {
            endpoint: format!("ws://{}", address.into()),
            ..Default::default()
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Record as read back from SurrealDB.
#[derive(Debug, Deserialize)]
struct KvRecord {
    #[allow(dead_code)]
    id: Option<Thing>,
    key: String,
    value: String,
}

/// Key and value columns of a prefix listing.
#[derive(Debug, Deserialize)]
struct KvPair {
    key: String,
    value: String,
}

/// Record content written to SurrealDB; `updated_at` is set by the schema.
#[derive(Debug, Clone, Serialize)]
struct KvWrite {
    key: String,
    value: String,
}

/// Coordination store on top of a SurrealDB connection.
#[derive(Clone)]
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// Connect, authenticate and define the key table.
    pub async fn connect(config: SurrealConfig) -> Result<Self, StoreError> {
        tracing::info!("Connecting to coordination store: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(&config.namespace).use_db(&config.database).await?;
        db.query(KV_SCHEMA).await?.check()?;

        tracing::info!(
            "Connected to coordination store: {}/{}",
            config.namespace,
            config.database
        );

        Ok(Self { db })
    }

    /// Wrap an existing connection. The key table must already exist.
    pub fn from_connection(db: Surreal<Any>) -> Self {
        Self { db }
    }
}

fn to_watch_event(notification: Notification<KvRecord>) -> Option<WatchEvent> {
    let kind = match notification.action {
        Action::Create => WatchEventKind::Created,
        Action::Update => WatchEventKind::Updated,
        Action::Delete => WatchEventKind::Deleted,
        _ => return None,
    };

    Some(WatchEvent {
        kind,
        key: notification.data.key,
        value: Some(notification.data.value),
    })
}

impl CoordinationStore for SurrealStore {
    fn put<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let content = KvWrite {
                key: key.to_string(),
                value,
            };
            let _: Option<KvRecord> = self.db.upsert((KV_TABLE, key)).content(content).await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let record: Option<KvRecord> = self.db.select((KV_TABLE, key)).await?;
            Ok(record.map(|r| r.value))
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _: Option<KvRecord> = self.db.delete((KV_TABLE, key)).await?;
            Ok(())
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<(String, String)>> {
        Box::pin(async move {
            let mut response = self
                .db
                .query(
                    "SELECT key, value FROM type::table($table) \
                     WHERE string::starts_with(key, $prefix) ORDER BY key",
                )
                .bind(("table", KV_TABLE))
                .bind(("prefix", prefix.to_string()))
                .await?;
            let pairs: Vec<KvPair> = response.take(0)?;
            Ok(pairs.into_iter().map(|p| (p.key, p.value)).collect())
        })
    }

    fn watch<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, WatchStream> {
        Box::pin(async move {
            let live: LiveStream<Vec<KvRecord>> = self.db.select(KV_TABLE).live().await?;
            let prefix = prefix.to_string();

            let stream = live.filter_map(move |item: surrealdb::Result<Notification<KvRecord>>| {
                let event = match item {
                    Ok(notification) => to_watch_event(notification)
                        .filter(|event| event.key.starts_with(&prefix))
                        .map(Ok),
                    Err(e) => Some(Err(StoreError::Database(e))),
                };
                futures_util::future::ready(event)
            });

            Ok(stream.boxed())
        })
    }
}
