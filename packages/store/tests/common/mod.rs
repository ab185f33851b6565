use store::{StoreError, SurrealConfig, SurrealStore};

/// Fresh store on its own in-memory database.
pub async fn setup_store(database: &str) -> Result<SurrealStore, StoreError> {
    SurrealStore::connect(SurrealConfig::memory().with_database(database)).await
}
