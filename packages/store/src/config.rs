//! Store configuration.

use crate::StoreError;
use crate::surreal::SurrealConfig;

/// Which backend serves the coordination store.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// In-process store; replicas in other processes see nothing.
    Memory,
    /// SurrealDB endpoint (`mem://`, `rocksdb://path`, `ws://host:port`).
    Surreal(SurrealConfig),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
        }
    }

    pub fn surreal(config: SurrealConfig) -> Self {
        Self {
            backend: StoreBackend::Surreal(config),
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `COORD_BACKEND`: `memory` (default) or `surreal`
    /// - `COORD_ENDPOINT`: SurrealDB endpoint (default: `mem://`)
    /// - `COORD_NAMESPACE` / `COORD_DATABASE`: namespace and database names
    /// - `COORD_USERNAME` / `COORD_PASSWORD`: optional root credentials
    pub fn from_env() -> Result<Self, StoreError> {
        let backend = env_var("COORD_BACKEND");

        match backend.as_deref() {
            None | Some("memory") | Some("mem") => Ok(Self::memory()),
            Some("surreal") | Some("surrealdb") => {
                let mut config = SurrealConfig::default();
                if let Some(endpoint) = env_var("COORD_ENDPOINT") {
                    config.endpoint = endpoint;
                }
                if let Some(namespace) = env_var("COORD_NAMESPACE") {
                    config = config.with_namespace(namespace);
                }
                if let Some(database) = env_var("COORD_DATABASE") {
                    config = config.with_database(database);
                }
                match (env_var("COORD_USERNAME"), env_var("COORD_PASSWORD")) {
                    (Some(username), Some(password)) => {
                        config = config.with_credentials(username, password);
                    }
                    (None, None) => {}
                    _ => {
                        return Err(StoreError::InvalidConfig(
                            "COORD_USERNAME and COORD_PASSWORD must be set together".into(),
                        ));
                    }
                }
                Ok(Self::surreal(config))
            }
            Some(other) => Err(StoreError::InvalidConfig(format!(
                "unsupported COORD_BACKEND={other} (expected memory|surreal)"
            ))),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(non_empty)
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
