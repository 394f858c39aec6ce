use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::cli::{StorageOptions, DEFAULT_STORAGE_DB_FILE_NAME};
use crate::stores::client::{QueryContext, StorageConfig};

use super::overlay::Overlay;

#[derive(Debug, Clone)]
pub struct StorageSettings {
    client: StorageConfig,
    query_timeout: Option<Duration>,
}

impl StorageSettings {
    pub fn client_config(&self) -> &StorageConfig {
        &self.client
    }

    /// A fresh context carrying the configured deadline, if any.
    pub fn query_context(&self) -> QueryContext {
        match self.query_timeout {
            Some(timeout) => QueryContext::with_timeout(timeout),
            None => QueryContext::background(),
        }
    }
}

impl StorageOptions {
    pub fn build(self, data_dir: &Path) -> Result<StorageSettings> {
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| data_dir.join(DEFAULT_STORAGE_DB_FILE_NAME));
        let mut client = StorageConfig::new(endpoint);
        if let Some(max_connections) = self.max_connections {
            if max_connections == 0 {
                bail!("storage max_connections must be at least 1");
            }
            client.max_connections = max_connections;
        }
        if let Some(timeout) = self.connection_timeout {
            client.connection_timeout = timeout;
        }
        if let Some(timeout) = self.busy_timeout {
            client.busy_timeout = timeout;
        }

        Ok(StorageSettings {
            client,
            query_timeout: self.query_timeout,
        })
    }
}

impl Overlay for StorageOptions {
    fn overlay(self, overrides: Self) -> Self {
        Self {
            endpoint: overrides.endpoint.or(self.endpoint),
            max_connections: overrides.max_connections.or(self.max_connections),
            connection_timeout: overrides.connection_timeout.or(self.connection_timeout),
            busy_timeout: overrides.busy_timeout.or(self.busy_timeout),
            query_timeout: overrides.query_timeout.or(self.query_timeout),
        }
    }
}
