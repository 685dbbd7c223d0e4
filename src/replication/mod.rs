//! Replication client registry: tracks long-lived change-data-capture
//! sources keyed by `(databaseID, replicationID)`, with reference-counted
//! table sets so two watchers on the same logical stream share one
//! underlying source.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::adapters::ReplicationSource;
use crate::config::ReplicationConfig;
use crate::connection::manager::ConnectionManager;
use crate::error::AnchorError;

/// A long-lived CDC consumer. The table set is reference-counted in the
/// sense that `ConnectReplication` unions into it and `DisconnectReplication`
/// only removes the caller's tables; the source is closed exactly once, when
/// the set empties.
pub struct ReplicationClient {
    pub database_id: String,
    pub replication_id: String,
    pub tables: BTreeSet<String>,
    source: Arc<dyn ReplicationSource>,
}

impl ReplicationClient {
    pub fn table_set(&self) -> &BTreeSet<String> {
        &self.tables
    }
}

fn client_key(database_id: &str, replication_id: &str) -> String {
    format!("{}:{}", database_id, replication_id)
}

pub struct ReplicationRegistry {
    clients: RwLock<HashMap<String, ReplicationClient>>,
}

impl Default for ReplicationRegistry {
    fn default() -> Self {
        ReplicationRegistry { clients: RwLock::new(HashMap::new()) }
    }
}

impl ReplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, client: ReplicationClient) {
        let key = client_key(&client.database_id, &client.replication_id);
        self.clients.write().await.insert(key, client);
    }

    /// Linear scan by replication id alone: replication ids are not assumed
    /// globally unique across databases, so the first match wins.
    pub async fn get_by_replication_id(&self, replication_id: &str) -> Option<(String, BTreeSet<String>)> {
        let clients = self.clients.read().await;
        clients
            .values()
            .find(|c| c.replication_id == replication_id)
            .map(|c| (c.database_id.clone(), c.tables.clone()))
    }

    pub async fn remove(&self, database_id: &str, replication_id: &str) -> Option<ReplicationClient> {
        let key = client_key(database_id, replication_id);
        self.clients.write().await.remove(&key)
    }

    pub async fn list_active(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut keys: Vec<String> = clients.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The sharing path: union `cfg.table_names` into an existing client's
    /// set when one already exists for `cfg.replication_id`, otherwise open
    /// a fresh source and seed its set from `cfg.table_names`.
    ///
    /// Gated on an already-open database `Connection`; replication targets a
    /// database that is not currently connected are rejected.
    pub async fn connect_replication(
        &self,
        manager: &ConnectionManager,
        cfg: ReplicationConfig,
    ) -> Result<BTreeSet<String>, AnchorError> {
        let connection = manager.get_connection(&cfg.database_id).await?;
        let replication = connection
            .replication()?
            .ok_or_else(|| AnchorError::unsupported(cfg.connection_type.clone(), "connect_replication", "backend carries no replication facet"))?;

        let key = client_key(&cfg.database_id, &cfg.replication_id);
        let mut clients = self.clients.write().await;
        if let Some(existing) = clients.get_mut(&key) {
            existing.tables.extend(cfg.table_names.iter().cloned());
            return Ok(existing.tables.clone());
        }

        let source = replication.connect(&cfg).await?;
        let tables: BTreeSet<String> = cfg.table_names.iter().cloned().collect();
        clients.insert(
            key,
            ReplicationClient {
                database_id: cfg.database_id.clone(),
                replication_id: cfg.replication_id.clone(),
                tables: tables.clone(),
                source,
            },
        );
        log::info!("opened replication stream {} on {}", cfg.replication_id, cfg.database_id);
        Ok(tables)
    }

    /// Removes `tables` from the client's set. If the set becomes empty, the
    /// source is closed and the entry removed — even if the close itself
    /// errors, the entry is still removed and the error surfaced. If the set
    /// stays non-empty, this is a no-op at the registry level beyond the
    /// removal of `tables`.
    pub async fn disconnect_replication(
        &self,
        database_id: &str,
        replication_id: &str,
        tables: &[String],
    ) -> Result<(), AnchorError> {
        let key = client_key(database_id, replication_id);
        let mut clients = self.clients.write().await;
        let Some(client) = clients.get_mut(&key) else {
            return Ok(());
        };
        for table in tables {
            client.tables.remove(table);
        }
        if client.tables.is_empty() {
            let client = clients.remove(&key).expect("just looked up under the same lock");
            log::info!("closing replication stream {} on {}", replication_id, database_id);
            return client.source.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_by_replication_id_returns_none_when_absent() {
        let registry = ReplicationRegistry::new();
        assert!(registry.get_by_replication_id("r1").await.is_none());
    }

    #[tokio::test]
    async fn disconnect_of_unknown_client_is_a_no_op() {
        let registry = ReplicationRegistry::new();
        assert!(registry.disconnect_replication("db1", "r1", &["t1".to_string()]).await.is_ok());
    }
}
