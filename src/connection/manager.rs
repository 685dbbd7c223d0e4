//! Owns the two maps of live handles: `DatabaseID -> Connection` and
//! `InstanceID -> InstanceConnection`, each behind its own readers-writer
//! lock so a lookup never blocks on an unrelated connect/disconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::adapters;
use crate::config::{ConnectionConfig, InstanceConfig};
use crate::connection::{Connection, InstanceConnection};
use crate::error::{AnchorError, CompositeError};
use crate::secrets::SecretStore;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnectionManager {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    instances: RwLock<HashMap<String, Arc<InstanceConnection>>>,
    secrets: Arc<dyn SecretStore>,
}

impl ConnectionManager {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        ConnectionManager {
            connections: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            secrets,
        }
    }

    pub async fn connect(&self, cfg: ConnectionConfig) -> Result<(), AnchorError> {
        {
            let connections = self.connections.read().await;
            if connections.contains_key(&cfg.database_id) {
                return Err(AnchorError::AlreadyConnected(cfg.database_id.clone()));
            }
        }
        let adapter = adapters::get_adapter(&cfg.database_vendor).await?;
        let facets = adapter.connect(&cfg, self.secrets.as_ref()).await?;
        let id = cfg.database_id.clone();
        let connection = Arc::new(Connection::new(cfg, facets));
        let mut connections = self.connections.write().await;
        if connections.contains_key(&id) {
            return Err(AnchorError::AlreadyConnected(id));
        }
        log::info!("connected database {}", id);
        connections.insert(id, connection);
        Ok(())
    }

    pub async fn disconnect(&self, id: &str) -> Result<(), AnchorError> {
        let mut connections = self.connections.write().await;
        match connections.remove(id) {
            None => Ok(()),
            Some(connection) => {
                log::info!("disconnecting database {}", id);
                connection.close().await
            }
        }
    }

    pub async fn connect_instance(&self, cfg: InstanceConfig) -> Result<(), AnchorError> {
        {
            let instances = self.instances.read().await;
            if instances.contains_key(&cfg.instance_id) {
                return Err(AnchorError::AlreadyConnected(cfg.instance_id.clone()));
            }
        }
        let adapter = adapters::get_adapter(&cfg.database_vendor).await?;
        let operator = adapter.connect_instance(&cfg, self.secrets.as_ref()).await?;
        let id = cfg.instance_id.clone();
        let instance = Arc::new(InstanceConnection::new(cfg, operator));
        let mut instances = self.instances.write().await;
        if instances.contains_key(&id) {
            return Err(AnchorError::AlreadyConnected(id));
        }
        log::info!("connected instance {}", id);
        instances.insert(id, instance);
        Ok(())
    }

    pub async fn disconnect_instance(&self, id: &str) -> Result<(), AnchorError> {
        let mut instances = self.instances.write().await;
        match instances.remove(id) {
            None => Ok(()),
            Some(instance) => {
                log::info!("disconnecting instance {}", id);
                instance.close().await
            }
        }
    }

    pub async fn get_connection(&self, id: &str) -> Result<Arc<Connection>, AnchorError> {
        let connections = self.connections.read().await;
        connections.get(id).cloned().ok_or_else(|| AnchorError::NotFound(id.to_string()))
    }

    pub async fn get_instance(&self, id: &str) -> Result<Arc<InstanceConnection>, AnchorError> {
        let instances = self.instances.read().await;
        instances.get(id).cloned().ok_or_else(|| AnchorError::NotFound(id.to_string()))
    }

    pub async fn list_connections(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut ids: Vec<String> = connections.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn list_instances(&self) -> Vec<String> {
        let instances = self.instances.read().await;
        let mut ids: Vec<String> = instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// A failed or timed-out probe downgrades to `false`; it never mutates
    /// the connection map or propagates the underlying error.
    pub async fn check_health(&self, id: &str) -> Result<bool, AnchorError> {
        let connection = self.get_connection(id).await?;
        if !connection.is_connected() {
            return Ok(false);
        }
        let metadata = match connection.metadata() {
            Ok(m) => m,
            Err(_) => return Ok(false),
        };
        let probe = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, metadata.collect_database_metadata()).await;
        Ok(matches!(probe, Ok(Ok(_))))
    }

    pub async fn check_instance_health(&self, id: &str) -> Result<bool, AnchorError> {
        let instance = self.get_instance(id).await?;
        if !instance.is_connected() {
            return Ok(false);
        }
        let operator = match instance.operator() {
            Ok(op) => op,
            Err(_) => return Ok(false),
        };
        let probe = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, operator.ping()).await;
        Ok(matches!(probe, Ok(Ok(()))))
    }

    /// Snapshots both maps, closes every handle, and empties both maps
    /// unconditionally regardless of individual close outcomes.
    pub async fn disconnect_all(&self) -> Result<(), CompositeError> {
        let mut connections = self.connections.write().await;
        let mut instances = self.instances.write().await;

        let snapshot: Vec<(String, Arc<Connection>)> = connections.drain().collect();
        let instance_snapshot: Vec<(String, Arc<InstanceConnection>)> = instances.drain().collect();
        drop(connections);
        drop(instances);

        let total = snapshot.len() + instance_snapshot.len();
        let mut failures = Vec::new();
        for (id, connection) in snapshot {
            if let Err(e) = connection.close().await {
                failures.push(format!("{}: {}", id, e));
            }
        }
        for (id, instance) in instance_snapshot {
            if let Err(e) = instance.close().await {
                failures.push(format!("{}: {}", id, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let failed = failures.len();
            Err(CompositeError(failed, total, failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::PlaintextSecretStore;

    #[tokio::test]
    async fn disconnect_of_unknown_id_is_idempotent_success() {
        let manager = ConnectionManager::new(Arc::new(PlaintextSecretStore));
        assert!(manager.disconnect("does-not-exist").await.is_ok());
    }

    #[tokio::test]
    async fn get_connection_of_unknown_id_is_not_found() {
        let manager = ConnectionManager::new(Arc::new(PlaintextSecretStore));
        assert!(matches!(manager.get_connection("nope").await, Err(AnchorError::NotFound(_))));
    }
}
