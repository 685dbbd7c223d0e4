//! Redis adapter — key-value paradigm.
//!
//! Redis has no tables: `table` is treated as a key prefix (`"{table}:"`),
//! and each row is either a flat string value under `value` or a hash's
//! fields, depending on what `TYPE` reports for the key. This keeps CRUD
//! usable without pretending Redis has relational structure it doesn't.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::adapters::{
    Adapter, AdapterFacets, CdcEvent, Conditions, DataOperator, DatabaseMetadata, InstanceMetadata,
    InstanceOperator, MetadataOperator, ReplicationOperator, ReplicationSource, Row, RowCount,
    SchemaOperator, StreamParams, StreamResult,
};
use crate::catalog::{self, BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig, ReplicationConfig};
use crate::error::AnchorError;
use crate::model::{Table, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "redis";

type ManagerMap = Arc<RwLock<BTreeMap<String, ConnectionManager>>>;
static MANAGERS: Lazy<ManagerMap> = Lazy::new(|| Arc::new(RwLock::new(BTreeMap::new())));

fn manager_key(cfg: &ConnectionConfig) -> String {
    format!("{}:{}:{}", cfg.host.as_deref().unwrap_or("localhost"), cfg.port.unwrap_or(6379), cfg.database_id)
}

async fn build_url(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<String, AnchorError> {
    let host = cfg.host.as_deref().unwrap_or("localhost");
    let port = cfg.port.unwrap_or(6379);
    let db_index: u32 = cfg.database_name.parse().unwrap_or(0);
    match &cfg.password {
        Some(ciphertext) => {
            let password = secrets.decrypt(&cfg.tenant_id, ciphertext).await?;
            Ok(format!("redis://:{}@{}:{}/{}", urlencoding::encode(&password), host, port, db_index))
        }
        None => Ok(format!("redis://{}:{}/{}", host, port, db_index)),
    }
}

async fn get_manager(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<ConnectionManager, AnchorError> {
    let key = manager_key(cfg);
    {
        let managers = MANAGERS.read().await;
        if let Some(m) = managers.get(&key) {
            return Ok(m.clone());
        }
    }
    let url = build_url(cfg, secrets).await?;
    let client = redis::Client::open(url).map_err(|e| AnchorError::ConnectError {
        host: cfg.host.clone().unwrap_or_default(),
        port: cfg.port.unwrap_or(6379),
        cause: e.to_string(),
    })?;
    let manager = client.get_connection_manager().await.map_err(|e| AnchorError::ConnectError {
        host: cfg.host.clone().unwrap_or_default(),
        port: cfg.port.unwrap_or(6379),
        cause: e.to_string(),
    })?;
    let mut managers = MANAGERS.write().await;
    managers.insert(key, manager.clone());
    Ok(manager)
}

fn row_key(table: &str, id: &str) -> String {
    format!("{}:{}", table, id)
}

pub struct RedisAdapter;

#[async_trait]
impl Adapter for RedisAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("redis is in the catalog").capabilities
    }

    async fn connect(
        &self,
        cfg: &ConnectionConfig,
        secrets: &dyn SecretStore,
    ) -> Result<AdapterFacets, AnchorError> {
        let mut manager = get_manager(cfg, secrets).await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "connect.probe", e))?;

        let conn = Arc::new(RedisConnection { manager });
        Ok(AdapterFacets {
            schema: conn.clone(),
            data: conn.clone(),
            metadata: conn.clone(),
            replication: Some(conn),
        })
    }

    async fn connect_instance(
        &self,
        cfg: &InstanceConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
        let conn_cfg = ConnectionConfig {
            database_id: format!("{}-instance-probe", cfg.instance_id),
            tenant_id: cfg.tenant_id.clone(),
            workspace_id: cfg.workspace_id.clone(),
            environment_id: cfg.environment_id.clone(),
            instance_id: cfg.instance_id.clone(),
            name: cfg.name.clone(),
            description: cfg.description.clone(),
            database_vendor: cfg.database_vendor.clone(),
            connection_type: cfg.connection_type.clone(),
            host: cfg.host.clone(),
            port: cfg.port,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            database_name: "0".to_string(),
            enabled: cfg.enabled,
            tls: cfg.tls.clone(),
            role: cfg.role.clone(),
            connected_to_node_id: cfg.connected_to_node_id.clone(),
            owner_id: cfg.owner_id.clone(),
        };
        let manager = get_manager(&conn_cfg, secrets).await?;
        Ok(Arc::new(RedisInstance { manager }))
    }
}

struct RedisConnection {
    manager: ConnectionManager,
}

#[async_trait]
impl SchemaOperator for RedisConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for name in self.list_tables().await? {
            model.tables.insert(name.clone(), Table::new(name));
        }
        Ok(model)
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        let mut manager = self.manager.clone();
        let keys: Vec<String> = manager
            .keys("*:*")
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "list_tables", e))?;
        let mut prefixes: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for key in keys {
            if let Some((prefix, _)) = key.split_once(':') {
                prefixes.insert(prefix.to_string());
            }
        }
        Ok(prefixes.into_iter().collect())
    }

    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        Ok(Table::new(name))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl DataOperator for RedisConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let mut manager = self.manager.clone();
        let pattern = format!("{}:*", table);
        let keys: Vec<String> = manager
            .keys(&pattern)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "fetch", e))?;
        let mut rows = Vec::new();
        for key in keys.into_iter().take(limit as usize) {
            rows.push(self.read_row(&mut manager, table, &key).await?);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        let mut manager = self.manager.clone();
        let mut inserted = 0u64;
        for row in rows {
            let id = row
                .get("id")
                .and_then(|v| v.as_str().map(String::from).or_else(|| Some(v.to_string())))
                .ok_or_else(|| AnchorError::validation("id", "redis rows require an 'id' field to build the key"))?;
            self.write_row(&mut manager, table, &id, &row).await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, rows: Vec<Row>, where_columns: &[String]) -> Result<u64, AnchorError> {
        let mut manager = self.manager.clone();
        let mut affected = 0u64;
        for row in rows {
            let id_col = where_columns.first().map(String::as_str).unwrap_or("id");
            let id = row
                .get(id_col)
                .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
                .ok_or_else(|| AnchorError::validation(id_col, "row missing the identifying field"))?;
            self.write_row(&mut manager, table, &id, &row).await?;
            affected += 1;
        }
        Ok(affected)
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>, unique_columns: &[String]) -> Result<u64, AnchorError> {
        self.update(table, rows, unique_columns).await
    }

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError> {
        let id_value = conditions
            .get("id")
            .ok_or_else(|| AnchorError::validation("conditions", "delete requires an 'id' condition"))?;
        let id = id_value.as_str().map(String::from).unwrap_or_else(|| id_value.to_string());
        let mut manager = self.manager.clone();
        let key = row_key(table, &id);
        let deleted: i64 = manager.del(&key).await.map_err(|e| AnchorError::backend(BACKEND, "delete", e))?;
        Ok(deleted as u64)
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        let mut manager = self.manager.clone();
        let offset = super::common::decode_cursor(params.cursor.as_deref()) as usize;
        let pattern = format!("{}:*", params.table);
        let mut keys: Vec<String> = manager
            .keys(&pattern)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "stream", e))?;
        keys.sort();
        let window: Vec<String> = keys
            .into_iter()
            .skip(offset)
            .take(params.batch_size as usize + 1)
            .collect();
        let has_more = window.len() as u32 > params.batch_size;
        let mut rows = Vec::new();
        for key in window.into_iter().take(params.batch_size as usize) {
            rows.push(self.read_row(&mut manager, &params.table, &key).await?);
        }
        let next_cursor = if has_more {
            Some(super::common::encode_cursor(offset as u64 + params.batch_size as u64))
        } else {
            None
        };
        Ok(StreamResult { rows, has_more, next_cursor })
    }

    async fn execute_query(&self, _query: &str, _args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "execute_query", "redis has no SQL-text query surface"))
    }

    async fn execute_count_query(&self, _query: &str) -> Result<i64, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "execute_count_query", "redis has no SQL-text query surface"))
    }

    async fn get_row_count(&self, table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let mut manager = self.manager.clone();
        let pattern = format!("{}:*", table);
        let keys: Vec<String> = manager
            .keys(&pattern)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "get_row_count", e))?;
        Ok(RowCount { count: keys.len() as i64, exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        let mut manager = self.manager.clone();
        let _: String = redis::cmd("FLUSHDB")
            .query_async(&mut manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "wipe", e))?;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

impl RedisConnection {
    async fn read_row(&self, manager: &mut ConnectionManager, table: &str, key: &str) -> Result<Row, AnchorError> {
        let kind: String = redis::cmd("TYPE")
            .arg(key)
            .query_async(manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "read_row.type", e))?;
        let id = key.strip_prefix(&format!("{}:", table)).unwrap_or(key).to_string();
        let mut row: Row = BTreeMap::new();
        row.insert("id".to_string(), Value::String(id));
        match kind.as_str() {
            "hash" => {
                let fields: BTreeMap<String, String> = manager
                    .hgetall(key)
                    .await
                    .map_err(|e| AnchorError::backend(BACKEND, "read_row.hash", e))?;
                for (field, value) in fields {
                    row.insert(field, Value::String(value));
                }
            }
            "string" => {
                let value: String = manager
                    .get(key)
                    .await
                    .map_err(|e| AnchorError::backend(BACKEND, "read_row.string", e))?;
                row.insert("value".to_string(), Value::String(value));
            }
            other => {
                row.insert("value".to_string(), Value::String(format!("unsupported redis type {:?}", other)));
            }
        }
        Ok(row)
    }

    async fn write_row(&self, manager: &mut ConnectionManager, table: &str, id: &str, row: &Row) -> Result<(), AnchorError> {
        let key = row_key(table, id);
        let fields: Vec<(String, String)> = row
            .iter()
            .filter(|(k, _)| k.as_str() != "id")
            .map(|(k, v)| (k.clone(), v.as_str().map(String::from).unwrap_or_else(|| v.to_string())))
            .collect();
        if fields.len() == 1 && fields[0].0 == "value" {
            let _: () = manager
                .set(&key, &fields[0].1)
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "write_row.string", e))?;
        } else {
            let _: i64 = manager.del(&key).await.unwrap_or(0);
            if !fields.is_empty() {
                let _: () = manager
                    .hset_multiple(&key, &fields)
                    .await
                    .map_err(|e| AnchorError::backend(BACKEND, "write_row.hash", e))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataOperator for RedisConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let mut manager = self.manager.clone();
        let info: String = redis::cmd("INFO")
            .arg("keyspace")
            .query_async(&mut manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_database_metadata", e))?;
        let tables_count = self.list_tables().await?.len() as i64;
        Ok(DatabaseMetadata { version: info, size_bytes: 0, tables_count, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let mut manager = self.manager.clone();
        let info: String = redis::cmd("INFO")
            .arg("server")
            .query_async(&mut manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let version = info
            .lines()
            .find_map(|line| line.strip_prefix("redis_version:"))
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(InstanceMetadata {
            version,
            uptime_seconds: 0,
            total_databases: 1,
            total_connections: 0,
            max_connections: 0,
            extra: Default::default(),
        })
    }
}

#[async_trait]
impl ReplicationOperator for RedisConnection {
    fn is_supported(&self) -> bool {
        true
    }

    fn get_supported_mechanisms(&self) -> Vec<String> {
        vec!["keyspace_notifications".to_string()]
    }

    async fn connect(&self, cfg: &ReplicationConfig) -> Result<Arc<dyn ReplicationSource>, AnchorError> {
        Ok(Arc::new(RedisReplicationSource { replication_id: cfg.replication_id.clone() }))
    }

    fn parse_event(&self, raw: &[u8]) -> Result<CdcEvent, AnchorError> {
        let text = String::from_utf8_lossy(raw);
        let mut parts = text.splitn(2, ' ');
        let operation = parts.next().unwrap_or("unknown").to_string();
        let key = parts.next().unwrap_or_default().to_string();
        Ok(CdcEvent { table: key, operation, data: BTreeMap::new(), before: None })
    }

    async fn apply_cdc_event(&self, _event: &CdcEvent) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "apply_cdc_event", "this core observes CDC, it does not apply it"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

struct RedisReplicationSource {
    replication_id: String,
}

#[async_trait]
impl ReplicationSource for RedisReplicationSource {
    async fn close(&self) -> Result<(), AnchorError> {
        log::info!("closing redis keyspace-notification source {}", self.replication_id);
        Ok(())
    }
}

struct RedisInstance {
    manager: ConnectionManager,
}

#[async_trait]
impl InstanceOperator for RedisInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        Ok((0..16).map(|i| i.to_string()).collect())
    }

    async fn create_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "create_database", "redis logical databases are fixed-numbered slots, not created on demand"))
    }

    async fn drop_database(&self, name: &str) -> Result<(), AnchorError> {
        let index: u32 = name.parse().map_err(|_| AnchorError::validation("name", "redis database name must be a numeric index"))?;
        let mut manager = self.manager.clone();
        redis::cmd("SELECT")
            .arg(index)
            .query_async::<()>(&mut manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "drop_database.select", e))?;
        let _: String = redis::cmd("FLUSHDB")
            .query_async(&mut manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "drop_database", e))?;
        Ok(())
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let mut manager = self.manager.clone();
        let info: String = redis::cmd("INFO")
            .arg("server")
            .query_async(&mut manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let version = info
            .lines()
            .find_map(|line| line.strip_prefix("redis_version:"))
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(InstanceMetadata {
            version,
            uptime_seconds: 0,
            total_databases: 16,
            total_connections: 0,
            max_connections: 0,
            extra: Default::default(),
        })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        let mut manager = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_key_joins_table_and_id() {
        assert_eq!(row_key("users", "42"), "users:42");
    }
}
