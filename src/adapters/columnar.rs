//! ClickHouse adapter — columnar paradigm.
//!
//! The `clickhouse` crate's typed `Row` trait wants a fixed Rust struct per
//! table, which the uniform CRUD surface here can't provide (tables are
//! only known by name at runtime). Reads go through `FORMAT JSONEachRow`
//! and are parsed line by line into the generic row map; writes go through
//! plain SQL text, which ClickHouse accepts for `INSERT`/mutation-style
//! `ALTER TABLE ... UPDATE/DELETE` alike.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use clickhouse::Client;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::adapters::{
    Adapter, AdapterFacets, CdcEvent, Conditions, DataOperator, DatabaseMetadata, InstanceMetadata,
    InstanceOperator, MetadataOperator, ReplicationOperator, ReplicationSource, Row, RowCount,
    SchemaOperator, StreamParams, StreamResult,
};
use crate::catalog::{self, BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig};
use crate::error::AnchorError;
use crate::model::{Column, Table, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "clickhouse";

type ClientMap = Arc<RwLock<BTreeMap<String, Client>>>;
static CLIENTS: Lazy<ClientMap> = Lazy::new(|| Arc::new(RwLock::new(BTreeMap::new())));

fn client_key(cfg: &ConnectionConfig) -> String {
    format!(
        "{}:{}:{}:{}",
        cfg.host.as_deref().unwrap_or("localhost"),
        cfg.port.unwrap_or(8123),
        cfg.database_name,
        cfg.database_id
    )
}

async fn build_client(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<Client, AnchorError> {
    let host = cfg.host.as_deref().unwrap_or("localhost");
    let port = cfg.port.unwrap_or(8123);
    let scheme = if cfg.tls.ssl { "https" } else { "http" };
    let mut client = Client::default()
        .with_url(format!("{}://{}:{}", scheme, host, port))
        .with_database(&cfg.database_name);
    if let Some(username) = &cfg.username {
        client = client.with_user(username);
    }
    if let Some(ciphertext) = &cfg.password {
        let password = secrets.decrypt(&cfg.tenant_id, ciphertext).await?;
        client = client.with_password(password);
    }
    Ok(client)
}

async fn get_client(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<Client, AnchorError> {
    let key = client_key(cfg);
    {
        let clients = CLIENTS.read().await;
        if let Some(c) = clients.get(&key) {
            return Ok(c.clone());
        }
    }
    let client = build_client(cfg, secrets).await?;
    let mut clients = CLIENTS.write().await;
    clients.insert(key, client.clone());
    Ok(client)
}

async fn fetch_json_rows(client: &Client, sql: &str) -> Result<Vec<Row>, AnchorError> {
    let mut cursor = client
        .query(sql)
        .fetch_bytes("JSONEachRow")
        .map_err(|e| AnchorError::backend(BACKEND, "fetch_json_rows.query", e))?;
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = cursor
        .next()
        .await
        .map_err(|e| AnchorError::backend(BACKEND, "fetch_json_rows.stream", e))?
    {
        buf.extend_from_slice(&chunk);
    }
    let text = String::from_utf8_lossy(&buf);
    let mut rows = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| AnchorError::backend(BACKEND, "fetch_json_rows.parse", e))?;
        if let Value::Object(map) = value {
            rows.push(map.into_iter().collect::<Row>());
        }
    }
    Ok(rows)
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

pub struct ClickhouseAdapter;

#[async_trait]
impl Adapter for ClickhouseAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("clickhouse is in the catalog").capabilities
    }

    async fn connect(
        &self,
        cfg: &ConnectionConfig,
        secrets: &dyn SecretStore,
    ) -> Result<AdapterFacets, AnchorError> {
        let client = get_client(cfg, secrets).await?;
        fetch_json_rows(&client, "SELECT 1 AS probe FORMAT JSONEachRow")
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "connect.probe", e))?;

        let conn = Arc::new(ClickhouseConnection { client, database: cfg.database_name.clone() });
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
            database_name: "default".to_string(),
            enabled: cfg.enabled,
            tls: cfg.tls.clone(),
            role: cfg.role.clone(),
            connected_to_node_id: cfg.connected_to_node_id.clone(),
            owner_id: cfg.owner_id.clone(),
        };
        let client = get_client(&conn_cfg, secrets).await?;
        Ok(Arc::new(ClickhouseInstance { client }))
    }
}

struct ClickhouseConnection {
    client: Client,
    database: String,
}

#[async_trait]
impl SchemaOperator for ClickhouseConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for name in self.list_tables().await? {
            let table = self.get_table_schema(&name).await?;
            model.tables.insert(name, table);
        }
        Ok(model)
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        let sql = format!(
            "SELECT name FROM system.tables WHERE database = '{}' FORMAT JSONEachRow",
            self.database
        );
        let rows = fetch_json_rows(&self.client, &sql).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.get("name").and_then(|v| v.as_str().map(String::from)))
            .collect())
    }

    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        let sql = format!(
            "SELECT name, type, is_in_primary_key FROM system.columns WHERE database = '{}' AND table = '{}' FORMAT JSONEachRow",
            self.database, name
        );
        let rows = fetch_json_rows(&self.client, &sql).await?;
        let mut table = Table::new(name);
        for row in rows {
            let col_name = row.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let data_type = row.get("type").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let is_pk = matches!(row.get("is_in_primary_key"), Some(Value::Number(n)) if n.as_i64() == Some(1));
            let nullable = data_type.starts_with("Nullable(");
            table.columns.insert(
                col_name.clone(),
                Column {
                    name: col_name,
                    data_type,
                    nullable,
                    is_primary_key: is_pk,
                    auto_increment: false,
                    options: Default::default(),
                },
            );
        }
        Ok(table)
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl DataOperator for ClickhouseConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let sql = format!("SELECT * FROM {} LIMIT {} FORMAT JSONEachRow", table, limit);
        fetch_json_rows(&self.client, &sql).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        let mut inserted = 0u64;
        for row in rows {
            let columns: Vec<&str> = row.keys().map(String::as_str).collect();
            let values: Vec<String> = row.values().map(sql_literal).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                values.join(", ")
            );
            self.client
                .query(&sql)
                .execute()
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "insert", e))?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, rows: Vec<Row>, where_columns: &[String]) -> Result<u64, AnchorError> {
        let mut affected = 0u64;
        for row in rows {
            let assignments: Vec<String> = row
                .iter()
                .filter(|(k, _)| !where_columns.contains(k))
                .map(|(k, v)| format!("{} = {}", k, sql_literal(v)))
                .collect();
            let predicate: Vec<String> = where_columns
                .iter()
                .filter_map(|c| row.get(c).map(|v| format!("{} = {}", c, sql_literal(v))))
                .collect();
            if assignments.is_empty() || predicate.is_empty() {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} UPDATE {} WHERE {}",
                table,
                assignments.join(", "),
                predicate.join(" AND ")
            );
            self.client
                .query(&sql)
                .execute()
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "update", e))?;
            affected += 1;
        }
        Ok(affected)
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>, _unique_columns: &[String]) -> Result<u64, AnchorError> {
        // ClickHouse has no native upsert; ReplacingMergeTree tables dedupe on
        // merge, so an insert is the correct action here.
        self.insert(table, rows).await
    }

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError> {
        let predicate: Vec<String> = conditions
            .iter()
            .map(|(k, v)| format!("{} = {}", k, sql_literal(v)))
            .collect();
        if predicate.is_empty() {
            return Err(AnchorError::validation("conditions", "delete requires at least one condition"));
        }
        let sql = format!("ALTER TABLE {} DELETE WHERE {}", table, predicate.join(" AND "));
        self.client
            .query(&sql)
            .execute()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "delete", e))?;
        Ok(1)
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        let offset = super::common::decode_cursor(params.cursor.as_deref());
        let sql = format!(
            "SELECT * FROM {} LIMIT {} OFFSET {} FORMAT JSONEachRow",
            params.table, params.batch_size, offset
        );
        let rows = fetch_json_rows(&self.client, &sql).await?;
        let has_more = rows.len() as u32 == params.batch_size;
        let next_cursor = if has_more {
            Some(super::common::encode_cursor(offset + params.batch_size as u64))
        } else {
            None
        };
        Ok(StreamResult { rows, has_more, next_cursor })
    }

    async fn execute_query(&self, query: &str, _args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        let sql = format!("{} FORMAT JSONEachRow", query.trim_end_matches(';'));
        fetch_json_rows(&self.client, &sql).await
    }

    async fn execute_count_query(&self, query: &str) -> Result<i64, AnchorError> {
        let rows = self.execute_query(query, &[]).await?;
        let count = rows
            .first()
            .and_then(|r| r.values().next())
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(count)
    }

    async fn get_row_count(&self, table: &str, where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let sql = match where_clause {
            Some(clause) => format!("SELECT count() AS n FROM {} WHERE {} FORMAT JSONEachRow", table, clause),
            None => format!("SELECT count() AS n FROM {} FORMAT JSONEachRow", table),
        };
        let rows = fetch_json_rows(&self.client, &sql).await?;
        let count = rows.first().and_then(|r| r.get("n")).and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(RowCount { count, exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        for table in self.list_tables().await? {
            let sql = format!("TRUNCATE TABLE {}", table);
            self.client
                .query(&sql)
                .execute()
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "wipe", e))?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl MetadataOperator for ClickhouseConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let sql = format!(
            "SELECT sum(bytes_on_disk) AS size FROM system.parts WHERE database = '{}' FORMAT JSONEachRow",
            self.database
        );
        let rows = fetch_json_rows(&self.client, &sql).await?;
        let size_bytes = rows.first().and_then(|r| r.get("size")).and_then(|v| v.as_i64()).unwrap_or(0);
        let tables_count = self.list_tables().await?.len() as i64;
        let version_rows = fetch_json_rows(&self.client, "SELECT version() AS v FORMAT JSONEachRow").await?;
        let version = version_rows
            .first()
            .and_then(|r| r.get("v"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(DatabaseMetadata { version, size_bytes, tables_count, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let rows = fetch_json_rows(
            &self.client,
            "SELECT count() AS n FROM system.databases FORMAT JSONEachRow",
        )
        .await?;
        let total_databases = rows.first().and_then(|r| r.get("n")).and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(InstanceMetadata {
            version: String::new(),
            uptime_seconds: 0,
            total_databases,
            total_connections: 0,
            max_connections: 0,
            extra: Default::default(),
        })
    }
}

#[async_trait]
impl ReplicationOperator for ClickhouseConnection {
    fn is_supported(&self) -> bool {
        false
    }

    async fn connect(&self, _cfg: &crate::config::ReplicationConfig) -> Result<Arc<dyn ReplicationSource>, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "connect", "no row-level CDC stream is exposed over this adapter"))
    }

    fn parse_event(&self, _raw: &[u8]) -> Result<CdcEvent, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "parse_event", "no CDC event shape defined"))
    }

    async fn apply_cdc_event(&self, _event: &CdcEvent) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "apply_cdc_event", "no CDC event shape defined"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

struct ClickhouseInstance {
    client: Client,
}

#[async_trait]
impl InstanceOperator for ClickhouseInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        let rows = fetch_json_rows(&self.client, "SELECT name FROM system.databases FORMAT JSONEachRow").await?;
        Ok(rows.into_iter().filter_map(|r| r.get("name").and_then(|v| v.as_str().map(String::from))).collect())
    }

    async fn create_database(&self, name: &str) -> Result<(), AnchorError> {
        let sql = format!("CREATE DATABASE IF NOT EXISTS {}", name);
        self.client.query(&sql).execute().await.map_err(|e| AnchorError::backend(BACKEND, "create_database", e))
    }

    async fn drop_database(&self, name: &str) -> Result<(), AnchorError> {
        let sql = format!("DROP DATABASE IF EXISTS {}", name);
        self.client.query(&sql).execute().await.map_err(|e| AnchorError::backend(BACKEND, "drop_database", e))
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let rows = fetch_json_rows(&self.client, "SELECT count() AS n FROM system.databases FORMAT JSONEachRow").await?;
        let total_databases = rows.first().and_then(|r| r.get("n")).and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(InstanceMetadata {
            version: String::new(),
            uptime_seconds: 0,
            total_databases,
            total_connections: 0,
            max_connections: 0,
            extra: Default::default(),
        })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        fetch_json_rows(&self.client, "SELECT 1 AS probe FORMAT JSONEachRow").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_literal_escapes_quotes() {
        assert_eq!(sql_literal(&Value::String("O'Brien".to_string())), "'O''Brien'");
    }

    #[test]
    fn sql_literal_passes_numbers_through() {
        assert_eq!(sql_literal(&Value::from(42)), "42");
    }
}
