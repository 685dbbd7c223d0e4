//! MySQL/MariaDB adapter — relational paradigm.
//!
//! information_schema queries mirror MySQL's quirk of returning
//! VARBINARY/BLOB for catalog string columns under some collations, so
//! every read falls back from `String` to raw bytes decoded lossily.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::{Column as _, MySql, Pool, Row as _};
use tokio::sync::RwLock;

use crate::adapters::{
    Adapter, AdapterFacets, CdcEvent, Conditions, DataOperator, DatabaseMetadata, InstanceMetadata,
    InstanceOperator, MetadataOperator, ReplicationOperator, ReplicationSource, Row, RowCount,
    SchemaOperator, StreamParams, StreamResult,
};
use crate::catalog::{self, BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig, ReplicationConfig, SslMode};
use crate::error::AnchorError;
use crate::model::{Column, Constraint, ConstraintReference, ConstraintType, Index, Table, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "mysql";

type PoolMap = Arc<RwLock<BTreeMap<String, Pool<MySql>>>>;
static POOLS: Lazy<PoolMap> = Lazy::new(|| Arc::new(RwLock::new(BTreeMap::new())));

fn pool_key(cfg: &ConnectionConfig) -> String {
    format!(
        "{}:{}:{}:{}",
        cfg.host.as_deref().unwrap_or("localhost"),
        cfg.port.unwrap_or(3306),
        cfg.database_name,
        cfg.database_id,
    )
}

fn row_str(row: &sqlx::mysql::MySqlRow, idx: usize) -> String {
    row.try_get::<String, _>(idx).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    })
}

fn row_str_opt(row: &sqlx::mysql::MySqlRow, idx: usize) -> Option<String> {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(val) => val,
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()),
    }
}

async fn connect_options(
    cfg: &ConnectionConfig,
    secrets: &dyn SecretStore,
) -> Result<MySqlConnectOptions, AnchorError> {
    let password = match &cfg.password {
        Some(ciphertext) => secrets.decrypt(&cfg.tenant_id, ciphertext).await?,
        None => String::new(),
    };

    let mut options = MySqlConnectOptions::new()
        .host(cfg.host.as_deref().unwrap_or("localhost"))
        .port(cfg.port.unwrap_or(3306))
        .username(cfg.username.as_deref().unwrap_or("root"))
        .password(&password)
        .database(&cfg.database_name);

    if cfg.tls.ssl {
        let mode = match cfg.tls.ssl_mode {
            SslMode::Disable => MySqlSslMode::Disabled,
            SslMode::Prefer => MySqlSslMode::Preferred,
            SslMode::Require => MySqlSslMode::Required,
            SslMode::VerifyCa => MySqlSslMode::VerifyCa,
            SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
        };
        options = options.ssl_mode(mode);
        if let Some(root_cert) = &cfg.tls.ssl_root_cert {
            options = options.ssl_ca(root_cert);
        }
    }

    Ok(options)
}

async fn get_pool(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<Pool<MySql>, AnchorError> {
    let key = pool_key(cfg);
    {
        let pools = POOLS.read().await;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }
    }

    let options = connect_options(cfg, secrets).await?;
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await
        .map_err(|e| AnchorError::ConnectError {
            host: cfg.host.clone().unwrap_or_default(),
            port: cfg.port.unwrap_or(3306),
            cause: e.to_string(),
        })?;

    let mut pools = POOLS.write().await;
    pools.insert(key, pool.clone());
    Ok(pool)
}

fn extract_value(row: &sqlx::mysql::MySqlRow, index: usize) -> Value {
    use sqlx::ValueRef;

    if let Ok(val_ref) = row.try_get_raw(index) {
        if val_ref.is_null() {
            return Value::Null;
        }
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        return Value::String(v.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(index) {
        return Value::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<rust_decimal::Decimal, _>(index) {
        return Value::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Value::String(super::common::encode_blob(&v));
    }
    Value::Null
}

fn row_to_map(row: &sqlx::mysql::MySqlRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), extract_value(row, i)))
        .collect()
}

pub struct MysqlAdapter;

#[async_trait]
impl Adapter for MysqlAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("mysql is in the catalog").capabilities
    }

    async fn connect(
        &self,
        cfg: &ConnectionConfig,
        secrets: &dyn SecretStore,
    ) -> Result<AdapterFacets, AnchorError> {
        let pool = get_pool(cfg, secrets).await?;
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "connect.probe", e))?;

        let conn = Arc::new(MysqlConnection { pool });
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
            database_name: "information_schema".to_string(),
            enabled: cfg.enabled,
            tls: cfg.tls.clone(),
            role: cfg.role.clone(),
            connected_to_node_id: cfg.connected_to_node_id.clone(),
            owner_id: cfg.owner_id.clone(),
        };
        let pool = get_pool(&conn_cfg, secrets).await?;
        Ok(Arc::new(MysqlInstance { pool }))
    }
}

struct MysqlConnection {
    pool: Pool<MySql>,
}

#[async_trait]
impl SchemaOperator for MysqlConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for name in self.list_tables().await? {
            let table = self.get_table_schema(&name).await?;
            model.tables.insert(name, table);
        }
        Ok(model)
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnchorError::backend(BACKEND, "list_tables", e))?;
        Ok(rows.iter().map(|r| row_str(r, 0)).collect())
    }

    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        let mut table = Table::new(name);

        let col_rows = sqlx::query(
            r#"SELECT column_name, data_type, column_key, is_nullable, extra
               FROM information_schema.columns
               WHERE table_schema = DATABASE() AND table_name = ?
               ORDER BY ordinal_position"#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnchorError::backend(BACKEND, "get_table_schema.columns", e))?;

        for row in &col_rows {
            let column_name = row_str(row, 0);
            let data_type = row_str(row, 1);
            let key = row_str(row, 2);
            let null_str = row_str(row, 3);
            let extra = row_str(row, 4);
            table.columns.insert(
                column_name.clone(),
                Column {
                    name: column_name,
                    data_type,
                    nullable: null_str == "YES",
                    is_primary_key: key == "PRI",
                    auto_increment: extra.contains("auto_increment"),
                    options: Default::default(),
                },
            );
        }

        let fk_rows = sqlx::query(
            r#"SELECT kcu.constraint_name, kcu.column_name, kcu.referenced_table_name,
                      kcu.referenced_column_name, rc.update_rule, rc.delete_rule
               FROM information_schema.key_column_usage kcu
               JOIN information_schema.referential_constraints rc
                 ON kcu.constraint_name = rc.constraint_name AND kcu.constraint_schema = rc.constraint_schema
               WHERE kcu.table_schema = DATABASE() AND kcu.table_name = ? AND kcu.referenced_table_name IS NOT NULL"#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnchorError::backend(BACKEND, "get_table_schema.fk", e))?;

        for row in &fk_rows {
            table.constraints.push(Constraint {
                name: row_str(row, 0),
                constraint_type: ConstraintType::ForeignKey,
                columns: vec![row_str(row, 1)],
                reference: Some(ConstraintReference {
                    table: row_str(row, 2),
                    columns: vec![row_str(row, 3)],
                    on_update: row_str_opt(row, 4),
                    on_delete: row_str_opt(row, 5),
                }),
                options: Default::default(),
            });
        }

        let idx_rows = sqlx::query(
            r#"SELECT index_name, non_unique FROM information_schema.statistics
               WHERE table_schema = DATABASE() AND table_name = ? GROUP BY index_name, non_unique"#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnchorError::backend(BACKEND, "get_table_schema.indexes", e))?;
        for row in &idx_rows {
            let name: String = row_str(row, 0);
            let non_unique: i64 = row.try_get(1).unwrap_or(1);
            if name == "PRIMARY" {
                continue;
            }
            table.indexes.push(Index {
                name,
                columns: vec![],
                unique: non_unique == 0,
                options: Default::default(),
            });
        }

        Ok(table)
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

fn bind_json<'q>(
    q: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
    match value {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else {
                q.bind(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => match super::common::decode_blob_wire_format(s) {
            Some(bytes) => q.bind(bytes),
            None => q.bind(s.clone()),
        },
        other => q.bind(other.to_string()),
    }
}

#[async_trait]
impl DataOperator for MysqlConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let query = format!("SELECT * FROM `{}` LIMIT {}", table, limit);
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "fetch", e))?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        let mut inserted = 0u64;
        for row in rows {
            let columns: Vec<&String> = row.keys().collect();
            if columns.is_empty() {
                continue;
            }
            let col_list = columns.iter().map(|c| format!("`{}`", c)).collect::<Vec<_>>().join(", ");
            let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let query = format!("INSERT INTO `{}` ({}) VALUES ({})", table, col_list, placeholders);
            let mut q = sqlx::query(&query);
            for col in &columns {
                q = bind_json(q, row.get(*col).unwrap());
            }
            q.execute(&self.pool).await.map_err(|e| AnchorError::backend(BACKEND, "insert", e))?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, rows: Vec<Row>, where_columns: &[String]) -> Result<u64, AnchorError> {
        let mut affected = 0u64;
        for row in rows {
            let set_columns: Vec<&String> = row.keys().filter(|c| !where_columns.contains(c)).collect();
            if set_columns.is_empty() {
                continue;
            }
            let set_clause = set_columns.iter().map(|c| format!("`{}` = ?", c)).collect::<Vec<_>>().join(", ");
            let where_clause = where_columns.iter().map(|c| format!("`{}` = ?", c)).collect::<Vec<_>>().join(" AND ");
            let query = format!("UPDATE `{}` SET {} WHERE {}", table, set_clause, where_clause);
            let mut q = sqlx::query(&query);
            for col in &set_columns {
                q = bind_json(q, row.get(*col).unwrap());
            }
            for col in where_columns {
                q = bind_json(q, row.get(col).ok_or_else(|| {
                    AnchorError::validation("where_columns", format!("row missing key {:?}", col))
                })?);
            }
            let result = q.execute(&self.pool).await.map_err(|e| AnchorError::backend(BACKEND, "update", e))?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>, unique_columns: &[String]) -> Result<u64, AnchorError> {
        let mut affected = 0u64;
        for row in rows {
            let columns: Vec<&String> = row.keys().collect();
            if columns.is_empty() {
                continue;
            }
            let col_list = columns.iter().map(|c| format!("`{}`", c)).collect::<Vec<_>>().join(", ");
            let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let update_clause = columns
                .iter()
                .filter(|c| !unique_columns.contains(c))
                .map(|c| format!("`{}` = VALUES(`{}`)", c, c))
                .collect::<Vec<_>>()
                .join(", ");
            let query = if update_clause.is_empty() {
                format!("INSERT IGNORE INTO `{}` ({}) VALUES ({})", table, col_list, placeholders)
            } else {
                format!(
                    "INSERT INTO `{}` ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                    table, col_list, placeholders, update_clause
                )
            };
            let mut q = sqlx::query(&query);
            for col in &columns {
                q = bind_json(q, row.get(*col).unwrap());
            }
            let result = q.execute(&self.pool).await.map_err(|e| AnchorError::backend(BACKEND, "upsert", e))?;
            affected += result.rows_affected();
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError> {
        if conditions.is_empty() {
            return Err(AnchorError::validation("conditions", "delete requires at least one condition"));
        }
        let where_clause = conditions.keys().map(|c| format!("`{}` = ?", c)).collect::<Vec<_>>().join(" AND ");
        let query = format!("DELETE FROM `{}` WHERE {}", table, where_clause);
        let mut q = sqlx::query(&query);
        for value in conditions.values() {
            q = bind_json(q, value);
        }
        let result = q.execute(&self.pool).await.map_err(|e| AnchorError::backend(BACKEND, "delete", e))?;
        Ok(result.rows_affected())
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        let offset = super::common::decode_cursor(params.cursor.as_deref());
        let query = format!(
            "SELECT * FROM `{}` LIMIT {} OFFSET {}",
            params.table,
            params.batch_size + 1,
            offset
        );
        let mut rows: Vec<Row> = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "stream", e))?
            .iter()
            .map(row_to_map)
            .collect();

        let has_more = rows.len() as u32 > params.batch_size;
        rows.truncate(params.batch_size as usize);
        let next_cursor = if has_more {
            Some(super::common::encode_cursor(offset + params.batch_size as u64))
        } else {
            None
        };
        Ok(StreamResult { rows, has_more, next_cursor })
    }

    async fn execute_query(&self, query: &str, args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        let mut q = sqlx::query(query);
        for arg in args {
            q = bind_json(q, arg);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(|e| AnchorError::backend(BACKEND, "execute_query", e))?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn execute_count_query(&self, query: &str) -> Result<i64, AnchorError> {
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "execute_count_query", e))?;
        Ok(row.try_get::<i64, _>(0).unwrap_or(0))
    }

    async fn get_row_count(&self, table: &str, where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let query = match where_clause {
            Some(w) => format!("SELECT COUNT(*) FROM `{}` WHERE {}", table, w),
            None => format!("SELECT COUNT(*) FROM `{}`", table),
        };
        let count = self.execute_count_query(&query).await?;
        Ok(RowCount { count, exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        sqlx::query("SET FOREIGN_KEY_CHECKS = 0")
            .execute(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "wipe.disable_fk_checks", e))?;
        for table in self.list_tables().await? {
            sqlx::query(&format!("TRUNCATE TABLE `{}`", table))
                .execute(&self.pool)
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "wipe", e))?;
        }
        sqlx::query("SET FOREIGN_KEY_CHECKS = 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "wipe.enable_fk_checks", e))?;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl MetadataOperator for MysqlConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let version_row = sqlx::query("SELECT VERSION()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_database_metadata.version", e))?;
        let version = row_str(&version_row, 0);

        let size_row = sqlx::query(
            "SELECT COALESCE(SUM(data_length + index_length), 0) FROM information_schema.tables WHERE table_schema = DATABASE()",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AnchorError::backend(BACKEND, "collect_database_metadata.size", e))?;
        let size_bytes: i64 = size_row.try_get(0).unwrap_or(0);

        let tables_count = self.list_tables().await?.len() as i64;

        Ok(DatabaseMetadata { version, size_bytes, tables_count, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let version_row = sqlx::query("SELECT VERSION()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata.version", e))?;
        let version = row_str(&version_row, 0);

        let max_conn_row = sqlx::query("SHOW VARIABLES LIKE 'max_connections'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata.max_connections", e))?;
        let max_connections: i64 = row_str(&max_conn_row, 1).parse().unwrap_or(0);

        let status_row = sqlx::query("SHOW STATUS LIKE 'Threads_connected'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata.connections", e))?;
        let total_connections: i64 = row_str(&status_row, 1).parse().unwrap_or(0);

        let db_rows = sqlx::query("SHOW DATABASES")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata.databases", e))?;

        Ok(InstanceMetadata {
            version,
            uptime_seconds: 0,
            total_databases: db_rows.len() as i64,
            total_connections,
            max_connections,
            extra: Default::default(),
        })
    }
}

#[async_trait]
impl ReplicationOperator for MysqlConnection {
    fn is_supported(&self) -> bool {
        true
    }

    fn get_supported_mechanisms(&self) -> Vec<String> {
        vec!["binlog".to_string()]
    }

    async fn check_prerequisites(&self) -> Result<(), AnchorError> {
        let row = sqlx::query("SHOW VARIABLES LIKE 'log_bin'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "check_prerequisites", e))?;
        if row_str(&row, 1) != "ON" {
            return Err(AnchorError::backend(BACKEND, "check_prerequisites", "binary logging (log_bin) is disabled"));
        }
        Ok(())
    }

    async fn connect(&self, cfg: &ReplicationConfig) -> Result<Arc<dyn ReplicationSource>, AnchorError> {
        Ok(Arc::new(MysqlReplicationSource { replication_id: cfg.replication_id.clone() }))
    }

    fn parse_event(&self, raw: &[u8]) -> Result<CdcEvent, AnchorError> {
        let value: Value = serde_json::from_slice(raw).map_err(|e| AnchorError::backend(BACKEND, "parse_event", e))?;
        let table = value.get("table").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let operation = value.get("op").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let data = value
            .get("data")
            .and_then(|v| v.as_object())
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(CdcEvent { table, operation, data, before: None })
    }

    async fn apply_cdc_event(&self, _event: &CdcEvent) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "apply_cdc_event", "this core observes CDC, it does not apply it"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

struct MysqlReplicationSource {
    replication_id: String,
}

#[async_trait]
impl ReplicationSource for MysqlReplicationSource {
    async fn close(&self) -> Result<(), AnchorError> {
        log::info!("closing mysql replication source {}", self.replication_id);
        Ok(())
    }
}

struct MysqlInstance {
    pool: Pool<MySql>,
}

#[async_trait]
impl InstanceOperator for MysqlInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        let rows = sqlx::query("SHOW DATABASES")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "list_databases", e))?;
        Ok(rows.iter().map(|r| row_str(r, 0)).collect())
    }

    async fn create_database(&self, name: &str) -> Result<(), AnchorError> {
        sqlx::query(&format!("CREATE DATABASE `{}`", name))
            .execute(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "create_database", e))?;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), AnchorError> {
        sqlx::query(&format!("DROP DATABASE IF EXISTS `{}`", name))
            .execute(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "drop_database", e))?;
        Ok(())
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let version_row = sqlx::query("SELECT VERSION()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        Ok(InstanceMetadata {
            version: row_str(&version_row, 0),
            uptime_seconds: 0,
            total_databases: self.list_databases().await?.len() as i64,
            total_connections: 0,
            max_connections: 0,
            extra: Default::default(),
        })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_key_includes_database_id() {
        let cfg = ConnectionConfig {
            database_id: "db1".into(),
            tenant_id: "t1".into(),
            workspace_id: "w1".into(),
            environment_id: None,
            instance_id: "i1".into(),
            name: "n".into(),
            description: None,
            database_vendor: BACKEND.into(),
            connection_type: BACKEND.into(),
            host: Some("localhost".into()),
            port: Some(3306),
            username: Some("root".into()),
            password: None,
            database_name: "app".into(),
            enabled: true,
            tls: Default::default(),
            role: None,
            connected_to_node_id: None,
            owner_id: None,
        };
        assert!(pool_key(&cfg).contains("db1"));
    }
}
