//! SQLite adapter — relational paradigm, file-based instance model.
//!
//! SQLite has no server process: `connect_instance` opens the same file the
//! connection would, and "databases" means the single file the connection
//! string names plus any `ATTACH`ed files, which this adapter does not
//! track — `list_databases` always returns the single `main` database.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Column as _, Pool, Row as _, Sqlite};
use tokio::sync::RwLock;

use crate::adapters::{
    Adapter, AdapterFacets, CdcEvent, Conditions, DataOperator, DatabaseMetadata, InstanceMetadata,
    InstanceOperator, MetadataOperator, ReplicationOperator, ReplicationSource, Row, RowCount,
    SchemaOperator, StreamParams, StreamResult,
};
use crate::catalog::{self, BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig, ReplicationConfig};
use crate::error::AnchorError;
use crate::model::{Column, Constraint, ConstraintReference, ConstraintType, Index, Table, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "sqlite";

type PoolMap = Arc<RwLock<BTreeMap<String, Pool<Sqlite>>>>;
static POOLS: Lazy<PoolMap> = Lazy::new(|| Arc::new(RwLock::new(BTreeMap::new())));

fn pool_key(cfg: &ConnectionConfig) -> String {
    format!("{}:{}", cfg.database_name, cfg.database_id)
}

async fn get_pool(cfg: &ConnectionConfig) -> Result<Pool<Sqlite>, AnchorError> {
    let key = pool_key(cfg);
    {
        let pools = POOLS.read().await;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&cfg.database_name)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| AnchorError::ConnectError {
            host: cfg.database_name.clone(),
            port: 0,
            cause: e.to_string(),
        })?;

    let mut pools = POOLS.write().await;
    pools.insert(key, pool.clone());
    Ok(pool)
}

fn extract_value(row: &sqlx::sqlite::SqliteRow, index: usize) -> Value {
    use sqlx::ValueRef;

    if let Ok(val_ref) = row.try_get_raw(index) {
        if val_ref.is_null() {
            return Value::Null;
        }
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Value::String(super::common::encode_blob(&v));
    }
    Value::Null
}

fn row_to_map(row: &sqlx::sqlite::SqliteRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), extract_value(row, i)))
        .collect()
}

pub struct SqliteAdapter;

#[async_trait]
impl Adapter for SqliteAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("sqlite is in the catalog").capabilities
    }

    async fn connect(
        &self,
        cfg: &ConnectionConfig,
        _secrets: &dyn SecretStore,
    ) -> Result<AdapterFacets, AnchorError> {
        let pool = get_pool(cfg).await?;
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "connect.probe", e))?;

        let conn = Arc::new(SqliteConnection { pool });
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
        _secrets: &dyn SecretStore,
    ) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
        let path = cfg.host.clone().unwrap_or_else(|| cfg.instance_id.clone());
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
            host: None,
            port: None,
            username: None,
            password: None,
            database_name: path,
            enabled: cfg.enabled,
            tls: cfg.tls.clone(),
            role: cfg.role.clone(),
            connected_to_node_id: cfg.connected_to_node_id.clone(),
            owner_id: cfg.owner_id.clone(),
        };
        let pool = get_pool(&conn_cfg).await?;
        Ok(Arc::new(SqliteInstance { pool, path: conn_cfg.database_name }))
    }
}

struct SqliteConnection {
    pool: Pool<Sqlite>,
}

#[async_trait]
impl SchemaOperator for SqliteConnection {
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
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnchorError::backend(BACKEND, "list_tables", e))?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        let mut table = Table::new(name);

        let col_rows = sqlx::query(&format!("PRAGMA table_info(\"{}\")", name))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "get_table_schema.columns", e))?;

        for row in &col_rows {
            let column_name: String = row.get("name");
            let data_type: String = row.get("type");
            let not_null: i64 = row.get("notnull");
            let pk: i64 = row.get("pk");
            let auto_increment = pk > 0 && data_type.eq_ignore_ascii_case("integer");
            table.columns.insert(
                column_name.clone(),
                Column {
                    name: column_name,
                    data_type,
                    nullable: not_null == 0,
                    is_primary_key: pk > 0,
                    auto_increment,
                    options: Default::default(),
                },
            );
        }

        let fk_rows = sqlx::query(&format!("PRAGMA foreign_key_list(\"{}\")", name))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "get_table_schema.fk", e))?;
        for row in &fk_rows {
            let id: i64 = row.get("id");
            let ref_table: String = row.get("table");
            let from: String = row.get("from");
            let to: String = row.get("to");
            let on_update: String = row.get("on_update");
            let on_delete: String = row.get("on_delete");
            table.constraints.push(Constraint {
                name: format!("fk_{}_{}", name, id),
                constraint_type: ConstraintType::ForeignKey,
                columns: vec![from],
                reference: Some(ConstraintReference {
                    table: ref_table,
                    columns: vec![to],
                    on_update: Some(on_update),
                    on_delete: Some(on_delete),
                }),
                options: Default::default(),
            });
        }

        let idx_rows = sqlx::query(&format!("PRAGMA index_list(\"{}\")", name))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "get_table_schema.indexes", e))?;
        for row in &idx_rows {
            let idx_name: String = row.get("name");
            let unique: i64 = row.get("unique");
            table.indexes.push(Index {
                name: idx_name,
                columns: vec![],
                unique: unique != 0,
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
    q: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
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
impl DataOperator for SqliteConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let query = format!("SELECT * FROM \"{}\" LIMIT {}", table, limit);
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
            let col_list = columns.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ");
            let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let query = format!("INSERT INTO \"{}\" ({}) VALUES ({})", table, col_list, placeholders);
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
            let set_clause = set_columns.iter().map(|c| format!("\"{}\" = ?", c)).collect::<Vec<_>>().join(", ");
            let where_clause = where_columns.iter().map(|c| format!("\"{}\" = ?", c)).collect::<Vec<_>>().join(" AND ");
            let query = format!("UPDATE \"{}\" SET {} WHERE {}", table, set_clause, where_clause);
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
            let col_list = columns.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ");
            let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let update_clause = columns
                .iter()
                .filter(|c| !unique_columns.contains(c))
                .map(|c| format!("\"{}\" = excluded.\"{}\"", c, c))
                .collect::<Vec<_>>()
                .join(", ");
            let conflict_cols = unique_columns.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ");
            let query = if update_clause.is_empty() {
                format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
                    table, col_list, placeholders, conflict_cols
                )
            } else {
                format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
                    table, col_list, placeholders, conflict_cols, update_clause
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
        let where_clause = conditions.keys().map(|c| format!("\"{}\" = ?", c)).collect::<Vec<_>>().join(" AND ");
        let query = format!("DELETE FROM \"{}\" WHERE {}", table, where_clause);
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
            "SELECT * FROM \"{}\" LIMIT {} OFFSET {}",
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
            Some(w) => format!("SELECT COUNT(*) FROM \"{}\" WHERE {}", table, w),
            None => format!("SELECT COUNT(*) FROM \"{}\"", table),
        };
        let count = self.execute_count_query(&query).await?;
        Ok(RowCount { count, exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        for table in self.list_tables().await? {
            sqlx::query(&format!("DELETE FROM \"{}\"", table))
                .execute(&self.pool)
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
impl MetadataOperator for SqliteConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let version_row = sqlx::query("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_database_metadata.version", e))?;
        let version: String = version_row.get(0);

        let page_count_row = sqlx::query("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_database_metadata.page_count", e))?;
        let page_count: i64 = page_count_row.get(0);
        let page_size_row = sqlx::query("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_database_metadata.page_size", e))?;
        let page_size: i64 = page_size_row.get(0);

        let tables_count = self.list_tables().await?.len() as i64;

        Ok(DatabaseMetadata {
            version,
            size_bytes: page_count * page_size,
            tables_count,
            extra: Default::default(),
        })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let version_row = sqlx::query("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        Ok(InstanceMetadata {
            version: version_row.get(0),
            uptime_seconds: 0,
            total_databases: 1,
            total_connections: 1,
            max_connections: 1,
            extra: Default::default(),
        })
    }
}

#[async_trait]
impl ReplicationOperator for SqliteConnection {
    fn is_supported(&self) -> bool {
        false
    }

    async fn connect(&self, _cfg: &ReplicationConfig) -> Result<Arc<dyn ReplicationSource>, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "connect", "sqlite is a single-file embedded database with no CDC stream"))
    }

    fn parse_event(&self, _raw: &[u8]) -> Result<CdcEvent, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "parse_event", "sqlite has no CDC event format"))
    }

    async fn apply_cdc_event(&self, _event: &CdcEvent) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "apply_cdc_event", "sqlite has no CDC event format"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

struct SqliteInstance {
    pool: Pool<Sqlite>,
    path: String,
}

#[async_trait]
impl InstanceOperator for SqliteInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        Ok(vec![self.path.clone()])
    }

    async fn create_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "create_database", "sqlite databases are files created by connecting to a path, not by a DDL-style call"))
    }

    async fn drop_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "drop_database", "sqlite databases are files; deleting them is a filesystem operation out of scope for this adapter"))
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let version_row = sqlx::query("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        Ok(InstanceMetadata {
            version: version_row.get(0),
            uptime_seconds: 0,
            total_databases: 1,
            total_connections: 1,
            max_connections: 1,
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
    fn pool_key_is_the_file_path() {
        let cfg = ConnectionConfig {
            database_id: "d1".into(),
            tenant_id: "t1".into(),
            workspace_id: "w1".into(),
            environment_id: None,
            instance_id: "i1".into(),
            name: "n".into(),
            description: None,
            database_vendor: BACKEND.into(),
            connection_type: BACKEND.into(),
            host: None,
            port: None,
            username: None,
            password: None,
            database_name: "/tmp/app.db".into(),
            enabled: true,
            tls: Default::default(),
            role: None,
            connected_to_node_id: None,
            owner_id: None,
        };
        assert_eq!(pool_key(&cfg), "/tmp/app.db:d1");
    }
}
