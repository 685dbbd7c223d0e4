//! Local lakehouse adapter — a directory-backed table catalog: each table is
//! a subdirectory holding a `manifest.json` (column list) and a `data.jsonl`
//! append log. This stands in for a real Parquet/Delta lake without pulling
//! in a columnar file format crate the rest of the stack doesn't need.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::adapters::{
    Adapter, AdapterFacets, CdcEvent, Conditions, DataOperator, DatabaseMetadata, InstanceMetadata,
    InstanceOperator, MetadataOperator, ReplicationOperator, ReplicationSource, Row, RowCount,
    SchemaOperator, StreamParams, StreamResult,
};
use crate::catalog::{self, BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig, ReplicationConfig};
use crate::error::AnchorError;
use crate::model::{Column, Table, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "lakehouse";

fn root_path(cfg: &ConnectionConfig) -> PathBuf {
    PathBuf::from(&cfg.database_name)
}

fn manifest_path(root: &Path, table: &str) -> PathBuf {
    root.join(table).join("manifest.json")
}

fn data_path(root: &Path, table: &str) -> PathBuf {
    root.join(table).join("data.jsonl")
}

pub struct LakehouseAdapter;

#[async_trait]
impl Adapter for LakehouseAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("lakehouse is in the catalog").capabilities
    }

    async fn connect(&self, cfg: &ConnectionConfig, _secrets: &dyn SecretStore) -> Result<AdapterFacets, AnchorError> {
        let root = root_path(cfg);
        fs::create_dir_all(&root).await.map_err(|e| AnchorError::backend(BACKEND, "connect", e))?;
        let conn = Arc::new(LakehouseConnection { root });
        Ok(AdapterFacets { schema: conn.clone(), data: conn.clone(), metadata: conn.clone(), replication: Some(conn) })
    }

    async fn connect_instance(&self, cfg: &InstanceConfig, _secrets: &dyn SecretStore) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
        let root = cfg.host.clone().unwrap_or_else(|| "./lakehouse".to_string());
        let root = PathBuf::from(root);
        fs::create_dir_all(&root).await.map_err(|e| AnchorError::backend(BACKEND, "connect_instance", e))?;
        Ok(Arc::new(LakehouseInstance { root }))
    }
}

struct LakehouseConnection {
    root: PathBuf,
}

#[async_trait]
impl SchemaOperator for LakehouseConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for name in self.list_tables().await? {
            let table = self.get_table_schema(&name).await?;
            model.tables.insert(name, table);
        }
        Ok(model)
    }

    async fn create_structure(&self, model: &UnifiedModel) -> Result<(), AnchorError> {
        for (name, table) in &model.tables {
            let table_dir = self.root.join(name);
            fs::create_dir_all(&table_dir).await.map_err(|e| AnchorError::backend(BACKEND, "create_structure", e))?;
            let manifest = serde_json::to_vec_pretty(&table).map_err(|e| AnchorError::backend(BACKEND, "create_structure.manifest", e))?;
            fs::write(manifest_path(&self.root, name), manifest).await.map_err(|e| AnchorError::backend(BACKEND, "create_structure.write", e))?;
            let data_file = data_path(&self.root, name);
            if fs::metadata(&data_file).await.is_err() {
                fs::write(&data_file, b"").await.map_err(|e| AnchorError::backend(BACKEND, "create_structure.data", e))?;
            }
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| AnchorError::backend(BACKEND, "list_tables", e))?;
        let mut tables = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| AnchorError::backend(BACKEND, "list_tables.next", e))? {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    tables.push(name.to_string());
                }
            }
        }
        tables.sort();
        Ok(tables)
    }

    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        let path = manifest_path(&self.root, name);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| AnchorError::backend(BACKEND, "get_table_schema.parse", e)),
            Err(_) => {
                let mut table = Table::new(name);
                table.columns.insert(
                    "data".to_string(),
                    Column { name: "data".to_string(), data_type: "json".to_string(), nullable: true, is_primary_key: false, auto_increment: false, options: Default::default() },
                );
                Ok(table)
            }
        }
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl DataOperator for LakehouseConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let rows = self.read_all(table).await?;
        Ok(rows.into_iter().take(limit as usize).collect())
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        let table_dir = self.root.join(table);
        fs::create_dir_all(&table_dir).await.map_err(|e| AnchorError::backend(BACKEND, "insert.dir", e))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_path(&self.root, table))
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "insert.open", e))?;
        let mut count = 0u64;
        for row in rows {
            let line = serde_json::to_string(&row).map_err(|e| AnchorError::backend(BACKEND, "insert.serialize", e))?;
            file.write_all(line.as_bytes()).await.map_err(|e| AnchorError::backend(BACKEND, "insert.write", e))?;
            file.write_all(b"\n").await.map_err(|e| AnchorError::backend(BACKEND, "insert.write", e))?;
            count += 1;
        }
        Ok(count)
    }

    async fn update(&self, table: &str, rows: Vec<Row>, where_columns: &[String]) -> Result<u64, AnchorError> {
        let id_col = where_columns.first().map(String::as_str).unwrap_or("id");
        let mut existing = self.read_all(table).await.unwrap_or_default();
        let mut affected = 0u64;
        for updated in rows {
            let id = updated.get(id_col).cloned();
            if let Some(slot) = existing.iter_mut().find(|r| r.get(id_col) == id.as_ref()) {
                *slot = updated;
                affected += 1;
            }
        }
        self.rewrite_all(table, &existing).await?;
        Ok(affected)
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>, unique_columns: &[String]) -> Result<u64, AnchorError> {
        let id_col = unique_columns.first().map(String::as_str).unwrap_or("id");
        let mut existing = self.read_all(table).await.unwrap_or_default();
        let mut affected = 0u64;
        for row in rows {
            let id = row.get(id_col).cloned();
            match existing.iter_mut().find(|r| r.get(id_col) == id.as_ref()) {
                Some(slot) => *slot = row,
                None => existing.push(row),
            }
            affected += 1;
        }
        self.rewrite_all(table, &existing).await?;
        Ok(affected)
    }

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError> {
        let existing = self.read_all(table).await.unwrap_or_default();
        let before = existing.len();
        let kept: Vec<Row> = existing
            .into_iter()
            .filter(|row| !conditions.iter().all(|(k, v)| row.get(k) == Some(v)))
            .collect();
        let removed = before - kept.len();
        self.rewrite_all(table, &kept).await?;
        Ok(removed as u64)
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        let offset = super::common::decode_cursor(params.cursor.as_deref()) as usize;
        let all = self.read_all(&params.table).await?;
        let window: Vec<Row> = all.into_iter().skip(offset).take(params.batch_size as usize).collect();
        let has_more = window.len() as u32 == params.batch_size;
        let next_cursor = if has_more { Some(super::common::encode_cursor(offset as u64 + params.batch_size as u64)) } else { None };
        Ok(StreamResult { rows: window, has_more, next_cursor })
    }

    async fn execute_query(&self, _query: &str, _args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "execute_query", "this adapter has no query engine, only append-log reads"))
    }

    async fn execute_count_query(&self, _query: &str) -> Result<i64, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "execute_count_query", "this adapter has no query engine, only append-log reads"))
    }

    async fn get_row_count(&self, table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let rows = self.read_all(table).await.unwrap_or_default();
        Ok(RowCount { count: rows.len() as i64, exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        for table in self.list_tables().await? {
            self.rewrite_all(&table, &[]).await?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

impl LakehouseConnection {
    async fn read_all(&self, table: &str) -> Result<Vec<Row>, AnchorError> {
        let path = data_path(&self.root, table);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(_) => return Ok(Vec::new()),
        };
        let mut rows = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let row: Row = serde_json::from_str(line).map_err(|e| AnchorError::backend(BACKEND, "read_all.parse", e))?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn rewrite_all(&self, table: &str, rows: &[Row]) -> Result<(), AnchorError> {
        let table_dir = self.root.join(table);
        fs::create_dir_all(&table_dir).await.map_err(|e| AnchorError::backend(BACKEND, "rewrite_all.dir", e))?;
        let mut buf = String::new();
        for row in rows {
            buf.push_str(&serde_json::to_string(row).map_err(|e| AnchorError::backend(BACKEND, "rewrite_all.serialize", e))?);
            buf.push('\n');
        }
        fs::write(data_path(&self.root, table), buf).await.map_err(|e| AnchorError::backend(BACKEND, "rewrite_all.write", e))
    }
}

#[async_trait]
impl MetadataOperator for LakehouseConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let tables = self.list_tables().await?;
        let mut size_bytes = 0i64;
        for table in &tables {
            if let Ok(meta) = fs::metadata(data_path(&self.root, table)).await {
                size_bytes += meta.len() as i64;
            }
        }
        Ok(DatabaseMetadata { version: "local".to_string(), size_bytes, tables_count: tables.len() as i64, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        Ok(InstanceMetadata { version: "local".to_string(), uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }
}

#[async_trait]
impl ReplicationOperator for LakehouseConnection {
    fn is_supported(&self) -> bool {
        false
    }

    async fn connect(&self, _cfg: &ReplicationConfig) -> Result<Arc<dyn ReplicationSource>, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "connect", "an append-log directory has no change stream to tail"))
    }

    fn parse_event(&self, _raw: &[u8]) -> Result<CdcEvent, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "parse_event", "an append-log directory has no change stream to tail"))
    }

    async fn apply_cdc_event(&self, _event: &CdcEvent) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "apply_cdc_event", "an append-log directory has no change stream to tail"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

struct LakehouseInstance {
    root: PathBuf,
}

#[async_trait]
impl InstanceOperator for LakehouseInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| AnchorError::backend(BACKEND, "list_databases", e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| AnchorError::backend(BACKEND, "list_databases.next", e))? {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn create_database(&self, name: &str) -> Result<(), AnchorError> {
        fs::create_dir_all(self.root.join(name)).await.map_err(|e| AnchorError::backend(BACKEND, "create_database", e))
    }

    async fn drop_database(&self, name: &str) -> Result<(), AnchorError> {
        fs::remove_dir_all(self.root.join(name)).await.map_err(|e| AnchorError::backend(BACKEND, "drop_database", e))
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let total_databases = self.list_databases().await?.len() as i64;
        Ok(InstanceMetadata { version: "local".to_string(), uptime_seconds: 0, total_databases, total_connections: 0, max_connections: 0, extra: Default::default() })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        fs::metadata(&self.root).await.map_err(|e| AnchorError::backend(BACKEND, "ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_fetch_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let conn = LakehouseConnection { root: dir.path().to_path_buf() };
        let mut row: Row = BTreeMap::new();
        row.insert("id".to_string(), Value::from(1));
        row.insert("name".to_string(), Value::from("north-star"));
        conn.insert("events", vec![row.clone()]).await.unwrap();
        let fetched = conn.fetch("events", 10).await.unwrap();
        assert_eq!(fetched, vec![row]);
    }

    #[tokio::test]
    async fn upsert_replaces_matching_id() {
        let dir = tempfile::tempdir().unwrap();
        let conn = LakehouseConnection { root: dir.path().to_path_buf() };
        let mut row: Row = BTreeMap::new();
        row.insert("id".to_string(), Value::from(1));
        row.insert("name".to_string(), Value::from("first"));
        conn.upsert("events", vec![row], &["id".to_string()]).await.unwrap();

        let mut updated: Row = BTreeMap::new();
        updated.insert("id".to_string(), Value::from(1));
        updated.insert("name".to_string(), Value::from("second"));
        conn.upsert("events", vec![updated.clone()], &["id".to_string()]).await.unwrap();

        let fetched = conn.fetch("events", 10).await.unwrap();
        assert_eq!(fetched, vec![updated]);
    }
}
