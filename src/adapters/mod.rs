//! The adapter registry and the per-backend adapter contract.
//!
//! A single process-wide `RwLock<HashMap<BackendId, Arc<dyn Adapter>>>`,
//! populated once at startup and read many times afterward. Each backend
//! implements four independent facets (`SchemaOperator`, `DataOperator`,
//! `MetadataOperator`, `ReplicationOperator`) so a connection can carry, or
//! omit, each one separately. Optional methods on every facet default to
//! returning `UnsupportedOperation` instead of forcing every backend to
//! write out a no-op.

pub mod common;
pub mod columnar;
pub mod graph;
pub mod lakehouse;
pub mod mongodb_adapter;
pub mod mysql;
pub mod postgres;
pub mod redis_kv;
pub mod search;
pub mod sqlite;
pub mod timeseries;
pub mod vector;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::catalog::{BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig, ReplicationConfig};
use crate::error::AnchorError;
use crate::model::{Table, UnifiedModel};
use crate::secrets::SecretStore;

pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct StreamParams {
    pub table: String,
    pub batch_size: u32,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StreamResult {
    pub rows: Vec<Row>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RowCount {
    pub count: i64,
    pub exact: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseMetadata {
    pub version: String,
    pub size_bytes: i64,
    pub tables_count: i64,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceMetadata {
    pub version: String,
    pub uptime_seconds: i64,
    pub total_databases: i64,
    pub total_connections: i64,
    pub max_connections: i64,
    pub extra: BTreeMap<String, Value>,
}

/// An update/delete/upsert predicate expressed as column/value equality
/// pairs. Arbitrary-query backends may additionally accept a raw filter via
/// `ExecuteQuery`; this shape covers the uniform CRUD surface only.
pub type Conditions = BTreeMap<String, Value>;

// --- Facets -----------------------------------------------------------------

/// Schema discovery and DDL.
#[async_trait]
pub trait SchemaOperator: Send + Sync {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError>;

    async fn create_structure(&self, model: &UnifiedModel) -> Result<(), AnchorError> {
        let _ = model;
        Err(AnchorError::unsupported(self.backend_name(), "create_structure", "no DDL facet"))
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError>;

    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError>;

    fn backend_name(&self) -> &str;
}

/// Row-level CRUD and query execution.
#[async_trait]
pub trait DataOperator: Send + Sync {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError>;

    async fn fetch_with_columns(
        &self,
        table: &str,
        columns: &[String],
        limit: u32,
    ) -> Result<Vec<Row>, AnchorError> {
        let rows = self.fetch(table, limit).await?;
        if columns.is_empty() {
            return Ok(rows);
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .filter(|(k, _)| columns.contains(k))
                    .collect()
            })
            .collect())
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError>;

    async fn update(
        &self,
        table: &str,
        rows: Vec<Row>,
        where_columns: &[String],
    ) -> Result<u64, AnchorError>;

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        unique_columns: &[String],
    ) -> Result<u64, AnchorError>;

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError>;

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError>;

    async fn execute_query(&self, query: &str, args: &[Value]) -> Result<Vec<Row>, AnchorError>;

    async fn execute_count_query(&self, query: &str) -> Result<i64, AnchorError>;

    async fn get_row_count(&self, table: &str, where_clause: Option<&str>) -> Result<RowCount, AnchorError>;

    async fn wipe(&self) -> Result<(), AnchorError>;

    fn backend_name(&self) -> &str;
}

/// Size/version/topology reporting.
#[async_trait]
pub trait MetadataOperator: Send + Sync {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError>;
    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError>;
}

/// A change-data-capture event, backend-agnostic shape.
#[derive(Debug, Clone)]
pub struct CdcEvent {
    pub table: String,
    pub operation: String,
    pub data: Row,
    pub before: Option<Row>,
}

/// An open CDC stream handle backed by the underlying replication source.
#[async_trait]
pub trait ReplicationSource: Send + Sync {
    async fn close(&self) -> Result<(), AnchorError>;
}

/// Optional change-data-capture facet.
#[async_trait]
pub trait ReplicationOperator: Send + Sync {
    fn is_supported(&self) -> bool;

    fn get_supported_mechanisms(&self) -> Vec<String> {
        Vec::new()
    }

    async fn check_prerequisites(&self) -> Result<(), AnchorError> {
        Ok(())
    }

    async fn connect(&self, cfg: &ReplicationConfig) -> Result<Arc<dyn ReplicationSource>, AnchorError>;

    async fn list_slots(&self) -> Result<Vec<String>, AnchorError> {
        Err(AnchorError::unsupported(self.backend_name(), "list_slots", "no replication slot concept"))
    }

    async fn drop_slot(&self, name: &str) -> Result<(), AnchorError> {
        let _ = name;
        Err(AnchorError::unsupported(self.backend_name(), "drop_slot", "no replication slot concept"))
    }

    async fn list_publications(&self) -> Result<Vec<String>, AnchorError> {
        Err(AnchorError::unsupported(self.backend_name(), "list_publications", "no publication concept"))
    }

    async fn drop_publication(&self, name: &str) -> Result<(), AnchorError> {
        let _ = name;
        Err(AnchorError::unsupported(self.backend_name(), "drop_publication", "no publication concept"))
    }

    fn parse_event(&self, raw: &[u8]) -> Result<CdcEvent, AnchorError>;

    async fn apply_cdc_event(&self, event: &CdcEvent) -> Result<(), AnchorError>;

    fn backend_name(&self) -> &str;
}

/// An optional record-transformation hook invoked only by
/// `ReplicationOperator::apply_cdc_event` callers that want it. The core
/// never calls it implicitly.
#[async_trait]
pub trait DataTransformationService: Send + Sync {
    async fn transform(&self, endpoint: &str, record: Row, rules: &[String]) -> Result<Row, AnchorError>;
}

// --- Connection bundle --------------------------------------------------

/// The set of facets one open backend connection carries. `replication` is
/// `None` unless the backend's capability flags advertise CDC support.
pub struct AdapterFacets {
    pub schema: Arc<dyn SchemaOperator>,
    pub data: Arc<dyn DataOperator>,
    pub metadata: Arc<dyn MetadataOperator>,
    pub replication: Option<Arc<dyn ReplicationOperator>>,
}

/// The per-backend adapter contract.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn backend_type(&self) -> BackendId;
    fn capabilities(&self) -> CapabilityFlags;

    /// Opens a connection to one logical database. Implementations are
    /// responsible for decrypting the password via `secrets`, constructing
    /// the backend-specific handle, and running a cheap verification probe
    /// before returning.
    async fn connect(
        &self,
        cfg: &ConnectionConfig,
        secrets: &dyn SecretStore,
    ) -> Result<AdapterFacets, AnchorError>;

    /// Opens an instance-level connection (no specific database). Returns
    /// only metadata + database-listing/creation/removal.
    async fn connect_instance(
        &self,
        cfg: &InstanceConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Arc<dyn InstanceOperator>, AnchorError>;
}

/// What an instance-level connection exposes: database listing/creation/
/// removal plus instance metadata, and nothing else.
#[async_trait]
pub trait InstanceOperator: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError>;
    async fn create_database(&self, name: &str) -> Result<(), AnchorError>;
    async fn drop_database(&self, name: &str) -> Result<(), AnchorError>;
    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError>;
    async fn ping(&self) -> Result<(), AnchorError>;
}

// --- Registry ------------------------------------------------------------

type Registry = Arc<RwLock<HashMap<BackendId, Arc<dyn Adapter>>>>;

static REGISTRY: Lazy<Registry> = Lazy::new(|| Arc::new(RwLock::new(HashMap::new())));

/// Registers an adapter. Re-registering an id that is already present is a
/// fatal misconfiguration, so this call panics rather than silently
/// overwriting the existing registration.
pub async fn register_adapter(adapter: impl Adapter + 'static) {
    let id = adapter.backend_type();
    let mut reg = REGISTRY.write().await;
    if reg.contains_key(&id) {
        panic!("adapter for backend {:?} is already registered", id);
    }
    log::info!("registering adapter: {}", id);
    reg.insert(id, Arc::new(adapter));
}

pub async fn get_adapter(id: &str) -> Result<Arc<dyn Adapter>, AnchorError> {
    let reg = REGISTRY.read().await;
    reg.get(id).cloned().ok_or_else(|| AnchorError::NotRegistered(id.to_string()))
}

#[cfg(any(test, feature = "test-support"))]
pub async fn unregister_adapter_for_tests(id: &str) {
    let mut reg = REGISTRY.write().await;
    reg.remove(id);
}

pub async fn list_registered() -> Vec<BackendId> {
    let reg = REGISTRY.read().await;
    let mut ids: Vec<BackendId> = reg.keys().cloned().collect();
    ids.sort();
    ids
}
