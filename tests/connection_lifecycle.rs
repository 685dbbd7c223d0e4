//! S1 and invariants 1-3: connect/disconnect against a stub relational
//! adapter registered in-process, with no real backend I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use anchorsvc_core::adapters::{
    self, AdapterFacets, DatabaseMetadata, DataOperator, InstanceMetadata, InstanceOperator,
    MetadataOperator, Row, RowCount, SchemaOperator, StreamParams, StreamResult,
};
use anchorsvc_core::catalog::{CapabilityFlags, Paradigm};
use anchorsvc_core::config::{ConnectionConfig, InstanceConfig, TlsConfig};
use anchorsvc_core::connection::manager::ConnectionManager;
use anchorsvc_core::error::AnchorError;
use anchorsvc_core::model::{Table, UnifiedModel};
use anchorsvc_core::secrets::PlaintextSecretStore;

struct StubSchema;

#[async_trait]
impl SchemaOperator for StubSchema {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        Ok(UnifiedModel::new("stub-postgres-s1"))
    }
    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        Ok(vec![])
    }
    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        Ok(Table::new(name))
    }
    fn backend_name(&self) -> &str {
        "stub-postgres-s1"
    }
}

struct StubData;

#[async_trait]
impl DataOperator for StubData {
    async fn fetch(&self, _table: &str, _limit: u32) -> Result<Vec<Row>, AnchorError> {
        Ok(vec![])
    }
    async fn insert(&self, _table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        Ok(rows.len() as u64)
    }
    async fn update(&self, _table: &str, rows: Vec<Row>, _where_columns: &[String]) -> Result<u64, AnchorError> {
        Ok(rows.len() as u64)
    }
    async fn upsert(&self, _table: &str, rows: Vec<Row>, _unique_columns: &[String]) -> Result<u64, AnchorError> {
        Ok(rows.len() as u64)
    }
    async fn delete(&self, _table: &str, _conditions: anchorsvc_core::adapters::Conditions) -> Result<u64, AnchorError> {
        Ok(0)
    }
    async fn stream(&self, _params: StreamParams) -> Result<StreamResult, AnchorError> {
        Ok(StreamResult { rows: vec![], has_more: false, next_cursor: None })
    }
    async fn execute_query(&self, _query: &str, _args: &[serde_json::Value]) -> Result<Vec<Row>, AnchorError> {
        Ok(vec![])
    }
    async fn execute_count_query(&self, _query: &str) -> Result<i64, AnchorError> {
        Ok(0)
    }
    async fn get_row_count(&self, _table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        Ok(RowCount { count: 0, exact: true })
    }
    async fn wipe(&self) -> Result<(), AnchorError> {
        Ok(())
    }
    fn backend_name(&self) -> &str {
        "stub-postgres-s1"
    }
}

struct StubMetadata {
    probes: Arc<AtomicU64>,
}

#[async_trait]
impl MetadataOperator for StubMetadata {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(DatabaseMetadata::default())
    }
    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        Ok(InstanceMetadata::default())
    }
}

struct StubInstance;

#[async_trait]
impl InstanceOperator for StubInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        Ok(vec![])
    }
    async fn create_database(&self, _name: &str) -> Result<(), AnchorError> {
        Ok(())
    }
    async fn drop_database(&self, _name: &str) -> Result<(), AnchorError> {
        Ok(())
    }
    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        Ok(InstanceMetadata::default())
    }
    async fn ping(&self) -> Result<(), AnchorError> {
        Ok(())
    }
}

struct StubPostgresAdapter {
    probes: Arc<AtomicU64>,
}

#[async_trait]
impl adapters::Adapter for StubPostgresAdapter {
    fn backend_type(&self) -> String {
        "stub-postgres-s1".to_string()
    }
    fn capabilities(&self) -> CapabilityFlags {
        CapabilityFlags {
            paradigms: vec![Paradigm::Relational],
            supports_arbitrary_query: true,
            supports_schema_ddl: true,
            supports_cdc: false,
            supports_streams: true,
            default_port: Some(5432),
        }
    }
    async fn connect(
        &self,
        _cfg: &ConnectionConfig,
        _secrets: &dyn anchorsvc_core::secrets::SecretStore,
    ) -> Result<AdapterFacets, AnchorError> {
        Ok(AdapterFacets {
            schema: Arc::new(StubSchema),
            data: Arc::new(StubData),
            metadata: Arc::new(StubMetadata { probes: self.probes.clone() }),
            replication: None,
        })
    }
    async fn connect_instance(
        &self,
        _cfg: &InstanceConfig,
        _secrets: &dyn anchorsvc_core::secrets::SecretStore,
    ) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
        Ok(Arc::new(StubInstance))
    }
}

fn sample_config(database_id: &str) -> ConnectionConfig {
    ConnectionConfig {
        database_id: database_id.to_string(),
        tenant_id: "tenant1".to_string(),
        workspace_id: "ws1".to_string(),
        environment_id: None,
        instance_id: "inst1".to_string(),
        name: "db1".to_string(),
        description: None,
        database_vendor: "stub-postgres-s1".to_string(),
        connection_type: "postgres".to_string(),
        host: Some("h".to_string()),
        port: Some(5432),
        username: Some("u".to_string()),
        password: None,
        database_name: "db1".to_string(),
        enabled: true,
        tls: TlsConfig::default(),
        role: None,
        connected_to_node_id: None,
        owner_id: None,
    }
}

#[tokio::test]
async fn connect_disconnect_round_trip_matches_seed_scenario_s1() {
    let probes = Arc::new(AtomicU64::new(0));
    adapters::register_adapter(StubPostgresAdapter { probes: probes.clone() }).await;

    let manager = ConnectionManager::new(Arc::new(PlaintextSecretStore));
    manager.connect(sample_config("db1")).await.unwrap();

    assert_eq!(manager.list_connections().await, vec!["db1".to_string()]);
    let connection = manager.get_connection("db1").await.unwrap();
    assert_eq!(connection.database_id(), "db1");
    assert!(connection.is_connected());

    assert!(manager.check_health("db1").await.unwrap());
    assert_eq!(probes.load(Ordering::SeqCst), 1);

    manager.disconnect("db1").await.unwrap();
    assert!(matches!(manager.get_connection("db1").await, Err(AnchorError::NotFound(_))));
}

#[tokio::test]
async fn disconnect_is_idempotent_regardless_of_outcome() {
    adapters::register_adapter(StubPostgresAdapter { probes: Arc::new(AtomicU64::new(0)) }).await;
    let manager = ConnectionManager::new(Arc::new(PlaintextSecretStore));
    manager.connect(sample_config("db2")).await.unwrap();

    manager.disconnect("db2").await.unwrap();
    assert!(matches!(manager.get_connection("db2").await, Err(AnchorError::NotFound(_))));
    // Second disconnect of the same, now-absent id is still success.
    manager.disconnect("db2").await.unwrap();
}

#[tokio::test]
async fn disconnect_all_empties_both_maps_unconditionally() {
    adapters::register_adapter(StubPostgresAdapter { probes: Arc::new(AtomicU64::new(0)) }).await;
    let manager = ConnectionManager::new(Arc::new(PlaintextSecretStore));
    manager.connect(sample_config("db3")).await.unwrap();
    manager.connect(sample_config("db4")).await.unwrap();

    manager.disconnect_all().await.unwrap();
    assert!(manager.list_connections().await.is_empty());
    assert!(manager.list_instances().await.is_empty());
}
