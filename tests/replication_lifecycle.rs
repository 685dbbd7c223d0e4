//! S2 and invariants 4-5: replication client table-set sharing and
//! close-on-empty, against a stub adapter with a replication facet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use anchorsvc_core::adapters::{
    self, AdapterFacets, CdcEvent, DatabaseMetadata, DataOperator, InstanceMetadata,
    InstanceOperator, MetadataOperator, ReplicationOperator, ReplicationSource, Row, RowCount,
    SchemaOperator, StreamParams, StreamResult,
};
use anchorsvc_core::catalog::{CapabilityFlags, Paradigm};
use anchorsvc_core::config::{ConnectionConfig, InstanceConfig, ReplicationConfig, TlsConfig};
use anchorsvc_core::connection::manager::ConnectionManager;
use anchorsvc_core::error::AnchorError;
use anchorsvc_core::model::{Table, UnifiedModel};
use anchorsvc_core::replication::ReplicationRegistry;
use anchorsvc_core::secrets::PlaintextSecretStore;

struct StubSchema;

#[async_trait]
impl SchemaOperator for StubSchema {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        Ok(UnifiedModel::new("stub-postgres-s2"))
    }
    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        Ok(vec![])
    }
    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        Ok(Table::new(name))
    }
    fn backend_name(&self) -> &str {
        "stub-postgres-s2"
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
        "stub-postgres-s2"
    }
}

struct StubMetadata;

#[async_trait]
impl MetadataOperator for StubMetadata {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
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

struct StubReplicationSource {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ReplicationSource for StubReplicationSource {
    async fn close(&self) -> Result<(), AnchorError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct StubReplication {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ReplicationOperator for StubReplication {
    fn is_supported(&self) -> bool {
        true
    }
    async fn connect(&self, _cfg: &ReplicationConfig) -> Result<Arc<dyn ReplicationSource>, AnchorError> {
        Ok(Arc::new(StubReplicationSource { closed: self.closed.clone() }))
    }
    fn parse_event(&self, _raw: &[u8]) -> Result<CdcEvent, AnchorError> {
        Err(AnchorError::unsupported("stub-postgres-s2", "parse_event", "not needed by this test"))
    }
    async fn apply_cdc_event(&self, _event: &CdcEvent) -> Result<(), AnchorError> {
        Ok(())
    }
    fn backend_name(&self) -> &str {
        "stub-postgres-s2"
    }
}

struct StubPostgresAdapter {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl adapters::Adapter for StubPostgresAdapter {
    fn backend_type(&self) -> String {
        "stub-postgres-s2".to_string()
    }
    fn capabilities(&self) -> CapabilityFlags {
        CapabilityFlags {
            paradigms: vec![Paradigm::Relational],
            supports_arbitrary_query: true,
            supports_schema_ddl: true,
            supports_cdc: true,
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
            metadata: Arc::new(StubMetadata),
            replication: Some(Arc::new(StubReplication { closed: self.closed.clone() })),
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
        database_vendor: "stub-postgres-s2".to_string(),
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
async fn replication_table_set_shares_and_closes_matching_seed_scenario_s2() {
    let closed = Arc::new(AtomicBool::new(false));
    adapters::register_adapter(StubPostgresAdapter { closed: closed.clone() }).await;

    let manager = ConnectionManager::new(Arc::new(PlaintextSecretStore));
    manager.connect(sample_config("db1")).await.unwrap();

    let replication = ReplicationRegistry::new();
    let tables = replication
        .connect_replication(
            &manager,
            ReplicationConfig {
                replication_id: "r1".to_string(),
                database_id: "db1".to_string(),
                connection_type: "postgres".to_string(),
                table_names: vec!["t1".to_string()],
            },
        )
        .await
        .unwrap();
    assert_eq!(tables, std::collections::BTreeSet::from(["t1".to_string()]));

    let tables = replication
        .connect_replication(
            &manager,
            ReplicationConfig {
                replication_id: "r1".to_string(),
                database_id: "db1".to_string(),
                connection_type: "postgres".to_string(),
                table_names: vec!["t2".to_string()],
            },
        )
        .await
        .unwrap();
    assert_eq!(tables, std::collections::BTreeSet::from(["t1".to_string(), "t2".to_string()]));
    assert!(!closed.load(Ordering::SeqCst));

    replication.disconnect_replication("db1", "r1", &["t1".to_string()]).await.unwrap();
    assert!(!closed.load(Ordering::SeqCst));
    let (_, remaining) = replication.get_by_replication_id("r1").await.unwrap();
    assert_eq!(remaining, std::collections::BTreeSet::from(["t2".to_string()]));

    replication.disconnect_replication("db1", "r1", &["t2".to_string()]).await.unwrap();
    assert!(closed.load(Ordering::SeqCst));
    assert!(replication.get_by_replication_id("r1").await.is_none());
}
