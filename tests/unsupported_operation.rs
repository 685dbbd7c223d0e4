//! S6: a time-series-shaped backend rejects `Insert` with
//! `UnsupportedOperation` verbatim and answers `ExecuteCountQuery` from the
//! length of its own result set.

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
        Ok(UnifiedModel::new("stub-timeseries-s6"))
    }
    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        Ok(vec!["cpu_usage".to_string()])
    }
    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        Ok(Table::new(name))
    }
    fn backend_name(&self) -> &str {
        "stub-timeseries-s6"
    }
}

/// No arbitrary write path; only `fetch`/`execute_count_query` make sense
/// for a metrics store that is appended to by its own ingestion pipeline.
struct StubTimeSeriesData;

#[async_trait]
impl DataOperator for StubTimeSeriesData {
    async fn fetch(&self, _table: &str, _limit: u32) -> Result<Vec<Row>, AnchorError> {
        Ok(vec![])
    }
    async fn insert(&self, _table: &str, _rows: Vec<Row>) -> Result<u64, AnchorError> {
        Err(AnchorError::unsupported("stub-timeseries-s6", "insert", "time-series backend is append-only via its own ingestion path"))
    }
    async fn update(&self, _table: &str, _rows: Vec<Row>, _where_columns: &[String]) -> Result<u64, AnchorError> {
        Err(AnchorError::unsupported("stub-timeseries-s6", "update", "time-series backend does not support mutation"))
    }
    async fn upsert(&self, _table: &str, _rows: Vec<Row>, _unique_columns: &[String]) -> Result<u64, AnchorError> {
        Err(AnchorError::unsupported("stub-timeseries-s6", "upsert", "time-series backend does not support mutation"))
    }
    async fn delete(&self, _table: &str, _conditions: anchorsvc_core::adapters::Conditions) -> Result<u64, AnchorError> {
        Err(AnchorError::unsupported("stub-timeseries-s6", "delete", "time-series backend does not support mutation"))
    }
    async fn stream(&self, _params: StreamParams) -> Result<StreamResult, AnchorError> {
        Ok(StreamResult { rows: vec![], has_more: false, next_cursor: None })
    }
    async fn execute_query(&self, _query: &str, _args: &[serde_json::Value]) -> Result<Vec<Row>, AnchorError> {
        Ok(vec![])
    }
    async fn execute_count_query(&self, query: &str) -> Result<i64, AnchorError> {
        let results = metric_series(query);
        Ok(results.len() as i64)
    }
    async fn get_row_count(&self, _table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        Ok(RowCount { count: metric_series("cpu_usage").len() as i64, exact: true })
    }
    async fn wipe(&self) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported("stub-timeseries-s6", "wipe", "time-series backend retains data per its own retention policy"))
    }
    fn backend_name(&self) -> &str {
        "stub-timeseries-s6"
    }
}

fn metric_series(_metric: &str) -> Vec<f64> {
    vec![1.0, 2.0, 3.0]
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
        Err(AnchorError::unsupported("stub-timeseries-s6", "drop_database", "retention-managed, not caller-droppable"))
    }
    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        Ok(InstanceMetadata::default())
    }
    async fn ping(&self) -> Result<(), AnchorError> {
        Ok(())
    }
}

struct StubTimeSeriesAdapter;

#[async_trait]
impl adapters::Adapter for StubTimeSeriesAdapter {
    fn backend_type(&self) -> String {
        "stub-timeseries-s6".to_string()
    }
    fn capabilities(&self) -> CapabilityFlags {
        CapabilityFlags {
            paradigms: vec![Paradigm::TimeSeries],
            supports_arbitrary_query: false,
            supports_schema_ddl: false,
            supports_cdc: false,
            supports_streams: true,
            default_port: Some(9090),
        }
    }
    async fn connect(
        &self,
        _cfg: &ConnectionConfig,
        _secrets: &dyn anchorsvc_core::secrets::SecretStore,
    ) -> Result<AdapterFacets, AnchorError> {
        Ok(AdapterFacets {
            schema: Arc::new(StubSchema),
            data: Arc::new(StubTimeSeriesData),
            metadata: Arc::new(StubMetadata),
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
        name: "metrics".to_string(),
        description: None,
        database_vendor: "stub-timeseries-s6".to_string(),
        connection_type: "prometheus".to_string(),
        host: Some("h".to_string()),
        port: Some(9090),
        username: None,
        password: None,
        database_name: "metrics".to_string(),
        enabled: true,
        tls: TlsConfig::default(),
        role: None,
        connected_to_node_id: None,
        owner_id: None,
    }
}

#[tokio::test]
async fn insert_on_timeseries_backend_surfaces_unsupported_operation_verbatim() {
    adapters::register_adapter(StubTimeSeriesAdapter).await;
    let manager = ConnectionManager::new(Arc::new(PlaintextSecretStore));
    manager.connect(sample_config("ts1")).await.unwrap();

    let connection = manager.get_connection("ts1").await.unwrap();
    let data = connection.data().unwrap();

    let err = data.insert("cpu_usage", vec![]).await.unwrap_err();
    match err {
        AnchorError::UnsupportedOperation { backend, op, .. } => {
            assert_eq!(backend, "stub-timeseries-s6");
            assert_eq!(op, "insert");
        }
        other => panic!("expected UnsupportedOperation, got {other:?}"),
    }

    let count = data.execute_count_query("cpu_usage").await.unwrap();
    assert_eq!(count, metric_series("cpu_usage").len() as i64);
}
