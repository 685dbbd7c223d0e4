//! Local/manual entry point. Wires the adapter registry, connection manager,
//! and replication registry together and logs a capability summary; embedding
//! applications should depend on the library crate directly instead of
//! shelling out to this binary.

use std::sync::Arc;

use anchorsvc_core::adapters::{
    columnar::ClickhouseAdapter, graph::Neo4jAdapter, lakehouse::LakehouseAdapter,
    mongodb_adapter::MongoAdapter, mysql::MysqlAdapter, postgres::PostgresAdapter,
    redis_kv::RedisAdapter, register_adapter, search::ElasticsearchAdapter, sqlite::SqliteAdapter,
    timeseries::PrometheusAdapter, vector::QdrantAdapter,
};
use anchorsvc_core::catalog;
use anchorsvc_core::connection::manager::ConnectionManager;
use anchorsvc_core::logger::{create_log_buffer, init_logger};
use anchorsvc_core::replication::ReplicationRegistry;
use anchorsvc_core::secrets::PlaintextSecretStore;

async fn register_builtin_adapters() {
    register_adapter(PostgresAdapter).await;
    register_adapter(MysqlAdapter).await;
    register_adapter(SqliteAdapter).await;
    register_adapter(MongoAdapter).await;
    register_adapter(RedisAdapter).await;
    register_adapter(Neo4jAdapter).await;
    register_adapter(QdrantAdapter).await;
    register_adapter(ElasticsearchAdapter).await;
    register_adapter(PrometheusAdapter).await;
    register_adapter(ClickhouseAdapter).await;
    register_adapter(LakehouseAdapter).await;
}

#[tokio::main]
async fn main() {
    let log_buffer = create_log_buffer(1000);
    init_logger(log_buffer, log::LevelFilter::Info);

    register_builtin_adapters().await;

    let registered = anchorsvc_core::adapters::list_registered().await;
    log::info!("adapter registry ready: {} backends", registered.len());
    for backend in &registered {
        match catalog::lookup(backend) {
            Some(entry) => log::info!(
                "  {} -> paradigms={:?} ddl={} cdc={}",
                backend,
                entry.capabilities.paradigms,
                entry.capabilities.supports_schema_ddl,
                entry.capabilities.supports_cdc
            ),
            None => log::warn!("  {} has no catalog entry", backend),
        }
    }

    let secrets: Arc<dyn anchorsvc_core::secrets::SecretStore> = Arc::new(PlaintextSecretStore);
    let manager = ConnectionManager::new(secrets);
    let replication = ReplicationRegistry::new();

    log::info!(
        "anchor service core initialized: {} connections, {} replication streams active",
        manager.list_connections().await.len(),
        replication.list_active().await.len(),
    );
}
