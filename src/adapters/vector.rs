//! Qdrant adapter — vector paradigm, via its REST API.
//!
//! Qdrant ships a gRPC interface too, but the REST surface covers
//! collections, points, and search without pulling in a second protocol
//! stack; `reqwest` is already the HTTP client this crate reaches for.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::adapters::{
    Adapter, AdapterFacets, Conditions, DataOperator, DatabaseMetadata, InstanceMetadata,
    InstanceOperator, MetadataOperator, Row, RowCount, SchemaOperator, StreamParams, StreamResult,
};
use crate::catalog::{self, BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig};
use crate::error::AnchorError;
use crate::model::{UnifiedModel, VectorIndex, DEFAULT_VECTOR_DIMENSION};
use crate::secrets::SecretStore;

const BACKEND: &str = "qdrant";

fn base_url(cfg: &ConnectionConfig) -> String {
    let host = cfg.host.as_deref().unwrap_or("localhost");
    let port = cfg.port.unwrap_or(6334);
    let scheme = if cfg.tls.ssl { "https" } else { "http" };
    format!("{}://{}:{}", scheme, host, port)
}

async fn api_key(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<Option<String>, AnchorError> {
    match &cfg.password {
        Some(ciphertext) => Ok(Some(secrets.decrypt(&cfg.tenant_id, ciphertext).await?)),
        None => Ok(None),
    }
}

fn apply_auth(builder: reqwest::RequestBuilder, key: &Option<String>) -> reqwest::RequestBuilder {
    match key {
        Some(k) => builder.header("api-key", k),
        None => builder,
    }
}

pub struct QdrantAdapter;

#[async_trait]
impl Adapter for QdrantAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("qdrant is in the catalog").capabilities
    }

    async fn connect(
        &self,
        cfg: &ConnectionConfig,
        secrets: &dyn SecretStore,
    ) -> Result<AdapterFacets, AnchorError> {
        let http = Client::new();
        let key = api_key(cfg, secrets).await?;
        let url = base_url(cfg);
        let resp = apply_auth(http.get(format!("{}/", url)), &key)
            .send()
            .await
            .map_err(|e| AnchorError::ConnectError {
                host: cfg.host.clone().unwrap_or_default(),
                port: cfg.port.unwrap_or(6334),
                cause: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(AnchorError::ConnectError {
                host: cfg.host.clone().unwrap_or_default(),
                port: cfg.port.unwrap_or(6334),
                cause: format!("probe returned {}", resp.status()),
            });
        }
        let conn = Arc::new(QdrantConnection { http, url, key });
        Ok(AdapterFacets { schema: conn.clone(), data: conn.clone(), metadata: conn.clone(), replication: None })
    }

    async fn connect_instance(
        &self,
        cfg: &InstanceConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
        let http = Client::new();
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
            database_name: String::new(),
            enabled: cfg.enabled,
            tls: cfg.tls.clone(),
            role: cfg.role.clone(),
            connected_to_node_id: cfg.connected_to_node_id.clone(),
            owner_id: cfg.owner_id.clone(),
        };
        let key = api_key(&conn_cfg, secrets).await?;
        let url = base_url(&conn_cfg);
        Ok(Arc::new(QdrantInstance { http, url, key }))
    }
}

struct QdrantConnection {
    http: Client,
    url: String,
    key: Option<String>,
}

impl QdrantConnection {
    fn req(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        apply_auth(self.http.request(method, format!("{}{}", self.url, path)), &self.key)
    }
}

#[async_trait]
impl SchemaOperator for QdrantConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for name in self.list_tables().await? {
            let resp = self
                .req(reqwest::Method::GET, &format!("/collections/{}", name))
                .send()
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "discover_schema", e))?;
            let body: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "discover_schema.json", e))?;
            let dimension = body["result"]["config"]["params"]["vectors"]["size"]
                .as_u64()
                .unwrap_or(DEFAULT_VECTOR_DIMENSION as u64) as u32;
            let metric = body["result"]["config"]["params"]["vectors"]["distance"]
                .as_str()
                .unwrap_or("Cosine")
                .to_string();
            model.vector_indexes.insert(
                name.clone(),
                VectorIndex { name: name.clone(), on: name, fields: vec!["vector".to_string()], dimension, metric },
            );
        }
        Ok(model)
    }

    async fn create_structure(&self, model: &UnifiedModel) -> Result<(), AnchorError> {
        for (name, index) in &model.vector_indexes {
            let body = json!({
                "vectors": { "size": index.dimension, "distance": index.metric },
            });
            self.req(reqwest::Method::PUT, &format!("/collections/{}", name))
                .json(&body)
                .send()
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "create_structure", e))?;
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        let resp = self
            .req(reqwest::Method::GET, "/collections")
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "list_tables", e))?;
        let body: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "list_tables.json", e))?;
        let names = body["result"]["collections"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|c| c["name"].as_str().map(String::from)).collect())
            .unwrap_or_default();
        Ok(names)
    }

    async fn get_table_schema(&self, name: &str) -> Result<crate::model::Table, AnchorError> {
        let _ = name;
        Err(AnchorError::unsupported(BACKEND, "get_table_schema", "vector collections expose vector_indexes, not tabular columns"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl DataOperator for QdrantConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let body = json!({ "limit": limit, "with_payload": true, "with_vector": true });
        let resp = self
            .req(reqwest::Method::POST, &format!("/collections/{}/points/scroll", table))
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "fetch", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "fetch.json", e))?;
        Ok(points_to_rows(&parsed))
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        let points: Vec<Value> = rows.iter().map(row_to_point).collect();
        let count = points.len() as u64;
        let body = json!({ "points": points });
        self.req(reqwest::Method::PUT, &format!("/collections/{}/points", table))
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "insert", e))?;
        Ok(count)
    }

    async fn update(&self, table: &str, rows: Vec<Row>, _where_columns: &[String]) -> Result<u64, AnchorError> {
        self.insert(table, rows).await
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>, _unique_columns: &[String]) -> Result<u64, AnchorError> {
        self.insert(table, rows).await
    }

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError> {
        let ids: Vec<Value> = conditions.get("id").cloned().into_iter().collect();
        let body = json!({ "points": ids });
        self.req(reqwest::Method::POST, &format!("/collections/{}/points/delete", table))
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "delete", e))?;
        Ok(ids.len() as u64)
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        let offset = super::common::decode_cursor(params.cursor.as_deref());
        let mut body = json!({ "limit": params.batch_size, "with_payload": true, "with_vector": true });
        if offset > 0 {
            body["offset"] = json!(offset);
        }
        let resp = self
            .req(reqwest::Method::POST, &format!("/collections/{}/points/scroll", params.table))
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "stream", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "stream.json", e))?;
        let rows = points_to_rows(&parsed);
        let has_more = parsed["result"]["next_page_offset"].is_number();
        let next_cursor = parsed["result"]["next_page_offset"]
            .as_u64()
            .map(super::common::encode_cursor);
        Ok(StreamResult { rows, has_more, next_cursor })
    }

    async fn execute_query(&self, _query: &str, _args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "execute_query", "vector search takes a query vector, not SQL text"))
    }

    async fn execute_count_query(&self, _query: &str) -> Result<i64, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "execute_count_query", "vector search takes a query vector, not SQL text"))
    }

    async fn get_row_count(&self, table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let resp = self
            .req(reqwest::Method::POST, &format!("/collections/{}/points/count", table))
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "get_row_count", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "get_row_count.json", e))?;
        let count = parsed["result"]["count"].as_i64().unwrap_or(0);
        Ok(RowCount { count, exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        for table in self.list_tables().await? {
            self.req(reqwest::Method::DELETE, &format!("/collections/{}", table))
                .send()
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "wipe", e))?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

fn row_to_point(row: &Row) -> Value {
    let id = row.get("id").cloned().unwrap_or(Value::Null);
    let vector = row.get("vector").cloned().unwrap_or(Value::Array(Vec::new()));
    let payload: serde_json::Map<String, Value> = row
        .iter()
        .filter(|(k, _)| k.as_str() != "id" && k.as_str() != "vector")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    json!({ "id": id, "vector": vector, "payload": payload })
}

fn points_to_rows(parsed: &Value) -> Vec<Row> {
    let points = parsed["result"]["points"]
        .as_array()
        .or_else(|| parsed["result"].as_array())
        .cloned()
        .unwrap_or_default();
    points
        .into_iter()
        .map(|point| {
            let mut row: Row = BTreeMap::new();
            row.insert("id".to_string(), point["id"].clone());
            row.insert("vector".to_string(), point["vector"].clone());
            if let Some(payload) = point["payload"].as_object() {
                for (k, v) in payload {
                    row.insert(k.clone(), v.clone());
                }
            }
            row
        })
        .collect()
}

#[async_trait]
impl MetadataOperator for QdrantConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let tables_count = self.list_tables().await?.len() as i64;
        Ok(DatabaseMetadata { version: String::new(), size_bytes: 0, tables_count, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let resp = self
            .req(reqwest::Method::GET, "/")
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let version = parsed["version"].as_str().unwrap_or_default().to_string();
        Ok(InstanceMetadata { version, uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }
}

struct QdrantInstance {
    http: Client,
    url: String,
    key: Option<String>,
}

#[async_trait]
impl InstanceOperator for QdrantInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        Ok(vec!["default".to_string()])
    }

    async fn create_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "create_database", "qdrant has a single logical database per instance; collections are the addressable unit"))
    }

    async fn drop_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "drop_database", "qdrant has a single logical database per instance; collections are the addressable unit"))
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let resp = apply_auth(self.http.get(format!("{}/", self.url)), &self.key)
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let version = parsed["version"].as_str().unwrap_or_default().to_string();
        Ok(InstanceMetadata { version, uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        apply_auth(self.http.get(format!("{}/", self.url)), &self.key)
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_to_point_separates_id_and_vector_from_payload() {
        let mut row: Row = BTreeMap::new();
        row.insert("id".to_string(), json!(1));
        row.insert("vector".to_string(), json!([0.1, 0.2]));
        row.insert("label".to_string(), json!("cat"));
        let point = row_to_point(&row);
        assert_eq!(point["id"], json!(1));
        assert_eq!(point["payload"]["label"], json!("cat"));
    }
}
