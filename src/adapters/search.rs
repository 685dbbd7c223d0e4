//! Elasticsearch adapter — search paradigm, via its REST API.

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
use crate::model::{Collection, Field, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "elasticsearch";

fn base_url(cfg: &ConnectionConfig) -> String {
    let host = cfg.host.as_deref().unwrap_or("localhost");
    let port = cfg.port.unwrap_or(9200);
    let scheme = if cfg.tls.ssl { "https" } else { "http" };
    format!("{}://{}:{}", scheme, host, port)
}

async fn basic_auth(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<Option<(String, String)>, AnchorError> {
    match (&cfg.username, &cfg.password) {
        (Some(user), Some(ciphertext)) => {
            let password = secrets.decrypt(&cfg.tenant_id, ciphertext).await?;
            Ok(Some((user.clone(), password)))
        }
        _ => Ok(None),
    }
}

fn apply_auth(builder: reqwest::RequestBuilder, auth: &Option<(String, String)>) -> reqwest::RequestBuilder {
    match auth {
        Some((user, pass)) => builder.basic_auth(user, Some(pass)),
        None => builder,
    }
}

pub struct ElasticsearchAdapter;

#[async_trait]
impl Adapter for ElasticsearchAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("elasticsearch is in the catalog").capabilities
    }

    async fn connect(&self, cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<AdapterFacets, AnchorError> {
        let http = Client::new();
        let auth = basic_auth(cfg, secrets).await?;
        let url = base_url(cfg);
        let resp = apply_auth(http.get(&url), &auth).send().await.map_err(|e| AnchorError::ConnectError {
            host: cfg.host.clone().unwrap_or_default(),
            port: cfg.port.unwrap_or(9200),
            cause: e.to_string(),
        })?;
        if !resp.status().is_success() {
            return Err(AnchorError::ConnectError {
                host: cfg.host.clone().unwrap_or_default(),
                port: cfg.port.unwrap_or(9200),
                cause: format!("probe returned {}", resp.status()),
            });
        }
        let conn = Arc::new(EsConnection { http, url, auth });
        Ok(AdapterFacets { schema: conn.clone(), data: conn.clone(), metadata: conn.clone(), replication: None })
    }

    async fn connect_instance(&self, cfg: &InstanceConfig, secrets: &dyn SecretStore) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
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
        let auth = basic_auth(&conn_cfg, secrets).await?;
        let url = base_url(&conn_cfg);
        Ok(Arc::new(EsInstance { http, url, auth }))
    }
}

struct EsConnection {
    http: Client,
    url: String,
    auth: Option<(String, String)>,
}

impl EsConnection {
    fn req(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        apply_auth(self.http.request(method, format!("{}{}", self.url, path)), &self.auth)
    }
}

#[async_trait]
impl SchemaOperator for EsConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for name in self.list_tables().await? {
            let resp = self.req(reqwest::Method::GET, &format!("/{}/_mapping", name)).send().await.map_err(|e| AnchorError::backend(BACKEND, "discover_schema", e))?;
            let body: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "discover_schema.json", e))?;
            let mut collection = Collection::new(name.clone());
            if let Some(properties) = body[&name]["mappings"]["properties"].as_object() {
                for (field_name, def) in properties {
                    let field_type = def["type"].as_str().unwrap_or("object").to_string();
                    collection.fields.insert(
                        field_name.clone(),
                        Field { name: field_name.clone(), field_type, required: false, options: Default::default() },
                    );
                }
            }
            model.collections.insert(name, collection);
        }
        Ok(model)
    }

    async fn create_structure(&self, model: &UnifiedModel) -> Result<(), AnchorError> {
        for (name, collection) in &model.collections {
            let properties: serde_json::Map<String, Value> = collection
                .fields
                .values()
                .map(|f| (f.name.clone(), json!({ "type": es_type(&f.field_type) })))
                .collect();
            let body = json!({ "mappings": { "properties": properties } });
            self.req(reqwest::Method::PUT, &format!("/{}", name)).json(&body).send().await.map_err(|e| AnchorError::backend(BACKEND, "create_structure", e))?;
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        let resp = self.req(reqwest::Method::GET, "/_aliases").send().await.map_err(|e| AnchorError::backend(BACKEND, "list_tables", e))?;
        let body: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "list_tables.json", e))?;
        Ok(body.as_object().map(|m| m.keys().filter(|k| !k.starts_with('.')).cloned().collect()).unwrap_or_default())
    }

    async fn get_table_schema(&self, name: &str) -> Result<crate::model::Table, AnchorError> {
        let _ = name;
        Err(AnchorError::unsupported(BACKEND, "get_table_schema", "search indices expose document mappings, not relational columns"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

fn es_type(field_type: &str) -> &'static str {
    match field_type {
        "integer" | "bigint" => "long",
        "float" | "double" | "decimal" => "double",
        "boolean" => "boolean",
        "date" | "datetime" | "timestamp" => "date",
        _ => "text",
    }
}

#[async_trait]
impl DataOperator for EsConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let body = json!({ "size": limit, "query": { "match_all": {} } });
        let resp = self.req(reqwest::Method::POST, &format!("/{}/_search", table)).json(&body).send().await.map_err(|e| AnchorError::backend(BACKEND, "fetch", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "fetch.json", e))?;
        Ok(hits_to_rows(&parsed))
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        let mut inserted = 0u64;
        for row in rows {
            let id = row.get("id").map(|v| v.to_string());
            let path = match id {
                Some(id) => format!("/{}/_doc/{}", table, id.trim_matches('"')),
                None => format!("/{}/_doc", table),
            };
            self.req(reqwest::Method::POST, &path).json(&row).send().await.map_err(|e| AnchorError::backend(BACKEND, "insert", e))?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, rows: Vec<Row>, where_columns: &[String]) -> Result<u64, AnchorError> {
        let id_col = where_columns.first().map(String::as_str).unwrap_or("id");
        let mut affected = 0u64;
        for row in rows {
            let id = row.get(id_col).map(|v| v.to_string()).unwrap_or_default();
            let body = json!({ "doc": row });
            self.req(reqwest::Method::POST, &format!("/{}/_update/{}", table, id.trim_matches('"')))
                .json(&body)
                .send()
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "update", e))?;
            affected += 1;
        }
        Ok(affected)
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>, unique_columns: &[String]) -> Result<u64, AnchorError> {
        self.update(table, rows, unique_columns).await
    }

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError> {
        let id = conditions.get("id").map(|v| v.to_string()).ok_or_else(|| AnchorError::validation("conditions", "delete requires an 'id' condition"))?;
        self.req(reqwest::Method::DELETE, &format!("/{}/_doc/{}", table, id.trim_matches('"')))
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "delete", e))?;
        Ok(1)
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        let offset = super::common::decode_cursor(params.cursor.as_deref());
        let body = json!({ "size": params.batch_size, "from": offset, "query": { "match_all": {} } });
        let resp = self.req(reqwest::Method::POST, &format!("/{}/_search", params.table)).json(&body).send().await.map_err(|e| AnchorError::backend(BACKEND, "stream", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "stream.json", e))?;
        let rows = hits_to_rows(&parsed);
        let has_more = rows.len() as u32 == params.batch_size;
        let next_cursor = if has_more { Some(super::common::encode_cursor(offset + params.batch_size as u64)) } else { None };
        Ok(StreamResult { rows, has_more, next_cursor })
    }

    async fn execute_query(&self, query: &str, _args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        let body: Value = serde_json::from_str(query).map_err(|e| AnchorError::validation("query", format!("not a valid Elasticsearch query body: {}", e)))?;
        let resp = self.req(reqwest::Method::POST, "/_search").json(&body).send().await.map_err(|e| AnchorError::backend(BACKEND, "execute_query", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "execute_query.json", e))?;
        Ok(hits_to_rows(&parsed))
    }

    async fn execute_count_query(&self, query: &str) -> Result<i64, AnchorError> {
        let body: Value = serde_json::from_str(query).map_err(|e| AnchorError::validation("query", format!("not a valid Elasticsearch query body: {}", e)))?;
        let resp = self.req(reqwest::Method::POST, "/_count").json(&body).send().await.map_err(|e| AnchorError::backend(BACKEND, "execute_count_query", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "execute_count_query.json", e))?;
        Ok(parsed["count"].as_i64().unwrap_or(0))
    }

    async fn get_row_count(&self, table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let resp = self.req(reqwest::Method::GET, &format!("/{}/_count", table)).send().await.map_err(|e| AnchorError::backend(BACKEND, "get_row_count", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "get_row_count.json", e))?;
        Ok(RowCount { count: parsed["count"].as_i64().unwrap_or(0), exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        for table in self.list_tables().await? {
            self.req(reqwest::Method::DELETE, &format!("/{}", table)).send().await.map_err(|e| AnchorError::backend(BACKEND, "wipe", e))?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

fn hits_to_rows(parsed: &Value) -> Vec<Row> {
    parsed["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .map(|hit| {
                    let mut row: Row = BTreeMap::new();
                    row.insert("id".to_string(), hit["_id"].clone());
                    if let Some(source) = hit["_source"].as_object() {
                        for (k, v) in source {
                            row.insert(k.clone(), v.clone());
                        }
                    }
                    row
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl MetadataOperator for EsConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let tables_count = self.list_tables().await?.len() as i64;
        Ok(DatabaseMetadata { version: String::new(), size_bytes: 0, tables_count, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let resp = self.req(reqwest::Method::GET, "/").send().await.map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let version = parsed["version"]["number"].as_str().unwrap_or_default().to_string();
        Ok(InstanceMetadata { version, uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }
}

struct EsInstance {
    http: Client,
    url: String,
    auth: Option<(String, String)>,
}

#[async_trait]
impl InstanceOperator for EsInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        Ok(vec!["default".to_string()])
    }

    async fn create_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "create_database", "elasticsearch has no database concept above an index"))
    }

    async fn drop_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "drop_database", "elasticsearch has no database concept above an index"))
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let resp = apply_auth(self.http.get(&self.url), &self.auth).send().await.map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let version = parsed["version"]["number"].as_str().unwrap_or_default().to_string();
        Ok(InstanceMetadata { version, uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        apply_auth(self.http.get(&self.url), &self.auth).send().await.map_err(|e| AnchorError::backend(BACKEND, "ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn es_type_maps_common_relational_types() {
        assert_eq!(es_type("integer"), "long");
        assert_eq!(es_type("varchar"), "text");
    }
}
