//! Neo4j-compatible adapter — graph paradigm, via the HTTP transactional
//! Cypher endpoint rather than the binary Bolt protocol, keeping this
//! adapter on the same `reqwest` stack as the other HTTP-backed paradigms.

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
use crate::model::{Node, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "neo4j";

fn base_url(cfg: &ConnectionConfig) -> String {
    let host = cfg.host.as_deref().unwrap_or("localhost");
    let port = cfg.port.unwrap_or(7474);
    let scheme = if cfg.tls.ssl { "https" } else { "http" };
    format!("{}://{}:{}", scheme, host, port)
}

async fn basic_auth(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<Option<(String, String)>, AnchorError> {
    match (&cfg.username, &cfg.password) {
        (Some(user), Some(ciphertext)) => Ok(Some((user.clone(), secrets.decrypt(&cfg.tenant_id, ciphertext).await?))),
        _ => Ok(None),
    }
}

fn apply_auth(builder: reqwest::RequestBuilder, auth: &Option<(String, String)>) -> reqwest::RequestBuilder {
    match auth {
        Some((user, pass)) => builder.basic_auth(user, Some(pass)),
        None => builder,
    }
}

async fn run_cypher(http: &Client, url: &str, auth: &Option<(String, String)>, database: &str, statement: &str, parameters: Value) -> Result<Value, AnchorError> {
    let body = json!({ "statements": [{ "statement": statement, "parameters": parameters }] });
    let resp = apply_auth(http.post(format!("{}/db/{}/tx/commit", url, database)), auth)
        .json(&body)
        .send()
        .await
        .map_err(|e| AnchorError::backend(BACKEND, "run_cypher", e))?;
    let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "run_cypher.json", e))?;
    if let Some(errors) = parsed["errors"].as_array() {
        if !errors.is_empty() {
            return Err(AnchorError::backend(BACKEND, "run_cypher", errors[0]["message"].as_str().unwrap_or("cypher error")));
        }
    }
    Ok(parsed)
}

fn cypher_rows(parsed: &Value) -> Vec<Row> {
    let mut rows = Vec::new();
    if let Some(results) = parsed["results"].as_array() {
        for result in results {
            let columns: Vec<String> = result["columns"].as_array().map(|c| c.iter().filter_map(|v| v.as_str().map(String::from)).collect()).unwrap_or_default();
            if let Some(data) = result["data"].as_array() {
                for entry in data {
                    if let Some(row_values) = entry["row"].as_array() {
                        let mut row: Row = BTreeMap::new();
                        for (col, value) in columns.iter().zip(row_values) {
                            row.insert(col.clone(), value.clone());
                        }
                        rows.push(row);
                    }
                }
            }
        }
    }
    rows
}

pub struct Neo4jAdapter;

#[async_trait]
impl Adapter for Neo4jAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("neo4j is in the catalog").capabilities
    }

    async fn connect(&self, cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<AdapterFacets, AnchorError> {
        let http = Client::new();
        let auth = basic_auth(cfg, secrets).await?;
        let url = base_url(cfg);
        let database = if cfg.database_name.is_empty() { "neo4j".to_string() } else { cfg.database_name.clone() };
        run_cypher(&http, &url, &auth, &database, "RETURN 1", json!({}))
            .await
            .map_err(|e| AnchorError::ConnectError { host: cfg.host.clone().unwrap_or_default(), port: cfg.port.unwrap_or(7474), cause: e.to_string() })?;
        let conn = Arc::new(Neo4jConnection { http, url, auth, database });
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
            database_name: "system".to_string(),
            enabled: cfg.enabled,
            tls: cfg.tls.clone(),
            role: cfg.role.clone(),
            connected_to_node_id: cfg.connected_to_node_id.clone(),
            owner_id: cfg.owner_id.clone(),
        };
        let auth = basic_auth(&conn_cfg, secrets).await?;
        let url = base_url(&conn_cfg);
        Ok(Arc::new(Neo4jInstance { http, url, auth }))
    }
}

struct Neo4jConnection {
    http: Client,
    url: String,
    auth: Option<(String, String)>,
    database: String,
}

impl Neo4jConnection {
    async fn run(&self, statement: &str, parameters: Value) -> Result<Value, AnchorError> {
        run_cypher(&self.http, &self.url, &self.auth, &self.database, statement, parameters).await
    }
}

#[async_trait]
impl SchemaOperator for Neo4jConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for label in self.list_tables().await? {
            let parsed = self
                .run(
                    "MATCH (n) WHERE $label IN labels(n) RETURN keys(n) AS k LIMIT 1",
                    json!({ "label": label }),
                )
                .await?;
            let mut node = Node::new(label.clone());
            for row in cypher_rows(&parsed) {
                if let Some(Value::Array(keys)) = row.get("k") {
                    for key in keys {
                        if let Some(name) = key.as_str() {
                            node.properties.insert(
                                name.to_string(),
                                crate::model::Property { name: name.to_string(), property_type: "unknown".to_string(), options: Default::default() },
                            );
                        }
                    }
                }
            }
            model.nodes.insert(label, node);
        }
        Ok(model)
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        let parsed = self.run("CALL db.labels() YIELD label RETURN label", json!({})).await?;
        Ok(cypher_rows(&parsed).into_iter().filter_map(|r| r.get("label").and_then(|v| v.as_str().map(String::from))).collect())
    }

    async fn get_table_schema(&self, name: &str) -> Result<crate::model::Table, AnchorError> {
        let _ = name;
        Err(AnchorError::unsupported(BACKEND, "get_table_schema", "graph labels expose node properties, not relational columns"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl DataOperator for Neo4jConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let statement = format!("MATCH (n:{}) RETURN n LIMIT {}", table, limit);
        let parsed = self.run(&statement, json!({})).await?;
        Ok(node_rows(&parsed))
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        let mut inserted = 0u64;
        for row in rows {
            let statement = format!("CREATE (n:{} $props)", table);
            self.run(&statement, json!({ "props": row })).await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, rows: Vec<Row>, where_columns: &[String]) -> Result<u64, AnchorError> {
        let id_col = where_columns.first().map(String::as_str).unwrap_or("id");
        let mut affected = 0u64;
        for row in rows {
            let id = row.get(id_col).cloned().unwrap_or(Value::Null);
            let statement = format!("MATCH (n:{} {{{}: $id}}) SET n += $props", table, id_col);
            self.run(&statement, json!({ "id": id, "props": row })).await?;
            affected += 1;
        }
        Ok(affected)
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>, unique_columns: &[String]) -> Result<u64, AnchorError> {
        let id_col = unique_columns.first().map(String::as_str).unwrap_or("id");
        let mut affected = 0u64;
        for row in rows {
            let id = row.get(id_col).cloned().unwrap_or(Value::Null);
            let statement = format!("MERGE (n:{} {{{}: $id}}) SET n += $props", table, id_col);
            self.run(&statement, json!({ "id": id, "props": row })).await?;
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError> {
        let predicates: Vec<String> = conditions.keys().map(|k| format!("n.{} = ${}", k, k)).collect();
        if predicates.is_empty() {
            return Err(AnchorError::validation("conditions", "delete requires at least one condition"));
        }
        let statement = format!("MATCH (n:{}) WHERE {} DETACH DELETE n", table, predicates.join(" AND "));
        self.run(&statement, Value::Object(conditions.into_iter().collect())).await?;
        Ok(1)
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        let offset = super::common::decode_cursor(params.cursor.as_deref());
        let statement = format!("MATCH (n:{}) RETURN n SKIP {} LIMIT {}", params.table, offset, params.batch_size);
        let parsed = self.run(&statement, json!({})).await?;
        let rows = node_rows(&parsed);
        let has_more = rows.len() as u32 == params.batch_size;
        let next_cursor = if has_more { Some(super::common::encode_cursor(offset + params.batch_size as u64)) } else { None };
        Ok(StreamResult { rows, has_more, next_cursor })
    }

    async fn execute_query(&self, query: &str, _args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        let parsed = self.run(query, json!({})).await?;
        Ok(cypher_rows(&parsed))
    }

    async fn execute_count_query(&self, query: &str) -> Result<i64, AnchorError> {
        let rows = self.execute_query(query, &[]).await?;
        Ok(rows.first().and_then(|r| r.values().next()).and_then(|v| v.as_i64()).unwrap_or(0))
    }

    async fn get_row_count(&self, table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let statement = format!("MATCH (n:{}) RETURN count(n) AS c", table);
        let parsed = self.run(&statement, json!({})).await?;
        let count = cypher_rows(&parsed).first().and_then(|r| r.get("c")).and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(RowCount { count, exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        self.run("MATCH (n) DETACH DELETE n", json!({})).await?;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

fn node_rows(parsed: &Value) -> Vec<Row> {
    let mut rows = Vec::new();
    if let Some(results) = parsed["results"].as_array() {
        for result in results {
            if let Some(data) = result["data"].as_array() {
                for entry in data {
                    if let Some(values) = entry["row"].as_array() {
                        if let Some(Value::Object(props)) = values.first() {
                            rows.push(props.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
                        }
                    }
                }
            }
        }
    }
    rows
}

#[async_trait]
impl MetadataOperator for Neo4jConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let tables_count = self.list_tables().await?.len() as i64;
        Ok(DatabaseMetadata { version: String::new(), size_bytes: 0, tables_count, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let resp = apply_auth(self.http.get(format!("{}/", self.url)), &self.auth).send().await.map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let version = parsed["neo4j_version"].as_str().unwrap_or_default().to_string();
        Ok(InstanceMetadata { version, uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }
}

struct Neo4jInstance {
    http: Client,
    url: String,
    auth: Option<(String, String)>,
}

#[async_trait]
impl InstanceOperator for Neo4jInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        let parsed = run_cypher(&self.http, &self.url, &self.auth, "system", "SHOW DATABASES YIELD name RETURN name", json!({})).await?;
        Ok(cypher_rows(&parsed).into_iter().filter_map(|r| r.get("name").and_then(|v| v.as_str().map(String::from))).collect())
    }

    async fn create_database(&self, name: &str) -> Result<(), AnchorError> {
        let statement = format!("CREATE DATABASE {} IF NOT EXISTS", name);
        run_cypher(&self.http, &self.url, &self.auth, "system", &statement, json!({})).await?;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), AnchorError> {
        let statement = format!("DROP DATABASE {} IF EXISTS", name);
        run_cypher(&self.http, &self.url, &self.auth, "system", &statement, json!({})).await?;
        Ok(())
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let resp = apply_auth(self.http.get(format!("{}/", self.url)), &self.auth).send().await.map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let version = parsed["neo4j_version"].as_str().unwrap_or_default().to_string();
        Ok(InstanceMetadata { version, uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        apply_auth(self.http.get(format!("{}/", self.url)), &self.auth).send().await.map_err(|e| AnchorError::backend(BACKEND, "ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cypher_rows_zips_columns_and_values() {
        let parsed = json!({
            "results": [{ "columns": ["label"], "data": [{ "row": ["Person"] }] }]
        });
        let rows = cypher_rows(&parsed);
        assert_eq!(rows[0]["label"], json!("Person"));
    }
}
