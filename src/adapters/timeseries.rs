//! Prometheus-compatible adapter — time-series paradigm, via the HTTP query
//! API. Prometheus is fed by scraping, not row inserts, so the write half of
//! `DataOperator` returns `UnsupportedOperation`; only `fetch`/`stream`
//! (via instant/range queries) and metadata are real.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::adapters::{
    Adapter, AdapterFacets, Conditions, DataOperator, DatabaseMetadata, InstanceMetadata,
    InstanceOperator, MetadataOperator, Row, RowCount, SchemaOperator, StreamParams, StreamResult,
};
use crate::catalog::{self, BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig};
use crate::error::AnchorError;
use crate::model::{Column, Options, Table, TimeSeriesPoint, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "prometheus";

fn base_url(cfg: &ConnectionConfig) -> String {
    let host = cfg.host.as_deref().unwrap_or("localhost");
    let port = cfg.port.unwrap_or(9090);
    let scheme = if cfg.tls.ssl { "https" } else { "http" };
    format!("{}://{}:{}", scheme, host, port)
}

pub struct PrometheusAdapter;

#[async_trait]
impl Adapter for PrometheusAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("prometheus is in the catalog").capabilities
    }

    async fn connect(&self, cfg: &ConnectionConfig, _secrets: &dyn SecretStore) -> Result<AdapterFacets, AnchorError> {
        let http = Client::new();
        let url = base_url(cfg);
        let resp = http
            .get(format!("{}/-/healthy", url))
            .send()
            .await
            .map_err(|e| AnchorError::ConnectError { host: cfg.host.clone().unwrap_or_default(), port: cfg.port.unwrap_or(9090), cause: e.to_string() })?;
        if !resp.status().is_success() {
            return Err(AnchorError::ConnectError { host: cfg.host.clone().unwrap_or_default(), port: cfg.port.unwrap_or(9090), cause: format!("probe returned {}", resp.status()) });
        }
        let conn = Arc::new(PromConnection { http, url });
        Ok(AdapterFacets { schema: conn.clone(), data: conn.clone(), metadata: conn.clone(), replication: None })
    }

    async fn connect_instance(&self, cfg: &InstanceConfig, _secrets: &dyn SecretStore) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
        let http = Client::new();
        let host = cfg.host.as_deref().unwrap_or("localhost");
        let port = cfg.port.unwrap_or(9090);
        let scheme = if cfg.tls.ssl { "https" } else { "http" };
        let url = format!("{}://{}:{}", scheme, host, port);
        Ok(Arc::new(PromInstance { http, url }))
    }
}

struct PromConnection {
    http: Client,
    url: String,
}

#[async_trait]
impl SchemaOperator for PromConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for metric in self.list_tables().await? {
            model.time_series_points.insert(
                metric.clone(),
                TimeSeriesPoint { metric_name: metric.clone(), labels: BTreeMap::new() },
            );
            let sample = self.fetch(&metric, 1).await.unwrap_or_default();
            let labels = sample.first().into_iter().flat_map(|row| row.keys().cloned());
            model.tables.insert(metric.clone(), metric_table(&metric, labels));
        }
        Ok(model)
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        let resp = self
            .http
            .get(format!("{}/api/v1/label/__name__/values", self.url))
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "list_tables", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "list_tables.json", e))?;
        Ok(parsed["data"].as_array().map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect()).unwrap_or_default())
    }

    async fn get_table_schema(&self, name: &str) -> Result<crate::model::Table, AnchorError> {
        let _ = name;
        Err(AnchorError::unsupported(BACKEND, "get_table_schema", "a metric has labels, not relational columns"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl DataOperator for PromConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        let resp = self
            .http
            .get(format!("{}/api/v1/query", self.url))
            .query(&[("query", table)])
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "fetch", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "fetch.json", e))?;
        Ok(vector_to_rows(&parsed).into_iter().take(limit as usize).collect())
    }

    async fn insert(&self, _table: &str, _rows: Vec<Row>) -> Result<u64, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "insert", "prometheus is fed by scraping, not row inserts"))
    }

    async fn update(&self, _table: &str, _rows: Vec<Row>, _where_columns: &[String]) -> Result<u64, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "update", "prometheus samples are immutable once scraped"))
    }

    async fn upsert(&self, _table: &str, _rows: Vec<Row>, _unique_columns: &[String]) -> Result<u64, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "upsert", "prometheus samples are immutable once scraped"))
    }

    async fn delete(&self, _table: &str, _conditions: Conditions) -> Result<u64, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "delete", "prometheus has no per-sample delete API; use retention policy or the admin tombstone API out-of-band"))
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        let offset = super::common::decode_cursor(params.cursor.as_deref());
        let end = chrono_now_unix() - offset as i64;
        let start = end - (params.batch_size as i64 * 60);
        let resp = self
            .http
            .get(format!("{}/api/v1/query_range", self.url))
            .query(&[
                ("query", params.table.as_str()),
                ("start", &start.to_string()),
                ("end", &end.to_string()),
                ("step", "60"),
            ])
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "stream", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "stream.json", e))?;
        let rows = matrix_to_rows(&parsed);
        let has_more = !rows.is_empty();
        let next_cursor = if has_more {
            Some(super::common::encode_cursor(offset + params.batch_size as u64 * 60))
        } else {
            None
        };
        Ok(StreamResult { rows, has_more, next_cursor })
    }

    async fn execute_query(&self, query: &str, _args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        let resp = self
            .http
            .get(format!("{}/api/v1/query", self.url))
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "execute_query", e))?;
        let parsed: Value = resp.json().await.map_err(|e| AnchorError::backend(BACKEND, "execute_query.json", e))?;
        Ok(vector_to_rows(&parsed))
    }

    async fn execute_count_query(&self, query: &str) -> Result<i64, AnchorError> {
        Ok(self.execute_query(query, &[]).await?.len() as i64)
    }

    async fn get_row_count(&self, table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let count = self.fetch(table, u32::MAX).await?.len() as i64;
        Ok(RowCount { count, exact: false })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "wipe", "deleting scraped series requires the admin tombstone API, out of scope here"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

fn metric_table(metric: &str, labels: impl Iterator<Item = String>) -> Table {
    let mut table = Table::new(metric.to_string());
    table.columns.insert(
        "timestamp".to_string(),
        Column { name: "timestamp".to_string(), data_type: "timestamp".to_string(), nullable: false, is_primary_key: false, auto_increment: false, options: Options::new() },
    );
    table.columns.insert(
        "value".to_string(),
        Column { name: "value".to_string(), data_type: "double precision".to_string(), nullable: true, is_primary_key: false, auto_increment: false, options: Options::new() },
    );
    for label in labels {
        if label == "timestamp" || label == "value" || label == "__name__" {
            continue;
        }
        table.columns.insert(
            label.clone(),
            Column { name: label, data_type: "string".to_string(), nullable: true, is_primary_key: false, auto_increment: false, options: Options::new() },
        );
    }
    table
}

fn chrono_now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn vector_to_rows(parsed: &Value) -> Vec<Row> {
    parsed["data"]["result"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .map(|r| {
                    let mut row: Row = BTreeMap::new();
                    if let Some(metric) = r["metric"].as_object() {
                        for (k, v) in metric {
                            row.insert(k.clone(), v.clone());
                        }
                    }
                    if let Some(value_pair) = r["value"].as_array() {
                        row.insert("timestamp".to_string(), value_pair[0].clone());
                        row.insert("value".to_string(), value_pair.get(1).cloned().unwrap_or(Value::Null));
                    }
                    row
                })
                .collect()
        })
        .unwrap_or_default()
}

fn matrix_to_rows(parsed: &Value) -> Vec<Row> {
    let mut rows = Vec::new();
    if let Some(results) = parsed["data"]["result"].as_array() {
        for r in results {
            let metric = r["metric"].as_object().cloned().unwrap_or_default();
            if let Some(values) = r["values"].as_array() {
                for pair in values {
                    let mut row: Row = BTreeMap::new();
                    for (k, v) in &metric {
                        row.insert(k.clone(), v.clone());
                    }
                    if let Some(value_pair) = pair.as_array() {
                        row.insert("timestamp".to_string(), value_pair[0].clone());
                        row.insert("value".to_string(), value_pair.get(1).cloned().unwrap_or(Value::Null));
                    }
                    rows.push(row);
                }
            }
        }
    }
    rows
}

#[async_trait]
impl MetadataOperator for PromConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let tables_count = self.list_tables().await?.len() as i64;
        Ok(DatabaseMetadata { version: String::new(), size_bytes: 0, tables_count, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let resp = self.http.get(format!("{}/api/v1/status/buildinfo", self.url)).send().await.map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let version = parsed["data"]["version"].as_str().unwrap_or_default().to_string();
        Ok(InstanceMetadata { version, uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }
}

struct PromInstance {
    http: Client,
    url: String,
}

#[async_trait]
impl InstanceOperator for PromInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        Ok(vec!["default".to_string()])
    }

    async fn create_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "create_database", "prometheus has a single metric namespace per instance"))
    }

    async fn drop_database(&self, _name: &str) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "drop_database", "prometheus has a single metric namespace per instance"))
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let resp = self.http.get(format!("{}/api/v1/status/buildinfo", self.url)).send().await.map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let version = parsed["data"]["version"].as_str().unwrap_or_default().to_string();
        Ok(InstanceMetadata { version, uptime_seconds: 0, total_databases: 1, total_connections: 0, max_connections: 0, extra: Default::default() })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        self.http.get(format!("{}/-/healthy", self.url)).send().await.map_err(|e| AnchorError::backend(BACKEND, "ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_to_rows_handles_empty_result() {
        let parsed = serde_json::json!({ "data": { "result": [] } });
        assert!(vector_to_rows(&parsed).is_empty());
    }

    #[test]
    fn metric_table_has_timestamp_value_and_label_columns() {
        let table = metric_table("http_requests_total", vec!["method".to_string(), "__name__".to_string()].into_iter());
        assert!(table.columns["timestamp"].data_type == "timestamp");
        assert!(table.columns.contains_key("value"));
        assert!(table.columns.contains_key("method"));
        assert!(!table.columns.contains_key("__name__"));
    }
}
