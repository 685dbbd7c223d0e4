//! MongoDB adapter — document paradigm.
//!
//! `Table`/`fetch`/`insert` etc. map onto MongoDB's collections and BSON
//! documents; the uniform `Row` (`BTreeMap<String, serde_json::Value>`) is
//! bridged to `bson::Document` via `bson::to_document`/`Bson::into()`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Database};
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::adapters::{
    Adapter, AdapterFacets, CdcEvent, Conditions, DataOperator, DatabaseMetadata, InstanceMetadata,
    InstanceOperator, MetadataOperator, ReplicationOperator, ReplicationSource, Row, RowCount,
    SchemaOperator, StreamParams, StreamResult,
};
use crate::catalog::{self, BackendId, CapabilityFlags};
use crate::config::{ConnectionConfig, InstanceConfig, ReplicationConfig};
use crate::error::AnchorError;
use crate::model::{Collection as ModelCollection, Field, Table, UnifiedModel};
use crate::secrets::SecretStore;

const BACKEND: &str = "mongodb";

type ClientMap = Arc<RwLock<BTreeMap<String, Client>>>;
static CLIENTS: Lazy<ClientMap> = Lazy::new(|| Arc::new(RwLock::new(BTreeMap::new())));

fn client_key(cfg: &ConnectionConfig) -> String {
    format!("{}:{}:{}", cfg.host.as_deref().unwrap_or("localhost"), cfg.port.unwrap_or(27017), cfg.database_id)
}

async fn build_uri(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<String, AnchorError> {
    let host = cfg.host.as_deref().unwrap_or("localhost");
    let port = cfg.port.unwrap_or(27017);
    match (&cfg.username, &cfg.password) {
        (Some(user), Some(ciphertext)) => {
            let password = secrets.decrypt(&cfg.tenant_id, ciphertext).await?;
            Ok(format!(
                "mongodb://{}:{}@{}:{}/{}",
                urlencoding::encode(user),
                urlencoding::encode(&password),
                host,
                port,
                cfg.database_name,
            ))
        }
        _ => Ok(format!("mongodb://{}:{}/{}", host, port, cfg.database_name)),
    }
}

async fn get_client(cfg: &ConnectionConfig, secrets: &dyn SecretStore) -> Result<Client, AnchorError> {
    let key = client_key(cfg);
    {
        let clients = CLIENTS.read().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
    }
    let uri = build_uri(cfg, secrets).await?;
    let client = Client::with_uri_str(&uri)
        .await
        .map_err(|e| AnchorError::ConnectError {
            host: cfg.host.clone().unwrap_or_default(),
            port: cfg.port.unwrap_or(27017),
            cause: e.to_string(),
        })?;
    let mut clients = CLIENTS.write().await;
    clients.insert(key, client.clone());
    Ok(client)
}

fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::from(*b),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => Value::from(*i),
        Bson::Double(d) => serde_json::Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) => Value::from(s.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(dt.try_to_rfc3339_string().unwrap_or_default()),
        Bson::Array(arr) => Value::Array(arr.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect(),
        ),
        Bson::Binary(bin) => Value::String(super::common::encode_blob(&bin.bytes)),
        other => Value::String(other.to_string()),
    }
}

fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                Bson::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => match super::common::decode_blob_wire_format(s) {
            Some(bytes) => Bson::Binary(mongodb::bson::Binary {
                subtype: mongodb::bson::spec::BinarySubtype::Generic,
                bytes,
            }),
            None => Bson::String(s.clone()),
        },
        Value::Array(arr) => Bson::Array(arr.iter().map(json_to_bson).collect()),
        Value::Object(obj) => {
            let mut doc = Document::new();
            for (k, v) in obj {
                doc.insert(k.clone(), json_to_bson(v));
            }
            Bson::Document(doc)
        }
    }
}

fn doc_to_row(doc: &Document) -> Row {
    doc.iter().map(|(k, v)| (k.clone(), bson_to_json(v))).collect()
}

fn row_to_doc(row: &Row) -> Document {
    let mut doc = Document::new();
    for (k, v) in row {
        doc.insert(k.clone(), json_to_bson(v));
    }
    doc
}

fn conditions_to_filter(conditions: &Conditions) -> Document {
    let mut doc = Document::new();
    for (k, v) in conditions {
        doc.insert(k.clone(), json_to_bson(v));
    }
    doc
}

pub struct MongoAdapter;

#[async_trait]
impl Adapter for MongoAdapter {
    fn backend_type(&self) -> BackendId {
        BACKEND.to_string()
    }

    fn capabilities(&self) -> CapabilityFlags {
        catalog::lookup(BACKEND).expect("mongodb is in the catalog").capabilities
    }

    async fn connect(
        &self,
        cfg: &ConnectionConfig,
        secrets: &dyn SecretStore,
    ) -> Result<AdapterFacets, AnchorError> {
        let client = get_client(cfg, secrets).await?;
        let db = client.database(&cfg.database_name);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "connect.probe", e))?;

        let conn = Arc::new(MongoConnection { db });
        Ok(AdapterFacets {
            schema: conn.clone(),
            data: conn.clone(),
            metadata: conn.clone(),
            replication: Some(conn),
        })
    }

    async fn connect_instance(
        &self,
        cfg: &InstanceConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
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
            database_name: "admin".to_string(),
            enabled: cfg.enabled,
            tls: cfg.tls.clone(),
            role: cfg.role.clone(),
            connected_to_node_id: cfg.connected_to_node_id.clone(),
            owner_id: cfg.owner_id.clone(),
        };
        let client = get_client(&conn_cfg, secrets).await?;
        Ok(Arc::new(MongoInstance { client }))
    }
}

struct MongoConnection {
    db: Database,
}

#[async_trait]
impl SchemaOperator for MongoConnection {
    async fn discover_schema(&self) -> Result<UnifiedModel, AnchorError> {
        let mut model = UnifiedModel::new(BACKEND);
        for name in self.list_tables().await? {
            let collection = self.sample_collection(&name).await?;
            model.collections.insert(name, collection);
        }
        Ok(model)
    }

    async fn create_structure(&self, model: &UnifiedModel) -> Result<(), AnchorError> {
        for name in model.collections.keys() {
            self.db
                .create_collection(name)
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "create_structure", e))?;
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, AnchorError> {
        self.db
            .list_collection_names()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "list_tables", e))
    }

    async fn get_table_schema(&self, name: &str) -> Result<Table, AnchorError> {
        let collection = self.sample_collection(name).await?;
        let mut table = Table::new(name);
        for (field_name, field) in collection.fields {
            table.columns.insert(
                field_name.clone(),
                crate::model::Column {
                    name: field_name,
                    data_type: field.field_type,
                    nullable: !field.required,
                    is_primary_key: false,
                    auto_increment: false,
                    options: Default::default(),
                },
            );
        }
        Ok(table)
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

impl MongoConnection {
    async fn sample_collection(&self, name: &str) -> Result<ModelCollection, AnchorError> {
        let coll = self.db.collection::<Document>(name);
        let sample = coll
            .find_one(doc! {})
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "sample_collection", e))?;

        let mut collection = ModelCollection::new(name);
        if let Some(doc) = sample {
            for (field_name, value) in doc.iter() {
                if field_name == "_id" {
                    continue;
                }
                let field_type = match value {
                    Bson::String(_) => "string",
                    Bson::Int32(_) | Bson::Int64(_) => "long",
                    Bson::Double(_) => "double",
                    Bson::Boolean(_) => "bool",
                    Bson::DateTime(_) => "date",
                    Bson::Array(_) => "array",
                    Bson::Document(_) => "object",
                    _ => "string",
                };
                collection.fields.insert(
                    field_name.clone(),
                    Field {
                        name: field_name.clone(),
                        field_type: field_type.to_string(),
                        required: false,
                        options: Default::default(),
                    },
                );
            }
        }
        Ok(collection)
    }
}

#[async_trait]
impl DataOperator for MongoConnection {
    async fn fetch(&self, table: &str, limit: u32) -> Result<Vec<Row>, AnchorError> {
        use futures::stream::TryStreamExt;
        let coll = self.db.collection::<Document>(table);
        let mut cursor = coll
            .find(doc! {})
            .limit(limit as i64)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "fetch", e))?;
        let mut rows = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| AnchorError::backend(BACKEND, "fetch", e))? {
            rows.push(doc_to_row(&doc));
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64, AnchorError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let coll = self.db.collection::<Document>(table);
        let docs: Vec<Document> = rows.iter().map(row_to_doc).collect();
        let result = coll
            .insert_many(docs)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "insert", e))?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn update(&self, table: &str, rows: Vec<Row>, where_columns: &[String]) -> Result<u64, AnchorError> {
        let coll = self.db.collection::<Document>(table);
        let mut affected = 0u64;
        for row in rows {
            let mut filter = Document::new();
            for col in where_columns {
                if let Some(v) = row.get(col) {
                    filter.insert(col.clone(), json_to_bson(v));
                }
            }
            let set_doc: Document = row
                .iter()
                .filter(|(k, _)| !where_columns.contains(k))
                .map(|(k, v)| (k.clone(), json_to_bson(v)))
                .collect();
            let result = coll
                .update_many(filter, doc! { "$set": set_doc })
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "update", e))?;
            affected += result.modified_count;
        }
        Ok(affected)
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>, unique_columns: &[String]) -> Result<u64, AnchorError> {
        let coll = self.db.collection::<Document>(table);
        let mut affected = 0u64;
        for row in rows {
            let mut filter = Document::new();
            for col in unique_columns {
                if let Some(v) = row.get(col) {
                    filter.insert(col.clone(), json_to_bson(v));
                }
            }
            let doc = row_to_doc(&row);
            let result = coll
                .update_one(filter, doc! { "$set": doc })
                .upsert(true)
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "upsert", e))?;
            affected += result.modified_count + if result.upserted_id.is_some() { 1 } else { 0 };
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, conditions: Conditions) -> Result<u64, AnchorError> {
        if conditions.is_empty() {
            return Err(AnchorError::validation("conditions", "delete requires at least one condition"));
        }
        let coll = self.db.collection::<Document>(table);
        let filter = conditions_to_filter(&conditions);
        let result = coll
            .delete_many(filter)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "delete", e))?;
        Ok(result.deleted_count)
    }

    async fn stream(&self, params: StreamParams) -> Result<StreamResult, AnchorError> {
        use futures::stream::TryStreamExt;
        let offset = super::common::decode_cursor(params.cursor.as_deref());
        let coll = self.db.collection::<Document>(&params.table);
        let mut cursor = coll
            .find(doc! {})
            .skip(offset)
            .limit(params.batch_size as i64 + 1)
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "stream", e))?;
        let mut rows = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| AnchorError::backend(BACKEND, "stream", e))? {
            rows.push(doc_to_row(&doc));
        }
        let has_more = rows.len() as u32 > params.batch_size;
        rows.truncate(params.batch_size as usize);
        let next_cursor = if has_more {
            Some(super::common::encode_cursor(offset + params.batch_size as u64))
        } else {
            None
        };
        Ok(StreamResult { rows, has_more, next_cursor })
    }

    async fn execute_query(&self, _query: &str, _args: &[Value]) -> Result<Vec<Row>, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "execute_query", "use the aggregation-pipeline entry point instead of raw SQL text"))
    }

    async fn execute_count_query(&self, _query: &str) -> Result<i64, AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "execute_count_query", "mongodb has no SQL-text query surface"))
    }

    async fn get_row_count(&self, table: &str, _where_clause: Option<&str>) -> Result<RowCount, AnchorError> {
        let coll = self.db.collection::<Document>(table);
        let count = coll
            .count_documents(doc! {})
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "get_row_count", e))?;
        Ok(RowCount { count: count as i64, exact: true })
    }

    async fn wipe(&self) -> Result<(), AnchorError> {
        for name in self.list_tables().await? {
            self.db
                .collection::<Document>(&name)
                .delete_many(doc! {})
                .await
                .map_err(|e| AnchorError::backend(BACKEND, "wipe", e))?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

#[async_trait]
impl MetadataOperator for MongoConnection {
    async fn collect_database_metadata(&self) -> Result<DatabaseMetadata, AnchorError> {
        let stats = self
            .db
            .run_command(doc! { "dbStats": 1 })
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_database_metadata", e))?;
        let size_bytes = stats.get_f64("dataSize").unwrap_or(0.0) as i64;
        let tables_count = self.list_tables().await?.len() as i64;
        Ok(DatabaseMetadata { version: String::new(), size_bytes, tables_count, extra: Default::default() })
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let status = self
            .db
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let version = status.get_str("version").unwrap_or_default().to_string();
        Ok(InstanceMetadata {
            version,
            uptime_seconds: 0,
            total_databases: 0,
            total_connections: 0,
            max_connections: 0,
            extra: Default::default(),
        })
    }
}

#[async_trait]
impl ReplicationOperator for MongoConnection {
    fn is_supported(&self) -> bool {
        true
    }

    fn get_supported_mechanisms(&self) -> Vec<String> {
        vec!["change_stream".to_string()]
    }

    async fn connect(&self, cfg: &ReplicationConfig) -> Result<Arc<dyn ReplicationSource>, AnchorError> {
        Ok(Arc::new(MongoReplicationSource { replication_id: cfg.replication_id.clone() }))
    }

    fn parse_event(&self, raw: &[u8]) -> Result<CdcEvent, AnchorError> {
        let value: Value = serde_json::from_slice(raw).map_err(|e| AnchorError::backend(BACKEND, "parse_event", e))?;
        let table = value.get("ns").and_then(|v| v.get("coll")).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let operation = value.get("operationType").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let data = value
            .get("fullDocument")
            .and_then(|v| v.as_object())
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(CdcEvent { table, operation, data, before: None })
    }

    async fn apply_cdc_event(&self, _event: &CdcEvent) -> Result<(), AnchorError> {
        Err(AnchorError::unsupported(BACKEND, "apply_cdc_event", "this core observes CDC, it does not apply it"))
    }

    fn backend_name(&self) -> &str {
        BACKEND
    }
}

struct MongoReplicationSource {
    replication_id: String,
}

#[async_trait]
impl ReplicationSource for MongoReplicationSource {
    async fn close(&self) -> Result<(), AnchorError> {
        log::info!("closing mongodb change stream source {}", self.replication_id);
        Ok(())
    }
}

struct MongoInstance {
    client: Client,
}

#[async_trait]
impl InstanceOperator for MongoInstance {
    async fn list_databases(&self) -> Result<Vec<String>, AnchorError> {
        self.client
            .list_database_names()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "list_databases", e))
    }

    async fn create_database(&self, name: &str) -> Result<(), AnchorError> {
        self.client
            .database(name)
            .create_collection("_init")
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "create_database", e))
    }

    async fn drop_database(&self, name: &str) -> Result<(), AnchorError> {
        self.client
            .database(name)
            .drop()
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "drop_database", e))
    }

    async fn collect_instance_metadata(&self) -> Result<InstanceMetadata, AnchorError> {
        let status = self
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "collect_instance_metadata", e))?;
        let version = status.get_str("version").unwrap_or_default().to_string();
        Ok(InstanceMetadata {
            version,
            uptime_seconds: 0,
            total_databases: self.list_databases().await?.len() as i64,
            total_connections: 0,
            max_connections: 0,
            extra: Default::default(),
        })
    }

    async fn ping(&self) -> Result<(), AnchorError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AnchorError::backend(BACKEND, "ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bson_round_trips_through_json() {
        let value = Value::from("hello");
        let bson = json_to_bson(&value);
        assert_eq!(bson_to_json(&bson), value);
    }
}
