//! The unified model — the neutral schema IR every adapter's
//! `SchemaOperator::discover_schema` produces and `create_structure`
//! consumes.
//!
//! Constraint references and relationships form a cyclic graph over
//! tables/collections/nodes. Rather than back-pointers, every named
//! collection is an arena addressed by string name (`BTreeMap` also gives
//! deterministic ordered-by-name iteration over columns and fields);
//! references are resolved lazily by the callers that need them
//! (`validate`, the translator, the relationship mapper).

pub mod types;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::BackendId;
use crate::error::AnchorError;

pub type Options = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
    NotNull,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintReference {
    pub table: String,
    pub columns: Vec<String>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,
    pub columns: Vec<String>,
    pub reference: Option<ConstraintReference>,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub auto_increment: bool,
    #[serde(default)]
    pub options: Options,
}

impl Column {
    pub fn is_lossy_conversion(&self) -> bool {
        matches!(self.options.get("is_lossy_conversion"), Some(Value::Bool(true)))
    }

    pub fn mark_lossy(&mut self, note: impl Into<String>) {
        self.options
            .insert("is_lossy_conversion".to_string(), Value::Bool(true));
        self.options
            .insert("conversion_note".to_string(), Value::String(note.into()));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: BTreeMap<String, Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            columns: BTreeMap::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .values()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.constraint_type == ConstraintType::ForeignKey)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    #[serde(default)]
    pub options: Options,
}

impl Field {
    pub fn is_lossy_conversion(&self) -> bool {
        matches!(self.options.get("is_lossy_conversion"), Some(Value::Bool(true)))
    }

    pub fn mark_lossy(&mut self, note: impl Into<String>) {
        self.options
            .insert("is_lossy_conversion".to_string(), Value::Bool(true));
        self.options
            .insert("conversion_note".to_string(), Value::String(note.into()));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub fields: BTreeMap<String, Field>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Collection {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub label: String,
    pub properties: BTreeMap<String, Property>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Node {
    pub fn new(label: impl Into<String>) -> Self {
        Node {
            label: label.into(),
            properties: BTreeMap::new(),
            indexes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_label: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub to_label: String,
    #[serde(default)]
    pub properties: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDef {
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub definition: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDef {
    pub name: String,
    pub table: String,
    pub timing: String,
    pub event: String,
    pub definition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDef {
    pub name: String,
    pub start: i64,
    pub increment: i64,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub name: String,
    pub on: String,
    pub fields: Vec<String>,
    pub dimension: u32,
    pub metric: String,
}

/// Default embedding dimension, inherited from common embedding models.
/// Callers who know better override via enrichment.
pub const DEFAULT_VECTOR_DIMENSION: u32 = 768;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub name: String,
    pub source_field: String,
    pub dimension: u32,
    pub metric: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub metric_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// The neutral schema IR shared by every backend's schema facet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedModel {
    pub backend: BackendId,
    pub tables: BTreeMap<String, Table>,
    pub collections: BTreeMap<String, Collection>,
    pub nodes: BTreeMap<String, Node>,
    pub views: BTreeMap<String, ViewDef>,
    pub materialized_views: BTreeMap<String, ViewDef>,
    pub functions: BTreeMap<String, FunctionDef>,
    pub procedures: BTreeMap<String, FunctionDef>,
    pub triggers: BTreeMap<String, TriggerDef>,
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
    pub sequences: BTreeMap<String, SequenceDef>,
    pub types: BTreeMap<String, TypeDef>,
    pub relationships: Vec<Relationship>,
    pub vector_indexes: BTreeMap<String, VectorIndex>,
    pub embeddings: BTreeMap<String, Embedding>,
    pub time_series_points: BTreeMap<String, TimeSeriesPoint>,
}

impl UnifiedModel {
    pub fn new(backend: impl Into<String>) -> Self {
        UnifiedModel {
            backend: backend.into(),
            tables: BTreeMap::new(),
            collections: BTreeMap::new(),
            nodes: BTreeMap::new(),
            views: BTreeMap::new(),
            materialized_views: BTreeMap::new(),
            functions: BTreeMap::new(),
            procedures: BTreeMap::new(),
            triggers: BTreeMap::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
            sequences: BTreeMap::new(),
            types: BTreeMap::new(),
            relationships: Vec::new(),
            vector_indexes: BTreeMap::new(),
            embeddings: BTreeMap::new(),
            time_series_points: BTreeMap::new(),
        }
    }

    /// Validates that every constraint reference resolves within this model.
    pub fn validate(&self) -> Result<(), AnchorError> {
        for table in self.tables.values() {
            for constraint in &table.constraints {
                if let Some(reference) = &constraint.reference {
                    let target = self.tables.get(&reference.table).ok_or_else(|| {
                        AnchorError::validation(
                            "constraint.reference.table",
                            format!(
                                "table {:?} references unknown table {:?}",
                                table.name, reference.table
                            ),
                        )
                    })?;
                    for column in &reference.columns {
                        if !target.columns.contains_key(column) {
                            return Err(AnchorError::validation(
                                "constraint.reference.columns",
                                format!(
                                    "table {:?} references unknown column {:?} on {:?}",
                                    table.name, column, reference.table
                                ),
                            ));
                        }
                    }
                }
            }
        }
        for relationship in &self.relationships {
            if !self.nodes.contains_key(&relationship.from_label)
                && !self.tables.contains_key(&relationship.from_label)
                && !self.collections.contains_key(&relationship.from_label)
            {
                return Err(AnchorError::validation(
                    "relationship.from_label",
                    format!("unknown source object {:?}", relationship.from_label),
                ));
            }
        }
        Ok(())
    }

    pub fn object_count(&self) -> usize {
        self.tables.len()
            + self.collections.len()
            + self.nodes.len()
            + self.views.len()
            + self.materialized_views.len()
            + self.functions.len()
            + self.procedures.len()
            + self.sequences.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_resolving_foreign_key() {
        let mut model = UnifiedModel::new("postgres");
        let mut users = Table::new("users");
        users.columns.insert(
            "id".into(),
            Column {
                name: "id".into(),
                data_type: "integer".into(),
                nullable: false,
                is_primary_key: true,
                auto_increment: true,
                options: Options::new(),
            },
        );
        model.tables.insert("users".into(), users);

        let mut orders = Table::new("orders");
        orders.columns.insert(
            "user_id".into(),
            Column {
                name: "user_id".into(),
                data_type: "integer".into(),
                nullable: false,
                is_primary_key: false,
                auto_increment: false,
                options: Options::new(),
            },
        );
        orders.constraints.push(Constraint {
            name: "fk_orders_user".into(),
            constraint_type: ConstraintType::ForeignKey,
            columns: vec!["user_id".into()],
            reference: Some(ConstraintReference {
                table: "users".into(),
                columns: vec!["id".into()],
                on_update: None,
                on_delete: None,
            }),
            options: Options::new(),
        });
        model.tables.insert("orders".into(), orders);

        assert!(model.validate().is_ok());
    }

    #[test]
    fn validate_rejects_dangling_foreign_key() {
        let mut model = UnifiedModel::new("postgres");
        let mut orders = Table::new("orders");
        orders.constraints.push(Constraint {
            name: "fk_orders_user".into(),
            constraint_type: ConstraintType::ForeignKey,
            columns: vec!["user_id".into()],
            reference: Some(ConstraintReference {
                table: "users".into(),
                columns: vec!["id".into()],
                on_update: None,
                on_delete: None,
            }),
            options: Options::new(),
        });
        model.tables.insert("orders".into(), orders);

        assert!(model.validate().is_err());
    }
}
