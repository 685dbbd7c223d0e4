//! Aggregation: graph → relational and graph → document. Each node label
//! becomes a table (or collection); relationships become foreign-key
//! columns, or junction tables/embedded references when they carry
//! properties.

use crate::error::AnchorError;
use crate::model::{Collection, Column, Constraint, ConstraintReference, ConstraintType, Field, Options, Table};

use super::Strategy;
use crate::translator::enrichment::EnrichmentContext;
use crate::translator::TranslationContext;

pub struct AggregationRelational;

impl Strategy for AggregationRelational {
    fn name(&self) -> &'static str {
        "aggregation_relational"
    }

    fn convert(&self, ctx: &mut TranslationContext, _enrichment: &EnrichmentContext) -> Result<(), AnchorError> {
        let nodes = ctx.source_model.nodes.clone();
        let relationships = ctx.source_model.relationships.clone();

        for (label, node) in &nodes {
            ctx.metrics.objects_processed += 1;
            if ctx.is_excluded(label) {
                ctx.warn_excluded(label.clone(), "excluded by request");
                ctx.metrics.objects_skipped += 1;
                continue;
            }
            let mut table = Table::new(label.clone());
            table.columns.insert("id".to_string(), surrogate_id());
            for property in node.properties.values() {
                if property.name == "id" {
                    // Reserved for the surrogate key inserted above.
                    continue;
                }
                table.columns.insert(
                    property.name.clone(),
                    Column {
                        name: property.name.clone(),
                        data_type: property.property_type.clone(),
                        nullable: true,
                        is_primary_key: false,
                        auto_increment: false,
                        options: Options::new(),
                    },
                );
            }
            table.indexes = node.indexes.clone();
            ctx.target_model.tables.insert(label.clone(), table);
            ctx.metrics.objects_converted += 1;
        }

        for relationship in &relationships {
            ctx.metrics.objects_processed += 1;
            if relationship.properties.is_empty() {
                // One-to-many assumption: a plain FK column on the source table.
                if let Some(table) = ctx.target_model.tables.get_mut(&relationship.from_label) {
                    let fk_name = format!("{}_id", singular(&relationship.to_label));
                    table.columns.insert(fk_name.clone(), fk_column(&fk_name));
                    table.constraints.push(Constraint {
                        name: format!("fk_{}_{}", relationship.from_label, relationship.to_label),
                        constraint_type: ConstraintType::ForeignKey,
                        columns: vec![fk_name],
                        reference: Some(ConstraintReference {
                            table: relationship.to_label.clone(),
                            columns: vec!["id".to_string()],
                            on_update: None,
                            on_delete: None,
                        }),
                        options: Options::new(),
                    });
                }
                ctx.metrics.objects_converted += 1;
            } else {
                let junction_name = format!("{}_{}_{}", relationship.from_label, relationship.relationship_type, relationship.to_label);
                let mut junction = Table::new(junction_name.clone());
                let from_fk = format!("{}_id", singular(&relationship.from_label));
                let to_fk = format!("{}_id", singular(&relationship.to_label));
                junction.columns.insert(from_fk.clone(), fk_column(&from_fk));
                junction.columns.insert(to_fk.clone(), fk_column(&to_fk));
                for (key, value) in &relationship.properties {
                    junction.columns.insert(
                        key.clone(),
                        Column {
                            name: key.clone(),
                            data_type: json_value_type(value),
                            nullable: true,
                            is_primary_key: false,
                            auto_increment: false,
                            options: Options::new(),
                        },
                    );
                }
                junction.constraints.push(fk_constraint(&junction_name, &from_fk, &relationship.from_label));
                junction.constraints.push(fk_constraint(&junction_name, &to_fk, &relationship.to_label));
                ctx.target_model.tables.insert(junction_name, junction);
                ctx.metrics.objects_converted += 1;
            }
        }
        Ok(())
    }
}

pub struct AggregationDocument;

impl Strategy for AggregationDocument {
    fn name(&self) -> &'static str {
        "aggregation_document"
    }

    fn convert(&self, ctx: &mut TranslationContext, _enrichment: &EnrichmentContext) -> Result<(), AnchorError> {
        let nodes = ctx.source_model.nodes.clone();
        let relationships = ctx.source_model.relationships.clone();

        for (label, node) in &nodes {
            ctx.metrics.objects_processed += 1;
            if ctx.is_excluded(label) {
                ctx.warn_excluded(label.clone(), "excluded by request");
                ctx.metrics.objects_skipped += 1;
                continue;
            }
            let mut collection = Collection::new(label.clone());
            for property in node.properties.values() {
                collection.fields.insert(
                    property.name.clone(),
                    Field { name: property.name.clone(), field_type: property.property_type.clone(), required: false, options: Options::new() },
                );
            }
            ctx.target_model.collections.insert(label.clone(), collection);
            ctx.metrics.objects_converted += 1;
        }

        for relationship in &relationships {
            ctx.metrics.objects_processed += 1;
            if let Some(collection) = ctx.target_model.collections.get_mut(&relationship.from_label) {
                let mut options = Options::new();
                options.insert("reference_collection".to_string(), serde_json::Value::String(relationship.to_label.clone()));
                options.insert("reference_type".to_string(), serde_json::Value::String("document_id".to_string()));
                let field_name = format!("{}_ref", relationship.to_label);
                collection
                    .fields
                    .insert(field_name.clone(), Field { name: field_name, field_type: "reference".to_string(), required: false, options });
            }
            ctx.metrics.objects_converted += 1;
        }
        Ok(())
    }
}

fn singular(name: &str) -> String {
    name.strip_suffix('s').unwrap_or(name).to_string()
}

fn surrogate_id() -> Column {
    Column { name: "id".to_string(), data_type: "integer".to_string(), nullable: false, is_primary_key: true, auto_increment: true, options: Options::new() }
}

fn fk_column(name: &str) -> Column {
    Column { name: name.to_string(), data_type: "integer".to_string(), nullable: false, is_primary_key: false, auto_increment: false, options: Options::new() }
}

fn fk_constraint(table: &str, column: &str, target: &str) -> Constraint {
    Constraint {
        name: format!("fk_{}_{}", table, target),
        constraint_type: ConstraintType::ForeignKey,
        columns: vec![column.to_string()],
        reference: Some(ConstraintReference { table: target.to_string(), columns: vec!["id".to_string()], on_update: None, on_delete: None }),
        options: Options::new(),
    }
}

fn json_value_type(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(_) => "text".to_string(),
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "bigint".to_string(),
        serde_json::Value::Number(_) => "double precision".to_string(),
        serde_json::Value::Bool(_) => "boolean".to_string(),
        _ => "jsonb".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, Property, Relationship, UnifiedModel};
    use crate::translator::TranslationRequest;
    use std::collections::BTreeSet;

    #[test]
    fn plain_relationship_becomes_a_foreign_key_column() {
        let mut model = UnifiedModel::new("neo4j");
        model.nodes.insert("users".into(), Node::new("users"));
        model.nodes.insert("orders".into(), Node::new("orders"));
        model.relationships.push(Relationship { from_label: "orders".into(), relationship_type: "PLACED_BY".into(), to_label: "users".into(), properties: Default::default() });

        let req = TranslationRequest { source_backend: "neo4j".into(), target_backend: "postgres".into(), source_model: model, enrichment: None, excluded_objects: BTreeSet::new() };
        let mut ctx = TranslationContext::new(&req);
        AggregationRelational.convert(&mut ctx, &EnrichmentContext::default()).unwrap();

        assert!(ctx.target_model.tables["orders"].columns.contains_key("user_id"));
        assert!(!ctx.target_model.tables.contains_key("orders_PLACED_BY_users"));
    }

    #[test]
    fn relationship_with_properties_becomes_a_junction_table() {
        let mut model = UnifiedModel::new("neo4j");
        model.nodes.insert("users".into(), Node::new("users"));
        model.nodes.insert("products".into(), Node::new("products"));
        let mut properties = Options::new();
        properties.insert("quantity".into(), serde_json::json!(3));
        model.relationships.push(Relationship { from_label: "users".into(), relationship_type: "PURCHASED".into(), to_label: "products".into(), properties });

        let req = TranslationRequest { source_backend: "neo4j".into(), target_backend: "postgres".into(), source_model: model, enrichment: None, excluded_objects: BTreeSet::new() };
        let mut ctx = TranslationContext::new(&req);
        AggregationRelational.convert(&mut ctx, &EnrichmentContext::default()).unwrap();

        assert!(ctx.target_model.tables.contains_key("users_PURCHASED_products"));
    }

    #[test]
    fn aggregation_document_turns_nodes_into_collections() {
        let mut model = UnifiedModel::new("neo4j");
        let mut user = Node::new("users");
        user.properties.insert("email".into(), Property { name: "email".into(), property_type: "string".into(), options: Options::new() });
        model.nodes.insert("users".into(), user);

        let req = TranslationRequest { source_backend: "neo4j".into(), target_backend: "mongodb".into(), source_model: model, enrichment: None, excluded_objects: BTreeSet::new() };
        let mut ctx = TranslationContext::new(&req);
        AggregationDocument.convert(&mut ctx, &EnrichmentContext::default()).unwrap();

        assert!(ctx.target_model.collections["users"].fields.contains_key("email"));
    }
}
