//! Denormalization: relational → document. Every table becomes a collection;
//! foreign keys become embedded sub-documents, references, or an array on
//! the "one" side, per the enrichment analyzer's embed decision.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::AnchorError;
use crate::model::types::convert;
use crate::model::{Collection, Field, Options};

use super::Strategy;
use crate::translator::enrichment::{is_fk_column, EmbedStrategy, EnrichmentContext};
use crate::translator::TranslationContext;

pub struct Denormalization;

impl Strategy for Denormalization {
    fn name(&self) -> &'static str {
        "denormalization"
    }

    fn convert(&self, ctx: &mut TranslationContext, enrichment: &EnrichmentContext) -> Result<(), AnchorError> {
        let source_backend = ctx.source_backend.clone();
        let target_backend = ctx.target_backend.clone();
        let tables = ctx.source_model.tables.clone();

        let mut collections: BTreeMap<String, Collection> = BTreeMap::new();
        for (name, table) in &tables {
            ctx.metrics.objects_processed += 1;
            if ctx.is_excluded(name) {
                ctx.warn_excluded(name.clone(), "excluded by request");
                ctx.metrics.objects_skipped += 1;
                continue;
            }
            let mut collection = Collection::new(name.clone());
            for (col_name, column) in &table.columns {
                if is_fk_column(col_name) {
                    continue;
                }
                let conversion = convert(&source_backend, &target_backend, &column.data_type);
                ctx.metrics.type_conversions += 1;
                let mut field = Field {
                    name: col_name.clone(),
                    field_type: conversion.target_type,
                    required: !column.nullable,
                    options: Options::new(),
                };
                if conversion.lossy {
                    ctx.metrics.lossy_conversions += 1;
                    field.mark_lossy(conversion.note.unwrap_or_default());
                    ctx.warn_data_loss(format!("{}.{}", name, col_name), "type conversion is lossy");
                }
                collection.fields.insert(col_name.clone(), field);
            }
            collections.insert(name.clone(), collection);
            ctx.metrics.objects_converted += 1;
        }

        for fk in &enrichment.foreign_keys {
            if ctx.is_excluded(&fk.table) || !collections.contains_key(&fk.table) {
                continue;
            }
            match enrichment.embed_decision(&fk.table, &fk.column) {
                EmbedStrategy::Embed => embed_target_into_source(&mut collections, fk),
                EmbedStrategy::Reference => add_reference_field(&mut collections, fk),
                EmbedStrategy::Array => add_array_field_on_target(&mut collections, fk),
            }
        }

        for (name, collection) in collections {
            ctx.target_model.collections.insert(name, collection);
        }
        Ok(())
    }
}

fn embed_target_into_source(collections: &mut BTreeMap<String, Collection>, fk: &crate::translator::enrichment::ForeignKeyDescriptor) {
    let nested: serde_json::Map<String, Value> = collections
        .get(&fk.target_table)
        .map(|target| {
            target
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.field_type.clone())))
                .collect()
        })
        .unwrap_or_default();
    if let Some(source) = collections.get_mut(&fk.table) {
        let mut options = Options::new();
        options.insert("nested_fields".to_string(), Value::Object(nested));
        source.fields.insert(
            fk.target_table.clone(),
            Field { name: fk.target_table.clone(), field_type: "object".to_string(), required: false, options },
        );
    }
}

fn add_reference_field(collections: &mut BTreeMap<String, Collection>, fk: &crate::translator::enrichment::ForeignKeyDescriptor) {
    if let Some(source) = collections.get_mut(&fk.table) {
        let mut options = Options::new();
        options.insert("reference_collection".to_string(), Value::String(fk.target_table.clone()));
        options.insert("reference_type".to_string(), Value::String("document_id".to_string()));
        let field_name = format!("{}_ref", fk.target_table);
        source
            .fields
            .insert(field_name.clone(), Field { name: field_name, field_type: "reference".to_string(), required: false, options });
    }
}

fn add_array_field_on_target(collections: &mut BTreeMap<String, Collection>, fk: &crate::translator::enrichment::ForeignKeyDescriptor) {
    if let Some(target) = collections.get_mut(&fk.target_table) {
        let mut options = Options::new();
        options.insert("array_element_type".to_string(), Value::String("reference".to_string()));
        let field_name = format!("{}_items", fk.table);
        target
            .fields
            .insert(field_name.clone(), Field { name: field_name, field_type: "array".to_string(), required: false, options });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, Constraint, ConstraintReference, ConstraintType, Table, UnifiedModel};
    use crate::translator::enrichment;
    use crate::translator::TranslationRequest;
    use std::collections::BTreeSet;

    fn schema_with_fk() -> UnifiedModel {
        let mut model = UnifiedModel::new("postgres");
        let mut users = Table::new("users");
        users.columns.insert(
            "id".into(),
            Column { name: "id".into(), data_type: "integer".into(), nullable: false, is_primary_key: true, auto_increment: true, options: Options::new() },
        );
        users.columns.insert(
            "email".into(),
            Column { name: "email".into(), data_type: "varchar".into(), nullable: false, is_primary_key: false, auto_increment: false, options: Options::new() },
        );
        model.tables.insert("users".into(), users);

        let mut orders = Table::new("orders");
        orders.columns.insert(
            "id".into(),
            Column { name: "id".into(), data_type: "integer".into(), nullable: false, is_primary_key: true, auto_increment: true, options: Options::new() },
        );
        orders.columns.insert(
            "user_id".into(),
            Column { name: "user_id".into(), data_type: "integer".into(), nullable: false, is_primary_key: false, auto_increment: false, options: Options::new() },
        );
        orders.constraints.push(Constraint {
            name: "fk_orders_user".into(),
            constraint_type: ConstraintType::ForeignKey,
            columns: vec!["user_id".into()],
            reference: Some(ConstraintReference { table: "users".into(), columns: vec!["id".into()], on_update: None, on_delete: None }),
            options: Options::new(),
        });
        model.tables.insert("orders".into(), orders);
        model
    }

    #[test]
    fn embeds_users_into_orders_when_read_heavy() {
        let model = schema_with_fk();
        let enrichment_input = crate::translator::enrichment::Enrichment {
            table_enrichments: vec![crate::translator::enrichment::TableEnrichment {
                table: "users".into(),
                category: None,
                access_pattern: Some(crate::translator::enrichment::AccessPattern::ReadHeavy),
            }],
            ..Default::default()
        };
        let enrichment_ctx = enrichment::analyze(&model, Some(&enrichment_input));

        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "mongodb".into(),
            source_model: model,
            enrichment: Some(enrichment_input),
            excluded_objects: BTreeSet::new(),
        };
        let mut ctx = TranslationContext::new(&req);
        Denormalization.convert(&mut ctx, &enrichment_ctx).unwrap();

        assert!(ctx.target_model.collections.contains_key("users"));
        assert!(ctx.target_model.collections.contains_key("orders"));
        let orders = &ctx.target_model.collections["orders"];
        let embedded = orders.fields.get("users").expect("users embedded sub-document");
        assert_eq!(embedded.field_type, "object");
        let nested = embedded.options.get("nested_fields").unwrap().as_object().unwrap();
        assert!(nested.contains_key("id"));
        assert!(nested.contains_key("email"));
    }
}
