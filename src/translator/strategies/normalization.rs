//! Normalization: document → relational. Each collection becomes a base
//! table keyed by a synthesized surrogate id; nested objects become child
//! tables, arrays become join tables.
//!
//! Nested-object sub-fields and array element types are not captured by the
//! unified model's flat `Field` shape, so this strategy reads them from two
//! conventional option keys set by richer document-schema discovery:
//! `nested_fields` (an object mapping sub-field name to type string) on an
//! `object`-typed field, and `array_element_type` (a single type string,
//! default `"string"`) on an `array`-typed field.

use serde_json::Value;

use crate::error::AnchorError;
use crate::model::types::convert;
use crate::model::{Column, Constraint, ConstraintReference, ConstraintType, Field, Options, Table};

use super::Strategy;
use crate::translator::enrichment::EnrichmentContext;
use crate::translator::TranslationContext;

pub struct Normalization;

impl Strategy for Normalization {
    fn name(&self) -> &'static str {
        "normalization"
    }

    fn convert(&self, ctx: &mut TranslationContext, _enrichment: &EnrichmentContext) -> Result<(), AnchorError> {
        let source_backend = ctx.source_backend.clone();
        let target_backend = ctx.target_backend.clone();
        let collections = ctx.source_model.collections.clone();

        for (name, collection) in collections {
            ctx.metrics.objects_processed += 1;
            if ctx.is_excluded(&name) {
                ctx.warn_excluded(name.clone(), "excluded by request");
                ctx.metrics.objects_skipped += 1;
                continue;
            }

            let mut base_table = Table::new(name.clone());
            base_table.columns.insert("id".to_string(), surrogate_id_column("id"));
            let parent_fk_name = format!("{}_id", name);

            for (field_name, field) in &collection.fields {
                if field_name == "id" {
                    // "id" is reserved for the synthesized surrogate key above;
                    // a source field of that name would otherwise clobber it.
                    continue;
                }
                match field.field_type.as_str() {
                    "object" => {
                        let child_name = format!("{}_{}", name, field_name);
                        let mut child_table = Table::new(child_name.clone());
                        child_table.columns.insert("id".to_string(), surrogate_id_column("id"));
                        child_table
                            .columns
                            .insert(parent_fk_name.clone(), fk_column(&parent_fk_name));

                        for (sub_name, sub_type) in nested_fields(field) {
                            let conversion = convert(&source_backend, &target_backend, &sub_type);
                            ctx.metrics.type_conversions += 1;
                            let mut column = scalar_column(&sub_name, &conversion.target_type);
                            if conversion.lossy {
                                ctx.metrics.lossy_conversions += 1;
                                column.mark_lossy(conversion.note.unwrap_or_default());
                            }
                            child_table.columns.insert(sub_name, column);
                        }

                        child_table.constraints.push(child_fk_constraint(&child_name, &parent_fk_name, &name));
                        ctx.target_model.tables.insert(child_name, child_table);
                        ctx.metrics.objects_converted += 1;
                    }
                    "array" => {
                        let join_name = format!("{}_{}", name, field_name);
                        let mut join_table = Table::new(join_name.clone());
                        join_table
                            .columns
                            .insert(parent_fk_name.clone(), fk_column(&parent_fk_name));
                        join_table
                            .columns
                            .insert("array_index".to_string(), scalar_column("array_index", "integer"));

                        let element_type = array_element_type(field);
                        let conversion = convert(&source_backend, &target_backend, &element_type);
                        ctx.metrics.type_conversions += 1;
                        join_table
                            .columns
                            .insert("value".to_string(), scalar_column("value", &conversion.target_type));

                        join_table.constraints.push(child_fk_constraint(&join_name, &parent_fk_name, &name));
                        ctx.target_model.tables.insert(join_name, join_table);
                        ctx.metrics.objects_converted += 1;
                    }
                    scalar => {
                        let conversion = convert(&source_backend, &target_backend, scalar);
                        ctx.metrics.type_conversions += 1;
                        let mut column = scalar_column(field_name, &conversion.target_type);
                        column.nullable = !field.required;
                        if conversion.lossy {
                            ctx.metrics.lossy_conversions += 1;
                            column.mark_lossy(conversion.note.unwrap_or_default());
                            ctx.warn_data_loss(format!("{}.{}", name, field_name), "type conversion is lossy");
                        }
                        base_table.columns.insert(field_name.clone(), column);
                    }
                }
            }

            ctx.target_model.tables.insert(name, base_table);
            ctx.metrics.objects_converted += 1;
        }
        Ok(())
    }
}

fn surrogate_id_column(name: &str) -> Column {
    Column {
        name: name.to_string(),
        data_type: "integer".to_string(),
        nullable: false,
        is_primary_key: true,
        auto_increment: true,
        options: Options::new(),
    }
}

fn fk_column(name: &str) -> Column {
    Column {
        name: name.to_string(),
        data_type: "integer".to_string(),
        nullable: false,
        is_primary_key: false,
        auto_increment: false,
        options: Options::new(),
    }
}

fn scalar_column(name: &str, data_type: &str) -> Column {
    Column {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: true,
        is_primary_key: false,
        auto_increment: false,
        options: Options::new(),
    }
}

fn child_fk_constraint(child_table: &str, fk_column_name: &str, parent_table: &str) -> Constraint {
    Constraint {
        name: format!("fk_{}_{}", child_table, parent_table),
        constraint_type: ConstraintType::ForeignKey,
        columns: vec![fk_column_name.to_string()],
        reference: Some(ConstraintReference {
            table: parent_table.to_string(),
            columns: vec!["id".to_string()],
            on_update: None,
            on_delete: None,
        }),
        options: Options::new(),
    }
}

fn nested_fields(field: &Field) -> Vec<(String, String)> {
    match field.options.get("nested_fields") {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|t| (k.clone(), t.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn array_element_type(field: &Field) -> String {
    field
        .options
        .get("array_element_type")
        .and_then(|v| v.as_str())
        .unwrap_or("string")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Collection, Field, UnifiedModel};
    use crate::translator::TranslationRequest;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn normalizes_nested_object_and_array_into_child_and_join_tables() {
        let mut model = UnifiedModel::new("mongodb");
        let mut users = Collection::new("users");
        users.fields.insert(
            "email".to_string(),
            Field { name: "email".into(), field_type: "string".into(), required: true, options: Options::new() },
        );
        let mut profile_options = Options::new();
        profile_options.insert("nested_fields".to_string(), json!({"first": "string", "last": "string"}));
        users.fields.insert(
            "profile".to_string(),
            Field { name: "profile".into(), field_type: "object".into(), required: false, options: profile_options },
        );
        let mut tags_options = Options::new();
        tags_options.insert("array_element_type".to_string(), json!("string"));
        users.fields.insert(
            "tags".to_string(),
            Field { name: "tags".into(), field_type: "array".into(), required: false, options: tags_options },
        );
        model.collections.insert("users".to_string(), users);

        let req = TranslationRequest {
            source_backend: "mongodb".into(),
            target_backend: "postgres".into(),
            source_model: model,
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        let mut ctx = TranslationContext::new(&req);
        Normalization.convert(&mut ctx, &EnrichmentContext::default()).unwrap();

        assert!(ctx.target_model.tables.contains_key("users"));
        assert!(ctx.target_model.tables.contains_key("users_profile"));
        assert!(ctx.target_model.tables.contains_key("users_tags"));
        assert!(ctx.target_model.tables["users_profile"].columns.contains_key("first"));
        assert!(ctx.target_model.tables["users_tags"].columns.contains_key("array_index"));
        assert!(ctx.target_model.tables["users_profile"].columns.contains_key("users_id"));
        assert!(ctx.target_model.tables["users_tags"].columns.contains_key("users_id"));
    }
}
