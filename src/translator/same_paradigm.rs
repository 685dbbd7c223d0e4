//! Same-paradigm translation: structural clone of every object kind, with
//! per-column type conversion and constraint-reference re-validation.

use crate::catalog;
use crate::error::AnchorError;
use crate::model::types::convert;
use crate::model::{Column, Table};

use super::{StageOutput, TranslationContext};

pub fn translate(ctx: &mut TranslationContext) -> Result<StageOutput, AnchorError> {
    let target_supports_ddl = catalog::lookup(&ctx.target_backend)
        .ok_or_else(|| AnchorError::validation("target_backend", format!("{:?} not in catalog", ctx.target_backend)))?
        .capabilities
        .supports_schema_ddl;

    translate_tables(ctx, target_supports_ddl);
    translate_views(ctx, target_supports_ddl);
    translate_materialized_views(ctx, target_supports_ddl);
    translate_functions(ctx, target_supports_ddl);
    translate_procedures(ctx, target_supports_ddl);
    translate_triggers(ctx, target_supports_ddl);
    translate_sequences(ctx, target_supports_ddl);
    translate_types(ctx, target_supports_ddl);

    Ok(StageOutput {
        strategies_used: vec!["identity".to_string()],
        mappings: Vec::new(),
    })
}

fn translate_tables(ctx: &mut TranslationContext, target_supports_ddl: bool) {
    let source_backend = ctx.source_backend.clone();
    let target_backend = ctx.target_backend.clone();
    let tables: Vec<Table> = ctx.source_model.tables.values().cloned().collect();

    for table in tables {
        ctx.metrics.objects_processed += 1;
        if !target_supports_ddl {
            ctx.warn_compatibility(table.name.clone(), "target has no schema DDL support");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if ctx.is_excluded(&table.name) {
            ctx.warn_excluded(table.name.clone(), "excluded by request");
            ctx.metrics.objects_skipped += 1;
            continue;
        }

        let mut target_table = Table::new(table.name.clone());
        for (name, column) in &table.columns {
            let conversion = convert(&source_backend, &target_backend, &column.data_type);
            ctx.metrics.type_conversions += 1;
            let mut target_column = Column {
                name: column.name.clone(),
                data_type: conversion.target_type,
                nullable: column.nullable,
                is_primary_key: column.is_primary_key,
                auto_increment: column.auto_increment,
                options: column.options.clone(),
            };
            if conversion.lossy {
                ctx.metrics.lossy_conversions += 1;
                target_column.mark_lossy(conversion.note.unwrap_or_default());
                ctx.warn_data_loss(format!("{}.{}", table.name, name), "type conversion is lossy");
            }
            target_table.columns.insert(name.clone(), target_column);
        }
        target_table.indexes = table.indexes.clone();

        for constraint in &table.constraints {
            let resolves = match &constraint.reference {
                None => true,
                Some(reference) => {
                    ctx.source_model.tables.contains_key(&reference.table) && !ctx.is_excluded(&reference.table)
                }
            };
            if resolves {
                target_table.constraints.push(constraint.clone());
            } else {
                ctx.warn_compatibility(constraint.name.clone(), "dropped: reference no longer resolves");
                ctx.metrics.objects_dropped += 1;
            }
        }

        ctx.target_model.tables.insert(target_table.name.clone(), target_table);
        ctx.metrics.objects_converted += 1;
    }
}

fn translate_views(ctx: &mut TranslationContext, target_supports_ddl: bool) {
    let views = ctx.source_model.views.clone();
    for (name, view) in views {
        ctx.metrics.objects_processed += 1;
        if !target_supports_ddl {
            ctx.warn_compatibility(name.clone(), "target has no schema DDL support");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if ctx.is_excluded(&name) {
            ctx.warn_excluded(name.clone(), "excluded by request");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        ctx.target_model.views.insert(name, view);
        ctx.metrics.objects_converted += 1;
    }
}

fn translate_functions(ctx: &mut TranslationContext, target_supports_ddl: bool) {
    let functions = ctx.source_model.functions.clone();
    for (name, function) in functions {
        ctx.metrics.objects_processed += 1;
        if !target_supports_ddl {
            ctx.warn_compatibility(name.clone(), "target has no schema DDL support");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if ctx.is_excluded(&name) {
            ctx.warn_excluded(name.clone(), "excluded by request");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        ctx.target_model.functions.insert(name, function);
        ctx.metrics.objects_converted += 1;
    }
}

fn translate_materialized_views(ctx: &mut TranslationContext, target_supports_ddl: bool) {
    let materialized_views = ctx.source_model.materialized_views.clone();
    for (name, view) in materialized_views {
        ctx.metrics.objects_processed += 1;
        if !target_supports_ddl {
            ctx.warn_compatibility(name.clone(), "target has no schema DDL support");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if ctx.is_excluded(&name) {
            ctx.warn_excluded(name.clone(), "excluded by request");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        ctx.target_model.materialized_views.insert(name, view);
        ctx.metrics.objects_converted += 1;
    }
}

fn translate_procedures(ctx: &mut TranslationContext, target_supports_ddl: bool) {
    let procedures = ctx.source_model.procedures.clone();
    for (name, procedure) in procedures {
        ctx.metrics.objects_processed += 1;
        if !target_supports_ddl {
            ctx.warn_compatibility(name.clone(), "target has no schema DDL support");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if ctx.is_excluded(&name) {
            ctx.warn_excluded(name.clone(), "excluded by request");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        ctx.target_model.procedures.insert(name, procedure);
        ctx.metrics.objects_converted += 1;
    }
}

fn translate_triggers(ctx: &mut TranslationContext, target_supports_ddl: bool) {
    let triggers = ctx.source_model.triggers.clone();
    for (name, trigger) in triggers {
        ctx.metrics.objects_processed += 1;
        if !target_supports_ddl {
            ctx.warn_compatibility(name.clone(), "target has no schema DDL support");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if ctx.is_excluded(&name) {
            ctx.warn_excluded(name.clone(), "excluded by request");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if !ctx.target_model.tables.contains_key(&trigger.table) {
            ctx.warn_compatibility(name.clone(), "dropped: trigger's table no longer exists in the target");
            ctx.metrics.objects_dropped += 1;
            continue;
        }
        ctx.target_model.triggers.insert(name, trigger);
        ctx.metrics.objects_converted += 1;
    }
}

fn translate_types(ctx: &mut TranslationContext, target_supports_ddl: bool) {
    let types = ctx.source_model.types.clone();
    for (name, type_def) in types {
        ctx.metrics.objects_processed += 1;
        if !target_supports_ddl {
            ctx.warn_compatibility(name.clone(), "target has no schema DDL support");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if ctx.is_excluded(&name) {
            ctx.warn_excluded(name.clone(), "excluded by request");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        ctx.target_model.types.insert(name, type_def);
        ctx.metrics.objects_converted += 1;
    }
}

fn translate_sequences(ctx: &mut TranslationContext, target_supports_ddl: bool) {
    let sequences = ctx.source_model.sequences.clone();
    for (name, sequence) in sequences {
        ctx.metrics.objects_processed += 1;
        if !target_supports_ddl {
            ctx.warn_compatibility(name.clone(), "target has no schema DDL support");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        if ctx.is_excluded(&name) {
            ctx.warn_excluded(name.clone(), "excluded by request");
            ctx.metrics.objects_skipped += 1;
            continue;
        }
        ctx.target_model.sequences.insert(name, sequence);
        ctx.metrics.objects_converted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, FunctionDef, Options, TriggerDef, TypeDef, UnifiedModel, ViewDef};
    use crate::translator::TranslationRequest;
    use std::collections::BTreeSet;

    fn pk_column(name: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: "integer".to_string(),
            nullable: false,
            is_primary_key: true,
            auto_increment: true,
            options: Options::new(),
        }
    }

    #[test]
    fn postgres_to_mysql_preserves_table_and_column_names() {
        let mut model = UnifiedModel::new("postgres");
        let mut users = Table::new("users");
        users.columns.insert("id".into(), pk_column("id"));
        model.tables.insert("users".into(), users);

        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "mysql".into(),
            source_model: model,
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        let mut ctx = TranslationContext::new(&req);
        let stage = translate(&mut ctx).unwrap();
        assert_eq!(stage.strategies_used, vec!["identity".to_string()]);
        assert!(ctx.target_model.tables.contains_key("users"));
        assert!(ctx.target_model.tables["users"].columns.contains_key("id"));
    }

    #[test]
    fn excluded_table_is_skipped_with_a_warning() {
        let mut model = UnifiedModel::new("postgres");
        model.tables.insert("users".into(), Table::new("users"));

        let mut excluded = BTreeSet::new();
        excluded.insert("users".to_string());
        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "mysql".into(),
            source_model: model,
            enrichment: None,
            excluded_objects: excluded,
        };
        let mut ctx = TranslationContext::new(&req);
        translate(&mut ctx).unwrap();
        assert!(!ctx.target_model.tables.contains_key("users"));
        assert_eq!(ctx.metrics.objects_skipped, 1);
    }

    #[test]
    fn materialized_views_triggers_procedures_and_types_are_carried_over() {
        let mut model = UnifiedModel::new("postgres");
        let mut users = Table::new("users");
        users.columns.insert("id".into(), pk_column("id"));
        model.tables.insert("users".into(), users);
        model.materialized_views.insert("active_users".into(), ViewDef { name: "active_users".into(), definition: "select * from users where active".into() });
        model.triggers.insert(
            "audit_users".into(),
            TriggerDef { name: "audit_users".into(), table: "users".into(), timing: "after".into(), event: "update".into(), definition: "call audit_log()".into() },
        );
        model.procedures.insert("recalc".into(), FunctionDef { name: "recalc".into(), definition: "begin end".into(), parameters: Vec::new() });
        model.types.insert("status".into(), TypeDef { name: "status".into(), definition: "enum('active','inactive')".into() });

        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "mysql".into(),
            source_model: model,
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        let mut ctx = TranslationContext::new(&req);
        translate(&mut ctx).unwrap();

        assert!(ctx.target_model.materialized_views.contains_key("active_users"));
        assert!(ctx.target_model.triggers.contains_key("audit_users"));
        assert!(ctx.target_model.procedures.contains_key("recalc"));
        assert!(ctx.target_model.types.contains_key("status"));
    }

    #[test]
    fn trigger_on_dropped_table_is_dropped_with_a_warning() {
        let mut model = UnifiedModel::new("postgres");
        model.triggers.insert(
            "orphan_trigger".into(),
            TriggerDef { name: "orphan_trigger".into(), table: "ghost".into(), timing: "before".into(), event: "insert".into(), definition: "call noop()".into() },
        );

        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "mysql".into(),
            source_model: model,
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        let mut ctx = TranslationContext::new(&req);
        translate(&mut ctx).unwrap();

        assert!(!ctx.target_model.triggers.contains_key("orphan_trigger"));
        assert_eq!(ctx.metrics.objects_dropped, 1);
    }
}
