//! Decomposition: splits a source object into finer-grained target objects.
//! Two built-in routes: relational → graph (tables to nodes/edges) and
//! anything → vector (collections/tables to vector indexes).

use crate::error::AnchorError;
use crate::model::{Node, Property, Relationship, VectorIndex, DEFAULT_VECTOR_DIMENSION};

use super::Strategy;
use crate::translator::enrichment::EnrichmentContext;
use crate::translator::TranslationContext;

pub struct DecompositionGraph;

impl Strategy for DecompositionGraph {
    fn name(&self) -> &'static str {
        "decomposition_graph"
    }

    fn convert(&self, ctx: &mut TranslationContext, enrichment: &EnrichmentContext) -> Result<(), AnchorError> {
        let tables = ctx.source_model.tables.clone();

        for (name, table) in &tables {
            ctx.metrics.objects_processed += 1;
            if ctx.is_excluded(name) {
                ctx.warn_excluded(name.clone(), "excluded by request");
                ctx.metrics.objects_skipped += 1;
                continue;
            }

            let fk_columns: Vec<&str> = table
                .columns
                .values()
                .filter(|c| crate::translator::enrichment::is_fk_column(&c.name))
                .map(|c| c.name.as_str())
                .collect();

            // Many-to-many junction tables (two FKs, <= 4 total columns)
            // collapse into an edge type instead of a node.
            if fk_columns.len() == 2 && table.columns.len() <= 4 {
                let endpoints: Vec<&crate::translator::enrichment::ForeignKeyDescriptor> = enrichment
                    .foreign_keys
                    .iter()
                    .filter(|fk| &fk.table == name)
                    .collect();
                if endpoints.len() == 2 {
                    let relationship_type = enrichment.relationship_type(name, fk_columns[0]);
                    let mut relationship = Relationship {
                        from_label: endpoints[0].target_table.clone(),
                        relationship_type,
                        to_label: endpoints[1].target_table.clone(),
                        properties: Default::default(),
                    };
                    for column in table.columns.values() {
                        if !fk_columns.contains(&column.name.as_str()) {
                            relationship
                                .properties
                                .insert(column.name.clone(), serde_json::Value::String(column.data_type.clone()));
                        }
                    }
                    ctx.target_model.relationships.push(relationship);
                    ctx.metrics.objects_converted += 1;
                    continue;
                }
            }

            let mut node = Node::new(name.clone());
            for column in table.columns.values() {
                if crate::translator::enrichment::is_fk_column(&column.name) {
                    continue;
                }
                node.properties.insert(
                    column.name.clone(),
                    Property { name: column.name.clone(), property_type: column.data_type.clone(), options: Default::default() },
                );
            }
            node.indexes = table.indexes.clone();
            ctx.target_model.nodes.insert(name.clone(), node);
            ctx.metrics.objects_converted += 1;

            for fk in enrichment.foreign_keys.iter().filter(|fk| &fk.table == name) {
                let relationship_type = enrichment.relationship_type(&fk.table, &fk.column);
                ctx.target_model.relationships.push(Relationship {
                    from_label: fk.table.clone(),
                    relationship_type,
                    to_label: fk.target_table.clone(),
                    properties: Default::default(),
                });
            }
        }
        Ok(())
    }
}

pub struct DecompositionVector;

impl Strategy for DecompositionVector {
    fn name(&self) -> &'static str {
        "decomposition_vector"
    }

    fn convert(&self, ctx: &mut TranslationContext, _enrichment: &EnrichmentContext) -> Result<(), AnchorError> {
        let tables = ctx.source_model.tables.clone();
        for (name, table) in &tables {
            ctx.metrics.objects_processed += 1;
            if ctx.is_excluded(name) {
                ctx.warn_excluded(name.clone(), "excluded by request");
                ctx.metrics.objects_skipped += 1;
                continue;
            }
            let text_like: Vec<String> = table
                .columns
                .values()
                .filter(|c| matches!(c.data_type.as_str(), "text" | "varchar" | "string"))
                .map(|c| c.name.clone())
                .collect();
            let fields = if text_like.is_empty() {
                table.columns.keys().cloned().collect()
            } else {
                text_like
            };
            ctx.target_model.vector_indexes.insert(
                name.clone(),
                VectorIndex {
                    name: format!("{}_vector_idx", name),
                    on: name.clone(),
                    fields,
                    dimension: DEFAULT_VECTOR_DIMENSION,
                    metric: "cosine".to_string(),
                },
            );
            ctx.metrics.objects_converted += 1;
        }

        let collections = ctx.source_model.collections.clone();
        for (name, collection) in &collections {
            ctx.metrics.objects_processed += 1;
            if ctx.is_excluded(name) {
                ctx.warn_excluded(name.clone(), "excluded by request");
                ctx.metrics.objects_skipped += 1;
                continue;
            }
            let text_like: Vec<String> = collection
                .fields
                .values()
                .filter(|f| f.field_type == "string")
                .map(|f| f.name.clone())
                .collect();
            let fields = if text_like.is_empty() {
                collection.fields.keys().cloned().collect()
            } else {
                text_like
            };
            ctx.target_model.vector_indexes.insert(
                name.clone(),
                VectorIndex {
                    name: format!("{}_vector_idx", name),
                    on: name.clone(),
                    fields,
                    dimension: DEFAULT_VECTOR_DIMENSION,
                    metric: "cosine".to_string(),
                },
            );
            ctx.metrics.objects_converted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, Options, Table, UnifiedModel};
    use crate::translator::enrichment::analyze;
    use crate::translator::TranslationRequest;
    use std::collections::BTreeSet;

    fn column(name: &str, data_type: &str) -> Column {
        Column { name: name.to_string(), data_type: data_type.to_string(), nullable: true, is_primary_key: false, auto_increment: false, options: Options::new() }
    }

    #[test]
    fn decomposition_vector_prefers_text_like_columns() {
        let mut model = UnifiedModel::new("postgres");
        let mut docs = Table::new("docs");
        docs.columns.insert("id".into(), column("id", "integer"));
        docs.columns.insert("body".into(), column("body", "text"));
        model.tables.insert("docs".into(), docs);

        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "qdrant".into(),
            source_model: model,
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        let mut ctx = TranslationContext::new(&req);
        DecompositionVector.convert(&mut ctx, &EnrichmentContext::default()).unwrap();

        let index = &ctx.target_model.vector_indexes["docs"];
        assert_eq!(index.fields, vec!["body".to_string()]);
        assert_eq!(index.dimension, DEFAULT_VECTOR_DIMENSION);
    }

    #[test]
    fn decomposition_graph_turns_tables_into_nodes_with_relationships() {
        let mut model = UnifiedModel::new("postgres");
        let mut users = Table::new("users");
        users.columns.insert("id".into(), column("id", "integer"));
        model.tables.insert("users".into(), users);

        let mut orders = Table::new("orders");
        orders.columns.insert("id".into(), column("id", "integer"));
        orders.columns.insert("user_id".into(), column("user_id", "integer"));
        model.tables.insert("orders".into(), orders);

        let enrichment_ctx = analyze(&model, None);
        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "neo4j".into(),
            source_model: model,
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        let mut ctx = TranslationContext::new(&req);
        DecompositionGraph.convert(&mut ctx, &enrichment_ctx).unwrap();

        assert!(ctx.target_model.nodes.contains_key("users"));
        assert!(ctx.target_model.nodes.contains_key("orders"));
        assert!(ctx
            .target_model
            .relationships
            .iter()
            .any(|r| r.from_label == "orders" && r.to_label == "users"));
    }
}
