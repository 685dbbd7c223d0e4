//! Relationship mapper: given source foreign keys/relationships and an
//! enrichment context, produces the target-paradigm expression of each one.

use crate::catalog::Paradigm;

use super::enrichment::{EmbedStrategy, EnrichmentContext, ForeignKeyDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingType {
    Embed,
    Reference,
    Array,
    GraphRelationship,
    ForeignKey,
    JunctionTable,
}

/// One source-identifier → target-identifier mapping, attached to the
/// translation report after structural transformation completes.
#[derive(Debug, Clone)]
pub struct RelationshipMapping {
    pub source_identifier: String,
    pub target_identifier: String,
    pub mapping_type: MappingType,
    pub field_rules: Vec<String>,
}

/// Maps every foreign key to its target-paradigm expression. The strategy
/// that invokes this has already performed the bulk structural conversion;
/// this pass only records how each relationship was expressed.
pub fn map_relationships(
    foreign_keys: &[ForeignKeyDescriptor],
    enrichment: &EnrichmentContext,
    target_paradigm: Paradigm,
) -> Vec<RelationshipMapping> {
    foreign_keys
        .iter()
        .map(|fk| match target_paradigm {
            Paradigm::Document => document_mapping(fk, enrichment),
            Paradigm::Graph => graph_mapping(fk, enrichment),
            Paradigm::Relational => relational_mapping(fk, enrichment),
            _ => generic_mapping(fk),
        })
        .collect()
}

fn document_mapping(fk: &ForeignKeyDescriptor, enrichment: &EnrichmentContext) -> RelationshipMapping {
    let decision = enrichment.embed_decision(&fk.table, &fk.column);
    let (mapping_type, rules) = match decision {
        EmbedStrategy::Embed => (
            MappingType::Embed,
            vec![format!("{}.{} → embedded sub-document {}", fk.table, fk.column, fk.target_table)],
        ),
        EmbedStrategy::Reference => (
            MappingType::Reference,
            vec![format!(
                "{}.{} → {}_ref {{reference_collection: {}, reference_type: document_id}}",
                fk.table, fk.column, fk.target_table, fk.target_table
            )],
        ),
        EmbedStrategy::Array => (
            MappingType::Array,
            vec![format!("{} → {}_items array on {}", fk.table, fk.table, fk.target_table)],
        ),
    };
    RelationshipMapping {
        source_identifier: format!("{}.{}", fk.table, fk.column),
        target_identifier: fk.target_table.clone(),
        mapping_type,
        field_rules: rules,
    }
}

fn graph_mapping(fk: &ForeignKeyDescriptor, enrichment: &EnrichmentContext) -> RelationshipMapping {
    let relationship_type = enrichment.relationship_type(&fk.table, &fk.column);
    RelationshipMapping {
        source_identifier: format!("{}.{}", fk.table, fk.column),
        target_identifier: format!("{}-[{}]->{}", fk.table, relationship_type, fk.target_table),
        mapping_type: MappingType::GraphRelationship,
        field_rules: vec![format!("type={}", relationship_type)],
    }
}

fn relational_mapping(fk: &ForeignKeyDescriptor, enrichment: &EnrichmentContext) -> RelationshipMapping {
    let decision = enrichment.embed_decision(&fk.table, &fk.column);
    if decision == EmbedStrategy::Array {
        RelationshipMapping {
            source_identifier: format!("{}.{}", fk.table, fk.column),
            target_identifier: format!("{}_{}_{}", fk.table, fk.column, fk.target_table),
            mapping_type: MappingType::JunctionTable,
            field_rules: vec!["reified as a junction table".to_string()],
        }
    } else {
        RelationshipMapping {
            source_identifier: format!("{}.{}", fk.table, fk.column),
            target_identifier: fk.target_table.clone(),
            mapping_type: MappingType::ForeignKey,
            field_rules: vec!["reified as a foreign-key constraint".to_string()],
        }
    }
}

fn generic_mapping(fk: &ForeignKeyDescriptor) -> RelationshipMapping {
    RelationshipMapping {
        source_identifier: format!("{}.{}", fk.table, fk.column),
        target_identifier: fk.target_table.clone(),
        mapping_type: MappingType::Reference,
        field_rules: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::enrichment::TableCategory;

    fn fk() -> ForeignKeyDescriptor {
        ForeignKeyDescriptor {
            table: "orders".to_string(),
            column: "user_id".to_string(),
            target_table: "users".to_string(),
        }
    }

    #[test]
    fn document_mapping_defaults_to_reference() {
        let mapping = document_mapping(&fk(), &EnrichmentContext::default());
        assert_eq!(mapping.mapping_type, MappingType::Reference);
    }

    #[test]
    fn document_mapping_embeds_when_target_is_lookup() {
        let mut ctx = EnrichmentContext::default();
        ctx.table_categories.insert("users".to_string(), TableCategory::Lookup);
        ctx.embed_decisions.insert(
            ("orders".to_string(), "user_id".to_string()),
            crate::translator::enrichment::EmbedStrategy::Embed,
        );
        let mapping = document_mapping(&fk(), &ctx);
        assert_eq!(mapping.mapping_type, MappingType::Embed);
    }

    #[test]
    fn graph_mapping_defaults_relationship_type_to_references() {
        let mapping = graph_mapping(&fk(), &EnrichmentContext::default());
        assert!(mapping.target_identifier.contains("REFERENCES"));
    }
}
