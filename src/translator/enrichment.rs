//! Enrichment analyzer: consumes optional caller-supplied semantic metadata,
//! or falls back to heuristic classification of the source model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Table, UnifiedModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableCategory {
    Entity,
    Junction,
    Lookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    ReadHeavy,
    WriteHeavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStrength {
    Strong,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedStrategy {
    Embed,
    Reference,
    Array,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableEnrichment {
    pub table: String,
    pub category: Option<TableCategory>,
    pub access_pattern: Option<AccessPattern>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipEnrichment {
    pub table: String,
    pub column: String,
    pub strength: Option<RelationshipStrength>,
    pub relationship_type: Option<String>,
    pub strategy: Option<EmbedStrategy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceSummary {
    #[serde(default)]
    pub frameworks: Vec<String>,
    pub risk_level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enrichment {
    #[serde(default)]
    pub table_enrichments: Vec<TableEnrichment>,
    #[serde(default)]
    pub relationship_enrichments: Vec<RelationshipEnrichment>,
    #[serde(default)]
    pub performance_hints: BTreeMap<String, String>,
    pub compliance_summary: Option<ComplianceSummary>,
}

/// A foreign key, surfaced in the shape the relationship mapper and
/// cross-paradigm strategies actually consume.
#[derive(Debug, Clone)]
pub struct ForeignKeyDescriptor {
    pub table: String,
    pub column: String,
    pub target_table: String,
}

/// The analyzer's output: per-table categories, foreign-key descriptors, and
/// the embed/reference/array decision for each one.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentContext {
    pub table_categories: BTreeMap<String, TableCategory>,
    pub access_patterns: BTreeMap<String, AccessPattern>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    pub relationship_types: BTreeMap<(String, String), String>,
    pub embed_decisions: BTreeMap<(String, String), EmbedStrategy>,
    pub business_rules: Vec<String>,
}

impl EnrichmentContext {
    pub fn category_of(&self, table: &str) -> TableCategory {
        self.table_categories.get(table).copied().unwrap_or(TableCategory::Entity)
    }

    pub fn embed_decision(&self, table: &str, column: &str) -> EmbedStrategy {
        self.embed_decisions
            .get(&(table.to_string(), column.to_string()))
            .copied()
            .unwrap_or(EmbedStrategy::Reference)
    }

    pub fn relationship_type(&self, table: &str, column: &str) -> String {
        self.relationship_types
            .get(&(table.to_string(), column.to_string()))
            .cloned()
            .unwrap_or_else(|| "REFERENCES".to_string())
    }
}

/// A column name is foreign-key-looking when it ends with `_id` (and is not
/// itself `id`) or `_ref`.
pub fn is_fk_column(name: &str) -> bool {
    let lower = name.to_lowercase();
    (lower.ends_with("_id") && lower != "id") || lower.ends_with("_ref")
}

const LOOKUP_MARKERS: &[&str] = &["type", "status", "category", "lookup", "reference", "role"];

fn looks_like_lookup(table: &Table) -> bool {
    if table.columns.len() > 3 {
        return false;
    }
    let name = table.name.to_lowercase();
    name.ends_with("categories") || LOOKUP_MARKERS.iter().any(|marker| name.contains(marker))
}

fn looks_like_junction(table: &Table) -> bool {
    let fk_columns = table.columns.values().filter(|c| is_fk_column(&c.name)).count();
    fk_columns >= 2 && table.columns.len() <= 4
}

fn classify_table(table: &Table) -> TableCategory {
    if looks_like_junction(table) {
        TableCategory::Junction
    } else if looks_like_lookup(table) {
        TableCategory::Lookup
    } else {
        TableCategory::Entity
    }
}

fn table_enrichment_for<'a>(enrichment: &'a Enrichment, table: &str) -> Option<&'a TableEnrichment> {
    enrichment.table_enrichments.iter().find(|e| e.table == table)
}

fn relationship_enrichment_for<'a>(
    enrichment: &'a Enrichment,
    table: &str,
    column: &str,
) -> Option<&'a RelationshipEnrichment> {
    enrichment
        .relationship_enrichments
        .iter()
        .find(|e| e.table == table && e.column == column)
}

/// Builds an `EnrichmentContext` for `source_model`. When `enrichment` is
/// absent, every decision falls back to the heuristics described at the
/// module level; when present, it overrides them field by field.
pub fn analyze(source_model: &UnifiedModel, enrichment: Option<&Enrichment>) -> EnrichmentContext {
    let mut ctx = EnrichmentContext::default();

    // First pass: categories and access patterns for every table, so the
    // second pass can look up a foreign key's *target* table's
    // classification regardless of iteration order.
    for table in source_model.tables.values() {
        let heuristic_category = classify_table(table);
        let explicit_category = enrichment
            .and_then(|e| table_enrichment_for(e, &table.name))
            .and_then(|e| e.category);
        ctx.table_categories
            .insert(table.name.clone(), explicit_category.unwrap_or(heuristic_category));

        if let Some(pattern) = enrichment
            .and_then(|e| table_enrichment_for(e, &table.name))
            .and_then(|e| e.access_pattern)
        {
            ctx.access_patterns.insert(table.name.clone(), pattern);
        }
    }

    for table in source_model.tables.values() {
        for column in table.columns.values() {
            if !is_fk_column(&column.name) {
                continue;
            }
            let target_table = table
                .foreign_keys()
                .find(|c| c.columns.iter().any(|col| col == &column.name))
                .and_then(|c| c.reference.as_ref())
                .map(|r| r.table.clone())
                .unwrap_or_else(|| inferred_target_table(&column.name));

            ctx.foreign_keys.push(ForeignKeyDescriptor {
                table: table.name.clone(),
                column: column.name.clone(),
                target_table: target_table.clone(),
            });

            let rel_enrichment = enrichment.and_then(|e| relationship_enrichment_for(e, &table.name, &column.name));

            if let Some(rel_type) = rel_enrichment.and_then(|e| e.relationship_type.clone()) {
                ctx.relationship_types
                    .insert((table.name.clone(), column.name.clone()), rel_type);
            }

            let decision = embed_decision_for(
                rel_enrichment,
                &ctx.category_of(&target_table),
                ctx.access_patterns.get(&target_table).copied(),
            );
            ctx.embed_decisions
                .insert((table.name.clone(), column.name.clone()), decision);
        }
    }

    if let Some(enrichment) = enrichment {
        if let Some(summary) = &enrichment.compliance_summary {
            for framework in &summary.frameworks {
                ctx.business_rules.push(framework.clone());
            }
            if let Some(risk) = &summary.risk_level {
                ctx.business_rules.push(format!("risk_management:{}", risk));
            }
        }
    }

    ctx
}

/// Strips a trailing `_id`/`_ref` and pluralizes naively — used only when no
/// foreign-key constraint names the target table explicitly.
fn inferred_target_table(column_name: &str) -> String {
    let lower = column_name.to_lowercase();
    let stem = lower
        .strip_suffix("_id")
        .or_else(|| lower.strip_suffix("_ref"))
        .unwrap_or(&lower);
    if stem.ends_with('s') {
        stem.to_string()
    } else {
        format!("{}s", stem)
    }
}

/// The embed/reference/array decision, in the order the heuristic demands:
/// explicit enrichment strategy, then strong relationship, then lookup
/// classification, then a plain reference.
fn embed_decision_for(
    rel_enrichment: Option<&RelationshipEnrichment>,
    target_category: &TableCategory,
    access_pattern: Option<AccessPattern>,
) -> EmbedStrategy {
    if let Some(strategy) = rel_enrichment.and_then(|e| e.strategy) {
        return strategy;
    }
    if matches!(rel_enrichment.and_then(|e| e.strength), Some(RelationshipStrength::Strong)) {
        return EmbedStrategy::Embed;
    }
    if *target_category == TableCategory::Lookup {
        return EmbedStrategy::Embed;
    }
    if access_pattern == Some(AccessPattern::ReadHeavy) {
        return EmbedStrategy::Embed;
    }
    EmbedStrategy::Reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, Options};

    fn column(name: &str, is_pk: bool) -> Column {
        Column {
            name: name.to_string(),
            data_type: "integer".to_string(),
            nullable: false,
            is_primary_key: is_pk,
            auto_increment: is_pk,
            options: Options::new(),
        }
    }

    #[test]
    fn is_fk_column_rejects_bare_id() {
        assert!(!is_fk_column("id"));
        assert!(is_fk_column("user_id"));
        assert!(is_fk_column("owner_ref"));
    }

    #[test]
    fn classify_table_detects_lookup_by_name_and_width() {
        let mut table = Table::new("order_status");
        table.columns.insert("id".into(), column("id", true));
        table.columns.insert("label".into(), column("label", false));
        assert_eq!(classify_table(&table), TableCategory::Lookup);
    }

    #[test]
    fn classify_table_detects_junction_by_fk_density() {
        let mut table = Table::new("user_roles");
        table.columns.insert("user_id".into(), column("user_id", false));
        table.columns.insert("role_id".into(), column("role_id", false));
        assert_eq!(classify_table(&table), TableCategory::Junction);
    }

    #[test]
    fn read_heavy_access_pattern_implies_embed() {
        let decision = embed_decision_for(None, &TableCategory::Entity, Some(AccessPattern::ReadHeavy));
        assert_eq!(decision, EmbedStrategy::Embed);
    }

    #[test]
    fn lookup_target_implies_embed_even_without_access_pattern() {
        let decision = embed_decision_for(None, &TableCategory::Lookup, None);
        assert_eq!(decision, EmbedStrategy::Embed);
    }

    #[test]
    fn plain_entity_target_defaults_to_reference() {
        let decision = embed_decision_for(None, &TableCategory::Entity, None);
        assert_eq!(decision, EmbedStrategy::Reference);
    }
}
