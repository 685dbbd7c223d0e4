//! Hybrid: used for paradigm pairs with no dedicated built-in strategy.
//! Tries the strategy matching the dominant source object kind, falling back
//! to vector decomposition when that produces nothing.

use crate::error::AnchorError;

use super::decomposition::DecompositionVector;
use super::denormalization::Denormalization;
use super::normalization::Normalization;
use super::Strategy;
use crate::translator::enrichment::EnrichmentContext;
use crate::translator::TranslationContext;

pub struct Hybrid;

impl Strategy for Hybrid {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn convert(&self, ctx: &mut TranslationContext, enrichment: &EnrichmentContext) -> Result<(), AnchorError> {
        let tables_dominate = ctx.source_model.tables.len() >= ctx.source_model.collections.len();

        if tables_dominate {
            Denormalization.convert(ctx, enrichment)?;
        } else {
            Normalization.convert(ctx, enrichment)?;
        }

        if ctx.metrics.objects_converted == 0 {
            DecompositionVector.convert(ctx, enrichment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, Options, Table, UnifiedModel};
    use crate::translator::TranslationRequest;
    use std::collections::BTreeSet;

    #[test]
    fn hybrid_picks_denormalization_when_tables_dominate() {
        let mut model = UnifiedModel::new("cassandra");
        let mut events = Table::new("events");
        events.columns.insert(
            "id".into(),
            Column { name: "id".into(), data_type: "integer".into(), nullable: false, is_primary_key: true, auto_increment: true, options: Options::new() },
        );
        model.tables.insert("events".into(), events);

        let req = TranslationRequest { source_backend: "cassandra".into(), target_backend: "elasticsearch".into(), source_model: model, enrichment: None, excluded_objects: BTreeSet::new() };
        let mut ctx = TranslationContext::new(&req);
        Hybrid.convert(&mut ctx, &EnrichmentContext::default()).unwrap();

        assert!(ctx.target_model.collections.contains_key("events"));
    }
}
