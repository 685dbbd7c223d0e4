//! Strategy registry: pluggable cross-paradigm conversion algorithms keyed
//! by `(sourceParadigm, targetParadigm)`. Callers may register a custom
//! strategy for a pair; absent an override, [`crate::translator::cross_paradigm`]
//! falls back to the built-in table.

pub mod aggregation;
pub mod decomposition;
pub mod denormalization;
pub mod hybrid;
pub mod normalization;

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::RwLock;

use crate::catalog::Paradigm;
use crate::error::AnchorError;

use super::enrichment::EnrichmentContext;
use super::TranslationContext;

/// A pluggable algorithm that converts a source `UnifiedModel` (held inside
/// `ctx`) into a target one, populating `ctx.target_model` in place. Must be
/// side-effect free with respect to `ctx.source_model`.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn convert(&self, ctx: &mut TranslationContext, enrichment: &EnrichmentContext) -> Result<(), AnchorError>;
}

type RegistryKey = (Paradigm, Paradigm);
type RegistryMap = HashMap<RegistryKey, Arc<dyn Strategy>>;

static CUSTOM_STRATEGIES: Lazy<RwLock<RegistryMap>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a strategy override for `(source, target)`. Re-registering the
/// same pair replaces the previous override.
pub async fn register(source: Paradigm, target: Paradigm, strategy: Arc<dyn Strategy>) {
    CUSTOM_STRATEGIES.write().await.insert((source, target), strategy);
}

async fn custom_for(source: Paradigm, target: Paradigm) -> Option<Arc<dyn Strategy>> {
    CUSTOM_STRATEGIES.read().await.get(&(source, target)).cloned()
}

/// Resolves the strategy for `(source, target)`: a registered override if
/// one exists, otherwise the built-in selection table from the design.
pub async fn resolve(source: Paradigm, target: Paradigm) -> Arc<dyn Strategy> {
    if let Some(strategy) = custom_for(source, target).await {
        return strategy;
    }
    builtin_for(source, target)
}

pub fn builtin_for(source: Paradigm, target: Paradigm) -> Arc<dyn Strategy> {
    use Paradigm::*;
    match (source, target) {
        (Relational, Document) => Arc::new(denormalization::Denormalization),
        (Document, Relational) => Arc::new(normalization::Normalization),
        (Relational, Graph) => Arc::new(decomposition::DecompositionGraph),
        (Graph, Relational) => Arc::new(aggregation::AggregationRelational),
        (Graph, Document) => Arc::new(aggregation::AggregationDocument),
        (_, Vector) => Arc::new(decomposition::DecompositionVector),
        _ => Arc::new(hybrid::Hybrid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_covers_the_documented_pairs() {
        assert_eq!(builtin_for(Paradigm::Relational, Paradigm::Document).name(), "denormalization");
        assert_eq!(builtin_for(Paradigm::Document, Paradigm::Relational).name(), "normalization");
        assert_eq!(builtin_for(Paradigm::Relational, Paradigm::Graph).name(), "decomposition_graph");
        assert_eq!(builtin_for(Paradigm::Graph, Paradigm::Relational).name(), "aggregation_relational");
        assert_eq!(builtin_for(Paradigm::Graph, Paradigm::Document).name(), "aggregation_document");
        assert_eq!(builtin_for(Paradigm::Relational, Paradigm::Vector).name(), "decomposition_vector");
        assert_eq!(builtin_for(Paradigm::KeyValue, Paradigm::Search).name(), "hybrid");
    }

    #[tokio::test]
    async fn registered_override_takes_precedence_over_builtin() {
        struct AlwaysHybrid;
        impl Strategy for AlwaysHybrid {
            fn name(&self) -> &'static str {
                "always_hybrid_override"
            }
            fn convert(&self, _ctx: &mut TranslationContext, _enrichment: &EnrichmentContext) -> Result<(), AnchorError> {
                Ok(())
            }
        }
        register(Paradigm::Relational, Paradigm::Document, Arc::new(AlwaysHybrid)).await;
        let resolved = resolve(Paradigm::Relational, Paradigm::Document).await;
        assert_eq!(resolved.name(), "always_hybrid_override");
    }
}
