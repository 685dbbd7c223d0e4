//! Cross-paradigm translation: resolves a strategy for the source/target
//! paradigm pair, runs it, then attaches relationship mappings produced by
//! the relationship mapper.

use crate::catalog::Paradigm;
use crate::error::AnchorError;

use super::enrichment;
use super::relationship_mapper;
use super::strategies;
use super::{StageOutput, TranslationContext};

/// Used by `analyze_translation`, which must stay synchronous and not touch
/// the (async, lock-guarded) custom strategy registry — it only ever
/// describes the built-in choice.
pub fn strategy_name_for(source: Paradigm, target: Paradigm) -> String {
    strategies::builtin_for(source, target).name().to_string()
}

pub async fn translate(
    ctx: &mut TranslationContext,
    source_paradigm: Paradigm,
    target_paradigm: Paradigm,
) -> Result<StageOutput, AnchorError> {
    let enrichment_ctx = enrichment::analyze(&ctx.source_model, ctx.enrichment.as_ref());
    let strategy = strategies::resolve(source_paradigm, target_paradigm).await;
    strategy.convert(ctx, &enrichment_ctx)?;

    let mappings = relationship_mapper::map_relationships(&enrichment_ctx.foreign_keys, &enrichment_ctx, target_paradigm);

    Ok(StageOutput { strategies_used: vec![strategy.name().to_string()], mappings })
}
