//! Schema translator: analyzes and executes schema translation requests
//! between a source and target backend.
//!
//! Routing is by paradigm: a source/target pair sharing a primary paradigm
//! goes through [`same_paradigm`]; otherwise [`cross_paradigm`] dispatches to
//! a registered or built-in [`strategies::Strategy`].

pub mod cross_paradigm;
pub mod enrichment;
pub mod relationship_mapper;
pub mod same_paradigm;
pub mod strategies;

use std::collections::BTreeSet;

use crate::catalog::{self, Paradigm};
use crate::error::{AnchorError, TranslationWarning};
use crate::model::UnifiedModel;

use enrichment::Enrichment;
use relationship_mapper::RelationshipMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Trivial,
    Moderate,
    Complex,
    Impossible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParadigmCompatibility {
    Identical,
    Compatible,
    Incompatible,
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub supported: bool,
    pub complexity: Complexity,
    pub paradigm_compatibility: ParadigmCompatibility,
    pub recommended_strategy: String,
    pub unsupported_features: Vec<String>,
    pub estimated_success_rate: f64,
    pub enrichment_required: bool,
    pub required_enrichment_categories: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TranslationMetrics {
    pub objects_processed: u64,
    pub objects_converted: u64,
    pub objects_skipped: u64,
    pub objects_dropped: u64,
    pub type_conversions: u64,
    pub lossy_conversions: u64,
}

#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub source_backend: String,
    pub target_backend: String,
    pub source_model: UnifiedModel,
    pub enrichment: Option<Enrichment>,
    pub excluded_objects: BTreeSet<String>,
}

/// Mutable per-request state threaded through whichever translator stage
/// handles the request. Owned exclusively by that call; never shared.
pub struct TranslationContext {
    pub source_backend: String,
    pub target_backend: String,
    pub source_model: UnifiedModel,
    pub enrichment: Option<Enrichment>,
    pub target_model: UnifiedModel,
    pub metrics: TranslationMetrics,
    pub warnings: Vec<TranslationWarning>,
    pub excluded_objects: BTreeSet<String>,
}

impl TranslationContext {
    pub(crate) fn new(req: &TranslationRequest) -> Self {
        TranslationContext {
            source_backend: req.source_backend.clone(),
            target_backend: req.target_backend.clone(),
            source_model: req.source_model.clone(),
            enrichment: req.enrichment.clone(),
            target_model: UnifiedModel::new(req.target_backend.clone()),
            metrics: TranslationMetrics::default(),
            warnings: Vec::new(),
            excluded_objects: req.excluded_objects.clone(),
        }
    }

    pub fn warn_data_loss(&mut self, field: impl Into<String>, note: impl Into<String>) {
        self.warnings.push(TranslationWarning::DataLoss { field: field.into(), note: note.into() });
    }

    pub fn warn_compatibility(&mut self, object: impl Into<String>, note: impl Into<String>) {
        self.warnings.push(TranslationWarning::Compatibility { object: object.into(), note: note.into() });
    }

    pub fn warn_excluded(&mut self, object: impl Into<String>, note: impl Into<String>) {
        self.warnings.push(TranslationWarning::Excluded { object: object.into(), note: note.into() });
    }

    pub fn is_excluded(&self, object_name: &str) -> bool {
        self.excluded_objects.contains(object_name)
    }
}

/// What a translator stage (same-paradigm or cross-paradigm) hands back to
/// the entry point once it has populated `ctx.target_model`.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub strategies_used: Vec<String>,
    pub mappings: Vec<RelationshipMapping>,
}

#[derive(Debug, Clone, Default)]
pub struct TranslationReport {
    pub strategies_used: Vec<String>,
    pub metrics: TranslationMetrics,
    pub mappings: Vec<RelationshipMapping>,
}

pub struct TranslationOutcome {
    pub success: bool,
    pub unified_schema: Option<UnifiedModel>,
    pub report: TranslationReport,
    pub warnings: Vec<TranslationWarning>,
    pub error: Option<AnchorError>,
}

fn paradigm_of(backend: &str) -> Result<Paradigm, AnchorError> {
    catalog::lookup(backend)
        .map(|entry| entry.capabilities.primary_paradigm())
        .ok_or_else(|| AnchorError::validation("backend", format!("{:?} is not a known backend", backend)))
}

/// Pure and fast: never touches a live backend, only the catalog and the
/// request's static shape.
pub fn analyze_translation(req: &TranslationRequest) -> Result<AnalysisResult, AnchorError> {
    if req.source_backend == req.target_backend {
        return Err(AnchorError::validation("target_backend", "source and target backend must differ"));
    }
    let source_paradigm = paradigm_of(&req.source_backend)?;
    let target_paradigm = paradigm_of(&req.target_backend)?;

    let (compatibility, complexity, strategy) = if source_paradigm == target_paradigm {
        (ParadigmCompatibility::Identical, Complexity::Trivial, "identity".to_string())
    } else {
        let strategy = cross_paradigm::strategy_name_for(source_paradigm, target_paradigm);
        let complexity = if target_paradigm == Paradigm::Vector {
            Complexity::Moderate
        } else {
            Complexity::Complex
        };
        (ParadigmCompatibility::Compatible, complexity, strategy)
    };

    let enrichment_required = complexity == Complexity::Complex && req.enrichment.is_none();
    let required_categories = if enrichment_required {
        vec!["table_enrichments".to_string(), "relationship_enrichments".to_string()]
    } else {
        Vec::new()
    };

    Ok(AnalysisResult {
        supported: true,
        complexity,
        paradigm_compatibility: compatibility,
        recommended_strategy: strategy,
        unsupported_features: Vec::new(),
        estimated_success_rate: match compatibility {
            ParadigmCompatibility::Identical => 1.0,
            ParadigmCompatibility::Compatible => 0.85,
            ParadigmCompatibility::Incompatible => 0.0,
        },
        enrichment_required,
        required_enrichment_categories: required_categories,
    })
}

/// Always returns an outcome; translation failure is reported via
/// `success=false` plus `error`, never a panic or a bare `Err`. Async because
/// cross-paradigm routing may consult the (lock-guarded) custom strategy
/// registry; same-paradigm translation never actually suspends.
pub async fn translate(req: TranslationRequest) -> TranslationOutcome {
    if req.source_backend == req.target_backend {
        return failed(AnchorError::validation("target_backend", "source and target backend must differ"));
    }
    let source_paradigm = match paradigm_of(&req.source_backend) {
        Ok(p) => p,
        Err(e) => return failed(e),
    };
    let target_paradigm = match paradigm_of(&req.target_backend) {
        Ok(p) => p,
        Err(e) => return failed(e),
    };

    let mut ctx = TranslationContext::new(&req);
    let outcome = if source_paradigm == target_paradigm {
        same_paradigm::translate(&mut ctx)
    } else {
        cross_paradigm::translate(&mut ctx, source_paradigm, target_paradigm).await
    };

    match outcome {
        Ok(stage) => {
            let success = ctx.metrics.objects_converted > 0;
            let report = TranslationReport {
                strategies_used: stage.strategies_used,
                metrics: ctx.metrics,
                mappings: stage.mappings,
            };
            TranslationOutcome {
                success,
                unified_schema: if success { Some(ctx.target_model) } else { None },
                report,
                warnings: ctx.warnings,
                error: None,
            }
        }
        Err(e) => TranslationOutcome {
            success: false,
            unified_schema: None,
            report: TranslationReport { metrics: ctx.metrics, ..Default::default() },
            warnings: ctx.warnings,
            error: Some(e),
        },
    }
}

fn failed(error: AnchorError) -> TranslationOutcome {
    TranslationOutcome {
        success: false,
        unified_schema: None,
        report: TranslationReport::default(),
        warnings: Vec::new(),
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_rejects_identical_source_and_target() {
        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "postgres".into(),
            source_model: UnifiedModel::new("postgres"),
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        assert!(analyze_translation(&req).is_err());
    }

    #[test]
    fn analyze_flags_same_paradigm_as_identical_and_trivial() {
        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "mysql".into(),
            source_model: UnifiedModel::new("postgres"),
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        let result = analyze_translation(&req).unwrap();
        assert_eq!(result.paradigm_compatibility, ParadigmCompatibility::Identical);
        assert_eq!(result.complexity, Complexity::Trivial);
    }

    #[test]
    fn analyze_flags_cross_paradigm_as_compatible_and_requiring_enrichment() {
        let req = TranslationRequest {
            source_backend: "postgres".into(),
            target_backend: "mongodb".into(),
            source_model: UnifiedModel::new("postgres"),
            enrichment: None,
            excluded_objects: BTreeSet::new(),
        };
        let result = analyze_translation(&req).unwrap();
        assert_eq!(result.paradigm_compatibility, ParadigmCompatibility::Compatible);
        assert!(result.enrichment_required);
    }
}
