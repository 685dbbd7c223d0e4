//! For-all invariants from the translator's testable-properties list: identity
//! rejection, a same-paradigm round trip over a bijective type pair, the
//! embed sub-document field-subset rule, and first-leg lossy tagging.

use std::collections::BTreeSet;

use anchorsvc_core::error::TranslationWarning;
use anchorsvc_core::model::{Column, Constraint, ConstraintReference, ConstraintType, Options, Table, UnifiedModel};
use anchorsvc_core::translator::enrichment::{AccessPattern, Enrichment, TableEnrichment};
use anchorsvc_core::translator::{analyze_translation, translate, TranslationRequest};

fn column(name: &str, data_type: &str, primary: bool) -> Column {
    Column {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: false,
        is_primary_key: primary,
        auto_increment: primary,
        options: Options::new(),
    }
}

#[test]
fn same_backend_translation_is_rejected_at_validation() {
    let req = TranslationRequest {
        source_backend: "postgres".into(),
        target_backend: "postgres".into(),
        source_model: UnifiedModel::new("postgres"),
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    assert!(analyze_translation(&req).is_err());
}

#[tokio::test]
async fn same_backend_translate_fails_without_a_unified_schema() {
    let req = TranslationRequest {
        source_backend: "mysql".into(),
        target_backend: "mysql".into(),
        source_model: UnifiedModel::new("mysql"),
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(req).await;
    assert!(!outcome.success);
    assert!(outcome.unified_schema.is_none());
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn bijective_type_pair_round_trips_through_postgres_and_mysql() {
    let mut model = UnifiedModel::new("postgres");
    let mut flags = Table::new("flags");
    flags.columns.insert("id".into(), column("id", "integer", true));
    flags.columns.insert("active".into(), column("active", "boolean", false));
    model.tables.insert("flags".into(), flags);

    let to_mysql = TranslationRequest {
        source_backend: "postgres".into(),
        target_backend: "mysql".into(),
        source_model: model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(to_mysql).await;
    assert!(outcome.success);
    assert!(outcome.warnings.is_empty());
    let mysql_model = outcome.unified_schema.unwrap();
    assert_eq!(mysql_model.tables["flags"].columns["id"].data_type, "int");
    assert_eq!(mysql_model.tables["flags"].columns["active"].data_type, "tinyint(1)");

    let back_to_postgres = TranslationRequest {
        source_backend: "mysql".into(),
        target_backend: "postgres".into(),
        source_model: mysql_model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(back_to_postgres).await;
    assert!(outcome.success);
    assert!(outcome.warnings.is_empty());
    let round_tripped = outcome.unified_schema.unwrap();
    assert_eq!(round_tripped.tables.keys().collect::<Vec<_>>(), vec!["flags"]);
    assert_eq!(round_tripped.tables["flags"].columns["id"].data_type, "integer");
    assert_eq!(round_tripped.tables["flags"].columns["active"].data_type, "boolean");
}

#[tokio::test]
async fn denormalization_embed_subdocument_fields_are_a_subset_of_the_target_collection() {
    let mut model = UnifiedModel::new("postgres");

    let mut users = Table::new("users");
    users.columns.insert("id".into(), column("id", "integer", true));
    users.columns.insert("email".into(), column("email", "varchar", false));
    model.tables.insert("users".into(), users);

    let mut orders = Table::new("orders");
    orders.columns.insert("id".into(), column("id", "integer", true));
    orders.columns.insert("user_id".into(), column("user_id", "integer", false));
    orders.constraints.push(Constraint {
        name: "fk_orders_users".into(),
        constraint_type: ConstraintType::ForeignKey,
        columns: vec!["user_id".into()],
        reference: Some(ConstraintReference { table: "users".into(), columns: vec!["id".into()], on_update: None, on_delete: None }),
        options: Options::new(),
    });
    model.tables.insert("orders".into(), orders);

    let enrichment = Enrichment {
        table_enrichments: vec![TableEnrichment { table: "users".into(), category: None, access_pattern: Some(AccessPattern::ReadHeavy) }],
        ..Default::default()
    };

    let req = TranslationRequest {
        source_backend: "postgres".into(),
        target_backend: "mongodb".into(),
        source_model: model,
        enrichment: Some(enrichment),
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(req).await;
    assert!(outcome.success);
    let target = outcome.unified_schema.unwrap();

    let users_fields: BTreeSet<String> = target.collections["users"].fields.keys().cloned().collect();
    let embedded = &target.collections["orders"].fields["users"];
    let nested = embedded.options.get("nested_fields").and_then(|v| v.as_object()).unwrap();
    for key in nested.keys() {
        assert!(users_fields.contains(key), "embedded field {key} is not present on the target users collection");
    }
}

#[tokio::test]
async fn lossy_uuid_conversion_is_flagged_on_the_first_leg() {
    let mut model = UnifiedModel::new("postgres");
    let mut sessions = Table::new("sessions");
    sessions.columns.insert("id".into(), column("id", "uuid", true));
    model.tables.insert("sessions".into(), sessions);

    let req = TranslationRequest {
        source_backend: "postgres".into(),
        target_backend: "mysql".into(),
        source_model: model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(req).await;
    assert!(outcome.success);
    assert_eq!(outcome.report.metrics.lossy_conversions, 1);
    assert!(matches!(&outcome.warnings[0], TranslationWarning::DataLoss { field, .. } if field == "sessions.id"));

    let target = outcome.unified_schema.unwrap();
    let id_column = &target.tables["sessions"].columns["id"];
    assert_eq!(id_column.data_type, "varchar(36)");
    assert_eq!(id_column.options.get("is_lossy_conversion").and_then(|v| v.as_bool()), Some(true));
}
