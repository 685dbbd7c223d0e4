//! S3-S5: schema translation scenarios run through the public
//! `translator::translate` entry point, with no live backend involved.

use std::collections::BTreeSet;

use anchorsvc_core::model::{
    Column, Constraint, ConstraintReference, ConstraintType, Field, Options, Table, UnifiedModel,
};
use anchorsvc_core::error::TranslationWarning;
use anchorsvc_core::translator::enrichment::{AccessPattern, Enrichment, TableEnrichment};
use anchorsvc_core::translator::TranslationRequest;

fn int_column(name: &str, primary: bool) -> Column {
    Column {
        name: name.to_string(),
        data_type: "integer".to_string(),
        nullable: false,
        is_primary_key: primary,
        auto_increment: primary,
        options: Options::new(),
    }
}

#[tokio::test]
async fn postgres_to_mysql_preserves_names_types_and_fks_with_no_warnings_s3() {
    let mut model = UnifiedModel::new("postgres");

    let mut users = Table::new("users");
    users.columns.insert("id".into(), int_column("id", true));
    users.columns.insert(
        "email".into(),
        Column { name: "email".into(), data_type: "varchar(255)".into(), nullable: false, is_primary_key: false, auto_increment: false, options: Options::new() },
    );
    model.tables.insert("users".into(), users);

    let mut orders = Table::new("orders");
    orders.columns.insert("id".into(), int_column("id", true));
    orders.columns.insert("user_id".into(), int_column("user_id", false));
    orders.columns.insert(
        "total".into(),
        Column { name: "total".into(), data_type: "decimal(10,2)".into(), nullable: false, is_primary_key: false, auto_increment: false, options: Options::new() },
    );
    orders.constraints.push(Constraint {
        name: "fk_orders_users".into(),
        constraint_type: ConstraintType::ForeignKey,
        columns: vec!["user_id".into()],
        reference: Some(ConstraintReference { table: "users".into(), columns: vec!["id".into()], on_update: None, on_delete: None }),
        options: Options::new(),
    });
    model.tables.insert("orders".into(), orders);

    let req = TranslationRequest {
        source_backend: "postgres".into(),
        target_backend: "mysql".into(),
        source_model: model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = anchorsvc_core::translator::translate(req).await;

    assert!(outcome.success);
    let target = outcome.unified_schema.unwrap();
    assert_eq!(target.tables["users"].name, "users");
    assert_eq!(target.tables["orders"].name, "orders");
    assert_eq!(target.tables["orders"].columns["total"].data_type, "decimal(10,2)");
    assert!(target.tables["orders"].foreign_keys().any(|fk| fk.reference.as_ref().unwrap().table == "users"));
    // mysql has a native fixed-precision DECIMAL, so this leg is non-lossy.
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn postgres_to_mongodb_embeds_read_heavy_users_into_orders_s4() {
    let mut model = UnifiedModel::new("postgres");

    let mut users = Table::new("users");
    users.columns.insert("id".into(), int_column("id", true));
    users.columns.insert(
        "email".into(),
        Column { name: "email".into(), data_type: "varchar(255)".into(), nullable: false, is_primary_key: false, auto_increment: false, options: Options::new() },
    );
    model.tables.insert("users".into(), users);

    let mut orders = Table::new("orders");
    orders.columns.insert("id".into(), int_column("id", true));
    orders.columns.insert("user_id".into(), int_column("user_id", false));
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
    let outcome = anchorsvc_core::translator::translate(req).await;

    assert!(outcome.success);
    let target = outcome.unified_schema.unwrap();
    assert!(target.collections.contains_key("users"));
    assert!(target.collections.contains_key("orders"));
    let embedded = &target.collections["orders"].fields["users"];
    assert_eq!(embedded.field_type, "object");
    let nested = embedded.options.get("nested_fields").and_then(|v| v.as_object()).unwrap();
    assert!(nested.contains_key("id"));
    assert!(nested.contains_key("email"));
    assert_eq!(outcome.report.metrics.objects_processed, 2);
    assert_eq!(outcome.report.metrics.objects_converted, 2);
}

#[tokio::test]
async fn mongodb_to_postgres_normalizes_nested_object_and_array_s5() {
    let mut model = UnifiedModel::new("mongodb");
    let mut users = anchorsvc_core::model::Collection::new("users");
    users.fields.insert(
        "email".into(),
        Field { name: "email".into(), field_type: "string".into(), required: true, options: Options::new() },
    );
    let mut nested = serde_json::Map::new();
    nested.insert("first".into(), serde_json::Value::String("string".into()));
    nested.insert("last".into(), serde_json::Value::String("string".into()));
    let mut profile_options = Options::new();
    profile_options.insert("nested_fields".into(), serde_json::Value::Object(nested));
    users.fields.insert(
        "profile".into(),
        Field { name: "profile".into(), field_type: "object".into(), required: false, options: profile_options },
    );
    let mut tags_options = Options::new();
    tags_options.insert("array_element_type".into(), serde_json::Value::String("string".into()));
    users.fields.insert(
        "tags".into(),
        Field { name: "tags".into(), field_type: "array".into(), required: false, options: tags_options },
    );
    model.collections.insert("users".into(), users);

    let req = TranslationRequest {
        source_backend: "mongodb".into(),
        target_backend: "postgres".into(),
        source_model: model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = anchorsvc_core::translator::translate(req).await;

    assert!(outcome.success);
    let target = outcome.unified_schema.unwrap();
    assert!(target.tables.contains_key("users"));
    assert!(target.tables.contains_key("users_profile"));
    assert!(target.tables.contains_key("users_tags"));
    assert!(target.tables["users_profile"].columns.contains_key("first"));
    assert!(target.tables["users_tags"].columns.contains_key("array_index"));
    assert!(target.tables["users_profile"].columns.contains_key("users_id"));
    assert!(target.tables["users_tags"].columns.contains_key("users_id"));
}

#[test]
fn translation_warning_variants_match_the_documented_kinds() {
    let data_loss = TranslationWarning::DataLoss { field: "users.age".into(), note: "narrowed".into() };
    assert!(matches!(data_loss, TranslationWarning::DataLoss { .. }));
}
