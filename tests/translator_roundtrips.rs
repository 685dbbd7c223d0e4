//! The two documented round-trip properties: normalize(denormalize(...))
//! preserves table names and primary keys, and aggregation(decomposition(...))
//! preserves the table name set.

use std::collections::BTreeSet;

use anchorsvc_core::model::{Column, Constraint, ConstraintReference, ConstraintType, Options, Table, UnifiedModel};
use anchorsvc_core::translator::{translate, TranslationRequest};

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

#[tokio::test]
async fn normalize_denormalize_preserves_table_names_and_primary_keys() {
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

    let original_table_names: BTreeSet<String> = model.tables.keys().cloned().collect();

    let denormalize = TranslationRequest {
        source_backend: "postgres".into(),
        target_backend: "mongodb".into(),
        source_model: model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(denormalize).await;
    assert!(outcome.success);
    let document_model = outcome.unified_schema.unwrap();

    let normalize = TranslationRequest {
        source_backend: "mongodb".into(),
        target_backend: "postgres".into(),
        source_model: document_model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(normalize).await;
    assert!(outcome.success);
    let round_tripped = outcome.unified_schema.unwrap();

    // Normalization may introduce extra child/join tables for embedded
    // objects or arrays, but every original table name must still be
    // present with its primary key intact.
    let round_tripped_names: BTreeSet<String> = round_tripped.tables.keys().cloned().collect();
    for name in &original_table_names {
        assert!(round_tripped_names.contains(name), "table {name} missing after round trip");
        let id_column = &round_tripped.tables[name].columns["id"];
        assert!(id_column.is_primary_key, "table {name} lost its primary key after round trip");
    }
}

#[tokio::test]
async fn aggregation_decomposition_preserves_the_table_name_set() {
    let mut model = UnifiedModel::new("postgres");

    let mut authors = Table::new("authors");
    authors.columns.insert("id".into(), column("id", "integer", true));
    model.tables.insert("authors".into(), authors);

    let mut books = Table::new("books");
    books.columns.insert("id".into(), column("id", "integer", true));
    books.columns.insert("author_id".into(), column("author_id", "integer", false));
    books.constraints.push(Constraint {
        name: "fk_books_authors".into(),
        constraint_type: ConstraintType::ForeignKey,
        columns: vec!["author_id".into()],
        reference: Some(ConstraintReference { table: "authors".into(), columns: vec!["id".into()], on_update: None, on_delete: None }),
        options: Options::new(),
    });
    model.tables.insert("books".into(), books);

    let original_table_names: BTreeSet<String> = model.tables.keys().cloned().collect();

    let decompose = TranslationRequest {
        source_backend: "postgres".into(),
        target_backend: "neo4j".into(),
        source_model: model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(decompose).await;
    assert!(outcome.success);
    let graph_model = outcome.unified_schema.unwrap();
    assert_eq!(
        graph_model.nodes.keys().cloned().collect::<BTreeSet<String>>(),
        original_table_names,
    );

    let aggregate = TranslationRequest {
        source_backend: "neo4j".into(),
        target_backend: "postgres".into(),
        source_model: graph_model,
        enrichment: None,
        excluded_objects: BTreeSet::new(),
    };
    let outcome = translate(aggregate).await;
    assert!(outcome.success);
    let round_tripped = outcome.unified_schema.unwrap();

    let round_tripped_names: BTreeSet<String> = round_tripped.tables.keys().cloned().collect();
    assert_eq!(round_tripped_names, original_table_names);
}
