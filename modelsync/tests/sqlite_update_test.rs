//! Windowed update from a SQLite database into the in-memory engine.

#![cfg(feature = "store-sqlite")]

use chrono::{TimeZone, Utc};
use modelsync::engine::MemoryEngine;
use modelsync::model::ModelKey;
use modelsync::schema::IndexDefinition;
use modelsync::store::{SqliteStore, TableSpec};
use modelsync::{DateRange, IndexMaintenance, SchemaRegistry, Selection};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn book_key() -> ModelKey {
    ModelKey::new("library", "book")
}

async fn store() -> SqliteStore {
    let tables = BTreeMap::from([(book_key(), TableSpec::new("books").pk_column("book_id"))]);
    let store = SqliteStore::in_memory(tables).unwrap().with_page_size(2);
    store
        .execute_batch(
            r#"
            CREATE TABLE books (
                book_id     INTEGER PRIMARY KEY,
                title       VARCHAR(200) NOT NULL,
                available   BOOLEAN,
                modified_on DATETIME NOT NULL
            );
            INSERT INTO books VALUES (1, 'Dune', 1, '2019-12-31 23:59:59');
            INSERT INTO books VALUES (2, 'Emma', 0, '2020-01-01 00:00:00');
            INSERT INTO books VALUES (3, 'Ulysses', 1, '2020-01-15 08:30:00');
            INSERT INTO books VALUES (4, 'Middlemarch', 0, '2020-02-01 00:00:00');
            "#,
        )
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_windowed_update_from_sqlite() {
    let store = store().await;
    let catalog = store.catalog().await.unwrap();

    let mut registry = SchemaRegistry::new();
    IndexDefinition::new(catalog[&book_key()].clone())
        .fields(["title", "available", "modified_on"])
        .date_field("modified_on")
        .register(&mut registry)
        .unwrap();

    let engine = Arc::new(MemoryEngine::new());
    let maintenance = IndexMaintenance::new(Arc::new(registry), engine.clone(), Arc::new(store))
        .with_batch_size(1);
    let range = DateRange::new(
        Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        Some(Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap()),
    );

    let report = maintenance.update(&Selection::all(), range).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.indexed(), 2);

    let documents = engine.documents("default", "library_book");
    assert_eq!(documents.keys().collect::<Vec<_>>(), vec!["2", "3"]);
    assert_eq!(documents["2"]["title"], json!("Emma"));
    assert_eq!(documents["2"]["available"], json!(false));
    assert_eq!(engine.bulk_calls().len(), 2);
}
