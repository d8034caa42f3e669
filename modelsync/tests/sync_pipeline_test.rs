//! Sync pipeline behaviour against the in-memory engine and store.
//!
//! Tests: active mode through the event bus, suspension dedup and nesting,
//! refetch on upsert-after-delete, best-effort flush across groups.

use modelsync::engine::{BulkOperation, EngineCall, MemoryEngine};
use modelsync::field::Field;
use modelsync::model::{ModelFieldKind, ModelKey, ModelMeta};
use modelsync::schema::IndexDefinition;
use modelsync::store::{EventBus, LifecycleEvent, MemoryStore};
use modelsync::{Error, FailureKind, Record, Row, SchemaRegistry, SyncPipeline};
use serde_json::json;
use std::sync::Arc;

// ── Helpers ─────────────────────────────────────────────────────────────────

fn car_key() -> ModelKey {
    ModelKey::new("garage", "car")
}

fn bike_key() -> ModelKey {
    ModelKey::new("garage", "bike")
}

fn car_meta() -> ModelMeta {
    ModelMeta::new(car_key())
        .with_field("license", ModelFieldKind::Char)
        .with_field("color", ModelFieldKind::Char)
}

fn car(license: &str, color: &str) -> Arc<dyn Record> {
    Row::new(car_key(), license)
        .with("license", license)
        .with("color", color)
        .into_record()
}

struct Fixture {
    engine: Arc<MemoryEngine>,
    store: Arc<MemoryStore>,
    pipeline: Arc<SyncPipeline>,
}

fn fixture(build: impl FnOnce(&mut SchemaRegistry)) -> Fixture {
    let mut registry = SchemaRegistry::new();
    build(&mut registry);
    let engine = Arc::new(MemoryEngine::new());
    let store = Arc::new(MemoryStore::new());
    let pipeline = Arc::new(SyncPipeline::new(
        Arc::new(registry),
        engine.clone(),
        store.clone(),
    ));
    Fixture {
        engine,
        store,
        pipeline,
    }
}

fn cars_only() -> Fixture {
    fixture(|registry| {
        IndexDefinition::new(car_meta())
            .fields(["license", "color"])
            .register(registry)
            .unwrap();
    })
}

fn bulk_ops(engine: &MemoryEngine) -> Vec<(BulkOperation, String)> {
    engine
        .bulk_calls()
        .into_iter()
        .flat_map(|(_, items)| items)
        .map(|item| (item.op, item.id))
        .collect()
}

// ── Active mode ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bus_events_reach_engine() {
    let f = cars_only();
    let bus = EventBus::new();
    let ids = f.pipeline.connect(&bus);
    assert_eq!(ids.len(), 3);

    bus.emit(LifecycleEvent::Created(car("PYNERD", "red")))
        .await
        .unwrap();
    assert_eq!(
        f.engine.document("default", "garage_car", "PYNERD"),
        json!({"license": "PYNERD", "color": "red"}).as_object().cloned()
    );

    bus.emit(LifecycleEvent::Updated(car("PYNERD", "blue")))
        .await
        .unwrap();
    assert_eq!(
        f.engine.document("default", "garage_car", "PYNERD").unwrap()["color"],
        json!("blue")
    );

    bus.emit(LifecycleEvent::deleted(car_key(), "PYNERD"))
        .await
        .unwrap();
    assert!(f.engine.document("default", "garage_car", "PYNERD").is_none());
}

#[tokio::test]
async fn test_ignore_signals_schema_is_not_subscribed() {
    let f = fixture(|registry| {
        IndexDefinition::new(car_meta())
            .fields(["license"])
            .register(registry)
            .unwrap();
        IndexDefinition::new(ModelMeta::new(bike_key()))
            .field("name", Field::string())
            .ignore_signals(true)
            .register(registry)
            .unwrap();
    });
    let bus = EventBus::new();
    f.pipeline.connect(&bus);

    assert_eq!(bus.subscription_count(), 3);
    bus.emit(LifecycleEvent::Created(
        Row::new(bike_key(), 1).with("name", "Brompton").into_record(),
    ))
    .await
    .unwrap();
    assert!(f.engine.bulk_calls().is_empty());
}

#[tokio::test]
async fn test_every_schema_of_a_model_is_updated() {
    let f = fixture(|registry| {
        IndexDefinition::new(car_meta())
            .fields(["license"])
            .register(registry)
            .unwrap();
        IndexDefinition::new(car_meta())
            .fields(["license", "color"])
            .using("archive")
            .register(registry)
            .unwrap();
    });

    f.pipeline.upsert(car("A1", "red")).await.unwrap();
    assert!(f.engine.document("default", "garage_car", "A1").is_some());
    assert_eq!(
        f.engine.document("archive", "garage_car", "A1").unwrap()["color"],
        json!("red")
    );
}

#[tokio::test]
async fn test_active_build_failure_is_reported() {
    let f = fixture(|registry| {
        IndexDefinition::new(car_meta())
            .fields(["license"])
            .field("owner", Field::string().attr("owner.name"))
            .register(registry)
            .unwrap();
    });

    let err = f.pipeline.upsert(car("A1", "red")).await.unwrap_err();
    match err {
        Error::Sync(errors) => {
            assert_eq!(errors.of_kind(FailureKind::Build).count(), 1);
            assert_eq!(errors.failures[0].pk.as_deref(), Some("A1"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(f.engine.bulk_calls().is_empty());
}

// ── Suspension ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upserts_then_delete_flush_one_delete() {
    let f = cars_only();
    f.pipeline
        .suspended(async {
            f.pipeline.upsert(car("1", "red")).await?;
            f.pipeline.upsert(car("1", "blue")).await?;
            f.pipeline.delete(&car_key(), "1").await
        })
        .await
        .unwrap();

    assert_eq!(f.engine.bulk_calls().len(), 1);
    assert_eq!(bulk_ops(&f.engine), vec![(BulkOperation::Delete, "1".to_string())]);
}

#[tokio::test]
async fn test_delete_then_upsert_uses_state_at_flush() {
    let f = cars_only();
    f.store.insert(car("1", "green"));

    f.pipeline
        .suspended(async {
            f.pipeline.delete(&car_key(), "1").await?;
            f.pipeline.upsert(car("1", "stale")).await?;
            // the record changes again without an event reaching the pipeline
            f.store.insert(car("1", "fresh"));
            Ok::<_, Error>(())
        })
        .await
        .unwrap();

    assert_eq!(bulk_ops(&f.engine), vec![(BulkOperation::Upsert, "1".to_string())]);
    assert_eq!(
        f.engine.document("default", "garage_car", "1").unwrap()["color"],
        json!("fresh")
    );
}

#[tokio::test]
async fn test_delete_then_upsert_of_vanished_record_deletes() {
    let f = cars_only();
    f.pipeline
        .suspended(async {
            f.pipeline.delete(&car_key(), "9").await?;
            f.pipeline.upsert(car("9", "red")).await
        })
        .await
        .unwrap();

    assert_eq!(bulk_ops(&f.engine), vec![(BulkOperation::Delete, "9".to_string())]);
}

#[tokio::test]
async fn test_nested_suspension_flushes_on_outermost_exit() {
    let f = cars_only();
    f.pipeline.enter_suspension();
    f.pipeline.enter_suspension();
    f.pipeline.upsert(car("1", "red")).await.unwrap();

    f.pipeline.exit_suspension().await.unwrap();
    assert!(f.pipeline.is_suspended());
    assert!(f.engine.bulk_calls().is_empty());
    assert_eq!(f.pipeline.pending(), 1);

    f.pipeline.exit_suspension().await.unwrap();
    assert!(!f.pipeline.is_suspended());
    assert_eq!(f.engine.bulk_calls().len(), 1);
    assert_eq!(f.pipeline.pending(), 0);
}

#[tokio::test]
async fn test_one_bulk_per_group() {
    let f = fixture(|registry| {
        IndexDefinition::new(car_meta())
            .fields(["license"])
            .register(registry)
            .unwrap();
        IndexDefinition::new(ModelMeta::new(bike_key()))
            .field("name", Field::string())
            .register(registry)
            .unwrap();
    });

    f.pipeline
        .suspended(async {
            for i in 0..5 {
                f.pipeline.upsert(car(&i.to_string(), "red")).await?;
                f.pipeline
                    .upsert(Row::new(bike_key(), i).with("name", "bmx").into_record())
                    .await?;
            }
            Ok::<_, Error>(())
        })
        .await
        .unwrap();

    let calls = f.engine.bulk_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(_, items)| items.len() == 5));
    assert_eq!(f.engine.documents("default", "garage_bike").len(), 5);
}

#[tokio::test]
async fn test_failed_group_does_not_block_others() {
    let f = fixture(|registry| {
        IndexDefinition::new(car_meta())
            .fields(["license"])
            .register(registry)
            .unwrap();
        IndexDefinition::new(ModelMeta::new(bike_key()))
            .field("name", Field::string())
            .register(registry)
            .unwrap();
    });
    f.engine.fail_bulk_for("garage_bike");

    let err = f
        .pipeline
        .suspended(async {
            f.pipeline.upsert(car("1", "red")).await?;
            f.pipeline
                .upsert(Row::new(bike_key(), 1).with("name", "bmx").into_record())
                .await
        })
        .await
        .unwrap_err();

    let Error::Sync(errors) = err else {
        panic!("expected aggregate sync error");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.failures[0].kind, FailureKind::Group);
    assert_eq!(errors.failures[0].doc_type, "garage_bike");
    assert!(f.engine.document("default", "garage_car", "1").is_some());
}

#[tokio::test]
async fn test_build_failure_excludes_only_that_object() {
    let f = fixture(|registry| {
        IndexDefinition::new(car_meta())
            .fields(["license"])
            .field("owner", Field::string().attr("owner"))
            .register(registry)
            .unwrap();
    });

    let err = f
        .pipeline
        .suspended(async {
            f.pipeline.upsert(car("good", "red")).await?;
            f.pipeline
                .upsert(
                    Row::new(car_key(), "owned")
                        .with("license", "owned")
                        .with("owner", "Ada")
                        .into_record(),
                )
                .await
        })
        .await
        .unwrap_err();

    let Error::Sync(errors) = err else {
        panic!("expected aggregate sync error");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.failures[0].kind, FailureKind::Build);
    assert_eq!(errors.failures[0].pk.as_deref(), Some("good"));
    assert_eq!(
        f.engine.document("default", "garage_car", "owned").unwrap()["owner"],
        json!("Ada")
    );
}

#[tokio::test]
async fn test_rejected_item_is_reported_per_item() {
    let f = cars_only();
    f.engine.reject("bad", "mapper_parsing_exception");

    let err = f
        .pipeline
        .suspended(async {
            f.pipeline.upsert(car("ok", "red")).await?;
            f.pipeline.upsert(car("bad", "red")).await
        })
        .await
        .unwrap_err();

    let Error::Sync(errors) = err else {
        panic!("expected aggregate sync error");
    };
    let item = errors.of_kind(FailureKind::Item).next().unwrap();
    assert_eq!(item.pk.as_deref(), Some("bad"));
    assert!(item.reason.contains("mapper_parsing_exception"));
    assert!(f.engine.document("default", "garage_car", "ok").is_some());
}

#[tokio::test]
async fn test_unreachable_engine_fails_active_upsert() {
    let f = cars_only();
    f.engine.take_down("default");
    let err = f.pipeline.upsert(car("1", "red")).await.unwrap_err();
    assert!(matches!(err, Error::Sync(ref e) if e.of_kind(FailureKind::Group).count() == 1));

    f.engine.bring_up("default");
    f.pipeline.upsert(car("1", "red")).await.unwrap();
    assert!(matches!(
        f.engine.calls().last(),
        Some(EngineCall::Bulk { connection, .. }) if connection == "default"
    ));
}
