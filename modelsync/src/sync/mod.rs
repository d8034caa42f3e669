//! Keeping the engine in step with record mutations.
//!
//! The pipeline is either active, sending every change straight to the
//! engine, or suspended, collecting changes in a [`ChangeQueue`] until the
//! outermost suspension scope exits. Suspension nests through a depth
//! counter; only the transition back to depth 0 flushes.

pub mod queue;

pub use queue::{ChangeQueue, GroupKey, PendingChange, PendingOp};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::document::DocumentBuilder;
use crate::engine::{BulkItem, SearchEngine};
use crate::error::{FailureKind, SyncErrors, SyncFailure};
use crate::metrics;
use crate::model::ModelKey;
use crate::registry::SchemaRegistry;
use crate::schema::Schema;
use crate::store::{DataStore, EventBus, LifecycleEvent, LifecycleHandler, SubscriptionId};
use crate::value::Record;
use crate::{Error, Result};

/// Result of one bulk request: how many items the engine accepted and what
/// went wrong with the rest.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub accepted: usize,
    pub failures: Vec<SyncFailure>,
}

/// Send `items` as one bulk request. A failed request reports every item
/// under a single group failure; rejected items are reported one by one.
pub(crate) async fn send_bulk(
    engine: &dyn SearchEngine,
    connection: &str,
    doc_type: &str,
    items: Vec<BulkItem>,
) -> BulkOutcome {
    if items.is_empty() {
        return BulkOutcome::default();
    }
    let count = items.len();
    let started = Instant::now();
    let response = engine.bulk(connection, items).await;
    metrics::record_bulk_duration(connection, doc_type, started.elapsed());

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(connection, doc_type, items = count, error = %e, "Bulk request failed");
            metrics::record_bulk_group_failure(connection, doc_type, count);
            return BulkOutcome {
                accepted: 0,
                failures: vec![SyncFailure::new(
                    FailureKind::Group,
                    connection,
                    doc_type,
                    format!("bulk request of {} item(s) failed: {}", count, e),
                )],
            };
        }
    };

    let mut outcome = BulkOutcome::default();
    for item in &response.items {
        let ok = item.is_ok();
        metrics::record_bulk_item(connection, doc_type, item.op, ok);
        if ok {
            outcome.accepted += 1;
        } else {
            let reason = item
                .error
                .clone()
                .unwrap_or_else(|| format!("{} returned status {}", item.op, item.status));
            outcome.failures.push(
                SyncFailure::new(FailureKind::Item, connection, doc_type, reason).with_pk(&item.id),
            );
        }
    }
    tracing::debug!(
        connection,
        doc_type,
        items = count,
        accepted = outcome.accepted,
        "Bulk request done"
    );
    outcome
}

#[derive(Default)]
struct Suspension {
    depth: usize,
    queue: ChangeQueue,
}

pub struct SyncPipeline {
    registry: Arc<SchemaRegistry>,
    engine: Arc<dyn SearchEngine>,
    store: Arc<dyn DataStore>,
    suspension: Mutex<Suspension>,
}

impl SyncPipeline {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        engine: Arc<dyn SearchEngine>,
        store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            suspension: Mutex::new(Suspension::default()),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Subscribe to created, updated and deleted events for every model with
    /// at least one schema that listens to signals.
    pub fn connect(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionId> {
        let handler: Arc<dyn LifecycleHandler> = self.clone();
        let mut ids = Vec::new();
        for model in self.registry.models() {
            if self.listening_schemas(model).is_empty() {
                tracing::debug!(model = %model, "All schemas ignore signals, not subscribing");
                continue;
            }
            ids.push(bus.on_created(model.clone(), handler.clone()));
            ids.push(bus.on_updated(model.clone(), handler.clone()));
            ids.push(bus.on_deleted(model.clone(), handler.clone()));
        }
        tracing::info!(subscriptions = ids.len(), "Sync pipeline connected");
        ids
    }

    fn listening_schemas(&self, model: &ModelKey) -> Vec<Arc<Schema>> {
        self.registry
            .schemas_for_model(model)
            .iter()
            .filter(|s| !s.ignore_signals())
            .cloned()
            .collect()
    }

    /// Index `record` in every schema listening on its model, or queue it
    /// while suspended.
    pub async fn upsert(&self, record: Arc<dyn Record>) -> Result<()> {
        let schemas = self.listening_schemas(record.model());
        if schemas.is_empty() {
            return Ok(());
        }
        let pk = record.pk();
        {
            let mut suspension = self.suspension.lock();
            if suspension.depth > 0 {
                for schema in schemas {
                    suspension.queue.push(
                        schema,
                        pk.clone(),
                        PendingOp::Upsert {
                            record: record.clone(),
                            refetch: false,
                        },
                    );
                }
                return Ok(());
            }
        }

        let mut failures = Vec::new();
        for schema in schemas {
            let item = match DocumentBuilder::build(&schema, &record) {
                Ok(document) => BulkItem::upsert(schema.doc_type(), document),
                Err(e) => {
                    failures.push(build_failure(&schema, &pk, &e));
                    continue;
                }
            };
            let outcome = send_bulk(self.engine.as_ref(), schema.using(), schema.doc_type(), vec![item]).await;
            failures.extend(outcome.failures);
        }
        SyncErrors::new(failures).into_result()
    }

    /// Remove the document for `pk` from every schema listening on `model`,
    /// or queue the removal while suspended.
    pub async fn delete(&self, model: &ModelKey, pk: &str) -> Result<()> {
        let schemas = self.listening_schemas(model);
        if schemas.is_empty() {
            return Ok(());
        }
        {
            let mut suspension = self.suspension.lock();
            if suspension.depth > 0 {
                for schema in schemas {
                    suspension.queue.push(schema, pk.to_string(), PendingOp::Delete);
                }
                return Ok(());
            }
        }

        let mut failures = Vec::new();
        for schema in schemas {
            let item = BulkItem::delete(schema.doc_type(), pk);
            let outcome = send_bulk(self.engine.as_ref(), schema.using(), schema.doc_type(), vec![item]).await;
            failures.extend(outcome.failures);
        }
        SyncErrors::new(failures).into_result()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension.lock().depth > 0
    }

    pub fn depth(&self) -> usize {
        self.suspension.lock().depth
    }

    pub fn pending(&self) -> usize {
        self.suspension.lock().queue.len()
    }

    pub fn enter_suspension(&self) {
        let mut suspension = self.suspension.lock();
        suspension.depth += 1;
        tracing::debug!(depth = suspension.depth, "Entered suspension");
    }

    /// Leave one suspension level. Leaving the outermost level flushes the
    /// queue; every group is attempted and all failures are returned together.
    pub async fn exit_suspension(&self) -> Result<()> {
        let groups = {
            let mut suspension = self.suspension.lock();
            if suspension.depth == 0 {
                return Err(Error::Suspension(
                    "exit_suspension called while not suspended".into(),
                ));
            }
            suspension.depth -= 1;
            tracing::debug!(depth = suspension.depth, "Left suspension");
            if suspension.depth > 0 {
                return Ok(());
            }
            suspension.queue.drain()
        };
        self.flush(groups).await
    }

    /// Enter a suspension level that is left when the guard exits or drops.
    pub fn suspend(&self) -> SuspensionGuard<'_> {
        self.enter_suspension();
        SuspensionGuard {
            pipeline: self,
            armed: true,
        }
    }

    /// Run `body` with updates suspended. The queue is flushed whether or
    /// not the body fails; the body's error wins over a flush error.
    pub async fn suspended<F, T>(&self, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guard = self.suspend();
        let outcome = body.await;
        let flushed = guard.exit().await;
        match (outcome, flushed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(flush_error)) => {
                tracing::error!(error = %flush_error, "Flush after failed suspended block also failed");
                Err(e)
            }
        }
    }

    fn abandon_suspension(&self) {
        let mut suspension = self.suspension.lock();
        suspension.depth = suspension.depth.saturating_sub(1);
        if suspension.depth == 0 && !suspension.queue.is_empty() {
            let dropped = suspension.queue.len();
            suspension.queue = ChangeQueue::new();
            tracing::error!(
                changes = dropped,
                "Suspension scope dropped without exit, pending changes discarded"
            );
        }
    }

    async fn flush(&self, groups: Vec<(GroupKey, Vec<PendingChange>)>) -> Result<()> {
        let changes: usize = groups.iter().map(|(_, c)| c.len()).sum();
        if changes == 0 {
            return Ok(());
        }
        metrics::record_flush(changes);
        tracing::info!(groups = groups.len(), changes, "Flushing suspended changes");

        let results = join_all(
            groups
                .into_iter()
                .map(|(key, changes)| self.flush_group(key, changes)),
        )
        .await;
        SyncErrors::new(results.into_iter().flatten().collect()).into_result()
    }

    async fn flush_group(&self, key: GroupKey, changes: Vec<PendingChange>) -> Vec<SyncFailure> {
        let mut failures = Vec::new();
        let mut items = Vec::with_capacity(changes.len());
        for change in changes {
            let record = match change.op {
                PendingOp::Delete => {
                    items.push(BulkItem::delete(&key.doc_type, change.pk));
                    continue;
                }
                PendingOp::Upsert {
                    record,
                    refetch: false,
                } => record,
                PendingOp::Upsert { refetch: true, .. } => {
                    match self.store.fetch_by_pk(change.schema.model(), &change.pk).await {
                        Ok(Some(record)) => record,
                        Ok(None) => {
                            tracing::debug!(group = %key, pk = %change.pk, "Record gone at flush, deleting");
                            items.push(BulkItem::delete(&key.doc_type, change.pk));
                            continue;
                        }
                        Err(e) => {
                            failures.push(
                                SyncFailure::new(
                                    FailureKind::Build,
                                    &key.connection,
                                    &key.doc_type,
                                    format!("refetch failed: {}", e),
                                )
                                .with_pk(&change.pk),
                            );
                            continue;
                        }
                    }
                }
            };
            match DocumentBuilder::build(&change.schema, &record) {
                Ok(document) => items.push(BulkItem::upsert(&key.doc_type, document)),
                Err(e) => failures.push(build_failure(&change.schema, &change.pk, &e)),
            }
        }

        let outcome = send_bulk(self.engine.as_ref(), &key.connection, &key.doc_type, items).await;
        failures.extend(outcome.failures);
        failures
    }
}

pub(crate) fn build_failure(schema: &Schema, pk: &str, error: &Error) -> SyncFailure {
    metrics::record_build_failure(schema.doc_type());
    tracing::warn!(
        doc_type = schema.doc_type(),
        pk,
        error = %error,
        "Document build failed, object left out"
    );
    SyncFailure::new(FailureKind::Build, schema.using(), schema.doc_type(), error.to_string()).with_pk(pk)
}

#[async_trait]
impl LifecycleHandler for SyncPipeline {
    async fn handle(&self, event: &LifecycleEvent) -> Result<()> {
        match event {
            LifecycleEvent::Created(record) | LifecycleEvent::Updated(record) => {
                self.upsert(record.clone()).await
            }
            LifecycleEvent::Deleted { model, pk } => self.delete(model, pk).await,
        }
    }
}

/// A suspension level. Call [`exit`](Self::exit) to leave it and flush;
/// dropping the guard instead leaves the level without flushing and, at the
/// outermost level, discards the queue.
#[must_use = "dropping the guard discards pending changes"]
pub struct SuspensionGuard<'a> {
    pipeline: &'a SyncPipeline,
    armed: bool,
}

impl SuspensionGuard<'_> {
    pub async fn exit(mut self) -> Result<()> {
        self.armed = false;
        self.pipeline.exit_suspension().await
    }
}

impl Drop for SuspensionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pipeline.abandon_suspension();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::field::Field;
    use crate::model::ModelMeta;
    use crate::schema::IndexDefinition;
    use crate::store::MemoryStore;
    use crate::value::Row;

    fn car_key() -> ModelKey {
        ModelKey::new("garage", "car")
    }

    fn pipeline() -> (Arc<MemoryEngine>, SyncPipeline) {
        let mut registry = SchemaRegistry::new();
        IndexDefinition::new(ModelMeta::new(car_key()))
            .field("name", Field::string())
            .register(&mut registry)
            .unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let pipeline = SyncPipeline::new(Arc::new(registry), engine.clone(), Arc::new(MemoryStore::new()));
        (engine, pipeline)
    }

    fn car(pk: i64, name: &str) -> Arc<dyn Record> {
        Row::new(car_key(), pk).with("name", name).into_record()
    }

    #[tokio::test]
    async fn test_active_mode_sends_immediately() {
        let (engine, pipeline) = pipeline();
        pipeline.upsert(car(1, "Beetle")).await.unwrap();
        assert_eq!(engine.bulk_calls().len(), 1);
        assert!(engine.document("default", "garage_car", "1").is_some());

        pipeline.delete(&car_key(), "1").await.unwrap();
        assert!(engine.document("default", "garage_car", "1").is_none());
    }

    #[tokio::test]
    async fn test_exit_without_enter_fails() {
        let (_, pipeline) = pipeline();
        assert!(matches!(pipeline.exit_suspension().await, Err(Error::Suspension(_))));
    }

    #[tokio::test]
    async fn test_dropped_guard_discards_queue() {
        let (engine, pipeline) = pipeline();
        {
            let _guard = pipeline.suspend();
            pipeline.upsert(car(1, "Beetle")).await.unwrap();
            assert_eq!(pipeline.pending(), 1);
        }
        assert!(!pipeline.is_suspended());
        assert_eq!(pipeline.pending(), 0);
        assert!(engine.bulk_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_body_still_flushes() {
        let (engine, pipeline) = pipeline();
        let result: Result<()> = pipeline
            .suspended(async {
                pipeline.upsert(car(1, "Beetle")).await?;
                Err::<(), _>(Error::Store("body failed".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(pipeline.depth(), 0);
        assert!(engine.document("default", "garage_car", "1").is_some());
    }
}
