use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::{ModelKey, ModelMeta};
use crate::store::{DataStore, DateRange, RecordStream};
use crate::value::{Attributes, Record};
use crate::{Error, Result};

/// A recorded `fetch_modified_between` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub model: ModelKey,
    pub date_column: Option<String>,
    pub range: DateRange,
}

#[derive(Default)]
struct State {
    models: BTreeMap<ModelKey, ModelMeta>,
    // insertion order per model
    records: BTreeMap<ModelKey, Vec<Arc<dyn Record>>>,
    fetches: Vec<FetchCall>,
}

/// An in-process store for tests and examples.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model(&self, meta: ModelMeta) {
        self.state.lock().models.insert(meta.key.clone(), meta);
    }

    pub fn catalog(&self) -> BTreeMap<ModelKey, ModelMeta> {
        self.state.lock().models.clone()
    }

    /// Insert a record, replacing any record with the same primary key.
    pub fn insert(&self, record: Arc<dyn Record>) {
        let mut state = self.state.lock();
        let records = state.records.entry(record.model().clone()).or_default();
        let pk = record.pk();
        match records.iter_mut().find(|r| r.pk() == pk) {
            Some(slot) => *slot = record,
            None => records.push(record),
        }
    }

    pub fn remove(&self, model: &ModelKey, pk: &str) -> Option<Arc<dyn Record>> {
        let mut state = self.state.lock();
        let records = state.records.get_mut(model)?;
        let position = records.iter().position(|r| r.pk() == pk)?;
        Some(records.remove(position))
    }

    pub fn len(&self, model: &ModelKey) -> usize {
        self.state.lock().records.get(model).map_or(0, Vec::len)
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        self.state.lock().fetches.clone()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn fetch_by_pk(&self, model: &ModelKey, pk: &str) -> Result<Option<Arc<dyn Record>>> {
        Ok(self
            .state
            .lock()
            .records
            .get(model)
            .and_then(|records| records.iter().find(|r| r.pk() == pk).cloned()))
    }

    fn fetch_modified_between<'a>(
        &'a self,
        model: &'a ModelKey,
        date_column: Option<&'a str>,
        range: DateRange,
    ) -> RecordStream<'a> {
        let selected: Result<Vec<Arc<dyn Record>>> = {
            let mut state = self.state.lock();
            state.fetches.push(FetchCall {
                model: model.clone(),
                date_column: date_column.map(str::to_string),
                range,
            });
            let records = state.records.get(model).cloned().unwrap_or_default();
            match (date_column, range.is_bounded()) {
                (_, false) => Ok(records),
                (None, true) => Err(Error::Store(format!(
                    "bounded fetch of {} needs a date column",
                    model
                ))),
                (Some(column), true) => Ok(records
                    .into_iter()
                    .filter(|r| {
                        r.attr(column)
                            .and_then(|v| v.as_datetime())
                            .map_or(false, |at| range.contains(at))
                    })
                    .collect()),
            }
        };

        match selected {
            Ok(records) => Box::pin(futures::stream::iter(records.into_iter().map(Ok::<_, Error>))),
            Err(e) => Box::pin(futures::stream::once(async move { Err::<Arc<dyn Record>, _>(e) })),
        }
    }

    fn store_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Row;
    use chrono::{TimeZone, Utc};
    use futures::TryStreamExt;

    fn book(pk: i64, day: u32) -> Arc<dyn Record> {
        Row::new(ModelKey::new("library", "book"), pk)
            .with("modified_on", Utc.with_ymd_and_hms(2020, 1, day, 12, 0, 0).unwrap())
            .into_record()
    }

    #[tokio::test]
    async fn test_fetch_window() {
        let store = MemoryStore::new();
        for (pk, day) in [(1, 1), (2, 15), (3, 31)] {
            store.insert(book(pk, day));
        }
        let key = ModelKey::new("library", "book");
        let range = DateRange::new(
            Some(Utc.with_ymd_and_hms(2020, 1, 10, 0, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2020, 1, 31, 12, 0, 0).unwrap()),
        );

        let records: Vec<_> = store
            .fetch_modified_between(&key, Some("modified_on"), range)
            .try_collect()
            .await
            .unwrap();
        let pks: Vec<String> = records.iter().map(|r| r.pk()).collect();
        assert_eq!(pks, vec!["2"]);
        assert_eq!(store.fetches()[0].range, range);
    }

    #[tokio::test]
    async fn test_insert_replaces_and_remove() {
        let store = MemoryStore::new();
        let key = ModelKey::new("library", "book");
        store.insert(book(1, 1));
        store.insert(book(1, 2));
        assert_eq!(store.len(&key), 1);
        assert!(store.fetch_by_pk(&key, "1").await.unwrap().is_some());

        store.remove(&key, "1");
        assert!(store.fetch_by_pk(&key, "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bounded_fetch_without_column_fails() {
        let store = MemoryStore::new();
        let key = ModelKey::new("library", "book");
        let range = DateRange::new(Some(Utc::now()), None);
        let result: Result<Vec<_>> = store.fetch_modified_between(&key, None, range).try_collect().await;
        assert!(result.is_err());
    }
}
