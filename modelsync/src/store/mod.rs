//! The relational side: where records come from and how their mutations are
//! announced.

pub mod events;
pub mod memory;
#[cfg(feature = "store-sqlite")]
pub mod sqlite;

pub use events::{EventBus, LifecycleEvent, LifecycleHandler, LifecycleKind, SubscriptionId};
pub use memory::{FetchCall, MemoryStore};
#[cfg(feature = "store-sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use crate::model::ModelKey;
use crate::value::Record;
use crate::Result;

pub type RecordStream<'a> = Pin<Box<dyn Stream<Item = Result<Arc<dyn Record>>> + Send + 'a>>;

/// A half-open time window `[start, end)`. Missing bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_bounded(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |b: Option<DateTime<Utc>>| b.map(|d| d.to_rfc3339()).unwrap_or_else(|| "*".into());
        write!(f, "[{}, {})", show(self.start), show(self.end))
    }
}

fn default_pk_column() -> String {
    "id".to_string()
}

/// Where a model's rows live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub table: String,
    #[serde(default = "default_pk_column")]
    pub pk_column: String,
}

impl TableSpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            pk_column: default_pk_column(),
        }
    }

    pub fn pk_column(mut self, column: impl Into<String>) -> Self {
        self.pk_column = column.into();
        self
    }
}

/// Read access to the source of truth.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn fetch_by_pk(&self, model: &ModelKey, pk: &str) -> Result<Option<Arc<dyn Record>>>;

    /// Records of `model` whose `date_column` falls within `range`. With no
    /// column the range must be unbounded and every record is returned.
    fn fetch_modified_between<'a>(
        &'a self,
        model: &'a ModelKey,
        date_column: Option<&'a str>,
        range: DateRange,
    ) -> RecordStream<'a>;

    /// Human-readable store name
    fn store_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_is_half_open() {
        let jan = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap();
        let range = DateRange::new(Some(jan), Some(feb));

        assert!(range.contains(jan));
        assert!(range.contains(Utc.with_ymd_and_hms(2020, 1, 31, 23, 59, 59).unwrap()));
        assert!(!range.contains(feb));
        assert!(DateRange::unbounded().contains(feb));
        assert!(!DateRange::unbounded().is_bounded());
    }
}
