//! Values reachable from a source record, and the record traits themselves.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::model::ModelKey;
use crate::{Error, Result};

/// A zero-argument computation found along an attribute path.
pub type Callable = Arc<dyn Fn() -> Result<SourceValue> + Send + Sync>;

/// Anything that can be walked by an attribute path.
///
/// Each method corresponds to one accessor strategy; returning `None` means
/// the strategy does not apply and the next one is tried.
pub trait Attributes: Send + Sync {
    /// `obj.name`
    fn attr(&self, name: &str) -> Option<SourceValue>;

    /// `obj[key]`
    fn item(&self, _key: &str) -> Option<SourceValue> {
        None
    }

    /// `obj[i]`
    fn index(&self, _idx: i64) -> Option<SourceValue> {
        None
    }
}

/// A persisted source object: an attribute bag with a type and a primary key.
pub trait Record: Attributes {
    fn model(&self) -> &ModelKey;
    fn pk(&self) -> String;
}

#[derive(Clone)]
pub enum SourceValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    List(Vec<SourceValue>),
    Map(BTreeMap<String, SourceValue>),
    Object(Arc<dyn Attributes>),
    Record(Arc<dyn Record>),
    Callable(Callable),
}

impl SourceValue {
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn() -> Result<SourceValue> + Send + Sync + 'static,
    {
        SourceValue::Callable(Arc::new(f))
    }

    pub fn object<A: Attributes + 'static>(attrs: A) -> Self {
        SourceValue::Object(Arc::new(attrs))
    }

    pub fn record(record: Arc<dyn Record>) -> Self {
        SourceValue::Record(record)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SourceValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            SourceValue::DateTime(dt) => Some(*dt),
            SourceValue::Date(d) => d.and_hms_opt(0, 0, 0).map(|n| n.and_utc()),
            _ => None,
        }
    }

    /// Invoke a callable value; any other value is returned unchanged.
    pub fn invoke(self) -> Result<SourceValue> {
        match self {
            SourceValue::Callable(f) => f(),
            other => Ok(other),
        }
    }

    /// Short description used in lookup error messages.
    pub fn describe(&self) -> String {
        match self {
            SourceValue::Null => "null".to_string(),
            SourceValue::Bool(b) => b.to_string(),
            SourceValue::Int(i) => i.to_string(),
            SourceValue::Float(f) => f.to_string(),
            SourceValue::Str(s) => format!("{:?}", s),
            SourceValue::Date(d) => d.to_string(),
            SourceValue::DateTime(dt) => dt.to_rfc3339(),
            SourceValue::List(items) => format!("<list of {}>", items.len()),
            SourceValue::Map(map) => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                format!("<map {{{}}}>", keys.join(", "))
            }
            SourceValue::Object(_) => "<object>".to_string(),
            SourceValue::Record(r) => format!("<{} pk={}>", r.model(), r.pk()),
            SourceValue::Callable(_) => "<callable>".to_string(),
        }
    }

    /// Convert to a JSON document value. Objects, records and callables have
    /// no document representation and yield `None`.
    pub fn to_json(&self) -> Option<Value> {
        Some(match self {
            SourceValue::Null => Value::Null,
            SourceValue::Bool(b) => Value::Bool(*b),
            SourceValue::Int(i) => Value::from(*i),
            SourceValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SourceValue::Str(s) => Value::String(s.clone()),
            SourceValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            SourceValue::DateTime(dt) => {
                Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            SourceValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(SourceValue::to_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            SourceValue::Map(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                Value::Object(out)
            }
            SourceValue::Object(_) | SourceValue::Record(_) | SourceValue::Callable(_) => {
                return None
            }
        })
    }

    /// Build a value tree from JSON: objects become maps, arrays lists.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => SourceValue::Null,
            Value::Bool(b) => SourceValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SourceValue::Int(i),
                None => SourceValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SourceValue::Str(s),
            Value::Array(items) => {
                SourceValue::List(items.into_iter().map(SourceValue::from_json).collect())
            }
            Value::Object(map) => SourceValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, SourceValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for SourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceValue::List(items) => f.debug_list().entries(items).finish(),
            SourceValue::Map(map) => f.debug_map().entries(map).finish(),
            other => write!(f, "{}", other.describe()),
        }
    }
}

impl From<&str> for SourceValue {
    fn from(s: &str) -> Self {
        SourceValue::Str(s.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(s: String) -> Self {
        SourceValue::Str(s)
    }
}

impl From<i64> for SourceValue {
    fn from(i: i64) -> Self {
        SourceValue::Int(i)
    }
}

impl From<i32> for SourceValue {
    fn from(i: i32) -> Self {
        SourceValue::Int(i as i64)
    }
}

impl From<f64> for SourceValue {
    fn from(f: f64) -> Self {
        SourceValue::Float(f)
    }
}

impl From<bool> for SourceValue {
    fn from(b: bool) -> Self {
        SourceValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for SourceValue {
    fn from(dt: DateTime<Utc>) -> Self {
        SourceValue::DateTime(dt)
    }
}

impl From<NaiveDate> for SourceValue {
    fn from(d: NaiveDate) -> Self {
        SourceValue::Date(d)
    }
}

impl<T: Into<SourceValue>> From<Vec<T>> for SourceValue {
    fn from(items: Vec<T>) -> Self {
        SourceValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SourceValue>> From<Option<T>> for SourceValue {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(SourceValue::Null)
    }
}

/// A plain record backed by an attribute map. Stores hand these out; tests
/// build them directly.
#[derive(Clone)]
pub struct Row {
    model: ModelKey,
    pk: String,
    attrs: BTreeMap<String, SourceValue>,
}

impl Row {
    pub fn new(model: ModelKey, pk: impl fmt::Display) -> Self {
        Self {
            model,
            pk: pk.to_string(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<SourceValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<SourceValue>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&SourceValue> {
        self.attrs.get(name)
    }

    pub fn into_record(self) -> Arc<dyn Record> {
        Arc::new(self)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("model", &self.model.to_string())
            .field("pk", &self.pk)
            .field("attrs", &self.attrs)
            .finish()
    }
}

impl Attributes for Row {
    fn attr(&self, name: &str) -> Option<SourceValue> {
        match name {
            "pk" => Some(SourceValue::Str(self.pk.clone())),
            _ => self.attrs.get(name).cloned(),
        }
    }
}

impl Record for Row {
    fn model(&self) -> &ModelKey {
        &self.model
    }

    fn pk(&self) -> String {
        self.pk.clone()
    }
}

/// Errors produced while walking a value are reported as lookup failures.
pub(crate) fn lookup_error(path: &str, segment: &str, value: &SourceValue) -> Error {
    Error::FieldResolution {
        path: path.to_string(),
        segment: segment.to_string(),
        value: value.describe(),
    }
}
