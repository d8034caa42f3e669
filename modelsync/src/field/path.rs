//! Dotted attribute paths and the accessor chain used to walk them.
//!
//! Every segment is resolved by trying, in order, an item lookup
//! (`obj[seg]`), an attribute lookup (`obj.seg`) and an index lookup
//! (`obj[int(seg)]`). The first strategy that yields a value wins. A
//! callable result is invoked before moving to the next segment, and a null
//! result ends the walk early.

use std::fmt;

use crate::value::{lookup_error, SourceValue};
use crate::Result;

/// One way of stepping from a value into a child value.
pub trait Accessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn access(&self, value: &SourceValue, segment: &str) -> Option<SourceValue>;
}

/// `obj[seg]` on maps and item-capable objects.
pub struct ItemAccessor;

impl Accessor for ItemAccessor {
    fn name(&self) -> &'static str {
        "item"
    }

    fn access(&self, value: &SourceValue, segment: &str) -> Option<SourceValue> {
        match value {
            SourceValue::Map(map) => map.get(segment).cloned(),
            SourceValue::Object(obj) => obj.item(segment),
            SourceValue::Record(rec) => rec.item(segment),
            _ => None,
        }
    }
}

/// `obj.seg` on objects and records.
pub struct AttributeAccessor;

impl Accessor for AttributeAccessor {
    fn name(&self) -> &'static str {
        "attribute"
    }

    fn access(&self, value: &SourceValue, segment: &str) -> Option<SourceValue> {
        match value {
            SourceValue::Object(obj) => obj.attr(segment),
            SourceValue::Record(rec) => rec.attr(segment),
            _ => None,
        }
    }
}

/// `obj[int(seg)]` on lists, strings and index-capable objects. Negative
/// indices count from the end.
pub struct IndexAccessor;

impl IndexAccessor {
    fn normalize(idx: i64, len: usize) -> Option<usize> {
        let resolved = if idx < 0 { len as i64 + idx } else { idx };
        if resolved < 0 || resolved >= len as i64 {
            None
        } else {
            Some(resolved as usize)
        }
    }
}

impl Accessor for IndexAccessor {
    fn name(&self) -> &'static str {
        "index"
    }

    fn access(&self, value: &SourceValue, segment: &str) -> Option<SourceValue> {
        let idx: i64 = segment.parse().ok()?;
        match value {
            SourceValue::List(items) => {
                Self::normalize(idx, items.len()).map(|i| items[i].clone())
            }
            SourceValue::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Self::normalize(idx, chars.len()).map(|i| SourceValue::Str(chars[i].to_string()))
            }
            SourceValue::Object(obj) => obj.index(idx),
            SourceValue::Record(rec) => rec.index(idx),
            _ => None,
        }
    }
}

static ACCESSORS: [&dyn Accessor; 3] = [&ItemAccessor, &AttributeAccessor, &IndexAccessor];

/// A parsed dotted path such as `owner.address.0.city`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    segments: Vec<String>,
}

impl AttributePath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Walk the path from `root`.
    pub fn resolve(&self, root: &SourceValue) -> Result<SourceValue> {
        let mut current = root.clone();
        for segment in &self.segments {
            let next = ACCESSORS
                .iter()
                .find_map(|accessor| accessor.access(&current, segment))
                .ok_or_else(|| lookup_error(&self.to_string(), segment, &current))?;

            current = next.invoke()?;
            if current.is_null() {
                return Ok(SourceValue::Null);
            }
        }
        Ok(current)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}
