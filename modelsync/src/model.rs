//! Source-type metadata: which record type a schema is bound to and what
//! columns that type declares.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Identifies a source type as `app_label.model_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub app_label: String,
    pub model_name: String,
}

impl ModelKey {
    pub fn new(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model_name: model_name.into(),
        }
    }

    /// Default document type: `{app_label}_{model_name}`, lower-cased.
    pub fn default_doc_type(&self) -> String {
        format!("{}_{}", self.app_label, self.model_name).to_lowercase()
    }

    /// Whether a selection filter (`app` or `app.model`) names this model.
    pub fn matches_filter(&self, filter: &str) -> bool {
        match filter.split_once('.') {
            Some((app, model)) => {
                self.app_label == app && self.model_name.eq_ignore_ascii_case(model)
            }
            None => self.app_label == filter,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model_name)
    }
}

impl FromStr for ModelKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((app, model)) if !app.is_empty() && !model.is_empty() => {
                Ok(ModelKey::new(app, model))
            }
            _ => Err(Error::Config(format!(
                "model must be written as app_label.model_name, got '{}'",
                s
            ))),
        }
    }
}

/// Declared column type of a source field, used to auto-type shorthand fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFieldKind {
    Auto,
    BigInteger,
    Boolean,
    Char,
    Date,
    DateTime,
    Email,
    File,
    FilePath,
    Float,
    Image,
    Integer,
    NullBoolean,
    PositiveInteger,
    PositiveSmallInteger,
    Slug,
    SmallInteger,
    Text,
    Time,
    Url,
    Other(String),
}

impl fmt::Display for ModelFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(name) => write!(f, "{}", name),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    pub kind: ModelFieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub key: ModelKey,
    pub fields: Vec<ModelField>,
}

impl ModelMeta {
    pub fn new(key: ModelKey) -> Self {
        Self {
            key,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: ModelFieldKind) -> Self {
        self.fields.push(ModelField {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&ModelField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_doc_type_is_lowercase() {
        let key = ModelKey::new("Library", "Book");
        assert_eq!(key.default_doc_type(), "library_book");
        assert_eq!(key.to_string(), "Library.Book");
    }

    #[test]
    fn test_matches_filter() {
        let key = ModelKey::new("garage", "car");
        assert!(key.matches_filter("garage"));
        assert!(key.matches_filter("garage.car"));
        assert!(key.matches_filter("garage.Car"));
        assert!(!key.matches_filter("garage.bike"));
        assert!(!key.matches_filter("shop"));
    }

    #[test]
    fn test_parse_model_key() {
        let key: ModelKey = "garage.car".parse().unwrap();
        assert_eq!(key, ModelKey::new("garage", "car"));
        assert!("garage".parse::<ModelKey>().is_err());
        assert!(".car".parse::<ModelKey>().is_err());
    }
}
