//! Field descriptors: how one document attribute is extracted from a source
//! object, serialized into the document, and described in the engine mapping.

pub mod path;
pub mod template;

pub use path::{Accessor, AttributeAccessor, AttributePath, IndexAccessor, ItemAccessor};
pub use template::{FormatTemplate, TemplateRenderer};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::analysis::Analyzer;
use crate::value::{lookup_error, SourceValue};
use crate::{Error, Result};

/// Engine-side type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    String,
    Float,
    Double,
    Byte,
    Short,
    Integer,
    Long,
    Date,
    Boolean,
    Object,
    Nested,
    List,
    Template,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Float => "float",
            Self::Double => "double",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Nested => "nested",
            Self::List => "list",
            Self::Template => "template",
        }
    }

    pub fn is_date_compatible(&self) -> bool {
        matches!(self, Self::Date)
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
enum FieldKind {
    Scalar(EngineType),
    Object {
        fields: Vec<(String, Field)>,
        nested: bool,
    },
    List(Box<Field>),
    Template(Arc<dyn TemplateRenderer>),
}

#[derive(Clone)]
pub struct Field {
    name: Option<String>,
    path: Option<AttributePath>,
    kind: FieldKind,
    properties: Map<String, Value>,
    analyzer: Option<Analyzer>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("path", &self.path.as_ref().map(ToString::to_string))
            .field("engine_type", &self.engine_type())
            .field("properties", &self.properties)
            .finish()
    }
}

impl Field {
    fn scalar(engine_type: EngineType) -> Self {
        Self {
            name: None,
            path: None,
            kind: FieldKind::Scalar(engine_type),
            properties: Map::new(),
            analyzer: None,
        }
    }

    pub fn string() -> Self {
        Self::scalar(EngineType::String)
    }

    pub fn float() -> Self {
        Self::scalar(EngineType::Float)
    }

    pub fn double() -> Self {
        Self::scalar(EngineType::Double)
    }

    pub fn byte() -> Self {
        Self::scalar(EngineType::Byte)
    }

    pub fn short() -> Self {
        Self::scalar(EngineType::Short)
    }

    pub fn integer() -> Self {
        Self::scalar(EngineType::Integer)
    }

    pub fn long() -> Self {
        Self::scalar(EngineType::Long)
    }

    pub fn date() -> Self {
        Self::scalar(EngineType::Date)
    }

    pub fn boolean() -> Self {
        Self::scalar(EngineType::Boolean)
    }

    /// A scalar field of the given engine type. Composite types need their
    /// dedicated constructors.
    pub fn of_type(engine_type: EngineType) -> Result<Self> {
        match engine_type {
            EngineType::Object | EngineType::Nested | EngineType::List | EngineType::Template => {
                Err(Error::SchemaConfig(format!(
                    "'{}' fields cannot be built from a type name alone",
                    engine_type
                )))
            }
            scalar => Ok(Self::scalar(scalar)),
        }
    }

    fn composite<I, S>(fields: I, nested: bool) -> Self
    where
        I: IntoIterator<Item = (S, Field)>,
        S: Into<String>,
    {
        Self {
            name: None,
            path: None,
            kind: FieldKind::Object {
                fields: fields.into_iter().map(|(n, f)| (n.into(), f)).collect(),
                nested,
            },
            properties: Map::new(),
            analyzer: None,
        }
    }

    pub fn object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Field)>,
        S: Into<String>,
    {
        Self::composite(fields, false)
    }

    pub fn nested<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Field)>,
        S: Into<String>,
    {
        Self::composite(fields, true)
    }

    /// Wrap `inner` so it is applied to every element of an iterable value.
    /// A path set on `inner` moves to the list itself.
    pub fn list(mut inner: Field) -> Self {
        let path = inner.path.take();
        Self {
            name: None,
            path,
            kind: FieldKind::List(Box::new(inner)),
            properties: Map::new(),
            analyzer: None,
        }
    }

    /// A string field rendered from the whole indexed object.
    pub fn template<T: TemplateRenderer + 'static>(renderer: T) -> Self {
        Self {
            name: None,
            path: None,
            kind: FieldKind::Template(Arc::new(renderer)),
            properties: Map::new(),
            analyzer: None,
        }
    }

    /// Dotted attribute path to read from; defaults to the field name.
    pub fn attr(mut self, path: &str) -> Self {
        let parsed = AttributePath::parse(path);
        self.path = if parsed.is_empty() { None } else { Some(parsed) };
        self
    }

    /// Engine-specific mapping option copied verbatim into the mapping.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn analyzer(mut self, analyzer: Analyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> Option<&AttributePath> {
        self.path.as_ref()
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn engine_type(&self) -> EngineType {
        match &self.kind {
            FieldKind::Scalar(t) => *t,
            FieldKind::Object { nested: false, .. } => EngineType::Object,
            FieldKind::Object { nested: true, .. } => EngineType::Nested,
            FieldKind::List(_) => EngineType::List,
            FieldKind::Template(_) => EngineType::Template,
        }
    }

    /// The wrapped field of a list.
    pub fn child(&self) -> Option<&Field> {
        match &self.kind {
            FieldKind::List(inner) => Some(inner),
            _ => None,
        }
    }

    /// Sub-fields of an object or nested field, in declaration order.
    pub fn sub_fields(&self) -> &[(String, Field)] {
        match &self.kind {
            FieldKind::Object { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Assign the field its name and validate its shape. Called once when
    /// the owning schema is compiled.
    pub(crate) fn bind(&mut self, name: &str) -> Result<()> {
        self.name = Some(name.to_string());
        match &mut self.kind {
            FieldKind::Object { fields, .. } => {
                if fields.is_empty() {
                    return Err(Error::SchemaConfig(format!(
                        "{} field '{}' needs at least one sub-field",
                        self.engine_type_name(),
                        name
                    )));
                }
                let mut seen = std::collections::HashSet::new();
                for (sub_name, sub_field) in fields.iter_mut() {
                    if !seen.insert(sub_name.clone()) {
                        return Err(Error::SchemaConfig(format!(
                            "sub-field '{}' is declared twice on '{}'",
                            sub_name, name
                        )));
                    }
                    sub_field.bind(sub_name)?;
                }
            }
            FieldKind::List(inner) => inner.bind(name)?,
            FieldKind::Scalar(_) | FieldKind::Template(_) => {}
        }
        Ok(())
    }

    fn engine_type_name(&self) -> &'static str {
        self.engine_type().as_str()
    }

    fn resolved_path(&self) -> AttributePath {
        match (&self.path, &self.name) {
            (Some(path), _) => path.clone(),
            (None, Some(name)) => AttributePath::parse(name),
            (None, None) => AttributePath::parse(""),
        }
    }

    /// Resolve the raw value for this field from `source`.
    pub fn extract(&self, source: &SourceValue) -> Result<SourceValue> {
        match &self.kind {
            FieldKind::Template(renderer) => {
                let context = match &self.path {
                    Some(path) => path.resolve(source)?,
                    None => source.clone(),
                };
                Ok(SourceValue::Str(renderer.render(&context)?))
            }
            _ => self.resolved_path().resolve(source),
        }
    }

    /// Turn a raw value into its document representation. Null passes
    /// through except for object and nested fields, whose sub-fields cannot
    /// be looked up on it.
    pub fn serialize(&self, raw: SourceValue) -> Result<Value> {
        match &self.kind {
            FieldKind::Object { fields, .. } if raw.is_null() => {
                let segment = fields.first().map(|(name, _)| name.as_str()).unwrap_or_default();
                Err(lookup_error(
                    &self.resolved_path().to_string(),
                    segment,
                    &raw,
                ))
            }
            _ if raw.is_null() => Ok(Value::Null),
            FieldKind::List(inner) => match raw {
                SourceValue::List(items) => items
                    .into_iter()
                    .map(|item| inner.serialize(item))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array),
                other => Err(self.serialization_error(format!(
                    "expected an iterable value, got {}",
                    other.describe()
                ))),
            },
            FieldKind::Object { fields, .. } => {
                let mut doc = Map::new();
                for (name, field) in fields {
                    let value = field.extract(&raw)?;
                    doc.insert(name.clone(), field.serialize(value)?);
                }
                Ok(Value::Object(doc))
            }
            FieldKind::Scalar(_) | FieldKind::Template(_) => raw.to_json().ok_or_else(|| {
                self.serialization_error(format!(
                    "{} has no document representation",
                    raw.describe()
                ))
            }),
        }
    }

    fn serialization_error(&self, reason: String) -> Error {
        Error::FieldSerialization {
            field: self.name.clone().unwrap_or_default(),
            reason,
        }
    }

    /// The engine mapping subtree describing this field.
    pub fn mapping_fragment(&self) -> Value {
        let mut mapping = match &self.kind {
            FieldKind::List(inner) => match inner.mapping_fragment() {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            FieldKind::Object { fields, .. } => {
                let mut map = Map::new();
                map.insert("type".into(), Value::from(self.engine_type_name()));
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.mapping_fragment()))
                    .collect();
                map.insert("properties".into(), Value::Object(properties));
                map
            }
            FieldKind::Template(_) => {
                let mut map = Map::new();
                map.insert("type".into(), Value::from(EngineType::String.as_str()));
                map
            }
            FieldKind::Scalar(t) => {
                let mut map = Map::new();
                map.insert("type".into(), Value::from(t.as_str()));
                map
            }
        };
        for (key, value) in &self.properties {
            mapping.insert(key.clone(), value.clone());
        }
        if let Some(analyzer) = &self.analyzer {
            mapping.insert("analyzer".into(), Value::from(analyzer.name.clone()));
        }
        Value::Object(mapping)
    }

    /// Analyzers attached to this field and all of its descendants.
    pub fn analyzers(&self) -> Vec<&Analyzer> {
        let mut found: Vec<&Analyzer> = self.analyzer.iter().collect();
        match &self.kind {
            FieldKind::List(inner) => found.extend(inner.analyzers()),
            FieldKind::Object { fields, .. } => {
                for (_, field) in fields {
                    found.extend(field.analyzers());
                }
            }
            FieldKind::Scalar(_) | FieldKind::Template(_) => {}
        }
        found
    }
}
