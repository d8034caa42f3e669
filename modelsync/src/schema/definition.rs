use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::analysis::AnalysisSettings;
use crate::field::{EngineType, Field};
use crate::model::ModelMeta;
use crate::registry::SchemaRegistry;
use crate::schema::{engine_type_for, PrepareFn, Schema, DEFAULT_CONNECTION, DEFAULT_DYNAMIC};
use crate::value::{Record, SourceValue};
use crate::{Error, Result};

/// Builder for a [`Schema`].
///
/// ```
/// use modelsync::field::Field;
/// use modelsync::model::{ModelFieldKind, ModelKey, ModelMeta};
/// use modelsync::schema::IndexDefinition;
/// use modelsync::value::SourceValue;
///
/// let meta = ModelMeta::new(ModelKey::new("garage", "car"))
///     .with_field("license", ModelFieldKind::Char)
///     .with_field("type", ModelFieldKind::Integer);
///
/// let schema = IndexDefinition::new(meta)
///     .field("type", Field::string())
///     .fields(["license"])
///     .prepare("type", |_car| Ok(SourceValue::from("Sedan")))
///     .compile()
///     .unwrap();
///
/// assert_eq!(schema.doc_type(), "garage_car");
/// ```
pub struct IndexDefinition {
    meta: ModelMeta,
    fields: Vec<(String, Field)>,
    shorthand: Vec<String>,
    doc_type: Option<String>,
    using: Option<String>,
    date_field: Option<String>,
    ignore_signals: bool,
    dynamic: Value,
    hooks: Vec<(String, PrepareFn)>,
    analysis: AnalysisSettings,
}

impl IndexDefinition {
    pub fn new(meta: ModelMeta) -> Self {
        Self {
            meta,
            fields: Vec::new(),
            shorthand: Vec::new(),
            doc_type: None,
            using: None,
            date_field: None,
            ignore_signals: false,
            dynamic: Value::from(DEFAULT_DYNAMIC),
            hooks: Vec::new(),
            analysis: AnalysisSettings::new(),
        }
    }

    /// Declare a field explicitly.
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Shorthand: index these model columns, typed from the model metadata.
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shorthand.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn using(mut self, connection: impl Into<String>) -> Self {
        self.using = Some(connection.into());
        self
    }

    pub fn date_field(mut self, field: impl Into<String>) -> Self {
        self.date_field = Some(field.into());
        self
    }

    pub fn ignore_signals(mut self, ignore: bool) -> Self {
        self.ignore_signals = ignore;
        self
    }

    /// Mapping-level `dynamic` setting (`"strict"`, `true`, `false`).
    pub fn dynamic(mut self, dynamic: impl Into<Value>) -> Self {
        self.dynamic = dynamic.into();
        self
    }

    /// Extra analysis definitions shipped with the index, on top of the ones
    /// attached to fields.
    pub fn analysis(mut self, settings: AnalysisSettings) -> Self {
        self.analysis = settings;
        self
    }

    /// Use `hook` instead of attribute-path extraction for `field`.
    pub fn prepare<F>(mut self, field: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&dyn Record) -> Result<SourceValue> + Send + Sync + 'static,
    {
        self.hooks.push((field.into(), Arc::new(hook)));
        self
    }

    pub fn compile(self) -> Result<Schema> {
        let model = self.meta.key.clone();

        let mut fields = Vec::with_capacity(self.fields.len() + self.shorthand.len());
        let mut seen = HashSet::new();
        for (name, mut field) in self.fields {
            if name.is_empty() {
                return Err(Error::SchemaConfig(format!("{}: field names cannot be empty", model)));
            }
            if !seen.insert(name.clone()) {
                return Err(Error::SchemaConfig(format!(
                    "{}: field '{}' is declared twice",
                    model, name
                )));
            }
            field.bind(&name)?;
            fields.push((name, field));
        }

        // explicit declarations win over shorthand names
        for name in self.shorthand {
            if !seen.insert(name.clone()) {
                continue;
            }
            let column = self.meta.field(&name).ok_or_else(|| {
                Error::SchemaConfig(format!("{} has no field named '{}'", model, name))
            })?;
            let mut field = Field::of_type(engine_type_for(column)?)?.attr(&name);
            field.bind(&name)?;
            fields.push((name, field));
        }

        if let Some(date_field) = &self.date_field {
            let field = fields
                .iter()
                .find(|(name, _)| name == date_field)
                .map(|(_, field)| field)
                .ok_or_else(|| {
                    Error::SchemaConfig(format!(
                        "{}: date_field '{}' is not a declared field",
                        model, date_field
                    ))
                })?;
            if !field.engine_type().is_date_compatible() {
                return Err(Error::SchemaConfig(format!(
                    "{}: date_field '{}' has type '{}', expected '{}'",
                    model,
                    date_field,
                    field.engine_type(),
                    EngineType::Date
                )));
            }
        }

        let mut hooks = HashMap::new();
        for (name, hook) in self.hooks {
            if !seen.contains(&name) {
                return Err(Error::SchemaConfig(format!(
                    "{}: prepare hook for undeclared field '{}'",
                    model, name
                )));
            }
            hooks.insert(name, hook);
        }

        let mut analysis = self.analysis;
        for (_, field) in &fields {
            for analyzer in field.analyzers() {
                analysis.add_analyzer(analyzer)?;
            }
        }

        let doc_type = self.doc_type.unwrap_or_else(|| model.default_doc_type());
        if doc_type.is_empty() {
            return Err(Error::SchemaConfig(format!("{}: doc_type cannot be empty", model)));
        }

        Ok(Schema {
            model,
            doc_type,
            using: self.using.unwrap_or_else(|| DEFAULT_CONNECTION.to_string()),
            date_field: self.date_field,
            ignore_signals: self.ignore_signals,
            dynamic: self.dynamic,
            fields,
            hooks,
            analysis,
        })
    }

    /// Compile and add to `registry`.
    pub fn register(self, registry: &mut SchemaRegistry) -> Result<Arc<Schema>> {
        registry.register(self.compile()?)
    }
}
