//! Index definitions: the declared shape of one document type and its
//! compiled, immutable form.

pub mod definition;
pub mod loader;
pub mod type_map;

pub use definition::IndexDefinition;
pub use loader::{FieldSpec, SchemaFile, SchemaLoader};
pub use type_map::engine_type_for;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::analysis::AnalysisSettings;
use crate::field::Field;
use crate::model::ModelKey;
use crate::value::{Record, SourceValue};
use crate::Result;

pub const DEFAULT_CONNECTION: &str = "default";
pub const DEFAULT_DYNAMIC: &str = "strict";

/// Override hook for one field. Its return value replaces attribute-path
/// extraction for that field.
pub type PrepareFn = Arc<dyn Fn(&dyn Record) -> Result<SourceValue> + Send + Sync>;

/// Everything an engine needs to create an index type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingPayload {
    pub doc_type: String,
    /// `{doc_type: {"dynamic": .., "properties": {..}}}`
    pub mapping: Value,
    /// Analysis settings used when the index has to be created.
    pub analysis: AnalysisSettings,
}

impl MappingPayload {
    /// Replace the analysis settings, e.g. with the connection-wide set.
    pub fn with_analysis(mut self, analysis: AnalysisSettings) -> Self {
        self.analysis = analysis;
        self
    }

    /// The body under the doc-type key.
    pub fn body(&self) -> Option<&Value> {
        self.mapping.get(&self.doc_type)
    }
}

/// A compiled index definition. Immutable once built.
pub struct Schema {
    pub(crate) model: ModelKey,
    pub(crate) doc_type: String,
    pub(crate) using: String,
    pub(crate) date_field: Option<String>,
    pub(crate) ignore_signals: bool,
    pub(crate) dynamic: Value,
    pub(crate) fields: Vec<(String, Field)>,
    pub(crate) hooks: HashMap<String, PrepareFn>,
    pub(crate) analysis: AnalysisSettings,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hooks: Vec<&String> = self.hooks.keys().collect();
        hooks.sort();
        f.debug_struct("Schema")
            .field("model", &self.model.to_string())
            .field("doc_type", &self.doc_type)
            .field("using", &self.using)
            .field("date_field", &self.date_field)
            .field("ignore_signals", &self.ignore_signals)
            .field("fields", &self.field_names())
            .field("hooks", &hooks)
            .finish()
    }
}

impl Schema {
    pub fn model(&self) -> &ModelKey {
        &self.model
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Target connection name.
    pub fn using(&self) -> &str {
        &self.using
    }

    pub fn date_field(&self) -> Option<&str> {
        self.date_field.as_deref()
    }

    /// Store column holding the modification timestamp: the date field's
    /// attribute path when it has one, its name otherwise.
    pub fn date_column(&self) -> Option<String> {
        let name = self.date_field.as_deref()?;
        let field = self.field(name)?;
        Some(
            field
                .path()
                .map(ToString::to_string)
                .unwrap_or_else(|| name.to_string()),
        )
    }

    pub fn ignore_signals(&self) -> bool {
        self.ignore_signals
    }

    pub fn fields(&self) -> &[(String, Field)] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn hook(&self, field: &str) -> Option<&PrepareFn> {
        self.hooks.get(field)
    }

    /// Analysis settings referenced by this schema's fields.
    pub fn analysis(&self) -> &AnalysisSettings {
        &self.analysis
    }

    /// `{doc_type: {"dynamic": .., "properties": {name: fragment, ..}}}`
    pub fn get_mapping(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.mapping_fragment()))
            .collect();

        let mut body = Map::new();
        body.insert("dynamic".into(), self.dynamic.clone());
        body.insert("properties".into(), Value::Object(properties));

        let mut mapping = Map::new();
        mapping.insert(self.doc_type.clone(), Value::Object(body));
        Value::Object(mapping)
    }

    pub fn mapping_payload(&self) -> MappingPayload {
        MappingPayload {
            doc_type: self.doc_type.clone(),
            mapping: self.get_mapping(),
            analysis: self.analysis.stringified(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, Component, ANALYZER};
    use crate::field::Field;
    use crate::model::{ModelFieldKind, ModelMeta};
    use serde_json::json;

    fn car_meta() -> ModelMeta {
        ModelMeta::new(ModelKey::new("elasticmodels", "car"))
            .with_field("id", ModelFieldKind::Auto)
            .with_field("name", ModelFieldKind::Char)
            .with_field("modified_on", ModelFieldKind::DateTime)
    }

    #[test]
    fn test_mapping_shape() {
        let schema = IndexDefinition::new(car_meta())
            .field("color", Field::string())
            .fields(["name"])
            .compile()
            .unwrap();

        assert_eq!(schema.doc_type(), "elasticmodels_car");
        assert_eq!(schema.using(), DEFAULT_CONNECTION);
        assert_eq!(
            schema.get_mapping(),
            json!({
                "elasticmodels_car": {
                    "dynamic": "strict",
                    "properties": {
                        "color": {"type": "string"},
                        "name": {"type": "string"},
                    }
                }
            })
        );
        assert_eq!(schema.field_names(), vec!["color", "name"]);
    }

    #[test]
    fn test_payload_carries_analysis() {
        let analyzer = Analyzer::custom("folding", Component::builtin("standard"))
            .filter(Component::builtin("asciifolding"));
        let schema = IndexDefinition::new(car_meta())
            .field("name", Field::string().analyzer(analyzer))
            .compile()
            .unwrap();

        let payload = schema.mapping_payload();
        assert_eq!(payload.doc_type, "elasticmodels_car");
        assert_eq!(
            payload.body().and_then(|b| b.pointer("/properties/name/analyzer")),
            Some(&json!("folding"))
        );
        assert!(payload.analysis.get(ANALYZER, "folding").is_some());
    }

    #[test]
    fn test_date_column_follows_attribute_path() {
        let schema = IndexDefinition::new(car_meta())
            .field("updated", Field::date().attr("modified_on"))
            .date_field("updated")
            .compile()
            .unwrap();
        assert_eq!(schema.date_column().as_deref(), Some("modified_on"));

        let schema = IndexDefinition::new(car_meta())
            .fields(["modified_on"])
            .date_field("modified_on")
            .compile()
            .unwrap();
        assert_eq!(schema.date_column().as_deref(), Some("modified_on"));
    }
}
