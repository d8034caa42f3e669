//! Turning one source record into one engine document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::schema::Schema;
use crate::value::{Record, SourceValue};
use crate::Result;

/// A document ready for the engine: the record's primary key and its
/// serialized fields in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: Map<String, Value>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.source.get(field)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.source)
    }
}

pub struct DocumentBuilder;

impl DocumentBuilder {
    /// Build the document for `record`. For each field a `prepare` hook, when
    /// defined, replaces attribute-path extraction. Any field failure fails
    /// the whole document.
    pub fn build(schema: &Schema, record: &Arc<dyn Record>) -> Result<Document> {
        let root = SourceValue::Record(record.clone());
        let mut source = Map::new();
        for (name, field) in schema.fields() {
            let raw = match schema.hook(name) {
                Some(hook) => hook(record.as_ref())?,
                None => field.extract(&root)?,
            };
            source.insert(name.clone(), field.serialize(raw)?);
        }
        Ok(Document {
            id: record.pk(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::model::{ModelFieldKind, ModelKey, ModelMeta};
    use crate::schema::IndexDefinition;
    use crate::value::{Attributes, Row};
    use crate::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn car_meta() -> ModelMeta {
        ModelMeta::new(ModelKey::new("garage", "car"))
            .with_field("license", ModelFieldKind::Char)
            .with_field("type", ModelFieldKind::Integer)
    }

    fn car(license: &str, kind: i64) -> Arc<dyn Record> {
        Row::new(ModelKey::new("garage", "car"), license)
            .with("license", license)
            .with("type", kind)
            .into_record()
    }

    #[test]
    fn test_hook_replaces_extraction() {
        let schema = IndexDefinition::new(car_meta())
            .fields(["license", "type"])
            .prepare("type", |car| {
                Ok(match car.attr("type").and_then(|v| v.to_json()) {
                    Some(v) if v == json!(1) => SourceValue::from("Sedan"),
                    _ => SourceValue::from("Other"),
                })
            })
            .compile()
            .unwrap();

        let doc = DocumentBuilder::build(&schema, &car("PYNERD", 1)).unwrap();
        assert_eq!(doc.id, "PYNERD");
        assert_eq!(doc.into_value(), json!({"license": "PYNERD", "type": "Sedan"}));
    }

    #[test]
    fn test_hook_short_circuits_extract() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        // `missing` is not an attribute of the record, so extraction would fail
        let schema = IndexDefinition::new(car_meta())
            .field("missing", Field::string())
            .prepare("missing", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(SourceValue::from("hooked"))
            })
            .compile()
            .unwrap();

        let doc = DocumentBuilder::build(&schema, &car("A", 2)).unwrap();
        assert_eq!(doc.get("missing"), Some(&json!("hooked")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_field_fails_document() {
        let schema = IndexDefinition::new(car_meta())
            .fields(["license"])
            .field("owner", Field::string().attr("owner.name"))
            .compile()
            .unwrap();
        assert!(matches!(
            DocumentBuilder::build(&schema, &car("A", 2)),
            Err(Error::FieldResolution { .. })
        ));
    }

    #[test]
    fn test_declaration_order_is_kept() {
        let schema = IndexDefinition::new(car_meta())
            .field("type", Field::integer())
            .fields(["license"])
            .compile()
            .unwrap();
        let doc = DocumentBuilder::build(&schema, &car("B", 3)).unwrap();
        let keys: Vec<&String> = doc.source.keys().collect();
        assert_eq!(keys, vec!["type", "license"]);
    }
}
