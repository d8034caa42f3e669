//! Document building: path fallbacks, prepare hooks, purity, YAML schemas.

use modelsync::field::{Field, FormatTemplate};
use modelsync::model::{ModelFieldKind, ModelKey, ModelMeta};
use modelsync::schema::{IndexDefinition, SchemaLoader};
use modelsync::{Attributes, DocumentBuilder, Error, Record, Row, SourceValue};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn car_key() -> ModelKey {
    ModelKey::new("garage", "car")
}

fn car_meta() -> ModelMeta {
    ModelMeta::new(car_key())
        .with_field("license", ModelFieldKind::Char)
        .with_field("type", ModelFieldKind::Integer)
}

/// Exposes `engine` only as an attribute and `specs` only as an item.
struct Chassis;

impl Attributes for Chassis {
    fn attr(&self, name: &str) -> Option<SourceValue> {
        (name == "engine").then(|| SourceValue::from("V8"))
    }

    fn item(&self, key: &str) -> Option<SourceValue> {
        (key == "specs").then(|| SourceValue::from_json(json!({"doors": 4})))
    }
}

#[test]
fn test_car_index_prepare_type() {
    let schema = IndexDefinition::new(car_meta())
        .fields(["license", "type"])
        .prepare("type", |car| {
            let kind = car.attr("type").and_then(|v| v.to_json());
            Ok(SourceValue::from(if kind == Some(json!(1)) {
                "Sedan"
            } else {
                "Truck"
            }))
        })
        .compile()
        .unwrap();

    let car = Row::new(car_key(), "PYNERD")
        .with("license", "PYNERD")
        .with("type", 1)
        .into_record();
    let doc = DocumentBuilder::build(&schema, &car).unwrap();
    assert_eq!(doc.into_value(), json!({"license": "PYNERD", "type": "Sedan"}));

    // the mapping still declares the shorthand type
    assert_eq!(
        schema.get_mapping()["garage_car"]["properties"]["type"],
        json!({"type": "integer"})
    );
}

#[test]
fn test_paths_mix_attribute_and_item_access() {
    let schema = IndexDefinition::new(car_meta())
        .field("engine", Field::string().attr("chassis.engine"))
        .field("doors", Field::integer().attr("chassis.specs.doors"))
        .field("first_owner", Field::string().attr("owners.0"))
        .compile()
        .unwrap();

    let car = Row::new(car_key(), 1)
        .with("chassis", SourceValue::object(Chassis))
        .with("owners", vec!["Ada", "Grace"])
        .into_record();
    let doc = DocumentBuilder::build(&schema, &car).unwrap();
    assert_eq!(
        doc.into_value(),
        json!({"engine": "V8", "doors": 4, "first_owner": "Ada"})
    );
}

#[test]
fn test_callables_are_invoked_along_the_path() {
    let schema = IndexDefinition::new(car_meta())
        .field("display", Field::string().attr("display_name"))
        .compile()
        .unwrap();
    let car = Row::new(car_key(), 1)
        .with(
            "display_name",
            SourceValue::callable(|| Ok(SourceValue::from("Beetle (1967)"))),
        )
        .into_record();

    let doc = DocumentBuilder::build(&schema, &car).unwrap();
    assert_eq!(doc.get("display"), Some(&json!("Beetle (1967)")));
}

#[test]
fn test_unresolvable_path_names_the_segment() {
    let schema = IndexDefinition::new(car_meta())
        .field("doors", Field::integer().attr("chassis.specs.windows"))
        .compile()
        .unwrap();
    let car = Row::new(car_key(), 1)
        .with("chassis", SourceValue::object(Chassis))
        .into_record();

    match DocumentBuilder::build(&schema, &car) {
        Err(Error::FieldResolution { segment, path, .. }) => {
            assert_eq!(segment, "windows");
            assert_eq!(path, "chassis.specs.windows");
        }
        other => panic!("expected a resolution failure, got {other:?}"),
    }
}

#[test]
fn test_build_is_pure() {
    let schema = IndexDefinition::new(car_meta())
        .fields(["license", "type"])
        .field("tags", Field::list(Field::string()))
        .compile()
        .unwrap();
    let car: Arc<dyn Record> = Row::new(car_key(), "A")
        .with("license", "A")
        .with("type", 2)
        .with("tags", vec!["red", "fast"])
        .into_record();

    let first = DocumentBuilder::build(&schema, &car).unwrap();
    let second = DocumentBuilder::build(&schema, &car).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_yaml_schema_end_to_end() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("car.yaml"),
        r#"
model: garage.car
doc_type: cars
fields: [license]
properties:
  - name: owner
    type: object
    attr: owner
    fields:
      - name: name
        type: string
        analyzer: folding
  - name: label
    type: template
    template: "{{ object.license }} ({{ object.owner.name }})"
analysis:
  analyzer:
    folding:
      type: custom
      tokenizer: standard
      filter: [lowercase]
"#,
    )
    .unwrap();

    let catalog = BTreeMap::from([(car_key(), car_meta())]);
    let definitions = SchemaLoader::new(dir.path()).load_definitions(&catalog).unwrap();
    assert_eq!(definitions.len(), 1);
    let schema = definitions.into_iter().next().unwrap().compile().unwrap();
    assert_eq!(schema.doc_type(), "cars");

    let car = Row::new(car_key(), "PYNERD")
        .with("license", "PYNERD")
        .with("owner", SourceValue::from_json(json!({"name": "Ada"})))
        .into_record();
    let doc = DocumentBuilder::build(&schema, &car).unwrap();
    assert_eq!(
        doc.into_value(),
        json!({"owner": {"name": "Ada"}, "label": "PYNERD (Ada)", "license": "PYNERD"})
    );

    let payload = schema.mapping_payload();
    assert_eq!(
        payload.mapping["cars"]["properties"]["owner"]["properties"]["name"]["analyzer"],
        json!("folding")
    );
    assert!(payload.analysis.get("analyzer", "folding").is_some());
}

#[test]
fn test_template_field_built_in_code() {
    let schema = IndexDefinition::new(car_meta())
        .field(
            "summary",
            Field::template(FormatTemplate::parse("{{object.license}}/{{ object.type }}").unwrap()),
        )
        .compile()
        .unwrap();
    let car = Row::new(car_key(), 1)
        .with("license", "XY")
        .with("type", 3)
        .into_record();
    let doc = DocumentBuilder::build(&schema, &car).unwrap();
    assert_eq!(doc.get("summary"), Some(&json!("XY/3")));
}
