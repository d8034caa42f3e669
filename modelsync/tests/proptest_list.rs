//! Property tests for list field serialization.

use modelsync::field::Field;
use modelsync::SourceValue;
use proptest::prelude::*;
use serde_json::{json, Value};

proptest! {
    #[test]
    fn list_serialization_keeps_order(items in proptest::collection::vec(any::<i64>(), 0..50)) {
        let field = Field::list(Field::long());
        let raw = SourceValue::List(items.iter().copied().map(SourceValue::Int).collect());

        let serialized = field.serialize(raw).unwrap();
        let expected: Vec<Value> = items.iter().map(|i| json!(i)).collect();
        prop_assert_eq!(serialized, Value::Array(expected));
    }

    #[test]
    fn list_of_objects_serializes_elementwise(names in proptest::collection::vec("[a-z]{1,8}", 0..20)) {
        let field = Field::list(Field::object([("name", Field::string())]));
        let raw = SourceValue::List(
            names
                .iter()
                .map(|n| SourceValue::from_json(json!({"name": n})))
                .collect(),
        );

        let serialized = field.serialize(raw).unwrap();
        let expected: Vec<Value> = names.iter().map(|n| json!({"name": n})).collect();
        prop_assert_eq!(serialized, Value::Array(expected));
    }
}

#[test]
fn empty_list_serializes_to_empty_array() {
    let field = Field::list(Field::string());
    assert_eq!(field.serialize(SourceValue::List(Vec::new())).unwrap(), json!([]));
}
