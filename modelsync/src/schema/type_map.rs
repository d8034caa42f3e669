use crate::field::EngineType;
use crate::model::{ModelField, ModelFieldKind};
use crate::{Error, Result};

/// Engine type used for a shorthand field, from the source column type.
pub fn engine_type_for(field: &ModelField) -> Result<EngineType> {
    use ModelFieldKind::*;
    match &field.kind {
        Auto | Integer | PositiveInteger => Ok(EngineType::Integer),
        BigInteger | Time => Ok(EngineType::Long),
        Boolean | NullBoolean => Ok(EngineType::Boolean),
        Char | Email | File | FilePath | Image | Slug | Text | Url => Ok(EngineType::String),
        Date | DateTime => Ok(EngineType::Date),
        Float => Ok(EngineType::Double),
        SmallInteger | PositiveSmallInteger => Ok(EngineType::Short),
        Other(kind) => Err(Error::SchemaConfig(format!(
            "cannot convert model field '{}' ({}) to an engine field",
            field.name, kind
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(kind: ModelFieldKind) -> ModelField {
        ModelField {
            name: "f".into(),
            kind,
        }
    }

    #[test]
    fn test_known_kinds() {
        assert_eq!(engine_type_for(&field(ModelFieldKind::Auto)).unwrap(), EngineType::Integer);
        assert_eq!(engine_type_for(&field(ModelFieldKind::Time)).unwrap(), EngineType::Long);
        assert_eq!(engine_type_for(&field(ModelFieldKind::Url)).unwrap(), EngineType::String);
        assert_eq!(engine_type_for(&field(ModelFieldKind::DateTime)).unwrap(), EngineType::Date);
        assert_eq!(engine_type_for(&field(ModelFieldKind::Float)).unwrap(), EngineType::Double);
        assert_eq!(
            engine_type_for(&field(ModelFieldKind::PositiveSmallInteger)).unwrap(),
            EngineType::Short
        );
    }

    #[test]
    fn test_foreign_keys_are_not_mapped() {
        let err = engine_type_for(&field(ModelFieldKind::Other("ForeignKey".into()))).unwrap_err();
        assert!(err.to_string().contains("ForeignKey"));
    }
}
