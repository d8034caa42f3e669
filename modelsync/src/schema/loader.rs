use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::{AnalysisSettings, Analyzer, ANALYZER};
use crate::field::{EngineType, Field, FormatTemplate};
use crate::model::{ModelKey, ModelMeta};
use crate::schema::IndexDefinition;
use crate::{Error, Result};

/// One field in a YAML schema file. Keys other than the ones below are
/// copied verbatim into the field's mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub engine_type: EngineType,
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub analyzer: Option<String>,
    /// Sub-fields of an object or nested field
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Element field of a list
    #[serde(default)]
    pub field: Option<Box<FieldSpec>>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// A YAML schema file.
///
/// ```yaml
/// model: library.book
/// date_field: modified_on
/// fields: [title, modified_on]
/// properties:
///   - name: authors
///     type: list
///     attr: author_names
///     field: { type: string, index: not_analyzed }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaFile {
    pub model: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub using: Option<String>,
    #[serde(default)]
    pub date_field: Option<String>,
    #[serde(default)]
    pub ignore_signals: bool,
    #[serde(default)]
    pub dynamic: Option<Value>,
    /// Shorthand: model columns indexed with their default types
    #[serde(default)]
    pub fields: Vec<String>,
    /// Explicit field declarations, in mapping order
    #[serde(default)]
    pub properties: Vec<FieldSpec>,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

impl SchemaFile {
    /// Turn the file into a definition for a model from `catalog`.
    pub fn into_definition(self, catalog: &BTreeMap<ModelKey, ModelMeta>) -> Result<IndexDefinition> {
        let key: ModelKey = self.model.parse()?;
        let meta = catalog
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::SchemaConfig(format!("unknown model '{}'", key)))?;

        let mut definition = IndexDefinition::new(meta);
        for spec in &self.properties {
            let name = spec.name.clone().ok_or_else(|| {
                Error::SchemaConfig(format!("{}: every property needs a name", key))
            })?;
            definition = definition.field(name, build_field(spec, &self.analysis)?);
        }
        definition = definition.fields(self.fields).analysis(self.analysis);

        if let Some(doc_type) = self.doc_type {
            definition = definition.doc_type(doc_type);
        }
        if let Some(using) = self.using {
            definition = definition.using(using);
        }
        if let Some(date_field) = self.date_field {
            definition = definition.date_field(date_field);
        }
        if let Some(dynamic) = self.dynamic {
            definition = definition.dynamic(dynamic);
        }
        Ok(definition.ignore_signals(self.ignore_signals))
    }
}

fn build_field(spec: &FieldSpec, analysis: &AnalysisSettings) -> Result<Field> {
    let mut field = match spec.engine_type {
        EngineType::Object | EngineType::Nested => {
            let mut sub_fields = Vec::with_capacity(spec.fields.len());
            for sub in &spec.fields {
                let name = sub.name.clone().ok_or_else(|| {
                    Error::SchemaConfig("object sub-fields need a name".to_string())
                })?;
                sub_fields.push((name, build_field(sub, analysis)?));
            }
            if spec.engine_type == EngineType::Nested {
                Field::nested(sub_fields)
            } else {
                Field::object(sub_fields)
            }
        }
        EngineType::List => {
            let inner = spec.field.as_deref().ok_or_else(|| {
                Error::SchemaConfig("list fields need an element 'field'".to_string())
            })?;
            Field::list(build_field(inner, analysis)?)
        }
        EngineType::Template => {
            let source = spec.template.as_deref().ok_or_else(|| {
                Error::SchemaConfig("template fields need a 'template'".to_string())
            })?;
            Field::template(FormatTemplate::parse(source)?)
        }
        scalar => Field::of_type(scalar)?,
    };

    if let Some(attr) = &spec.attr {
        field = field.attr(attr);
    }
    for (key, value) in &spec.properties {
        field = field.property(key.clone(), value.clone());
    }
    if let Some(name) = &spec.analyzer {
        let analyzer = match analysis.get(ANALYZER, name) {
            Some(definition) => Analyzer::defined(name.clone(), definition.clone()),
            None => Analyzer::builtin(name.clone()),
        };
        field = field.analyzer(analyzer);
    }
    Ok(field)
}

/// Reads `*.yaml` / `*.yml` schema files from a directory.
pub struct SchemaLoader {
    schemas_dir: PathBuf,
}

impl SchemaLoader {
    pub fn new(schemas_dir: impl AsRef<Path>) -> Self {
        Self {
            schemas_dir: schemas_dir.as_ref().to_path_buf(),
        }
    }

    /// Every schema file in the directory, in file-name order.
    pub fn load_all(&self) -> Result<Vec<(PathBuf, SchemaFile)>> {
        if !self.schemas_dir.exists() {
            return Err(Error::Config(format!(
                "Schemas directory does not exist: {}",
                self.schemas_dir.display()
            )));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.schemas_dir)? {
            let path = entry?.path();
            if path
                .extension()
                .map_or(false, |e| e == "yaml" || e == "yml")
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file = self.load_schema(&path)?;
            files.push((path, file));
        }
        Ok(files)
    }

    pub fn load_schema(&self, path: &Path) -> Result<SchemaFile> {
        let content = fs::read_to_string(path)?;
        let schema: SchemaFile = serde_yaml::from_str(&content)?;
        Ok(schema)
    }

    /// Load every file and resolve it against the model catalog.
    pub fn load_definitions(
        &self,
        catalog: &BTreeMap<ModelKey, ModelMeta>,
    ) -> Result<Vec<IndexDefinition>> {
        self.load_all()?
            .into_iter()
            .map(|(path, file)| {
                file.into_definition(catalog).map_err(|e| match e {
                    Error::SchemaConfig(msg) => {
                        Error::SchemaConfig(format!("{}: {}", path.display(), msg))
                    }
                    other => other,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FILTER;
    use crate::model::ModelFieldKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn catalog() -> BTreeMap<ModelKey, ModelMeta> {
        let key = ModelKey::new("library", "book");
        let meta = ModelMeta::new(key.clone())
            .with_field("id", ModelFieldKind::Auto)
            .with_field("title", ModelFieldKind::Char)
            .with_field("modified_on", ModelFieldKind::DateTime);
        BTreeMap::from([(key, meta)])
    }

    #[test]
    fn test_load_schemas_from_directory() -> Result<()> {
        let temp = TempDir::new()?;
        fs::write(
            temp.path().join("book.yaml"),
            r#"
model: library.book
date_field: modified_on
fields: [title, modified_on]
properties:
  - name: authors
    type: list
    attr: author_names
    field:
      type: string
      index: not_analyzed
  - name: publisher
    type: object
    fields:
      - name: name
        type: string
        analyzer: folding
  - name: label
    type: template
    template: "{{ object.title }}"
analysis:
  analyzer:
    folding:
      type: custom
      tokenizer: standard
      filter: [lowercase, short_stop]
  filter:
    short_stop:
      type: stop
      stopwords: [a, the]
"#,
        )?;
        fs::write(temp.path().join("README.md"), "not a schema")?;

        let loader = SchemaLoader::new(temp.path());
        let definitions = loader.load_definitions(&catalog())?;
        assert_eq!(definitions.len(), 1);

        let schema = definitions.into_iter().next().map(|d| d.compile()).transpose()?;
        let schema = schema.ok_or_else(|| Error::Config("no schema".into()))?;
        assert_eq!(schema.doc_type(), "library_book");
        assert_eq!(schema.date_field(), Some("modified_on"));
        assert_eq!(
            schema.field_names(),
            vec!["authors", "publisher", "label", "title", "modified_on"]
        );

        let mapping = schema.get_mapping();
        let properties = &mapping["library_book"]["properties"];
        assert_eq!(properties["authors"], json!({"type": "string", "index": "not_analyzed"}));
        assert_eq!(
            properties["publisher"],
            json!({"type": "object", "properties": {"name": {"type": "string", "analyzer": "folding"}}})
        );
        assert_eq!(properties["label"], json!({"type": "string"}));
        assert_eq!(properties["modified_on"], json!({"type": "date"}));
        assert!(schema.analysis().get(FILTER, "short_stop").is_some());

        Ok(())
    }

    #[test]
    fn test_unknown_model_is_reported_with_path() -> Result<()> {
        let temp = TempDir::new()?;
        fs::write(temp.path().join("car.yml"), "model: garage.car\nfields: [name]\n")?;

        let err = match SchemaLoader::new(temp.path()).load_definitions(&catalog()) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("car.yml"));
        assert!(err.to_string().contains("garage.car"));
        Ok(())
    }

    #[test]
    fn test_missing_directory() {
        let loader = SchemaLoader::new("/definitely/not/here");
        assert!(loader.load_all().is_err());
    }
}
