//! String fields rendered from the indexed object.

use regex::Regex;

use crate::field::AttributePath;
use crate::value::SourceValue;
use crate::{Error, Result};

/// Renders a template field's string from the object being indexed.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, object: &SourceValue) -> Result<String>;
}

impl<F> TemplateRenderer for F
where
    F: Fn(&SourceValue) -> Result<String> + Send + Sync,
{
    fn render(&self, object: &SourceValue) -> Result<String> {
        self(object)
    }
}

const PLACEHOLDER: &str = r"\{\{\s*([A-Za-z_][\w.\-]*)\s*\}\}";

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Value(AttributePath),
}

/// A template with `{{ object.<path> }}` placeholders. Paths are resolved
/// with the usual accessor chain; null values render as empty text.
#[derive(Debug, Clone)]
pub struct FormatTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl FormatTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let placeholder =
            Regex::new(PLACEHOLDER).map_err(|e| Error::SchemaConfig(e.to_string()))?;
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder.captures_iter(source) {
            let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            let path = expr
                .as_str()
                .strip_prefix("object")
                .filter(|rest| rest.is_empty() || rest.starts_with('.'))
                .ok_or_else(|| {
                    Error::SchemaConfig(format!(
                        "template placeholder '{}' must start with 'object'",
                        expr.as_str()
                    ))
                })?;
            segments.push(Segment::Value(AttributePath::parse(path)));
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl TemplateRenderer for FormatTemplate {
    fn render(&self, object: &SourceValue) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Value(path) => out.push_str(&display(&path.resolve(object)?)),
            }
        }
        Ok(out.trim().to_string())
    }
}

fn display(value: &SourceValue) -> String {
    match value {
        SourceValue::Null => String::new(),
        SourceValue::Str(s) => s.clone(),
        SourceValue::List(items) => items.iter().map(display).collect::<Vec<_>>().join(", "),
        other => match other.to_json() {
            Some(serde_json::Value::String(s)) => s,
            Some(json) => json.to_string(),
            None => other.describe(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelKey;
    use crate::value::Row;

    fn book() -> SourceValue {
        SourceValue::record(
            Row::new(ModelKey::new("library", "book"), 7)
                .with("title", "Dune")
                .with(
                    "author",
                    SourceValue::from_json(serde_json::json!({"name": "Frank Herbert"})),
                )
                .with("subtitle", SourceValue::Null)
                .into_record(),
        )
    }

    #[test]
    fn test_renders_placeholders() {
        let template = FormatTemplate::parse("{{ object.title }} by {{object.author.name}}").unwrap();
        assert_eq!(template.render(&book()).unwrap(), "Dune by Frank Herbert");
    }

    #[test]
    fn test_null_renders_empty() {
        let template = FormatTemplate::parse("{{ object.title }} {{ object.subtitle }}").unwrap();
        assert_eq!(template.render(&book()).unwrap(), "Dune");
    }

    #[test]
    fn test_missing_attribute_fails() {
        let template = FormatTemplate::parse("{{ object.isbn }}").unwrap();
        assert!(matches!(
            template.render(&book()),
            Err(Error::FieldResolution { .. })
        ));
    }

    #[test]
    fn test_placeholder_must_address_object() {
        assert!(FormatTemplate::parse("{{ title }}").is_err());
    }

    #[test]
    fn test_closures_render() {
        let renderer = |obj: &SourceValue| -> Result<String> { Ok(format!("<{}>", obj.describe())) };
        assert_eq!(renderer.render(&SourceValue::from(3)).unwrap(), "<3>");
    }
}
