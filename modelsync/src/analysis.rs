//! Analyzer, tokenizer and filter definitions, and comparison against what a
//! live index reports.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::schema::Schema;
use crate::{Error, Result};

pub const ANALYZER: &str = "analyzer";
pub const TOKENIZER: &str = "tokenizer";
pub const FILTER: &str = "filter";
pub const CHAR_FILTER: &str = "char_filter";

/// A named tokenizer, token filter or char filter. Built-in components have
/// no definition and are only referenced by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub definition: Option<Value>,
}

impl Component {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: None,
        }
    }

    pub fn custom(name: impl Into<String>, definition: Value) -> Self {
        Self {
            name: name.into(),
            definition: Some(definition),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum AnalyzerKind {
    Builtin,
    Custom {
        tokenizer: Component,
        filters: Vec<Component>,
        char_filters: Vec<Component>,
    },
    Defined(Value),
}

/// An analyzer attached to a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Analyzer {
    pub name: String,
    kind: AnalyzerKind,
}

impl Analyzer {
    /// An analyzer the engine ships with (`standard`, `english`, ...).
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AnalyzerKind::Builtin,
        }
    }

    /// A `custom` analyzer assembled from a tokenizer and filters.
    pub fn custom(name: impl Into<String>, tokenizer: Component) -> Self {
        Self {
            name: name.into(),
            kind: AnalyzerKind::Custom {
                tokenizer,
                filters: Vec::new(),
                char_filters: Vec::new(),
            },
        }
    }

    /// An analyzer with a raw definition, e.g. `{"type": "pattern", ...}`.
    pub fn defined(name: impl Into<String>, definition: Value) -> Self {
        Self {
            name: name.into(),
            kind: AnalyzerKind::Defined(definition),
        }
    }

    pub fn filter(mut self, filter: Component) -> Self {
        if let AnalyzerKind::Custom { filters, .. } = &mut self.kind {
            filters.push(filter);
        }
        self
    }

    pub fn char_filter(mut self, char_filter: Component) -> Self {
        if let AnalyzerKind::Custom { char_filters, .. } = &mut self.kind {
            char_filters.push(char_filter);
        }
        self
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.kind, AnalyzerKind::Builtin)
    }

    /// Every (section, name, definition) triple this analyzer contributes to
    /// the index analysis settings.
    pub fn definitions(&self) -> Vec<(&'static str, String, Value)> {
        let mut defs = Vec::new();
        match &self.kind {
            AnalyzerKind::Builtin => {}
            AnalyzerKind::Defined(def) => defs.push((ANALYZER, self.name.clone(), def.clone())),
            AnalyzerKind::Custom {
                tokenizer,
                filters,
                char_filters,
            } => {
                let mut def = serde_json::Map::new();
                def.insert("type".into(), Value::from("custom"));
                def.insert("tokenizer".into(), Value::from(tokenizer.name.clone()));
                if !filters.is_empty() {
                    def.insert(
                        "filter".into(),
                        filters.iter().map(|f| Value::from(f.name.clone())).collect(),
                    );
                }
                if !char_filters.is_empty() {
                    def.insert(
                        "char_filter".into(),
                        char_filters.iter().map(|f| Value::from(f.name.clone())).collect(),
                    );
                }
                defs.push((ANALYZER, self.name.clone(), Value::Object(def)));

                let components = std::iter::once((TOKENIZER, tokenizer))
                    .chain(filters.iter().map(|f| (FILTER, f)))
                    .chain(char_filters.iter().map(|f| (CHAR_FILTER, f)));
                for (section, component) in components {
                    if let Some(d) = &component.definition {
                        defs.push((section, component.name.clone(), d.clone()));
                    }
                }
            }
        }
        defs
    }
}

/// Index analysis settings: section (`analyzer`, `tokenizer`, ...) to
/// name to definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisSettings {
    sections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl AnalysisSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }

    pub fn section(&self, section: &str) -> Option<&BTreeMap<String, Value>> {
        self.sections.get(section)
    }

    pub fn get(&self, section: &str, name: &str) -> Option<&Value> {
        self.sections.get(section).and_then(|s| s.get(name))
    }

    /// Insert a definition; the same name with a different definition in the
    /// same section is a conflict.
    pub fn insert(&mut self, section: &str, name: &str, definition: Value) -> Result<()> {
        let entries = self.sections.entry(section.to_string()).or_default();
        match entries.get(name) {
            Some(existing) if stringify(existing) != stringify(&definition) => {
                Err(Error::SchemaConflict(format!(
                    "{} '{}' is defined twice with different settings",
                    section, name
                )))
            }
            Some(_) => Ok(()),
            None => {
                entries.insert(name.to_string(), definition);
                Ok(())
            }
        }
    }

    pub fn add_analyzer(&mut self, analyzer: &Analyzer) -> Result<()> {
        for (section, name, def) in analyzer.definitions() {
            self.insert(section, &name, def)?;
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &AnalysisSettings) -> Result<()> {
        for (section, entries) in &other.sections {
            for (name, def) in entries {
                self.insert(section, name, def.clone())?;
            }
        }
        Ok(())
    }

    /// Same settings with every scalar rendered as a string, which is how
    /// engines report index settings back.
    pub fn stringified(&self) -> Self {
        Self {
            sections: self
                .sections
                .iter()
                .map(|(section, entries)| {
                    (
                        section.clone(),
                        entries
                            .iter()
                            .map(|(name, def)| (name.clone(), stringify(def)))
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Render every scalar inside `value` as a string.
pub fn stringify(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(_) => value.clone(),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(stringify).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), stringify(v)))
                .collect(),
        ),
    }
}

/// Analysis settings declared by a set of schemas (normally every schema on
/// one connection, since analysis is index-wide).
pub fn collect_analysis<'a>(schemas: impl IntoIterator<Item = &'a Schema>) -> Result<AnalysisSettings> {
    let mut settings = AnalysisSettings::new();
    for schema in schemas {
        settings.merge(schema.analysis())?;
    }
    Ok(settings.stringified())
}

/// Every declared section and name exists in the live settings with an
/// identical definition. Extra live entries are allowed.
pub fn is_analysis_compatible(declared: &AnalysisSettings, live: &AnalysisSettings) -> bool {
    let declared = declared.stringified();
    let live = live.stringified();
    declared.sections.iter().all(|(section, entries)| {
        entries.iter().all(|(name, def)| live.get(section, name) == Some(def))
    })
}

/// Live settings overlaid with the declared ones; declared definitions win.
pub fn combined_analysis(declared: &AnalysisSettings, live: &AnalysisSettings) -> AnalysisSettings {
    let mut combined = live.stringified();
    for (section, entries) in &declared.stringified().sections {
        let target = combined.sections.entry(section.clone()).or_default();
        for (name, def) in entries {
            target.insert(name.clone(), def.clone());
        }
    }
    combined
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Declared but missing from the live index
    Added,
    /// Present live but no longer declared
    Removed,
    /// Present on both sides with different settings
    Changed,
}

/// One difference between live (old) and declared (new) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub change_type: ChangeType,
    pub path: String,
    pub live: Option<Value>,
    pub declared: Option<Value>,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |v: &Option<Value>| v.as_ref().map(Value::to_string).unwrap_or_default();
        match self.change_type {
            ChangeType::Added => write!(f, "+ {}: {}", self.path, render(&self.declared)),
            ChangeType::Removed => write!(f, "- {}: {}", self.path, render(&self.live)),
            ChangeType::Changed => write!(
                f,
                "- {}: {}\n+ {}: {}",
                self.path,
                render(&self.live),
                self.path,
                render(&self.declared)
            ),
        }
    }
}

/// Structural diff between two JSON trees, recursing through objects.
pub fn detect_changes(live: &Value, declared: &Value, path: &str) -> Vec<Change> {
    let mut changes = Vec::new();
    detect_changes_recursive(live, declared, path, &mut changes);
    changes
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn detect_changes_recursive(live: &Value, declared: &Value, path: &str, changes: &mut Vec<Change>) {
    match (live, declared) {
        (Value::Object(live_map), Value::Object(declared_map)) => {
            for (key, live_value) in live_map {
                if !declared_map.contains_key(key) {
                    changes.push(Change {
                        change_type: ChangeType::Removed,
                        path: join_path(path, key),
                        live: Some(live_value.clone()),
                        declared: None,
                    });
                }
            }
            for (key, declared_value) in declared_map {
                let field_path = join_path(path, key);
                match live_map.get(key) {
                    None => changes.push(Change {
                        change_type: ChangeType::Added,
                        path: field_path,
                        live: None,
                        declared: Some(declared_value.clone()),
                    }),
                    Some(live_value) if live_value != declared_value => {
                        if live_value.is_object() && declared_value.is_object() {
                            detect_changes_recursive(live_value, declared_value, &field_path, changes);
                        } else {
                            changes.push(Change {
                                change_type: ChangeType::Changed,
                                path: field_path,
                                live: Some(live_value.clone()),
                                declared: Some(declared_value.clone()),
                            });
                        }
                    }
                    Some(_) => {}
                }
            }
        }
        _ if live != declared => changes.push(Change {
            change_type: ChangeType::Changed,
            path: path.to_string(),
            live: Some(live.clone()),
            declared: Some(declared.clone()),
        }),
        _ => {}
    }
}

/// Differences between the live analysis and the declared one. Live-only
/// entries are left out since [`combined_analysis`] keeps them.
pub fn diff_analysis(declared: &AnalysisSettings, live: &AnalysisSettings) -> Vec<Change> {
    let live = live.stringified();
    let mut changes = Vec::new();
    for (section, entries) in &declared.stringified().sections {
        for (name, def) in entries {
            let path = format!("{}.{}", section, name);
            match live.get(section, name) {
                Some(live_def) => detect_changes_recursive(live_def, def, &path, &mut changes),
                None => changes.push(Change {
                    change_type: ChangeType::Added,
                    path,
                    live: None,
                    declared: Some(def.clone()),
                }),
            }
        }
    }
    changes
}

/// Render changes as a line diff, one `-`/`+` line per side.
pub fn render_changes(changes: &[Change]) -> String {
    changes
        .iter()
        .map(|c| format!("\n{}", c))
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn folding() -> Analyzer {
        Analyzer::custom("folding", Component::builtin("standard"))
            .filter(Component::builtin("lowercase"))
            .filter(Component::custom(
                "short_stop",
                json!({"type": "stop", "stopwords": ["a", "the"]}),
            ))
    }

    #[test]
    fn test_custom_analyzer_definitions() {
        let mut settings = AnalysisSettings::new();
        settings.add_analyzer(&folding()).unwrap();

        assert_eq!(
            settings.get(ANALYZER, "folding"),
            Some(&json!({
                "type": "custom",
                "tokenizer": "standard",
                "filter": ["lowercase", "short_stop"]
            }))
        );
        assert_eq!(
            settings.get(FILTER, "short_stop"),
            Some(&json!({"type": "stop", "stopwords": ["a", "the"]}))
        );
        assert!(settings.section(TOKENIZER).is_none());
    }

    #[test]
    fn test_builtin_analyzer_contributes_nothing() {
        let mut settings = AnalysisSettings::new();
        settings.add_analyzer(&Analyzer::builtin("english")).unwrap();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_conflicting_definitions_rejected() {
        let mut settings = AnalysisSettings::new();
        settings.insert(FILTER, "stop", json!({"type": "stop"})).unwrap();
        settings.insert(FILTER, "stop", json!({"type": "stop"})).unwrap();
        assert!(matches!(
            settings.insert(FILTER, "stop", json!({"type": "length"})),
            Err(Error::SchemaConflict(_))
        ));
    }

    #[test]
    fn test_stringify() {
        assert_eq!(
            stringify(&json!({"a": 1, "b": [true, "c", 2.5]})),
            json!({"a": "1", "b": ["true", "c", "2.5"]})
        );
    }

    #[test]
    fn test_compatibility_and_combination() {
        let mut declared = AnalysisSettings::new();
        declared.insert(FILTER, "len", json!({"type": "length", "max": 10})).unwrap();

        let mut live = AnalysisSettings::new();
        live.insert(FILTER, "len", json!({"type": "length", "max": "10"})).unwrap();
        live.insert(FILTER, "other", json!({"type": "lowercase"})).unwrap();
        assert!(is_analysis_compatible(&declared, &live));

        let mut drifted = AnalysisSettings::new();
        drifted.insert(FILTER, "len", json!({"type": "length", "max": "5"})).unwrap();
        assert!(!is_analysis_compatible(&declared, &drifted));
        assert!(!is_analysis_compatible(&declared, &AnalysisSettings::new()));

        let combined = combined_analysis(&declared, &drifted);
        assert_eq!(
            combined.get(FILTER, "len"),
            Some(&json!({"type": "length", "max": "10"}))
        );
    }

    #[test]
    fn test_diff_reports_paths() {
        let mut declared = AnalysisSettings::new();
        declared.insert(FILTER, "len", json!({"type": "length", "max": 10})).unwrap();
        let mut live = AnalysisSettings::new();
        live.insert(FILTER, "len", json!({"type": "length", "max": 5})).unwrap();
        live.insert(TOKENIZER, "old", json!({"type": "ngram"})).unwrap();

        let changes = diff_analysis(&declared, &live);
        assert!(changes.iter().any(|c| c.change_type == ChangeType::Changed
            && c.path == "filter.len.max"
            && c.declared == Some(json!("10"))));

        let text = render_changes(&changes);
        assert!(text.contains("+ filter.len.max: \"10\""));
    }

    #[test]
    fn test_diff_leaves_out_live_only_entries() {
        let mut declared = AnalysisSettings::new();
        declared.insert(FILTER, "len", json!({"type": "length", "max": 10})).unwrap();
        declared.insert(TOKENIZER, "grams", json!({"type": "ngram"})).unwrap();
        let mut live = AnalysisSettings::new();
        live.insert(FILTER, "len", json!({"type": "length", "max": 10})).unwrap();
        live.insert(FILTER, "legacy", json!({"type": "lowercase"})).unwrap();
        live.insert(TOKENIZER, "old", json!({"type": "ngram"})).unwrap();

        let changes = diff_analysis(&declared, &live);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Added);
        assert_eq!(changes[0].path, "tokenizer.grams");
        assert!(changes.iter().all(|c| c.change_type != ChangeType::Removed));

        // both survive the in-place update
        let combined = combined_analysis(&declared, &live);
        assert!(combined.get(FILTER, "legacy").is_some());
        assert!(combined.get(TOKENIZER, "old").is_some());
    }
}
