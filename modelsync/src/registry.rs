use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::model::ModelKey;
use crate::schema::Schema;
use crate::{Error, Result};

/// Which schemas a maintenance operation touches. Empty lists select
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// `app_label` or `app_label.model_name` filters
    pub models: Vec<String>,
    pub connections: Vec<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn models<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models.extend(filters.into_iter().map(Into::into));
        self
    }

    pub fn connections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connections.extend(names.into_iter().map(Into::into));
        self
    }
}

/// Every compiled schema, grouped by the model it indexes.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    by_model: BTreeMap<ModelKey, Vec<Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compiled schema. A doc type may only be registered once per
    /// connection.
    pub fn register(&mut self, schema: Schema) -> Result<Arc<Schema>> {
        if let Some(existing) = self
            .all()
            .find(|s| s.using() == schema.using() && s.doc_type() == schema.doc_type())
        {
            return Err(Error::SchemaConflict(format!(
                "doc_type '{}' on connection '{}' is already registered by {}",
                schema.doc_type(),
                schema.using(),
                existing.model()
            )));
        }

        let schema = Arc::new(schema);
        tracing::debug!(
            model = %schema.model(),
            doc_type = %schema.doc_type(),
            connection = %schema.using(),
            "Registered schema"
        );
        self.by_model
            .entry(schema.model().clone())
            .or_default()
            .push(schema.clone());
        Ok(schema)
    }

    pub fn is_empty(&self) -> bool {
        self.by_model.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_model.values().map(Vec::len).sum()
    }

    /// Every schema, ordered by model then registration.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.by_model.values().flatten()
    }

    pub fn schemas_for_model(&self, model: &ModelKey) -> &[Arc<Schema>] {
        self.by_model.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn schemas_for_connection(&self, connection: &str) -> Vec<Arc<Schema>> {
        self.all().filter(|s| s.using() == connection).cloned().collect()
    }

    pub fn get(&self, connection: &str, doc_type: &str) -> Option<&Arc<Schema>> {
        self.all()
            .find(|s| s.using() == connection && s.doc_type() == doc_type)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelKey> {
        self.by_model.keys()
    }

    pub fn connections(&self) -> BTreeSet<&str> {
        self.all().map(|s| s.using()).collect()
    }

    /// Schemas matching `selection`. A filter or connection that matches
    /// nothing registered is an error.
    pub fn select(&self, selection: &Selection) -> Result<Vec<Arc<Schema>>> {
        for filter in &selection.models {
            if !self.models().any(|m| m.matches_filter(filter)) {
                return Err(Error::Config(format!(
                    "no registered model matches '{}'",
                    filter
                )));
            }
        }
        let known = self.connections();
        for connection in &selection.connections {
            if !known.contains(connection.as_str()) {
                return Err(Error::Config(format!(
                    "no registered schema uses connection '{}'",
                    connection
                )));
            }
        }

        Ok(self
            .all()
            .filter(|s| {
                selection.models.is_empty()
                    || selection.models.iter().any(|f| s.model().matches_filter(f))
            })
            .filter(|s| {
                selection.connections.is_empty()
                    || selection.connections.iter().any(|c| c == s.using())
            })
            .cloned()
            .collect())
    }
}
