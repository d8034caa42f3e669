//! Named engine connections, fixed once the process has started.

use std::collections::BTreeMap;

use crate::config::{Config, ConnectionConfig};
use crate::error::EngineError;
use crate::registry::SchemaRegistry;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, ConnectionConfig>,
}

impl ConnectionRegistry {
    pub fn new(connections: BTreeMap<String, ConnectionConfig>) -> Self {
        Self { connections }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.connections.clone())
    }

    pub fn get(&self, name: &str) -> std::result::Result<&ConnectionConfig, EngineError> {
        self.connections
            .get(name)
            .ok_or_else(|| EngineError::UnknownConnection(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConnectionConfig)> {
        self.connections.iter().map(|(name, config)| (name.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Every schema must target a configured connection.
    pub fn check_schemas(&self, registry: &SchemaRegistry) -> Result<()> {
        for schema in registry.all() {
            if !self.connections.contains_key(schema.using()) {
                return Err(Error::Config(format!(
                    "schema '{}' uses connection '{}', which is not configured",
                    schema.doc_type(),
                    schema.using()
                )));
            }
        }
        Ok(())
    }
}
