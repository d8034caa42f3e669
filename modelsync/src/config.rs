//! Configuration management
//!
//! Default config location: ./modelsync.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::maintenance::DEFAULT_BATCH_SIZE;
use crate::model::ModelKey;
use crate::schema::DEFAULT_CONNECTION;
use crate::store::TableSpec;
use crate::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "modelsync.toml";

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Directory holding `*.yaml` schema definitions
    #[serde(default = "default_schemas_dir")]
    pub schemas_dir: PathBuf,
    #[serde(default = "default_connections")]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_schemas_dir() -> PathBuf {
    PathBuf::from("schemas")
}

fn default_connections() -> BTreeMap<String, ConnectionConfig> {
    let mut connections = BTreeMap::new();
    connections.insert(DEFAULT_CONNECTION.to_string(), ConnectionConfig::default());
    connections
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schemas_dir: default_schemas_dir(),
            connections: default_connections(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// One named search-engine connection. Schemas pick a connection with
/// `using`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Tried in order until one answers
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    /// Index that holds every doc type of this connection
    #[serde(default = "default_index_name")]
    pub index_name: String,
    /// Refresh the index after each bulk request
    #[serde(default)]
    pub refresh: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_hosts() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_index_name() -> String {
    "modelsync".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            index_name: default_index_name(),
            refresh: false,
            timeout_secs: default_timeout_secs(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Documents per bulk request during update and rebuild
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    /// Rows fetched per query while streaming
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// `"app_label.model_name"` to table
    #[serde(default)]
    pub tables: BTreeMap<String, TableSpec>,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("db.sqlite3")
}

fn default_page_size() -> usize {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            page_size: default_page_size(),
            tables: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Table mapping keyed by model. Models without an entry use the
    /// `{app_label}_{model_name}` table.
    pub fn table_specs<'a>(
        &self,
        models: impl IntoIterator<Item = &'a ModelKey>,
    ) -> Result<BTreeMap<ModelKey, TableSpec>> {
        let mut specs = BTreeMap::new();
        for (name, spec) in &self.tables {
            specs.insert(name.parse::<ModelKey>()?, spec.clone());
        }
        for model in models {
            specs
                .entry(model.clone())
                .or_insert_with(|| TableSpec::new(model.default_doc_type()));
        }
        Ok(specs)
    }
}

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".into()))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".into()))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: Config = toml::from_str(&content)?;
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from file path, or fall back to defaults when it is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            let mut config = Config::default();
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connections.is_empty() {
            return Err(Error::Config("at least one connection must be configured".into()));
        }
        for (name, connection) in &self.connections {
            if connection.hosts.is_empty() {
                return Err(Error::Config(format!("connection '{}' has no hosts", name)));
            }
            if connection.index_name.is_empty() {
                return Err(Error::Config(format!("connection '{}' has an empty index_name", name)));
            }
        }
        if self.sync.batch_size == 0 {
            return Err(Error::Config("sync.batch_size must be greater than 0".into()));
        }
        for name in self.store.tables.keys() {
            name.parse::<ModelKey>()?;
        }
        Ok(())
    }

    /// Expand ~ in all paths
    fn expand_paths(&mut self) -> Result<()> {
        self.schemas_dir = expand_tilde(&self.schemas_dir)?;
        self.store.sqlite_path = expand_tilde(&self.store.sqlite_path)?;
        Ok(())
    }
}
