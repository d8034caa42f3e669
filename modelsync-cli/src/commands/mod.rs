//! Subcommands and the wiring they share.

pub mod clear;
pub mod rebuild;
pub mod update;

use anyhow::{Context as _, Result};
use clap::Args;
use modelsync::maintenance::Confirm;
use modelsync::schema::SchemaLoader;
use modelsync::store::SqliteStore;
use modelsync::{
    Config, ConnectionRegistry, IndexMaintenance, MaintenanceReport, ModelKey, NoInput,
    SchemaRegistry, Selection,
};
use modelsync_es::EsEngine;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;

/// Which schemas a command touches.
#[derive(Args, Debug, Clone, Default)]
pub struct Target {
    /// Models to process, as app_label or app_label.model_name (default: all)
    pub models: Vec<String>,

    /// Only touch schemas on this connection (repeatable)
    #[arg(long = "using", value_name = "CONNECTION")]
    pub using: Vec<String>,
}

impl Target {
    pub fn selection(&self) -> Selection {
        Selection::all()
            .models(self.models.iter().cloned())
            .connections(self.using.iter().cloned())
    }
}

/// Schemas, store and engine built from the configuration.
pub struct Context {
    pub maintenance: IndexMaintenance,
}

impl Context {
    pub async fn load(config: &Config, batch_size: Option<usize>) -> Result<Self> {
        let loader = SchemaLoader::new(&config.schemas_dir);
        let files = loader.load_all()?;
        let models = files
            .iter()
            .map(|(_, file)| file.model.parse::<ModelKey>())
            .collect::<modelsync::Result<Vec<_>>>()?;

        let tables = config.store.table_specs(&models)?;
        let store = SqliteStore::open(&config.store.sqlite_path, tables)
            .with_context(|| format!("opening {}", config.store.sqlite_path.display()))?
            .with_page_size(config.store.page_size);
        let catalog = store.catalog().await?;

        let mut registry = SchemaRegistry::new();
        for (path, file) in files {
            file.into_definition(&catalog)
                .and_then(|definition| definition.register(&mut registry))
                .with_context(|| format!("loading schema {}", path.display()))?;
        }

        let connections = ConnectionRegistry::from_config(config);
        connections.check_schemas(&registry)?;
        let engine = EsEngine::new(&connections)?;
        info!(
            schemas = registry.len(),
            connections = connections.len(),
            "Loaded schemas"
        );

        let maintenance = IndexMaintenance::new(Arc::new(registry), Arc::new(engine), Arc::new(store))
            .with_batch_size(batch_size.unwrap_or(config.sync.batch_size));
        Ok(Self { maintenance })
    }
}

/// Asks on the terminal; only `y` or `Y` confirms.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{prompt} [n/Y]: ");
        let _ = io::stdout().flush();
        let mut answer = String::new();
        match io::stdin().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}

pub fn confirmer(noinput: bool) -> Box<dyn Confirm> {
    if noinput {
        Box::new(NoInput)
    } else {
        Box::new(StdinConfirm)
    }
}

pub fn print_report(report: &MaintenanceReport) {
    if report.cancelled {
        println!("Cancelled, nothing was changed.");
        return;
    }

    for drift in &report.drift {
        println!("{drift}");
    }
    for outcome in &report.outcomes {
        println!(
            "{:<8} {}/{}: {} documents{}",
            outcome.operation.to_string(),
            outcome.connection,
            outcome.doc_type,
            outcome.indexed,
            if outcome.completed { "" } else { " (incomplete)" }
        );
    }
    if !report.failures.is_empty() {
        eprintln!("{}", report.failures);
    }
    println!("Indexed {} documents in total", report.indexed());
}
