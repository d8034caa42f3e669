//! Operator-driven index maintenance: clear, update and rebuild.
//!
//! Every operation works on a [`Selection`] of registered schemas. Failures
//! that only concern one schema are collected in the [`MaintenanceReport`]
//! and the remaining schemas still run.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use futures::StreamExt;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::analysis::{
    collect_analysis, combined_analysis, detect_changes, diff_analysis, is_analysis_compatible,
    render_changes, AnalysisSettings, Change,
};
use crate::document::DocumentBuilder;
use crate::engine::{BulkItem, SearchEngine};
use crate::error::{FailureKind, SyncErrors, SyncFailure};
use crate::registry::{SchemaRegistry, Selection};
use crate::schema::Schema;
use crate::store::{DataStore, DateRange};
use crate::sync::{build_failure, send_bulk};
use crate::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Asks the operator before destructive operations.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Confirms everything, for `--noinput` and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl Confirm for NoInput {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Clear,
    Update,
    Rebuild,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => write!(f, "clear"),
            Self::Update => write!(f, "update"),
            Self::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// What happened to one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOutcome {
    pub operation: Operation,
    pub connection: String,
    pub doc_type: String,
    /// Documents the engine accepted
    pub indexed: usize,
    pub completed: bool,
}

/// Live mapping of one doc type that differs from the declared one.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingDrift {
    pub doc_type: String,
    pub changes: Vec<Change>,
}

/// Drift found on one connection before a rebuild. Only the analysis part
/// can be applied in place; mappings are recreated by the rebuild itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftReport {
    pub connection: String,
    /// Analysis changes, empty when the live analysis is compatible
    pub changes: Vec<Change>,
    pub mappings: Vec<MappingDrift>,
    pub applied: bool,
}

impl DriftReport {
    fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.mappings.is_empty()
    }

    fn render(&self) -> String {
        let mut text = render_changes(&self.changes);
        for mapping in &self.mappings {
            text.push_str(&format!("\nmapping '{}':", mapping.doc_type));
            text.push_str(&render_changes(&mapping.changes));
        }
        text
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Index settings on '{}' differ from the declared ones{}:{}",
            self.connection,
            if self.applied { " (analysis applied)" } else { "" },
            self.render()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub outcomes: Vec<SchemaOutcome>,
    pub failures: SyncErrors,
    pub drift: Vec<DriftReport>,
    /// The operator declined; nothing was touched.
    pub cancelled: bool,
}

impl MaintenanceReport {
    fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn indexed(&self) -> usize {
        self.outcomes.iter().map(|o| o.indexed).sum()
    }

    fn merge(&mut self, other: MaintenanceReport) {
        self.outcomes.extend(other.outcomes);
        self.failures.failures.extend(other.failures.failures);
        self.drift.extend(other.drift);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildOptions {
    /// Close the index, replace its analysis settings, reopen it.
    pub apply_analysis: bool,
    /// Fail when drift is found and not applied.
    pub fail_on_drift: bool,
}

pub struct IndexMaintenance {
    registry: Arc<SchemaRegistry>,
    engine: Arc<dyn SearchEngine>,
    store: Arc<dyn DataStore>,
    batch_size: usize,
}

impl IndexMaintenance {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        engine: Arc<dyn SearchEngine>,
        store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Delete the mapping, and with it every document, of each selected
    /// schema. Absent mappings are skipped silently.
    pub async fn clear(&self, selection: &Selection, confirm: &dyn Confirm) -> Result<MaintenanceReport> {
        let schemas = self.registry.select(selection)?;
        if !confirm.confirm(&clear_prompt(&schemas)) {
            tracing::info!("Clear cancelled by operator");
            return Ok(MaintenanceReport::cancelled());
        }
        Ok(self.clear_schemas(&schemas).await)
    }

    async fn clear_schemas(&self, schemas: &[Arc<Schema>]) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        for schema in schemas {
            let completed = match self.engine.delete_mapping(schema.using(), schema.doc_type()).await {
                Ok(()) => {
                    tracing::info!(
                        connection = schema.using(),
                        doc_type = schema.doc_type(),
                        "Cleared mapping"
                    );
                    true
                }
                Err(e) => {
                    report.failures.failures.push(schema_failure(schema, e));
                    false
                }
            };
            report.outcomes.push(SchemaOutcome {
                operation: Operation::Clear,
                connection: schema.using().to_string(),
                doc_type: schema.doc_type().to_string(),
                indexed: 0,
                completed,
            });
        }
        report
    }

    /// Put each selected schema's mapping and index its records, all of them
    /// or those modified within `range`.
    pub async fn update(&self, selection: &Selection, range: DateRange) -> Result<MaintenanceReport> {
        let schemas = self.registry.select(selection)?;
        Ok(self.update_schemas(&schemas, range, Operation::Update).await)
    }

    async fn update_schemas(
        &self,
        schemas: &[Arc<Schema>],
        range: DateRange,
        operation: Operation,
    ) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let mut analysis_by_connection: BTreeMap<String, AnalysisSettings> = BTreeMap::new();

        for schema in schemas {
            let mut outcome = SchemaOutcome {
                operation,
                connection: schema.using().to_string(),
                doc_type: schema.doc_type().to_string(),
                indexed: 0,
                completed: false,
            };

            if range.is_bounded() && schema.date_field().is_none() {
                let error = Error::UnboundedUpdate {
                    doc_type: schema.doc_type().to_string(),
                };
                tracing::warn!(doc_type = schema.doc_type(), "{}", error);
                report.failures.failures.push(schema_failure(schema, error));
                report.outcomes.push(outcome);
                continue;
            }

            let analysis = match analysis_by_connection.get(schema.using()) {
                Some(analysis) => analysis.clone(),
                None => {
                    let on_connection = self.registry.schemas_for_connection(schema.using());
                    match collect_analysis(on_connection.iter().map(Arc::as_ref)) {
                        Ok(analysis) => {
                            analysis_by_connection.insert(schema.using().to_string(), analysis.clone());
                            analysis
                        }
                        Err(e) => {
                            report.failures.failures.push(schema_failure(schema, e));
                            report.outcomes.push(outcome);
                            continue;
                        }
                    }
                }
            };

            let payload = schema.mapping_payload().with_analysis(analysis);
            if let Err(e) = self.engine.create_mapping(schema.using(), &payload).await {
                report.failures.failures.push(schema_failure(schema, e));
                report.outcomes.push(outcome);
                continue;
            }

            let (indexed, failures, completed) = self.index_schema(schema, range).await;
            outcome.indexed = indexed;
            outcome.completed = completed;
            tracing::info!(
                connection = schema.using(),
                doc_type = schema.doc_type(),
                range = %range,
                indexed,
                failed = failures.len(),
                "Indexed schema"
            );
            report.failures.failures.extend(failures);
            report.outcomes.push(outcome);
        }
        report
    }

    /// Stream the schema's records and send them in batches. Returns the
    /// accepted count, the failures, and whether the stream was read to
    /// the end.
    async fn index_schema(&self, schema: &Schema, range: DateRange) -> (usize, Vec<SyncFailure>, bool) {
        let date_column = schema.date_column();
        let mut records = self
            .store
            .fetch_modified_between(schema.model(), date_column.as_deref(), range);

        let mut indexed = 0;
        let mut failures = Vec::new();
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut completed = true;

        while let Some(record) = records.next().await {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    failures.push(schema_failure(schema, e));
                    completed = false;
                    break;
                }
            };
            match DocumentBuilder::build(schema, &record) {
                Ok(document) => batch.push(BulkItem::upsert(schema.doc_type(), document)),
                Err(e) => failures.push(build_failure(schema, &record.pk(), &e)),
            }
            if batch.len() >= self.batch_size {
                let outcome = send_bulk(
                    self.engine.as_ref(),
                    schema.using(),
                    schema.doc_type(),
                    std::mem::take(&mut batch),
                )
                .await;
                indexed += outcome.accepted;
                failures.extend(outcome.failures);
            }
        }

        let outcome = send_bulk(self.engine.as_ref(), schema.using(), schema.doc_type(), batch).await;
        indexed += outcome.accepted;
        failures.extend(outcome.failures);
        (indexed, failures, completed)
    }

    /// Check analysis drift, clear, recreate the mapping and index every
    /// record of each selected schema.
    pub async fn rebuild(
        &self,
        selection: &Selection,
        options: RebuildOptions,
        confirm: &dyn Confirm,
    ) -> Result<MaintenanceReport> {
        let schemas = self.registry.select(selection)?;
        if !confirm.confirm(&clear_prompt(&schemas)) {
            tracing::info!("Rebuild cancelled by operator");
            return Ok(MaintenanceReport::cancelled());
        }

        let mut report = MaintenanceReport::default();
        let mut unreachable = Vec::new();
        let connections: BTreeSet<String> = schemas.iter().map(|s| s.using().to_string()).collect();

        for connection in &connections {
            let declared: Vec<&Schema> = schemas
                .iter()
                .filter(|s| s.using() == connection)
                .map(Arc::as_ref)
                .collect();
            match self.check_drift(connection, &declared, options).await {
                Ok(Some(drift)) => report.drift.push(drift),
                Ok(None) => {}
                Err(e @ Error::AnalysisDrift { .. }) => return Err(e),
                Err(e) => {
                    let reason = e.to_string();
                    for schema in schemas.iter().filter(|s| s.using() == connection) {
                        report.failures.failures.push(SyncFailure::new(
                            FailureKind::Schema,
                            connection,
                            schema.doc_type(),
                            reason.clone(),
                        ));
                    }
                    unreachable.push(connection.clone());
                }
            }
        }

        let schemas: Vec<Arc<Schema>> = schemas
            .into_iter()
            .filter(|s| !unreachable.iter().any(|c| c == s.using()))
            .collect();
        let cleared = self.clear_schemas(&schemas).await;
        let ready: Vec<Arc<Schema>> = schemas
            .iter()
            .zip(&cleared.outcomes)
            .filter(|(_, outcome)| outcome.completed)
            .map(|(schema, _)| schema.clone())
            .collect();
        report.merge(cleared);
        report.merge(
            self.update_schemas(&ready, DateRange::unbounded(), Operation::Rebuild)
                .await,
        );
        Ok(report)
    }

    /// Compare the live analysis and the live mapping of every selected
    /// schema on `connection` with their declared counterparts.
    async fn check_drift(
        &self,
        connection: &str,
        selected: &[&Schema],
        options: RebuildOptions,
    ) -> Result<Option<DriftReport>> {
        let declared = collect_analysis(
            self.registry
                .schemas_for_connection(connection)
                .iter()
                .map(Arc::as_ref),
        )?;
        let Some(live) = self.engine.get_analysis(connection).await? else {
            return Ok(None);
        };

        let mut drift = DriftReport {
            connection: connection.to_string(),
            changes: Vec::new(),
            mappings: Vec::new(),
            applied: false,
        };
        if !is_analysis_compatible(&declared, &live) {
            drift.changes = diff_analysis(&declared, &live);
        }
        for schema in selected {
            let doc_type = schema.doc_type();
            let Some(live_mapping) = self.engine.get_current_mapping(connection, doc_type).await? else {
                continue;
            };
            let declared_mapping = schema.get_mapping();
            let changes = detect_changes(
                &live_mapping,
                declared_mapping.get(doc_type).unwrap_or(&Value::Null),
                doc_type,
            );
            if !changes.is_empty() {
                drift.mappings.push(MappingDrift {
                    doc_type: doc_type.to_string(),
                    changes,
                });
            }
        }
        if drift.is_empty() {
            return Ok(None);
        }

        if options.fail_on_drift && !(options.apply_analysis && drift.mappings.is_empty()) {
            return Err(Error::AnalysisDrift {
                connection: connection.to_string(),
                diff: drift.render(),
            });
        }
        if options.apply_analysis && !drift.changes.is_empty() {
            self.engine
                .update_analysis(connection, &combined_analysis(&declared, &live))
                .await?;
            tracing::info!(connection, changes = drift.changes.len(), "Applied analysis changes");
            drift.applied = true;
            return Ok(Some(drift));
        }
        tracing::warn!(
            connection,
            analysis_changes = drift.changes.len(),
            mappings = drift.mappings.len(),
            "Index settings drifted from the declared ones"
        );
        Ok(Some(drift))
    }
}

fn clear_prompt(schemas: &[Arc<Schema>]) -> String {
    let targets: Vec<String> = schemas
        .iter()
        .map(|s| format!("{} ({})", s.doc_type(), s.using()))
        .collect();
    format!(
        "This deletes every indexed document of: {}. Are you sure?",
        targets.join(", ")
    )
}

fn schema_failure(schema: &Schema, error: impl Into<Error>) -> SyncFailure {
    let error = error.into();
    SyncFailure::new(
        FailureKind::Schema,
        schema.using(),
        schema.doc_type(),
        error.to_string(),
    )
}

/// Parse an operator-supplied time bound. Accepts `YYYY-MM-DD`,
/// `YYYY-MM-DD HH:MM[:SS]`, `YYYY-MM-DD-HH:MM`, RFC 3339, or a duration
/// like `2d`, `1h30m` or `90s` meaning that long before `now`. Values
/// without an offset are UTC.
pub fn parse_date_time(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    let invalid = || Error::InvalidDateTime(input.to_string());
    if input.is_empty() {
        return Err(invalid());
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d-%H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(Utc.from_utc_datetime(&at));
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return day
            .and_hms_opt(0, 0, 0)
            .map(|at| Utc.from_utc_datetime(&at))
            .ok_or_else(invalid);
    }

    let relative = Regex::new(r"(?i)^(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$")
        .map_err(|e| Error::Config(e.to_string()))?;
    let captures = relative.captures(input).ok_or_else(invalid)?;
    let part = |i: usize| -> Result<i64> {
        captures
            .get(i)
            .map_or(Ok(0), |m| m.as_str().parse::<i64>().map_err(|_| invalid()))
    };
    let offset = Duration::try_days(part(1)?)
        .zip(Duration::try_hours(part(2)?))
        .zip(Duration::try_minutes(part(3)?))
        .zip(Duration::try_seconds(part(4)?))
        .and_then(|(((d, h), m), s)| d.checked_add(&h)?.checked_add(&m)?.checked_add(&s))
        .ok_or_else(invalid)?;
    now.checked_sub_signed(offset).ok_or_else(invalid)
}
