//! SQLite-backed data store
//!
//! Each model maps to one table. Column types are read from the table
//! definition, rows are streamed page by page in primary-key order, and date
//! windows are compared with `julianday()` so text and numeric timestamps
//! both work.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tokio::sync::Mutex;

use crate::model::{ModelFieldKind, ModelKey, ModelMeta};
use crate::store::{DataStore, DateRange, RecordStream, TableSpec};
use crate::value::{Record, Row, SourceValue};
use crate::{Error, Result};

const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone)]
struct Column {
    name: String,
    kind: ModelFieldKind,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    tables: BTreeMap<ModelKey, TableSpec>,
    page_size: usize,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>, tables: BTreeMap<ModelKey, TableSpec>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        Self::with_connection(conn, tables)
    }

    /// An in-memory database (for testing)
    pub fn in_memory(tables: BTreeMap<ModelKey, TableSpec>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, tables)
    }

    fn with_connection(conn: Connection, tables: BTreeMap<ModelKey, TableSpec>) -> Result<Self> {
        for spec in tables.values() {
            check_identifier(&spec.table)?;
            check_identifier(&spec.pk_column)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            tables,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Rows fetched per query while streaming.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Run raw SQL, e.g. to set up fixtures.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().await.execute_batch(sql)?;
        Ok(())
    }

    fn spec(&self, model: &ModelKey) -> Result<&TableSpec> {
        self.tables
            .get(model)
            .ok_or_else(|| Error::Store(format!("no table configured for model {}", model)))
    }

    /// Column names and kinds of a model's table.
    pub async fn introspect(&self, model: &ModelKey) -> Result<ModelMeta> {
        let spec = self.spec(model)?;
        let conn = self.conn.lock().await;
        let columns = table_columns(&conn, spec)?;
        Ok(columns
            .into_iter()
            .fold(ModelMeta::new(model.clone()), |meta, column| {
                meta.with_field(column.name, column.kind)
            }))
    }

    /// Metadata for every configured model.
    pub async fn catalog(&self) -> Result<BTreeMap<ModelKey, ModelMeta>> {
        let mut catalog = BTreeMap::new();
        for model in self.tables.keys() {
            catalog.insert(model.clone(), self.introspect(model).await?);
        }
        Ok(catalog)
    }
}

fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid SQL identifier '{}'", name)))
    }
}

fn column_kind(declared: &str, is_pk: bool) -> ModelFieldKind {
    let declared = declared.to_ascii_uppercase();
    if declared.contains("INT") {
        if is_pk {
            ModelFieldKind::Auto
        } else if declared.contains("BIG") {
            ModelFieldKind::BigInteger
        } else if declared.contains("SMALL") || declared.contains("TINY") {
            ModelFieldKind::SmallInteger
        } else {
            ModelFieldKind::Integer
        }
    } else if declared.contains("BOOL") {
        ModelFieldKind::Boolean
    } else if declared.contains("DATETIME") || declared.contains("TIMESTAMP") {
        ModelFieldKind::DateTime
    } else if declared.contains("DATE") {
        ModelFieldKind::Date
    } else if declared.contains("TIME") {
        ModelFieldKind::Time
    } else if declared.contains("REAL") || declared.contains("FLOA") || declared.contains("DOUB") {
        ModelFieldKind::Float
    } else if declared.contains("CHAR") {
        ModelFieldKind::Char
    } else if declared.contains("TEXT") || declared.contains("CLOB") {
        ModelFieldKind::Text
    } else {
        ModelFieldKind::Other(declared)
    }
}

fn table_columns(conn: &Connection, spec: &TableSpec) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([&spec.table], |row| {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            let pk: i64 = row.get(2)?;
            Ok(Column {
                kind: column_kind(&declared, pk > 0),
                name,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(Error::Store(format!("table '{}' does not exist", spec.table)));
    }
    Ok(columns)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn to_source_value(value: ValueRef<'_>, kind: &ModelFieldKind) -> SourceValue {
    match value {
        ValueRef::Null => SourceValue::Null,
        ValueRef::Integer(i) => match kind {
            ModelFieldKind::Boolean | ModelFieldKind::NullBoolean => SourceValue::Bool(i != 0),
            _ => SourceValue::Int(i),
        },
        ValueRef::Real(f) => SourceValue::Float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match kind {
                ModelFieldKind::DateTime => parse_timestamp(&text)
                    .map(SourceValue::DateTime)
                    .unwrap_or(SourceValue::Str(text)),
                ModelFieldKind::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .map(SourceValue::Date)
                    .unwrap_or(SourceValue::Str(text)),
                _ => SourceValue::Str(text),
            }
        }
        ValueRef::Blob(bytes) => SourceValue::Str(hex::encode(bytes)),
    }
}

fn sql_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

fn pk_string(value: &SqlValue) -> String {
    match value {
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Blob(b) => hex::encode(b),
        SqlValue::Null => String::new(),
    }
}

struct PageQuery<'q> {
    model: &'q ModelKey,
    spec: &'q TableSpec,
    columns: &'q [Column],
    date_column: Option<&'q str>,
    range: DateRange,
    limit: usize,
}

/// One page of rows after `after` (exclusive) in primary-key order.
fn fetch_page(
    conn: &Connection,
    query: &PageQuery<'_>,
    after: Option<&SqlValue>,
) -> Result<Vec<(SqlValue, Arc<dyn Record>)>> {
    let pk = &query.spec.pk_column;
    let mut clauses = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(last) = after {
        clauses.push(format!("\"{}\" > ?", pk));
        params.push(last.clone());
    }
    if let Some(column) = query.date_column {
        if let Some(start) = query.range.start {
            clauses.push(format!("julianday(\"{}\") >= julianday(?)", column));
            params.push(SqlValue::Text(sql_timestamp(start)));
        }
        if let Some(end) = query.range.end {
            clauses.push(format!("julianday(\"{}\") < julianday(?)", column));
            params.push(SqlValue::Text(sql_timestamp(end)));
        }
    }
    let filter = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT * FROM \"{}\"{} ORDER BY \"{}\" LIMIT {}",
        query.spec.table, filter, pk, query.limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let pk_index = names
        .iter()
        .position(|n| n == pk)
        .ok_or_else(|| Error::Store(format!("table '{}' has no column '{}'", query.spec.table, pk)))?;

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut page = Vec::new();
    while let Some(row) = rows.next()? {
        let key: SqlValue = row.get(pk_index)?;
        let mut record = Row::new(query.model.clone(), pk_string(&key));
        for (i, name) in names.iter().enumerate() {
            let kind = query
                .columns
                .iter()
                .find(|c| &c.name == name)
                .map(|c| &c.kind)
                .unwrap_or(&ModelFieldKind::Text);
            record.set(name.clone(), to_source_value(row.get_ref(i)?, kind));
        }
        page.push((key, record.into_record()));
    }
    Ok(page)
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn fetch_by_pk(&self, model: &ModelKey, pk: &str) -> Result<Option<Arc<dyn Record>>> {
        let spec = self.spec(model)?;
        let conn = self.conn.lock().await;
        let columns = table_columns(&conn, spec)?;

        let sql = format!(
            "SELECT * FROM \"{}\" WHERE \"{}\" = ?1 LIMIT 1",
            spec.table, spec.pk_column
        );
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query([pk])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let mut record = Row::new(model.clone(), pk);
        for (i, name) in names.iter().enumerate() {
            let kind = columns
                .iter()
                .find(|c| &c.name == name)
                .map(|c| c.kind.clone())
                .unwrap_or(ModelFieldKind::Text);
            record.set(name.clone(), to_source_value(row.get_ref(i)?, &kind));
        }
        Ok(Some(record.into_record()))
    }

    fn fetch_modified_between<'a>(
        &'a self,
        model: &'a ModelKey,
        date_column: Option<&'a str>,
        range: DateRange,
    ) -> RecordStream<'a> {
        Box::pin(async_stream::try_stream! {
            let spec = self.spec(model)?;
            if let Some(column) = date_column {
                check_identifier(column)?;
            } else if range.is_bounded() {
                Err::<(), _>(Error::Store(format!("bounded fetch of {} needs a date column", model)))?;
            }

            let columns = {
                let conn = self.conn.lock().await;
                table_columns(&conn, spec)?
            };
            let query = PageQuery {
                model,
                spec,
                columns: &columns,
                date_column,
                range,
                limit: self.page_size,
            };

            let mut after: Option<SqlValue> = None;
            loop {
                let page = {
                    let conn = self.conn.lock().await;
                    fetch_page(&conn, &query, after.as_ref())?
                };
                let full = page.len() == self.page_size;
                for (key, record) in page {
                    after = Some(key);
                    yield record;
                }
                if !full {
                    break;
                }
            }
            tracing::debug!(model = %model, range = %range, "Finished streaming rows");
        })
    }

    fn store_name(&self) -> &str {
        "sqlite"
    }
}
