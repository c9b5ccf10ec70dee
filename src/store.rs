//! Read-only handle over one SQLite database.
//!
//! A [`Store`] owns a single connection, opened on first use and reused by
//! every query until [`Store::close`]. The handle is not `Sync`; share it by
//! reference within one thread.

use std::cell::{Cell, OnceCell};
use std::path::Path;

use rusqlite::config::DbConfig;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{QuarryError, Result};
use crate::query::builder::QueryBuilder;
use crate::query::compiler::{quote_ident, validate_identifier};
use crate::query::executor::{PreparedQuery, QueryPhase};
use crate::query::filters::{FilterValue, Filters};
use crate::query::planner::{self, CompiledQuery, Target};
use crate::query::spec::QuerySpec;
use crate::query::value::Value;
use crate::record::{Record, RecordAdapter, SchemaKind, IMAGE_ID_COLUMN};

/// Handle over one database table.
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    adapter: Box<dyn RecordAdapter>,
    conn: OnceCell<Connection>,
    columns: OnceCell<Vec<String>>,
    phase: Cell<QueryPhase>,
}

impl Store {
    /// Opens `path` with the schema's default table and identifier.
    pub fn open(path: impl AsRef<Path>, schema: SchemaKind) -> Result<Self> {
        Self::with_config(StoreConfig::new(path.as_ref(), schema))
    }

    /// Opens a store from explicit settings. The file must exist; the
    /// connection itself is opened lazily.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        if !config.path.exists() {
            return Err(QuarryError::missing_database(&config.path));
        }
        validate_identifier(&config.table)?;
        validate_identifier(&config.id_column)?;
        let adapter = config.schema.adapter(config.id_column.clone());
        Ok(Self {
            config,
            adapter,
            conn: OnceCell::new(),
            columns: OnceCell::new(),
            phase: Cell::new(QueryPhase::Idle),
        })
    }

    /// Settings this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Table layout.
    pub fn schema(&self) -> SchemaKind {
        self.config.schema
    }

    /// Phase of the most recent query.
    pub fn phase(&self) -> QueryPhase {
        self.phase.get()
    }

    /// True while a connection is held.
    pub fn is_open(&self) -> bool {
        self.conn.get().is_some()
    }

    fn target(&self) -> Target<'_> {
        Target {
            table: &self.config.table,
            id_column: &self.config.id_column,
        }
    }

    fn connection(&self) -> Result<&Connection> {
        if let Some(conn) = self.conn.get() {
            return Ok(conn);
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&self.config.path, flags)?;
        conn.busy_timeout(self.config.busy_timeout)?;
        // Quoted identifiers must name columns, never fall back to string literals.
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
        debug!(
            path = %self.config.path.display(),
            schema = %self.config.schema,
            "opened connection"
        );
        Ok(self.conn.get_or_init(|| conn))
    }

    /// Releases the connection. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.columns.take();
        self.phase.set(QueryPhase::Idle);
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| QuarryError::Store(err))?;
            debug!(path = %self.config.path.display(), "closed connection");
        }
        Ok(())
    }

    /// Column names of the table, in declaration order.
    pub fn columns(&self) -> Result<Vec<String>> {
        if let Some(columns) = self.columns.get() {
            return Ok(columns.clone());
        }
        let conn = self.connection()?;
        let sql = format!("PRAGMA table_info({})", quote_ident(&self.config.table)?);
        let mut stmt = conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if names.is_empty() {
            return Err(QuarryError::UnknownTable {
                table: self.config.table.clone(),
            });
        }
        Ok(self.columns.get_or_init(|| names).clone())
    }

    /// Starts a builder bound to this store.
    pub fn builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::attached(self)
    }

    /// Starts a builder with `pairs` merged in.
    pub fn filter<I, K, V>(&self, pairs: I) -> QueryBuilder<'_>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FilterValue>,
    {
        self.builder().filter(pairs)
    }

    /// Starts a builder with one raw expression.
    pub fn where_expr(&self, expr: impl Into<String>) -> QueryBuilder<'_> {
        self.builder().where_expr(expr)
    }

    /// Starts a builder with a projection.
    pub fn select<I, S>(&self, columns: I) -> QueryBuilder<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builder().select(columns)
    }

    /// Starts a builder with a random sample.
    pub fn sample_random(&self, n: i64) -> QueryBuilder<'_> {
        self.builder().sample_random(n)
    }

    /// Starts a builder with a seeded sample.
    pub fn sample_seeded(&self, n: i64, seed: Option<i64>) -> QueryBuilder<'_> {
        self.builder().sample_seeded(n, seed)
    }

    /// Starts a builder with a stratified sample.
    pub fn sample_stratified<I, S>(
        &self,
        by: I,
        per_group: i64,
        seed: Option<i64>,
    ) -> QueryBuilder<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builder().sample_stratified(by, per_group, seed)
    }

    /// Plans `spec` without running it.
    pub fn explain(&self, spec: &QuerySpec) -> Result<CompiledQuery> {
        let columns = planner::resolve_projection(
            spec.projection.as_deref(),
            &self.config.id_column,
            || self.columns(),
        )?;
        planner::plan(spec, self.target(), columns)
    }

    /// Compiles and prepares `spec`. Every validation error is raised here,
    /// before any row is read.
    pub fn query(&self, spec: &QuerySpec) -> Result<PreparedQuery<'_>> {
        self.phase.set(QueryPhase::Compiling);
        let prepared = self.explain(spec).and_then(|compiled| {
            let stmt = self.connection()?.prepare(&compiled.sql)?;
            Ok(PreparedQuery::new(
                stmt,
                compiled,
                self.adapter.as_ref(),
                &self.phase,
            ))
        });
        if let Err(err) = &prepared {
            self.phase.set(QueryPhase::Failed);
            warn!(code = err.code(), error = %err, "query compilation failed");
        }
        prepared
    }

    /// Number of rows matching the filters. Sampling, paging and projection
    /// are ignored.
    pub fn count(&self, spec: &QuerySpec) -> Result<u64> {
        let compiled = planner::plan_count(spec, self.target())?;
        let conn = self.connection()?;
        let n: i64 = conn.query_row(
            &compiled.sql,
            params_from_iter(compiled.params.iter()),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Up to `n` records of `spec`, never more than its own limit.
    pub fn preview(&self, spec: &QuerySpec, n: u64) -> Result<Vec<Record>> {
        let mut spec = spec.clone();
        spec.limit = Some(spec.limit.map_or(n, |limit| limit.min(n)));
        self.collect(&spec)
    }

    /// Record with identifier `id`.
    pub fn get(&self, id: impl Into<Value>) -> Result<Option<Record>> {
        let spec = QuerySpec {
            filters: exact(&self.config.id_column, id.into()),
            limit: Some(1),
            ..QuerySpec::default()
        };
        let mut prepared = self.query(&spec)?;
        let record = prepared.records()?.next().transpose();
        record
    }

    /// Every cutout of one source image. Cutout schema only.
    pub fn get_by_image_id(&self, image_id: &str) -> Result<Vec<Record>> {
        if self.config.schema != SchemaKind::Cutout {
            return Err(QuarryError::Unsupported(
                "get_by_image_id requires the cutout schema",
            ));
        }
        let spec = QuerySpec::with_filters(exact(IMAGE_ID_COLUMN, Value::from(image_id)));
        self.collect(&spec)
    }

    /// Runs `spec` and collects every record.
    pub fn collect(&self, spec: &QuerySpec) -> Result<Vec<Record>> {
        let mut prepared = self.query(spec)?;
        let records = prepared.records()?.collect();
        records
    }
}

// A one-element membership list keeps the value's type through normalization,
// whatever text it holds.
fn exact(column: &str, value: Value) -> Filters {
    let mut filters = Filters::new();
    filters.insert(column, FilterValue::List(vec![value]));
    filters
}
