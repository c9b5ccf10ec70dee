//! Streaming execution of planned statements.
//!
//! A [`PreparedQuery`] owns the prepared statement and its parameters;
//! [`PreparedQuery::records`] runs it and returns a lazy [`Records`] iterator
//! that borrows the statement for as long as rows are being read. Rows that
//! cannot be normalized are counted and logged, never surfaced as errors.

use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::params_from_iter;
use rusqlite::types::ValueRef;
use tracing::{debug, info, warn};

use crate::error::{Result, RowConversionError};
use crate::query::planner::CompiledQuery;
use crate::query::row::Row;
use crate::query::value::Value;
use crate::record::{Record, RecordAdapter};

/// Lifecycle of the most recent query on a store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum QueryPhase {
    /// Nothing has run yet.
    #[default]
    Idle,
    /// Normalizing, parsing, planning and preparing.
    Compiling,
    /// Rows are being read.
    Streaming,
    /// The stream was exhausted or dropped.
    Done,
    /// Compilation failed; no row was read.
    Failed,
}

/// Per-query counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueryStats {
    /// Rows read from the cursor.
    pub rows_scanned: u64,
    /// Records handed to the caller.
    pub rows_returned: u64,
    /// Rows skipped because they could not be normalized.
    pub rows_invalid: u64,
    /// Wall time from the first step to the end of the stream.
    pub elapsed: Duration,
}

impl QueryStats {
    /// Elapsed time in fractional milliseconds.
    pub fn query_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Compiled and prepared query, ready to stream.
pub struct PreparedQuery<'s> {
    stmt: rusqlite::Statement<'s>,
    compiled: CompiledQuery,
    adapter: &'s dyn RecordAdapter,
    phase: &'s Cell<QueryPhase>,
    stats: QueryStats,
}

impl<'s> PreparedQuery<'s> {
    pub(crate) fn new(
        stmt: rusqlite::Statement<'s>,
        compiled: CompiledQuery,
        adapter: &'s dyn RecordAdapter,
        phase: &'s Cell<QueryPhase>,
    ) -> Self {
        Self {
            stmt,
            compiled,
            adapter,
            phase,
            stats: QueryStats::default(),
        }
    }

    /// SQL text.
    pub fn sql(&self) -> &str {
        &self.compiled.sql
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> &[Value] {
        &self.compiled.params
    }

    /// The planned statement.
    pub fn compiled(&self) -> &CompiledQuery {
        &self.compiled
    }

    /// Counters of the last (or current) run.
    pub fn stats(&self) -> QueryStats {
        self.stats
    }

    /// Runs the statement and streams normalized records. Calling this again
    /// re-runs the statement and resets the counters.
    pub fn records(&mut self) -> Result<Records<'_>> {
        let columns: Arc<[String]> = self
            .stmt
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>()
            .into();
        let id_index = columns.iter().position(|c| c == self.adapter.id_column());
        self.stats = QueryStats::default();
        let started = Instant::now();
        let rows = self
            .stmt
            .query(params_from_iter(self.compiled.params.iter()))?;
        self.phase.set(QueryPhase::Streaming);
        debug!(sql = %self.compiled.sql, "streaming rows");
        Ok(Records {
            rows,
            columns,
            id_index,
            adapter: self.adapter,
            phase: self.phase,
            stats: &mut self.stats,
            started,
            finished: false,
        })
    }
}

/// Lazy record stream. Dropping it releases the cursor.
pub struct Records<'p> {
    rows: rusqlite::Rows<'p>,
    columns: Arc<[String]>,
    id_index: Option<usize>,
    adapter: &'p dyn RecordAdapter,
    phase: &'p Cell<QueryPhase>,
    stats: &'p mut QueryStats,
    started: Instant,
    finished: bool,
}

impl Records<'_> {
    /// Counters so far.
    pub fn stats(&self) -> QueryStats {
        *self.stats
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stats.elapsed = self.started.elapsed();
        self.phase.set(QueryPhase::Done);
        info!(
            schema = %self.adapter.schema(),
            rows_scanned = self.stats.rows_scanned,
            rows_returned = self.stats.rows_returned,
            rows_invalid = self.stats.rows_invalid,
            query_ms = self.stats.query_ms(),
            "query finished"
        );
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let row = match self.rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    self.finish();
                    return None;
                }
                Err(err) => {
                    self.finish();
                    return Some(Err(err.into()));
                }
            };
            self.stats.rows_scanned += 1;
            let converted = match read_row(row, &self.columns) {
                Ok(converted) => converted.and_then(|raw| self.adapter.to_record(raw)),
                Err(err) => {
                    self.finish();
                    return Some(Err(err.into()));
                }
            };
            match converted {
                Ok(record) => {
                    self.stats.rows_returned += 1;
                    return Some(Ok(record));
                }
                Err(err) => {
                    self.stats.rows_invalid += 1;
                    let row_id = self.id_index.and_then(|idx| describe_id(row, idx));
                    warn!(
                        row_id = row_id.as_deref().unwrap_or("<unknown>"),
                        error = %err,
                        "skipping row that failed normalization"
                    );
                }
            }
        }
    }
}

impl Drop for Records<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

fn read_row(
    row: &rusqlite::Row<'_>,
    columns: &Arc<[String]>,
) -> rusqlite::Result<std::result::Result<Row, RowConversionError>> {
    let mut values = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        match Value::from_sql_ref(column, row.get_ref(idx)?) {
            Ok(value) => values.push(value),
            Err(err) => return Ok(Err(err)),
        }
    }
    Ok(Ok(Row::new(Arc::clone(columns), values)))
}

fn describe_id(row: &rusqlite::Row<'_>, idx: usize) -> Option<String> {
    match row.get_ref(idx).ok()? {
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}
