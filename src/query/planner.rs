//! Chooses the SQL shape for a [`QuerySpec`].
//!
//! Four shapes exist, one per sampling strategy:
//!
//! * `none`: requested ordering (identifier ascending by default), then paging.
//! * `random`: `ORDER BY RANDOM() LIMIT n`.
//! * `seeded`: a deterministic order derived from `rowid` and the seed, ties
//!   broken by `rowid`, then `LIMIT n`.
//! * `stratified`: `ROW_NUMBER()` per group in an inner select, the group cap
//!   applied by the outer select, then ordering and paging on the capped set.
//!
//! All sampling parameters are validated here, before any row is read.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::error::{QuarryError, Result};
use crate::query::compiler::{build_where, quote_ident, WhereClause};
use crate::query::filters::normalize;
use crate::query::spec::{QuerySpec, SampleSpec, SampleStrategy, SortKey};
use crate::query::value::Value;

/// Multiplier of the seeded ordering mix.
pub const SEED_MULTIPLIER: i64 = 1_103_515_245;
/// Mask applied to the seeded mix, keeping the key positive.
pub const SEED_MASK: i64 = 2_147_483_647;

const ROW_NUMBER_ALIAS: &str = "__rn";

/// Table being queried.
#[derive(Clone, Copy, Debug)]
pub struct Target<'a> {
    /// Table name.
    pub table: &'a str,
    /// Stable identifier column.
    pub id_column: &'a str,
}

/// Planned statement: SQL text, positional parameters and output columns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledQuery {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
    /// Output columns in select order.
    pub columns: Vec<String>,
    /// Strategy the shape was chosen for.
    pub strategy: SampleStrategy,
}

/// Effective projection: the caller's columns de-duplicated, or every column
/// of the table when none were requested. The identifier is always present
/// and comes first when the caller omitted it.
pub fn resolve_projection<F>(
    requested: Option<&[String]>,
    id_column: &str,
    all_columns: F,
) -> Result<Vec<String>>
where
    F: FnOnce() -> Result<Vec<String>>,
{
    let columns = match requested {
        Some(cols) if !cols.is_empty() => cols.to_vec(),
        _ => all_columns()?,
    };
    let mut seen = HashSet::with_capacity(columns.len() + 1);
    let mut out = Vec::with_capacity(columns.len() + 1);
    if !columns.iter().any(|c| c == id_column) {
        seen.insert(id_column.to_owned());
        out.push(id_column.to_owned());
    }
    for column in columns {
        if seen.insert(column.clone()) {
            out.push(column);
        }
    }
    Ok(out)
}

/// Plans `spec` over `target`, selecting `columns` (already resolved).
pub fn plan(spec: &QuerySpec, target: Target<'_>, columns: Vec<String>) -> Result<CompiledQuery> {
    let exprs = normalize(&spec.filters);
    let filter = build_where(exprs.as_slice())?;
    let select = select_list(&columns)?;
    let table = quote_ident(target.table)?;
    let default_sample = SampleSpec::default();
    let sample = spec.sample.as_ref().unwrap_or(&default_sample);

    let (sql, params) = match sample.strategy {
        SampleStrategy::None => plan_plain(spec, target, &select, &table, filter)?,
        SampleStrategy::Random => plan_random(spec, sample, &select, &table, filter)?,
        SampleStrategy::Seeded => plan_seeded(spec, sample, &select, &table, filter)?,
        SampleStrategy::Stratified => {
            plan_stratified(spec, sample, &columns, &select, &table, filter)?
        }
    };
    debug!(strategy = %sample.strategy, sql = %sql, params = params.len(), "planned query");
    Ok(CompiledQuery {
        sql,
        params,
        columns,
        strategy: sample.strategy,
    })
}

/// `SELECT COUNT(*)` over the filters only; sampling and paging are ignored.
pub fn plan_count(spec: &QuerySpec, target: Target<'_>) -> Result<CompiledQuery> {
    let filter = build_where(normalize(&spec.filters).as_slice())?;
    let sql = format!(
        "SELECT COUNT(*) FROM {}{}",
        quote_ident(target.table)?,
        filter.clause()
    );
    Ok(CompiledQuery {
        sql,
        params: filter.params,
        columns: vec!["COUNT(*)".to_owned()],
        strategy: SampleStrategy::None,
    })
}

fn select_list(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

fn order_by(sort: &[SortKey]) -> Result<String> {
    let terms = sort
        .iter()
        .map(|key| Ok(format!("{} {}", quote_ident(&key.column)?, key.direction.sql())))
        .collect::<Result<Vec<_>>>()?;
    Ok(terms.join(", "))
}

fn seeded_order() -> String {
    format!("((rowid * {SEED_MULTIPLIER} + ?) & {SEED_MASK}), rowid")
}

fn to_param(n: u64) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Appends `LIMIT`/`OFFSET`; an offset alone needs `LIMIT -1` in SQLite.
fn push_paging(sql: &mut String, params: &mut Vec<Value>, limit: Option<u64>, offset: Option<u64>) {
    match (limit, offset) {
        (Some(limit), offset) => {
            sql.push_str(" LIMIT ?");
            params.push(to_param(limit));
            if let Some(offset) = offset {
                sql.push_str(" OFFSET ?");
                params.push(to_param(offset));
            }
        }
        (None, Some(offset)) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(to_param(offset));
        }
        (None, None) => {}
    }
}

fn positive(value: Option<i64>, what: &str) -> Result<i64> {
    match value {
        Some(v) if v > 0 => Ok(v),
        Some(v) => Err(QuarryError::InvalidSampleSpec(format!(
            "{what} must be > 0 (got {v})"
        ))),
        None => Err(QuarryError::InvalidSampleSpec(format!("{what} is required"))),
    }
}

fn sample_size(spec: &QuerySpec, sample: &SampleSpec) -> Result<i64> {
    let n = sample
        .n
        .or_else(|| spec.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)));
    positive(n, "sample n")
}

fn plan_plain(
    spec: &QuerySpec,
    target: Target<'_>,
    select: &str,
    table: &str,
    filter: WhereClause,
) -> Result<(String, Vec<Value>)> {
    let order = if spec.sort.is_empty() {
        format!("{} ASC", quote_ident(target.id_column)?)
    } else {
        order_by(&spec.sort)?
    };
    let mut sql = format!("SELECT {select} FROM {table}{} ORDER BY {order}", filter.clause());
    let mut params = filter.params;
    push_paging(&mut sql, &mut params, spec.limit, spec.offset);
    Ok((sql, params))
}

fn plan_random(
    spec: &QuerySpec,
    sample: &SampleSpec,
    select: &str,
    table: &str,
    filter: WhereClause,
) -> Result<(String, Vec<Value>)> {
    let n = sample_size(spec, sample)?;
    let sql = format!(
        "SELECT {select} FROM {table}{} ORDER BY RANDOM() LIMIT ?",
        filter.clause()
    );
    let mut params = filter.params;
    params.push(Value::Int(n));
    Ok((sql, params))
}

fn plan_seeded(
    spec: &QuerySpec,
    sample: &SampleSpec,
    select: &str,
    table: &str,
    filter: WhereClause,
) -> Result<(String, Vec<Value>)> {
    let n = sample_size(spec, sample)?;
    let sql = format!(
        "SELECT {select} FROM {table}{} ORDER BY {} LIMIT ?",
        filter.clause(),
        seeded_order()
    );
    let mut params = filter.params;
    params.push(Value::Int(sample.seed.unwrap_or(0)));
    params.push(Value::Int(n));
    Ok((sql, params))
}

fn plan_stratified(
    spec: &QuerySpec,
    sample: &SampleSpec,
    columns: &[String],
    select: &str,
    table: &str,
    filter: WhereClause,
) -> Result<(String, Vec<Value>)> {
    if sample.by.is_empty() {
        return Err(QuarryError::InvalidSampleSpec(
            "stratified sampling needs at least one 'by' column".to_owned(),
        ));
    }
    let per_group = positive(sample.per_group, "per_group")?;
    let partition = select_list(&sample.by)?;

    // Sort columns must survive the inner select even when not projected.
    let mut inner_columns = columns.to_vec();
    for key in &spec.sort {
        if !inner_columns.contains(&key.column) {
            inner_columns.push(key.column.clone());
        }
    }
    let inner_select = select_list(&inner_columns)?;

    let mut params = Vec::with_capacity(filter.params.len() + 4);
    let rank = match sample.seed {
        Some(seed) => {
            // The seed placeholder precedes the WHERE placeholders in the text.
            params.push(Value::Int(seed));
            seeded_order()
        }
        None => "RANDOM()".to_owned(),
    };
    let mut sql = format!(
        "SELECT {select} FROM (SELECT {inner_select}, ROW_NUMBER() OVER \
         (PARTITION BY {partition} ORDER BY {rank}) AS {ROW_NUMBER_ALIAS} FROM {table}{}) \
         WHERE {ROW_NUMBER_ALIAS} <= ?",
        filter.clause()
    );
    params.extend(filter.params);
    params.push(Value::Int(per_group));
    if !spec.sort.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by(&spec.sort)?);
    }
    push_paging(&mut sql, &mut params, spec.limit, spec.offset);
    Ok((sql, params))
}
