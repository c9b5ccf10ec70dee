//! Fluent accumulator that freezes into a [`QuerySpec`].
//!
//! Builders obtained from [`Store::builder`] can run themselves; detached
//! builders only produce specs. Invalid input (an unknown sort direction, for
//! example) is remembered and reported by the terminal call, so chains never
//! need intermediate `?`.

use crate::error::{QuarryError, Result};
use crate::query::executor::PreparedQuery;
use crate::query::filters::{FilterValue, Filters};
use crate::query::spec::{QuerySpec, SampleSpec, SortDirection, SortKey};
use crate::record::Record;
use crate::store::Store;

/// Seed used by [`QueryBuilder::sample_seeded`] when none is given.
pub const DEFAULT_SEED: i64 = 42;

/// Fluent query builder.
#[derive(Debug, Default)]
pub struct QueryBuilder<'s> {
    store: Option<&'s Store>,
    spec: QuerySpec,
    error: Option<QuarryError>,
}

impl<'s> QueryBuilder<'s> {
    /// Creates a detached builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attached(store: &'s Store) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// Starts from an existing spec.
    pub fn from_spec(spec: QuerySpec) -> Self {
        Self {
            spec,
            ..Self::default()
        }
    }

    /// Merges filters. Repeated keys accumulate into a de-duplicated list.
    pub fn filter<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FilterValue>,
    {
        for (key, value) in pairs {
            self.spec.filters.merge(key, value);
        }
        self
    }

    /// Merges every entry of a filter map.
    pub fn filters(mut self, filters: &Filters) -> Self {
        for (key, value) in filters.iter() {
            self.spec.filters.merge(key, value.clone());
        }
        self
    }

    /// Appends a raw mini-DSL expression.
    pub fn where_expr(mut self, expr: impl Into<String>) -> Self {
        self.spec.filters.push_raw(expr);
        self
    }

    /// Adds columns to the projection; duplicates are dropped when planning.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec
            .projection
            .get_or_insert_with(Vec::new)
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Appends an ordering term; `direction` is `asc` or `desc` in any case.
    pub fn sort(self, column: impl Into<String>, direction: &str) -> Self {
        match direction.parse::<SortDirection>() {
            Ok(direction) => self.sort_by(column, direction),
            Err(err) => self.fail(err),
        }
    }

    /// Appends an ordering term.
    pub fn sort_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.spec.sort.push(SortKey::new(column, direction));
        self
    }

    /// Caps the number of rows.
    pub fn limit(mut self, n: u64) -> Self {
        self.spec.limit = Some(n);
        self
    }

    /// Skips rows.
    pub fn offset(mut self, n: u64) -> Self {
        self.spec.offset = Some(n);
        self
    }

    /// Random sample of `n` rows, different on every run.
    pub fn sample_random(mut self, n: i64) -> Self {
        self.spec.sample = Some(SampleSpec::random(n));
        self
    }

    /// Reproducible sample of `n` rows; `seed` defaults to [`DEFAULT_SEED`].
    pub fn sample_seeded(mut self, n: i64, seed: Option<i64>) -> Self {
        self.spec.sample = Some(SampleSpec::seeded(n, seed.unwrap_or(DEFAULT_SEED)));
        self
    }

    /// At most `per_group` rows for each distinct combination of `by`.
    pub fn sample_stratified<I, S>(mut self, by: I, per_group: i64, seed: Option<i64>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.sample = Some(SampleSpec::stratified(by, per_group, seed));
        self
    }

    /// Freezes the builder. Returns the first error recorded by the chain.
    pub fn to_spec(self) -> Result<QuerySpec> {
        self.into_parts().map(|(_, spec)| spec)
    }

    /// Compiles the query against the attached store.
    pub fn execute(self) -> Result<PreparedQuery<'s>> {
        let (store, spec) = self.into_attached()?;
        store.query(&spec)
    }

    /// Collects every record.
    pub fn all(self) -> Result<Vec<Record>> {
        let mut prepared = self.execute()?;
        let records = prepared.records()?.collect();
        records
    }

    /// First record, if any. Stops reading after it.
    pub fn first(self) -> Result<Option<Record>> {
        let mut prepared = self.execute()?;
        let first = prepared.records()?.next().transpose();
        first
    }

    /// Number of rows matching the filters.
    pub fn count(self) -> Result<u64> {
        let (store, spec) = self.into_attached()?;
        store.count(&spec)
    }

    /// Up to `n` records.
    pub fn preview(self, n: u64) -> Result<Vec<Record>> {
        let (store, spec) = self.into_attached()?;
        store.preview(&spec, n)
    }

    fn fail(mut self, err: QuarryError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    fn into_parts(self) -> Result<(Option<&'s Store>, QuerySpec)> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok((self.store, self.spec))
    }

    fn into_attached(self) -> Result<(&'s Store, QuerySpec)> {
        match self.into_parts()? {
            (Some(store), spec) => Ok((store, spec)),
            (None, _) => Err(QuarryError::Detached),
        }
    }
}
