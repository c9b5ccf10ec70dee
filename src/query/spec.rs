//! Immutable description of one query: filters, projection, ordering, paging
//! and sampling. Specs are plain data and round-trip through serde so they can
//! be persisted next to the results they produced.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QuarryError;
use crate::query::filters::Filters;

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// SQL keyword.
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(QuarryError::InvalidSortDirection {
                direction: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        })
    }
}

/// One `(column, direction)` ordering term.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    /// Column to order by.
    pub column: String,
    /// Direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    /// Builds a sort key.
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

/// Sampling strategy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStrategy {
    /// No sampling; plain ordering and paging.
    #[default]
    None,
    /// Fresh random order on every run.
    Random,
    /// Deterministic pseudo-random order derived from a seed.
    Seeded,
    /// At most `per_group` rows per distinct value of the `by` columns.
    Stratified,
}

impl FromStr for SampleStrategy {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(SampleStrategy::None),
            "random" => Ok(SampleStrategy::Random),
            "seeded" => Ok(SampleStrategy::Seeded),
            "stratified" => Ok(SampleStrategy::Stratified),
            other => Err(QuarryError::InvalidSampleSpec(format!(
                "unknown strategy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SampleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SampleStrategy::None => "none",
            SampleStrategy::Random => "random",
            SampleStrategy::Seeded => "seeded",
            SampleStrategy::Stratified => "stratified",
        })
    }
}

/// Sampling parameters. Which fields matter depends on `strategy`; the
/// planner validates them when the query is compiled.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SampleSpec {
    /// Strategy.
    #[serde(default)]
    pub strategy: SampleStrategy,
    /// Sample size for `random` and `seeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
    /// Seed for `seeded`, optional for `stratified`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Grouping columns for `stratified`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<String>,
    /// Group cap for `stratified`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_group: Option<i64>,
}

impl SampleSpec {
    /// `random` with `n` rows.
    pub fn random(n: i64) -> Self {
        Self {
            strategy: SampleStrategy::Random,
            n: Some(n),
            ..Self::default()
        }
    }

    /// `seeded` with `n` rows.
    pub fn seeded(n: i64, seed: i64) -> Self {
        Self {
            strategy: SampleStrategy::Seeded,
            n: Some(n),
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// `stratified` over `by`, capped at `per_group` rows per group.
    pub fn stratified<I, S>(by: I, per_group: i64, seed: Option<i64>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            strategy: SampleStrategy::Stratified,
            by: by.into_iter().map(Into::into).collect(),
            per_group: Some(per_group),
            seed,
            ..Self::default()
        }
    }
}

/// Frozen query intent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Filters in first-seen key order.
    #[serde(default)]
    pub filters: Filters,
    /// Requested columns; `None` selects every column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    /// Ordering terms; empty means ascending by identifier.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    /// Row cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Rows to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Sampling, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleSpec>,
}

impl QuerySpec {
    /// Spec with only filters set.
    pub fn with_filters(filters: Filters) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    /// Effective strategy.
    pub fn strategy(&self) -> SampleStrategy {
        self.sample
            .as_ref()
            .map(|s| s.strategy)
            .unwrap_or_default()
    }
}
