//! Persisted query manifests.
//!
//! A manifest records the request exactly as typed alongside its parsed form,
//! the database it ran against, and how it executed, so a subset can be
//! reproduced or compared with another run later.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::{QuarryError, Result};
use crate::query::executor::QueryStats;
use crate::query::filters::{FilterValue, Filters, RAW_KEY};
use crate::query::spec::{QuerySpec, SampleSpec, SampleStrategy, SortKey};
use crate::record::SchemaKind;
use crate::request::{parse_filter_args, parse_sample, parse_sort, QueryRequest};

/// Raw user text paired with its parsed form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawParsed<R, P> {
    /// As typed.
    pub raw: R,
    /// As understood.
    pub parsed: P,
}

/// Who ran the query, and when.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Run identifier.
    #[serde(default)]
    pub run_id: Option<String>,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// User name.
    #[serde(default)]
    pub user: Option<String>,
    /// Host name.
    #[serde(default)]
    pub host: Option<String>,
    /// Source revision.
    #[serde(default)]
    pub git_commit: Option<String>,
}

impl ManifestMetadata {
    /// Current time plus user and host from the environment.
    pub fn capture() -> Result<Self> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| QuarryError::Message(format!("failed to format timestamp: {e}")))?;
        Ok(Self {
            run_id: None,
            timestamp,
            user: std::env::var("USER").ok(),
            host: std::env::var("HOSTNAME").ok(),
            git_commit: None,
        })
    }

    /// Parsed timestamp.
    pub fn timestamp(&self) -> Result<OffsetDateTime> {
        OffsetDateTime::parse(&self.timestamp, &Rfc3339)
            .map_err(|e| QuarryError::Message(format!("invalid manifest timestamp: {e}")))
    }
}

/// Database the query ran against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Configured name, if any.
    #[serde(default)]
    pub name: Option<String>,
    /// Table layout.
    pub schema: SchemaKind,
    /// SQLite file.
    pub path: PathBuf,
    /// Table.
    pub table: String,
}

/// Query parameters, raw and parsed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestParameters {
    /// Filter arguments.
    pub filters: RawParsed<Vec<String>, Filters>,
    /// Projection columns.
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    /// Sort string.
    pub sort: RawParsed<Option<String>, Option<Vec<SortKey>>>,
    /// Row cap.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Rows skipped.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Sample string.
    pub sample: RawParsed<Option<String>, Option<SampleSpec>>,
}

/// How the query was (or will be) executed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Preview row count, when only a preview was taken.
    #[serde(default)]
    pub preview_count: Option<u64>,
    /// Output format name.
    #[serde(default)]
    pub output_format: Option<String>,
    /// Records returned.
    #[serde(default)]
    pub rows_returned: Option<u64>,
    /// Rows skipped as invalid.
    #[serde(default)]
    pub rows_invalid: Option<u64>,
    /// Wall time in milliseconds.
    #[serde(default)]
    pub query_ms: Option<f64>,
}

/// Everything needed to reproduce a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryManifest {
    /// Run metadata.
    pub metadata: ManifestMetadata,
    /// Target database.
    pub database: DatabaseInfo,
    /// Parameters.
    pub parameters: ManifestParameters,
    /// Execution details.
    #[serde(default)]
    pub execution: ExecutionInfo,
}

impl QueryManifest {
    /// Captures `request` against `store`, parsing every raw string.
    pub fn new(request: &QueryRequest, store: &StoreConfig) -> Result<Self> {
        let sort = request.sort.as_deref().map(parse_sort).transpose()?;
        let sample = request.sample.as_deref().map(parse_sample).transpose()?;
        Ok(Self {
            metadata: ManifestMetadata::capture()?,
            database: DatabaseInfo {
                name: store.name.clone(),
                schema: store.schema,
                path: store.path.clone(),
                table: store.table.clone(),
            },
            parameters: ManifestParameters {
                filters: RawParsed {
                    raw: request.filters.clone(),
                    parsed: parse_filter_args(&request.filters)?,
                },
                projection: request.projection_columns(),
                sort: RawParsed {
                    raw: request.sort.clone(),
                    parsed: sort,
                },
                limit: request.limit,
                offset: request.offset,
                sample: RawParsed {
                    raw: request.sample.clone(),
                    parsed: sample,
                },
            },
            execution: ExecutionInfo::default(),
        })
    }

    /// Sets the run identifier.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.metadata.run_id = Some(run_id.into());
        self
    }

    /// Copies the counters of a finished query.
    pub fn record_stats(&mut self, stats: &QueryStats) {
        self.execution.rows_returned = Some(stats.rows_returned);
        self.execution.rows_invalid = Some(stats.rows_invalid);
        self.execution.query_ms = Some(stats.query_ms());
    }

    /// The request as originally typed.
    pub fn request(&self) -> QueryRequest {
        let params = &self.parameters;
        QueryRequest {
            filters: params.filters.raw.clone(),
            projection: params.projection.as_ref().map(|cols| cols.join(",")),
            sort: params.sort.raw.clone(),
            limit: params.limit,
            offset: params.offset,
            sample: params.sample.raw.clone(),
        }
    }

    /// Rebuilds the spec from the raw request.
    pub fn to_spec(&self) -> Result<QuerySpec> {
        self.request().to_spec()
    }

    /// Writes pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "saved query manifest");
        Ok(())
    }

    /// Reads a manifest written by [`QueryManifest::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        Summary(self).to_string()
    }

    /// Parameters that differ from `other`: filters, sample, limit and sort
    /// (parsed forms).
    pub fn diff(&self, other: &QueryManifest) -> Result<ManifestDiff> {
        let (a, b) = (&self.parameters, &other.parameters);
        let mut details = Vec::new();
        if a.filters.parsed != b.filters.parsed {
            details.push(FieldDiff::new("filters", &a.filters.parsed, &b.filters.parsed)?);
        }
        if a.sample.parsed != b.sample.parsed {
            details.push(FieldDiff::new("sample", &a.sample.parsed, &b.sample.parsed)?);
        }
        if a.limit != b.limit {
            details.push(FieldDiff::new("limit", &a.limit, &b.limit)?);
        }
        if a.sort.parsed != b.sort.parsed {
            details.push(FieldDiff::new("sort", &a.sort.parsed, &b.sort.parsed)?);
        }
        Ok(ManifestDiff { details })
    }
}

/// One differing parameter.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldDiff {
    /// Parameter name.
    pub field: &'static str,
    /// Value in the first manifest.
    pub left: serde_json::Value,
    /// Value in the second manifest.
    pub right: serde_json::Value,
}

impl FieldDiff {
    fn new<T: Serialize>(field: &'static str, left: &T, right: &T) -> Result<Self> {
        Ok(Self {
            field,
            left: serde_json::to_value(left)?,
            right: serde_json::to_value(right)?,
        })
    }
}

/// Result of [`QueryManifest::diff`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ManifestDiff {
    /// Differences in comparison order.
    pub details: Vec<FieldDiff>,
}

impl ManifestDiff {
    /// True when nothing differs.
    pub fn is_same(&self) -> bool {
        self.details.is_empty()
    }

    /// Names of the differing parameters.
    pub fn fields(&self) -> Vec<&'static str> {
        self.details.iter().map(|d| d.field).collect()
    }
}

struct Summary<'a>(&'a QueryManifest);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let manifest = self.0;
        let meta = &manifest.metadata;
        let when = meta
            .timestamp()
            .ok()
            .and_then(|ts| {
                ts.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
                    .ok()
            })
            .unwrap_or_else(|| meta.timestamp.clone());
        writeln!(f, "Run ID: {}", meta.run_id.as_deref().unwrap_or("N/A"))?;
        writeln!(f, "Timestamp: {when}")?;
        writeln!(f)?;
        writeln!(f, "Database: {} ({})", manifest.database.schema, manifest.database.path.display())?;
        writeln!(f, "Table: {}", manifest.database.table)?;
        writeln!(f)?;

        let params = &manifest.parameters;
        if !params.filters.parsed.is_empty() {
            writeln!(f, "Filters:")?;
            for (key, value) in params.filters.parsed.iter() {
                match (key, value) {
                    (RAW_KEY, FilterValue::List(exprs)) => {
                        for expr in exprs {
                            writeln!(f, "  - {expr}")?;
                        }
                    }
                    (RAW_KEY, other) => {
                        writeln!(f, "  - {other}")?;
                    }
                    (key, FilterValue::List(_)) => {
                        writeln!(f, "  - {key} IN {value}")?;
                    }
                    (key, value) => {
                        writeln!(f, "  - {key} = {value}")?;
                    }
                }
            }
            writeln!(f)?;
        }
        if let Some(cols) = &params.projection {
            writeln!(f, "Columns: {}", cols.join(", "))?;
            writeln!(f)?;
        }
        if let Some(sort) = params.sort.parsed.as_ref().filter(|s| !s.is_empty()) {
            let terms: Vec<String> = sort
                .iter()
                .map(|k| format!("{} {}", k.column, k.direction.sql()))
                .collect();
            writeln!(f, "Sort: {}", terms.join(", "))?;
            writeln!(f)?;
        }
        if let Some(sample) = &params.sample.parsed {
            let line = match sample.strategy {
                SampleStrategy::Stratified => format!(
                    "Stratified ({} per group by {})",
                    sample.per_group.unwrap_or(0),
                    sample.by.join(", ")
                ),
                SampleStrategy::Random => format!("Random ({} records)", sample.n.unwrap_or(0)),
                SampleStrategy::Seeded => format!(
                    "Seeded ({} records, seed={})",
                    sample.n.unwrap_or(0),
                    sample.seed.unwrap_or(0)
                ),
                SampleStrategy::None => "None".to_owned(),
            };
            writeln!(f, "Sampling: {line}")?;
            writeln!(f)?;
        }
        if let Some(limit) = params.limit.filter(|l| *l > 0) {
            writeln!(f, "Limit: {limit} records")?;
        }
        if let Some(offset) = params.offset.filter(|o| *o > 0) {
            writeln!(f, "Offset: {offset}")?;
        }
        let format = manifest.execution.output_format.as_deref().unwrap_or("N/A");
        write!(f, "Output: {}", format.to_uppercase())?;
        if let Some(n) = manifest.execution.preview_count.filter(|n| *n > 0) {
            write!(f, "\nPreview: First {n} records")?;
        }
        Ok(())
    }
}
