//! Crate error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Errors that fail an entire query or store operation.
///
/// Everything except [`QuarryError::Store`] is raised before a single row is
/// read; row-level problems are reported through [`RowConversionError`] and
/// never abort a stream.
#[derive(Debug, Error)]
pub enum QuarryError {
    /// A filter expression matched none of the mini-DSL rules.
    #[error("malformed filter expression: {expr:?}")]
    MalformedFilter {
        /// Offending expression text, verbatim.
        expr: String,
    },
    /// Sampling parameters are missing or out of range.
    #[error("invalid sample spec: {0}")]
    InvalidSampleSpec(String),
    /// Sort direction other than `asc`/`desc`.
    #[error("sort direction must be 'asc' or 'desc' (got {direction:?})")]
    InvalidSortDirection {
        /// Direction as supplied by the caller.
        direction: String,
    },
    /// Column or table name cannot be used as an SQL identifier.
    #[error("invalid identifier {name:?}")]
    InvalidIdentifier {
        /// Identifier as supplied by the caller.
        name: String,
    },
    /// Operation is not available for the store's schema.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// Table has no columns or does not exist.
    #[error("table {table:?} not found")]
    UnknownTable {
        /// Configured table name.
        table: String,
    },
    /// Query was asked to run without a backing store.
    #[error("query builder is not attached to a store")]
    Detached,
    /// Database file not found at the configured path.
    #[error("database not found: {0}")]
    MissingDatabase(PathBuf),
    /// Row store failure (open, prepare, step). Propagated unchanged.
    #[error("row store error: {0}")]
    Store(#[from] rusqlite::Error),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// CSV export error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
}

impl QuarryError {
    pub(crate) fn malformed(expr: impl Into<String>) -> Self {
        QuarryError::MalformedFilter { expr: expr.into() }
    }

    pub(crate) fn missing_database(path: impl AsRef<Path>) -> Self {
        QuarryError::MissingDatabase(path.as_ref().to_path_buf())
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QuarryError::MalformedFilter { .. } => "MalformedFilter",
            QuarryError::InvalidSampleSpec(_) => "InvalidSampleSpec",
            QuarryError::InvalidSortDirection { .. } => "InvalidSort",
            QuarryError::InvalidIdentifier { .. } => "InvalidIdentifier",
            QuarryError::Unsupported(_) => "Unsupported",
            QuarryError::UnknownTable { .. } => "UnknownTable",
            QuarryError::Detached => "Detached",
            QuarryError::MissingDatabase(_) => "MissingDatabase",
            QuarryError::Store(_) => "StoreConnectivity",
            QuarryError::Io(_) => "Io",
            QuarryError::Json(_) => "Json",
            QuarryError::Csv(_) => "Csv",
            QuarryError::Message(_) => "Message",
        }
    }

    /// True for errors raised while compiling a query, before any row is read.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            QuarryError::MalformedFilter { .. }
                | QuarryError::InvalidSampleSpec(_)
                | QuarryError::InvalidSortDirection { .. }
                | QuarryError::InvalidIdentifier { .. }
        )
    }
}

/// Per-row normalization failure. Counted and logged by the executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowConversionError {
    /// Identifier column absent or null.
    #[error("identifier column '{column}' is missing or null")]
    MissingIdentifier {
        /// Identifier column name.
        column: String,
    },
    /// Text column holds bytes that are not UTF-8.
    #[error("column '{column}' is not valid UTF-8")]
    InvalidText {
        /// Column name.
        column: String,
    },
    /// Column holds a value of a type the adapter cannot use.
    #[error("column '{column}' has unexpected type {found}")]
    UnexpectedType {
        /// Column name.
        column: String,
        /// SQLite storage class that was found.
        found: &'static str,
    },
}
