//! Writes record streams as JSON or CSV.
//!
//! Both writers consume any iterator of `Result<Record>`, so a live
//! [`Records`](crate::query::executor::Records) stream is written without
//! being collected first. The first error stops the export.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use csv::WriterBuilder;
use tracing::info;

use crate::error::{QuarryError, Result};
use crate::query::row::Row;
use crate::query::value::Value;
use crate::record::Record;

/// Output format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExportFormat {
    /// JSON array of flat objects.
    #[default]
    Json,
    /// CSV with a header row.
    Csv,
}

impl ExportFormat {
    /// Format implied by a file extension, if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()?.to_str()?.parse().ok()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(QuarryError::Message(format!("unknown export format '{other}'"))),
        }
    }
}

/// Writes records as a JSON array, one flattened object per line. Returns
/// the number of records written.
pub fn write_json<W, I>(out: &mut W, records: I) -> Result<u64>
where
    W: Write,
    I: IntoIterator<Item = Result<Record>>,
{
    let mut written = 0u64;
    out.write_all(b"[")?;
    for record in records {
        let flat = record?.flatten();
        out.write_all(if written == 0 { b"\n" } else { b",\n" })?;
        serde_json::to_writer(&mut *out, &flat)?;
        written += 1;
    }
    out.write_all(if written == 0 { b"]\n" } else { b"\n]\n" })?;
    out.flush()?;
    Ok(written)
}

/// Writes records as CSV. The header comes from the first record with the
/// `projection` columns first; null values are written as empty cells.
/// Nothing is written for an empty stream.
pub fn write_csv<W, I>(out: W, records: I, projection: Option<&[String]>) -> Result<u64>
where
    W: Write,
    I: IntoIterator<Item = Result<Record>>,
{
    let mut writer = WriterBuilder::new().from_writer(out);
    let mut header: Option<Vec<String>> = None;
    let mut written = 0u64;
    for record in records {
        let flat = record?.flatten();
        let columns = header.get_or_insert_with(|| csv_header(&flat, projection));
        let row: Vec<String> = columns
            .iter()
            .map(|column| flat.get(column).map(csv_cell).unwrap_or_default())
            .collect();
        if written == 0 {
            writer.write_record(columns.iter())?;
        }
        writer.write_record(&row)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Writes records to `path`, creating parent directories.
pub fn export_to_path<I>(
    records: I,
    path: impl AsRef<Path>,
    format: ExportFormat,
    projection: Option<&[String]>,
) -> Result<u64>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(path)?);
    let written = match format {
        ExportFormat::Json => {
            let mut file = file;
            write_json(&mut file, records)?
        }
        ExportFormat::Csv => write_csv(file, records, projection)?,
    };
    info!(path = %path.display(), %format, records = written, "exported records");
    Ok(written)
}

fn csv_header(first: &Row, projection: Option<&[String]>) -> Vec<String> {
    let mut header: Vec<String> = projection
        .unwrap_or_default()
        .iter()
        .filter(|c| first.get(c).is_some())
        .cloned()
        .collect();
    for column in first.columns() {
        if !header.contains(column) {
            header.push(column.clone());
        }
    }
    header
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
