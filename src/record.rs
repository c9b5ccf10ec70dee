//! Normalized records and the per-schema adapters that build them from rows.
//!
//! Adapters are pure: they read column values and never touch the
//! filesystem. Unset, null and empty path columns all leave the field unset.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, RowConversionError};
use crate::query::row::Row;
use crate::query::value::Value;

/// Column holding the secondary identifier in both schemas.
pub const IMAGE_ID_COLUMN: &str = "image_id";

const CUTOUT_AUX_COLUMNS: [&str; 4] = [
    "cutout_path",
    "cutout_mask_path",
    "cutout_json_path",
    "cropout_path",
];

const FIELD_IMAGE_PRIORITY: [&str; 4] = [
    "developed_image_path",
    "raw_image_path",
    "cutout_image_path",
    "final_cutout_path",
];

const FIELD_AUX_COLUMNS: [&str; 5] = [
    "raw_image_path",
    "developed_image_path",
    "cutout_image_path",
    "final_cutout_path",
    "final_mask_path",
];

/// Supported table layouts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    /// One row per plant cutout (`semif` table).
    #[default]
    Cutout,
    /// One row per field image (`records` table).
    Field,
}

impl SchemaKind {
    /// Table queried when none is configured.
    pub fn default_table(self) -> &'static str {
        match self {
            SchemaKind::Cutout => "semif",
            SchemaKind::Field => "records",
        }
    }

    /// Identifier column used when none is configured.
    pub fn default_id_column(self) -> &'static str {
        match self {
            SchemaKind::Cutout => "cutout_id",
            SchemaKind::Field => "id",
        }
    }

    /// Adapter reading rows of this schema keyed by `id_column`.
    pub fn adapter(self, id_column: impl Into<String>) -> Box<dyn RecordAdapter> {
        let id_column = id_column.into();
        match self {
            SchemaKind::Cutout => Box::new(CutoutAdapter { id_column }),
            SchemaKind::Field => Box::new(FieldAdapter { id_column }),
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchemaKind::Cutout => "cutout",
            SchemaKind::Field => "field",
        })
    }
}

impl FromStr for SchemaKind {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cutout" | "semif" => Ok(SchemaKind::Cutout),
            "field" => Ok(SchemaKind::Field),
            other => Err(QuarryError::Message(format!("unknown schema '{other}'"))),
        }
    }
}

/// One normalized record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    /// Stable identifier.
    pub id: Value,
    /// Source image identifier, when present.
    pub image_id: Option<String>,
    /// Primary image path.
    pub image_path: Option<PathBuf>,
    /// Mask path.
    pub mask_path: Option<PathBuf>,
    /// Annotation metadata path.
    pub json_path: Option<PathBuf>,
    /// Other non-empty path columns by name.
    pub aux_paths: BTreeMap<String, PathBuf>,
    /// Every selected column, in select order.
    pub extras: Row,
}

impl Record {
    /// Flat column map: every selected column, with the resolved path fields
    /// overriding the raw columns of the same name. Path fields missing from
    /// the row are appended, so rows of one query share the same columns.
    pub fn flatten(&self) -> Row {
        let mut pairs: Vec<(String, Value)> = self
            .extras
            .iter()
            .map(|(k, v)| (k.to_owned(), v.clone()))
            .collect();
        let resolved = [
            ("image_path", &self.image_path),
            ("mask_path", &self.mask_path),
            ("json_path", &self.json_path),
        ];
        for (column, path) in resolved {
            let value = path
                .as_ref()
                .map(|p| Value::String(p.to_string_lossy().into_owned()))
                .unwrap_or(Value::Null);
            match pairs.iter_mut().find(|(k, _)| k == column) {
                Some((_, slot)) => *slot = value,
                None => pairs.push((column.to_owned(), value)),
            }
        }
        Row::from_pairs(pairs)
    }
}

/// Converts raw rows of one schema into [`Record`]s.
pub trait RecordAdapter: fmt::Debug {
    /// Schema this adapter reads.
    fn schema(&self) -> SchemaKind;

    /// Identifier column.
    fn id_column(&self) -> &str;

    /// Normalizes one row.
    fn to_record(&self, row: Row) -> Result<Record, RowConversionError>;
}

/// Adapter for the cutout schema.
#[derive(Clone, Debug)]
pub struct CutoutAdapter {
    id_column: String,
}

impl Default for CutoutAdapter {
    fn default() -> Self {
        Self {
            id_column: SchemaKind::Cutout.default_id_column().to_owned(),
        }
    }
}

impl RecordAdapter for CutoutAdapter {
    fn schema(&self) -> SchemaKind {
        SchemaKind::Cutout
    }

    fn id_column(&self) -> &str {
        &self.id_column
    }

    fn to_record(&self, row: Row) -> Result<Record, RowConversionError> {
        let id = identifier(&row, &self.id_column)?;
        let mut aux_paths = BTreeMap::new();
        for column in CUTOUT_AUX_COLUMNS {
            if let Some(path) = path_field(&row, column)? {
                aux_paths.insert(column.to_owned(), path);
            }
        }
        Ok(Record {
            id,
            image_id: text_field(&row, IMAGE_ID_COLUMN)?,
            image_path: path_field(&row, "image_path")?,
            mask_path: path_field(&row, "mask_path")?,
            json_path: path_field(&row, "json_path")?,
            aux_paths,
            extras: row,
        })
    }
}

/// Adapter for the field-image schema.
#[derive(Clone, Debug)]
pub struct FieldAdapter {
    id_column: String,
}

impl Default for FieldAdapter {
    fn default() -> Self {
        Self {
            id_column: SchemaKind::Field.default_id_column().to_owned(),
        }
    }
}

impl RecordAdapter for FieldAdapter {
    fn schema(&self) -> SchemaKind {
        SchemaKind::Field
    }

    fn id_column(&self) -> &str {
        &self.id_column
    }

    fn to_record(&self, row: Row) -> Result<Record, RowConversionError> {
        let id = identifier(&row, &self.id_column)?;
        let mut image_path = None;
        for column in FIELD_IMAGE_PRIORITY {
            if let Some(path) = path_field(&row, column)? {
                image_path = Some(path);
                break;
            }
        }
        let mut aux_paths = BTreeMap::new();
        for column in FIELD_AUX_COLUMNS {
            if let Some(path) = path_field(&row, column)? {
                aux_paths.insert(column.to_owned(), path);
            }
        }
        Ok(Record {
            id,
            image_id: text_field(&row, IMAGE_ID_COLUMN)?,
            image_path,
            mask_path: path_field(&row, "final_mask_path")?,
            json_path: None,
            aux_paths,
            extras: row,
        })
    }
}

fn identifier(row: &Row, column: &str) -> Result<Value, RowConversionError> {
    match row.get(column) {
        None | Some(Value::Null) => Err(RowConversionError::MissingIdentifier {
            column: column.to_owned(),
        }),
        Some(Value::String(s)) if s.is_empty() => Err(RowConversionError::MissingIdentifier {
            column: column.to_owned(),
        }),
        Some(value) => Ok(value.clone()),
    }
}

fn path_field(row: &Row, column: &str) -> Result<Option<PathBuf>, RowConversionError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(PathBuf::from(s))),
        Some(other) => Err(RowConversionError::UnexpectedType {
            column: column.to_owned(),
            found: other.type_name(),
        }),
    }
}

fn text_field(row: &Row, column: &str) -> Result<Option<String>, RowConversionError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v @ (Value::Int(_) | Value::Float(_))) => Ok(Some(v.to_string())),
        Some(other) => Err(RowConversionError::UnexpectedType {
            column: column.to_owned(),
            found: other.type_name(),
        }),
    }
}
