//! Filtered, sampled and streamed queries over plant-image SQLite databases.
//!
//! ```no_run
//! use quarry::{SchemaKind, Store};
//!
//! # fn main() -> quarry::Result<()> {
//! let store = Store::open("/data/agir.db", SchemaKind::Cutout)?;
//! let records = store
//!     .filter([("category_common_name", vec!["barley", "wheat"])])
//!     .where_expr("estimated_bbox_area_cm2 > 100")
//!     .sort("estimated_bbox_area_cm2", "desc")
//!     .limit(10)
//!     .all()?;
//! # let _ = records;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod manifest;
pub mod query;
pub mod record;
pub mod request;
pub mod store;

pub use config::{ConfigError, QuarryConfig, StoreConfig};
pub use error::{QuarryError, Result, RowConversionError};
pub use export::ExportFormat;
pub use manifest::QueryManifest;
pub use query::{QueryBuilder, QuerySpec};
pub use record::{Record, RecordAdapter, SchemaKind};
pub use request::QueryRequest;
pub use store::Store;
