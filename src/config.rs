//! TOML configuration: named databases and the default log level.
//!
//! ```toml
//! log_level = "info"
//! default_database = "semif"
//!
//! [databases.semif]
//! path = "/data/agir.db"
//! schema = "cutout"
//!
//! [databases.field]
//! path = "/data/field.db"
//! schema = "field"
//! table = "records"
//! busy_timeout_ms = 10000
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::SchemaKind;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "QUARRY_CONFIG";
/// Busy timeout applied when none is configured.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Log filter used when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Connection settings for one database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Logical name (the `[databases.<name>]` key), if loaded from a file.
    pub name: Option<String>,
    /// SQLite file.
    pub path: PathBuf,
    /// Table layout.
    pub schema: SchemaKind,
    /// Table to query.
    pub table: String,
    /// Stable identifier column.
    pub id_column: String,
    /// How long to wait on a locked database.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Settings with the schema's default table and identifier.
    pub fn new(path: impl Into<PathBuf>, schema: SchemaKind) -> Self {
        Self {
            name: None,
            path: path.into(),
            schema,
            table: schema.default_table().to_owned(),
            id_column: schema.default_id_column().to_owned(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Overrides the table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Overrides the identifier column.
    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    /// Overrides the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Loaded configuration.
#[derive(Debug, Default)]
pub struct QuarryConfig {
    path: Option<PathBuf>,
    log_level: Option<String>,
    default_database: Option<String>,
    databases: BTreeMap<String, StoreConfig>,
}

impl QuarryConfig {
    /// Loads `explicit`, else `$QUARRY_CONFIG`, else the per-user default.
    /// Only a missing per-user default yields the empty configuration; a
    /// named file must exist.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let named = explicit.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let (path, raw) = match named {
            Some(config_path) => {
                let raw = read_file(&config_path)?;
                (Some(config_path), raw)
            }
            None => match default_config_path() {
                Some(config_path) if config_path.exists() => {
                    let raw = read_file(&config_path)?;
                    (Some(config_path), raw)
                }
                fallback => (fallback, RawConfig::default()),
            },
        };
        let mut config = Self::from_raw(raw)?;
        config.path = path;
        Ok(config)
    }

    /// Parses configuration text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut databases = BTreeMap::new();
        for (name, entry) in raw.databases {
            let store = convert_database(&name, entry)?;
            databases.insert(name, store);
        }
        if let Some(default_name) = raw.default_database.as_ref() {
            if !databases.contains_key(default_name) {
                return Err(ConfigError::DatabaseNotFound {
                    name: default_name.clone(),
                });
            }
        }
        Ok(Self {
            path: None,
            log_level: raw.log_level,
            default_database: raw.default_database,
            databases,
        })
    }

    /// File the configuration was read from (or would be).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Log filter directive.
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Named database.
    pub fn database(&self, name: &str) -> Result<&StoreConfig, ConfigError> {
        self.databases
            .get(name)
            .ok_or_else(|| ConfigError::DatabaseNotFound {
                name: name.to_owned(),
            })
    }

    /// The `default_database` entry, if set.
    pub fn default_database(&self) -> Option<&StoreConfig> {
        self.default_database
            .as_deref()
            .and_then(|name| self.databases.get(name))
    }

    /// All databases by name.
    pub fn databases(&self) -> impl Iterator<Item = &StoreConfig> {
        self.databases.values()
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn convert_database(name: &str, raw: RawDatabase) -> Result<StoreConfig, ConfigError> {
    let schema = match raw.schema.as_deref() {
        Some(value) => value
            .parse::<SchemaKind>()
            .map_err(|_| ConfigError::InvalidSchema {
                database: name.to_owned(),
                value: value.to_owned(),
            })?,
        None => SchemaKind::default(),
    };
    let path = raw.path.ok_or_else(|| ConfigError::MissingPath {
        database: name.to_owned(),
    })?;
    let mut store = StoreConfig::new(path, schema);
    store.name = Some(name.to_owned());
    if let Some(table) = raw.table {
        store.table = table;
    }
    if let Some(id_column) = raw.id_column {
        store.id_column = id_column;
    }
    if let Some(ms) = raw.busy_timeout_ms {
        store.busy_timeout = Duration::from_millis(ms);
    }
    Ok(store)
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    default_database: Option<String>,
    #[serde(default)]
    databases: BTreeMap<String, RawDatabase>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawDatabase {
    path: Option<PathBuf>,
    schema: Option<String>,
    table: Option<String>,
    id_column: Option<String>,
    busy_timeout_ms: Option<u64>,
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Config file is not valid TOML for this layout.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A database entry has no `path`.
    #[error("database '{database}' has no path")]
    MissingPath {
        /// Entry name.
        database: String,
    },
    /// A database entry names an unknown schema.
    #[error("database '{database}' schema '{value}' is invalid")]
    InvalidSchema {
        /// Entry name.
        database: String,
        /// Value as written.
        value: String,
    },
    /// No entry with this name.
    #[error("database '{name}' not found")]
    DatabaseNotFound {
        /// Requested name.
        name: String,
    },
}

/// Per-user config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("quarry").join("config.toml"))
}
