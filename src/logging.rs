//! Global `tracing` subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{QuarryError, Result};

/// Installs a global `tracing` subscriber filtered by `level` (any
/// `EnvFilter` directive, e.g. `info` or `quarry=debug`).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| QuarryError::Message(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| QuarryError::Message("logging already initialized".into()))
}
