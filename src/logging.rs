//! Terminal and append-only file logging
//!
//! Every line goes to stderr and, when a log file is configured, is also
//! appended to that file without ANSI colours. Both outputs carry timestamps
//! and the active `run`/`schema` spans.

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("pgbackup={}", level)
}

/// Install the global subscriber.
pub fn init(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose).into());

    let file = match &logging.file {
        Some(path) => Some(file_layer(open_append(path)?, logging.json)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file)
        .try_init()
        .map_err(|e| Error::Config(format!("cannot install logger: {}", e)))?;

    if let Some(path) = &logging.file {
        tracing::debug!(path = %path.display(), "Logging to file");
    }
    Ok(())
}

/// Open `path` for appending, creating it and its parent directory if needed.
pub fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn file_layer<S>(file: File, json: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let writer = Mutex::new(file);
    if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_ansi(false).with_writer(writer).boxed()
    }
}
