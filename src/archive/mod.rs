//! Backup archives
//!
//! An archive is an uncompressed tar container holding the compressed dump
//! of one schema plus its checksum file:
//!
//! ```text
//! orders_20240501_020000.tar
//! ├── orders_20240501_020000.sql.gz
//! └── orders_20240501_020000.sql.gz.sha256
//! ```
//!
//! Archives are immutable once built; tiers hold copies, and retention only
//! ever deletes whole archives.

mod builder;
mod bundle;

pub use builder::ArtifactBuilder;
pub use bundle::{pack, verify, VerifiedArchive};

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Container file extension
pub const ARCHIVE_EXTENSION: &str = "tar";

/// Timestamp layout embedded in archive names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?P<schema>.+)_(?P<stamp>\d{8}_\d{6})\.tar$").ok())
        .as_ref()
}

/// The stable `{schema}_{YYYYMMDD_HHMMSS}` identity of an archive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveName {
    schema: String,
    timestamp: NaiveDateTime,
}

impl ArchiveName {
    /// Name for `schema` stamped at `timestamp` (truncated to seconds)
    pub fn new(schema: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self {
            schema: schema.into(),
            timestamp,
        }
    }

    /// Parse a container file name such as `orders_20240501_020000.tar`
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = name_pattern()?.captures(file_name)?;
        let timestamp = NaiveDateTime::parse_from_str(&caps["stamp"], TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            schema: caps["schema"].to_string(),
            timestamp,
        })
    }

    /// Schema this archive belongs to
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Creation timestamp
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Calendar date used for tier classification
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// `{schema}_{YYYYMMDD_HHMMSS}`
    pub fn base(&self) -> String {
        format!("{}_{}", self.schema, self.timestamp.format(TIMESTAMP_FORMAT))
    }

    /// Container file name
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.base(), ARCHIVE_EXTENSION)
    }

    /// Payload file name inside the container
    pub fn payload_name(&self, compression_ext: &str) -> String {
        format!("{}.sql.{}", self.base(), compression_ext)
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// One completed backup unit
#[derive(Debug, Clone, Serialize)]
pub struct Archive {
    /// Schema identifier
    pub schema: String,
    /// Creation timestamp (second precision)
    pub created_at: NaiveDateTime,
    /// `{schema}_{timestamp}`
    pub base_name: String,
    /// Location of the container file
    pub path: PathBuf,
    /// Payload file name inside the container
    pub payload_name: String,
    /// Compressed payload size in bytes
    pub payload_size: u64,
    /// Hex checksum of the compressed payload
    pub checksum: String,
    /// Checksum algorithm
    pub checksum_algorithm: String,
}

impl Archive {
    /// Parsed name of this archive
    pub fn name(&self) -> ArchiveName {
        ArchiveName::new(self.schema.clone(), self.created_at)
    }

    /// Container file name
    pub fn file_name(&self) -> String {
        self.name().file_name()
    }
}
