//! pgbackup configuration management
//!
//! Configuration is read from a TOML file. Every section has defaults, so a
//! file only needs to list what differs. Passwords may also come from the
//! environment (`PGPASSWORD`, `PGBACKUP_REMOTE_PASSWORD`), which takes
//! precedence over the file.

use crate::error::{Error, Result};
use crate::tiers::{RetentionTier, TierLayout};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable overriding the database password
pub const DB_PASSWORD_ENV: &str = "PGPASSWORD";

/// Environment variable overriding the remote transfer password
pub const REMOTE_PASSWORD_ENV: &str = "PGBACKUP_REMOTE_PASSWORD";

/// Main pgbackup configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Database connection configuration
    pub database: DatabaseConfig,

    /// What to back up and where
    pub backup: BackupSettings,

    /// Compression configuration
    pub compression: CompressionConfig,

    /// Remote transfer configuration
    pub remote: RemoteConfig,

    /// Per-tier retention thresholds
    pub retention: RetentionConfig,

    /// Log output configuration
    pub logging: LoggingConfig,
}

/// A password that is wiped from memory on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether a value is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<unset>)")
        } else {
            f.write_str("Secret(********)")
        }
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.0.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str("********")
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Login role
    pub user: String,

    /// Login password (prefer `PGPASSWORD`)
    pub password: Secret,

    /// Database name
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: Secret::default(),
            name: "postgres".to_string(),
        }
    }
}

/// What to back up and where
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Schemas to dump, processed in this order
    pub schemas: Vec<String>,

    /// Root directory; `daily/`, `weekly/` and `monthly/` live beneath it
    pub root: PathBuf,

    /// Number of schemas built concurrently (1 = strictly sequential)
    pub parallelism: usize,

    /// Cancel the run after this many seconds (None = no deadline)
    pub deadline_secs: Option<u64>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            schemas: vec!["public".to_string()],
            root: PathBuf::from("/var/backups/postgres"),
            parallelism: 1,
            deadline_secs: None,
        }
    }
}

/// Compression codec used for the dump payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// External `pigz` (parallel gzip), `.sql.gz`
    #[default]
    Pigz,

    /// In-process multithreaded zstd, `.sql.zst`
    Zstd,
}

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Codec for the dump payload
    pub codec: Codec,

    /// Compressor thread count
    pub threads: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self {
            codec: Codec::default(),
            threads,
        }
    }
}

/// Remote transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Copy each finished archive to the remote host
    pub enabled: bool,

    /// Remote host
    pub host: String,

    /// Remote login
    pub user: String,

    /// Remote password (uses `sshpass`; prefer key auth)
    pub password: Secret,

    /// SSH identity file for key authentication
    pub identity_file: Option<PathBuf>,

    /// Remote target directory
    pub directory: String,

    /// SSH port
    pub port: u16,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            user: String::new(),
            password: Secret::default(),
            identity_file: None,
            directory: String::new(),
            port: 22,
        }
    }
}

/// Per-tier retention thresholds in days
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Max age of daily archives
    pub daily_days: u32,

    /// Max age of weekly archives
    pub weekly_days: u32,

    /// Max age of monthly archives
    pub monthly_days: u32,
}

impl RetentionConfig {
    /// Threshold for a tier
    pub fn days_for(&self, tier: RetentionTier) -> u32 {
        match tier {
            RetentionTier::Daily => self.daily_days,
            RetentionTier::Weekly => self.weekly_days,
            RetentionTier::Monthly => self.monthly_days,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily_days: 7,
            weekly_days: 28,
            monthly_days: 365,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append-only log file, written alongside terminal output
    pub file: Option<PathBuf>,

    /// Write the log file as JSON lines instead of plain text
    pub json: bool,
}

/// Schema names become file name components, so keep them to a safe alphabet.
fn is_safe_schema_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-'))
}

impl BackupConfig {
    /// Default config file location (`$XDG_CONFIG_HOME/pgbackup/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join("pgbackup").join("config.toml"))
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))
    }

    /// Load from an explicit path, the default path if it exists, or defaults.
    ///
    /// Environment overrides are applied in every case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&content)?
            }
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "Using default configuration file");
                    let content = std::fs::read_to_string(&path)?;
                    Self::from_toml_str(&content)?
                }
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override passwords from environment-style lookups
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(DB_PASSWORD_ENV).filter(|v| !v.is_empty()) {
            self.database.password = Secret::new(password);
        }
        if let Some(password) = lookup(REMOTE_PASSWORD_ENV).filter(|v| !v.is_empty()) {
            self.remote.password = Secret::new(password);
        }
    }

    /// Check the configuration for values that cannot produce a working run
    pub fn validate(&self) -> Result<()> {
        let schemas = &self.backup.schemas;
        if schemas.is_empty() {
            return Err(Error::Config("at least one schema is required".to_string()));
        }

        let mut seen = HashSet::new();
        for schema in schemas {
            if !is_safe_schema_name(schema) {
                return Err(Error::Config(format!(
                    "schema '{}' is not a valid file name component",
                    schema
                )));
            }
            if !seen.insert(schema.as_str()) {
                return Err(Error::Config(format!("schema '{}' listed twice", schema)));
            }
        }

        if self.backup.root.as_os_str().is_empty() {
            return Err(Error::Config("backup root must be set".to_string()));
        }
        if self.backup.parallelism == 0 {
            return Err(Error::Config("parallelism must be at least 1".to_string()));
        }
        if self.compression.threads == 0 {
            return Err(Error::Config("compression threads must be at least 1".to_string()));
        }

        if self.remote.enabled {
            let missing: Vec<&str> = [
                ("host", self.remote.host.is_empty()),
                ("user", self.remote.user.is_empty()),
                ("directory", self.remote.directory.is_empty()),
            ]
            .into_iter()
            .filter_map(|(name, empty)| empty.then_some(name))
            .collect();
            if !missing.is_empty() {
                return Err(Error::Config(format!(
                    "remote transfer enabled but missing: {}",
                    missing.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Validate and freeze into the job description for one run
    pub fn into_job(self) -> Result<BackupJob> {
        self.validate()?;
        Ok(BackupJob {
            layout: TierLayout::new(&self.backup.root),
            database: self.database,
            schemas: self.backup.schemas,
            parallelism: self.backup.parallelism,
            deadline: self.backup.deadline_secs.map(Duration::from_secs),
            compression: self.compression,
            remote: self.remote,
            retention: self.retention,
        })
    }
}

/// Immutable description of one backup run
#[derive(Debug, Clone)]
pub struct BackupJob {
    /// Connection parameters
    pub database: DatabaseConfig,

    /// Schemas in processing order
    pub schemas: Vec<String>,

    /// Concurrent schema workers
    pub parallelism: usize,

    /// Optional run deadline
    pub deadline: Option<Duration>,

    /// Compression settings
    pub compression: CompressionConfig,

    /// Remote transfer settings
    pub remote: RemoteConfig,

    /// Retention thresholds
    pub retention: RetentionConfig,

    /// Directory layout under the backup root
    pub layout: TierLayout,
}

impl BackupJob {
    /// Tier directories paired with their age thresholds
    pub fn retention_targets(&self) -> Vec<(RetentionTier, PathBuf, u32)> {
        RetentionTier::ALL
            .iter()
            .map(|&tier| (tier, self.layout.dir(tier), self.retention.days_for(tier)))
            .collect()
    }
}
