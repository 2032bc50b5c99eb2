//! pgbackup - PostgreSQL schema backup lifecycle
//!
//! pgbackup dumps each configured schema, compresses the dump, checksums it,
//! packages payload and checksum into a tar archive, files the archive into
//! daily/weekly/monthly tiers, optionally copies it to a remote host, and
//! prunes archives that outlived their tier's retention.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            Orchestrator                              │
//! │  CheckingPrerequisites ─▶ PerSchemaLoop ─▶ ApplyingRetention ─▶ Done │
//! └────────────────────────────────┬─────────────────────────────────────┘
//!                                  │ per schema
//!   ┌──────────────────────────────▼───────────────────────────────┐
//!   │ ArtifactBuilder (scratch workspace)                          │
//!   │   DumpSource ══pipe══ Compressor ─▶ Checksummer ─▶ tar       │
//!   └──────────────────────────────┬───────────────────────────────┘
//!                                  │ rename
//!   {root}/daily ──copy──▶ {root}/weekly, {root}/monthly  (Classifier)
//!                │
//!                └──scp──▶ remote directory               (Transporter)
//!
//!   RetentionManager: delete archives older than each tier's threshold
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration and the immutable [`BackupJob`]
//! - [`services`]: Injectable dump, compression, checksum, remote and clock services
//! - [`archive`]: Archive naming, building, packaging and verification
//! - [`tiers`]: Retention tiers and date-based classification
//! - [`transport`]: Best-effort remote copy
//! - [`retention`]: Age-based pruning
//! - [`orchestrator`]: The run state machine and [`RunResult`]
//! - [`logging`]: Terminal and file log output

pub mod archive;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod retention;
pub mod services;
pub mod tiers;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{BackupConfig, BackupJob};
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::{Orchestrator, RunResult, RunState};
