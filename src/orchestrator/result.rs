//! Run outcome accumulated by the orchestrator

use crate::error::{Error, ErrorKind};
use crate::tiers::RetentionTier;
use crate::transport::TransferStatus;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Exit status when every schema was backed up
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status when the run aborted before touching any schema
pub const EXIT_ABORTED: i32 = 1;
/// Exit status when at least one schema failed
pub const EXIT_PARTIAL_FAILURE: i32 = 2;
/// Exit status when the run was cancelled (128 + SIGINT)
pub const EXIT_CANCELLED: i32 = 130;

/// Orchestrator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, nothing checked yet
    Init,
    /// Probing for executables and preparing the backup root
    CheckingPrerequisites,
    /// Backing up schemas
    PerSchemaLoop,
    /// Pruning expired archives
    ApplyingRetention,
    /// Every stage ran; individual schemas may still have failed
    Done,
    /// Stopped before any schema was touched
    Aborted,
    /// Stopped by Ctrl-C or the run deadline
    Cancelled,
}

impl RunState {
    /// Whether the run has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted | RunState::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::CheckingPrerequisites => "checking_prerequisites",
            RunState::PerSchemaLoop => "per_schema_loop",
            RunState::ApplyingRetention => "applying_retention",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Per-schema result
#[derive(Debug, Clone, Serialize)]
pub struct SchemaOutcome {
    /// Schema name as configured
    pub schema: String,
    /// What happened to it
    #[serde(flatten)]
    pub status: SchemaStatus,
}

/// Result of backing up one schema
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchemaStatus {
    /// The archive reached the daily tier
    Succeeded {
        /// Archive location in the daily tier
        archive: PathBuf,
        /// Payload digest, lowercase hex
        checksum: String,
        /// Tiers holding a copy, daily first
        tiers: Vec<RetentionTier>,
        /// Weekly/monthly copies that could not be staged
        copy_failures: Vec<String>,
        /// Remote copy outcome
        transfer: TransferStatus,
    },
    /// Dump, compression or packaging failed; nothing reached a tier
    Failed {
        /// Failure classification
        kind: ErrorKind,
        /// Error message
        reason: String,
    },
    /// Not started, or interrupted before promotion
    Cancelled,
}

impl SchemaOutcome {
    /// Outcome for a schema that failed with `error`
    pub fn failed(schema: impl Into<String>, error: &Error) -> Self {
        Self {
            schema: schema.into(),
            status: SchemaStatus::Failed {
                kind: error.kind(),
                reason: error.to_string(),
            },
        }
    }

    /// Outcome for a schema cut short by cancellation
    pub fn cancelled(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            status: SchemaStatus::Cancelled,
        }
    }

    /// Whether the archive reached the daily tier
    pub fn is_success(&self) -> bool {
        matches!(self.status, SchemaStatus::Succeeded { .. })
    }
}

/// Aggregate outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Identifier carried by every log line of the run
    pub run_id: Uuid,
    /// Local time the run started
    pub started_at: NaiveDateTime,
    /// Final state
    pub status: RunState,
    /// Fatal diagnostic for aborted runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    /// One entry per schema, in configuration order
    pub schemas: Vec<SchemaOutcome>,
    /// Expired archives removed by retention
    pub pruned: Vec<PathBuf>,
    /// Deletions that failed during retention
    pub retention_failures: Vec<String>,
}

impl RunResult {
    /// Empty result in [`RunState::Init`]
    pub fn new(run_id: Uuid, started_at: NaiveDateTime) -> Self {
        Self {
            run_id,
            started_at,
            status: RunState::Init,
            fatal: None,
            schemas: Vec::new(),
            pruned: Vec::new(),
            retention_failures: Vec::new(),
        }
    }

    /// Outcome recorded for `schema`
    pub fn outcome(&self, schema: &str) -> Option<&SchemaOutcome> {
        self.schemas.iter().find(|o| o.schema == schema)
    }

    /// Schemas whose archive reached the daily tier
    pub fn succeeded(&self) -> impl Iterator<Item = &SchemaOutcome> {
        self.schemas.iter().filter(|o| o.is_success())
    }

    /// Schemas that failed
    pub fn failed(&self) -> impl Iterator<Item = &SchemaOutcome> {
        self.schemas
            .iter()
            .filter(|o| matches!(o.status, SchemaStatus::Failed { .. }))
    }

    /// Archives copied to the remote store
    pub fn transferred(&self) -> impl Iterator<Item = &PathBuf> {
        self.schemas.iter().filter_map(|o| match &o.status {
            SchemaStatus::Succeeded {
                archive,
                transfer: TransferStatus::Transferred,
                ..
            } => Some(archive),
            _ => None,
        })
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunState::Aborted => EXIT_ABORTED,
            RunState::Cancelled => EXIT_CANCELLED,
            _ if self.failed().next().is_some() => EXIT_PARTIAL_FAILURE,
            _ => EXIT_SUCCESS,
        }
    }

    /// Log the human-readable run summary
    pub fn log_summary(&self) {
        for outcome in &self.schemas {
            match &outcome.status {
                SchemaStatus::Succeeded {
                    archive,
                    tiers,
                    transfer,
                    ..
                } => {
                    let tiers: Vec<&str> = tiers.iter().map(|t| t.dir_name()).collect();
                    tracing::info!(
                        schema = %outcome.schema,
                        archive = %archive.display(),
                        tiers = %tiers.join(","),
                        transfer = ?transfer,
                        "Schema backed up"
                    );
                }
                SchemaStatus::Failed { kind, reason } => {
                    tracing::error!(schema = %outcome.schema, kind = ?kind, reason = %reason, "Schema failed");
                }
                SchemaStatus::Cancelled => {
                    tracing::warn!(schema = %outcome.schema, "Schema cancelled");
                }
            }
        }

        tracing::info!(
            run_id = %self.run_id,
            status = %self.status,
            succeeded = self.succeeded().count(),
            failed = self.failed().count(),
            transferred = self.transferred().count(),
            pruned = self.pruned.len(),
            "Backup run finished"
        );
    }
}
