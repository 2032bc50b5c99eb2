//! pgbackup error types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// pgbackup error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more external tools could not be found
    #[error("Missing prerequisites: {}", tools.join(", "))]
    PrerequisiteMissing {
        /// Names of the missing executables
        tools: Vec<String>,
    },

    /// An external tool or service failed
    #[error("{tool} failed: {reason}")]
    Tool {
        /// Tool or service name
        tool: String,
        /// Failure description
        reason: String,
    },

    /// The dump-and-compress pipeline failed for a schema
    #[error("Dump of schema '{schema}' failed: {reason}")]
    Dump {
        /// Schema being dumped
        schema: String,
        /// Failure description
        reason: String,
    },

    /// Checksumming or bundling failed for a schema
    #[error("Packaging of schema '{schema}' failed: {reason}")]
    Packaging {
        /// Schema being packaged
        schema: String,
        /// Failure description
        reason: String,
    },

    /// A weekly/monthly copy could not be staged
    #[error("Failed to stage {tier} copy: {reason}")]
    ClassificationCopy {
        /// Target tier name
        tier: String,
        /// Failure description
        reason: String,
    },

    /// Remote copy failed
    #[error("Transfer of '{archive}' failed: {reason}")]
    Transfer {
        /// Archive file name
        archive: String,
        /// Failure description
        reason: String,
    },

    /// An expired archive could not be deleted
    #[error("Failed to delete {}: {reason}", path.display())]
    RetentionDelete {
        /// File that could not be deleted
        path: PathBuf,
        /// Failure description
        reason: String,
    },

    /// Archive integrity check failed
    #[error("Verification of '{archive}' failed: {reason}")]
    Verification {
        /// Archive file name
        archive: String,
        /// Failure description
        reason: String,
    },

    /// The run was cancelled before the operation completed
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a failed external tool
    pub fn tool(tool: impl Into<String>, reason: impl ToString) -> Self {
        Error::Tool {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable classification of this error, recorded in run reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::PrerequisiteMissing { .. } => ErrorKind::PrerequisiteMissing,
            Error::Dump { .. } => ErrorKind::DumpError,
            Error::Packaging { .. } => ErrorKind::PackagingError,
            Error::ClassificationCopy { .. } => ErrorKind::ClassificationCopyError,
            Error::Transfer { .. } => ErrorKind::TransferError,
            Error::RetentionDelete { .. } => ErrorKind::RetentionDeleteError,
            Error::Verification { .. } => ErrorKind::VerificationError,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Tool { .. } | Error::Io(_) | Error::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Error classification tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Invalid configuration
    Config,
    /// Required executable not found
    PrerequisiteMissing,
    /// Dump-and-compress pipeline failed
    DumpError,
    /// Checksum or bundling failed
    PackagingError,
    /// Weekly/monthly copy failed
    ClassificationCopyError,
    /// Remote copy failed
    TransferError,
    /// Expired file could not be deleted
    RetentionDeleteError,
    /// Archive failed integrity check
    VerificationError,
    /// Run cancelled
    Cancelled,
    /// Unexpected internal failure
    Internal,
}

/// Result type alias for pgbackup operations
pub type Result<T> = std::result::Result<T, Error>;
