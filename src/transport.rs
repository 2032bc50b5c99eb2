//! Best-effort remote copy of finished archives
//!
//! Local tiers stay the source of truth: a failed transfer is logged with the
//! archive name and reported, but never fails the schema or the run.

use crate::error::{Error, Result};
use crate::services::RemoteStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What happened to an archive's remote copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferStatus {
    /// Remote transfer is not configured
    Disabled,
    /// Copied to the remote target
    Transferred,
    /// Copy attempted and failed
    Failed { reason: String },
    /// Copy abandoned because the run was cancelled
    Cancelled,
}

/// Copies archives to the configured remote store, if any
#[derive(Clone)]
pub struct Transporter {
    remote: Option<Arc<dyn RemoteStore>>,
}

impl Transporter {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self { remote }
    }

    /// Whether a remote store is configured
    pub fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    /// Copy `archive` to the remote store.
    pub async fn transfer(&self, archive: &Path) -> Result<()> {
        let Some(remote) = &self.remote else {
            return Ok(());
        };
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.display().to_string());

        tracing::debug!(archive = %name, target = %remote.describe(), "Transferring archive");
        remote.upload(archive).await.map_err(|e| Error::Transfer {
            archive: name,
            reason: e.to_string(),
        })
    }

    /// [`Transporter::transfer`], with failures logged and folded into the status
    pub async fn transfer_best_effort(&self, archive: &Path) -> TransferStatus {
        let Some(remote) = &self.remote else {
            return TransferStatus::Disabled;
        };

        match self.transfer(archive).await {
            Ok(()) => {
                tracing::info!(archive = %archive.display(), target = %remote.describe(), "Archive transferred");
                TransferStatus::Transferred
            }
            Err(e) => {
                tracing::warn!(archive = %archive.display(), error = %e, "Remote transfer failed, keeping local copy");
                TransferStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// [`Transporter::transfer_best_effort`], abandoned once `cancel` fires.
    /// The local archive is left untouched either way.
    pub async fn transfer_unless_cancelled(&self, archive: &Path, cancel: &CancellationToken) -> TransferStatus {
        if !self.is_enabled() {
            return TransferStatus::Disabled;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(archive = %archive.display(), error = %Error::Cancelled, "Remote transfer abandoned, keeping local copy");
                TransferStatus::Cancelled
            }
            status = self.transfer_best_effort(archive) => status,
        }
    }
}
