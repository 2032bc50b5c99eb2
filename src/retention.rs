//! Age-based pruning of tier directories
//!
//! Each tier is scanned on its own: files matching the archive naming
//! pattern whose age in whole days is strictly greater than the tier's
//! threshold are deleted. Anything else in the directory is left alone.

use crate::archive::ArchiveName;
use crate::error::Error;
use crate::tiers::RetentionTier;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const SECONDS_PER_DAY: u64 = 86_400;

/// One tier directory and its maximum age
#[derive(Debug, Clone)]
pub struct RetentionTarget {
    pub tier: RetentionTier,
    pub dir: PathBuf,
    pub max_age_days: u32,
}

/// Outcome of one retention pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct RetentionReport {
    /// Files removed, in scan order
    pub deleted: Vec<PathBuf>,
    /// Per-file or per-directory failures
    pub failures: Vec<String>,
}

impl RetentionReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Whole days between `modified` and `now`; zero when `modified` is in the future
pub fn age_in_days(modified: SystemTime, now: SystemTime) -> u64 {
    now.duration_since(modified)
        .unwrap_or(Duration::ZERO)
        .as_secs()
        / SECONDS_PER_DAY
}

/// Deletes expired archives from each tier
pub struct RetentionManager {
    targets: Vec<RetentionTarget>,
}

impl RetentionManager {
    pub fn new(targets: Vec<RetentionTarget>) -> Self {
        Self { targets }
    }

    /// Build from `(tier, directory, max age)` triples
    pub fn from_triples(triples: Vec<(RetentionTier, PathBuf, u32)>) -> Self {
        Self::new(
            triples
                .into_iter()
                .map(|(tier, dir, max_age_days)| RetentionTarget {
                    tier,
                    dir,
                    max_age_days,
                })
                .collect(),
        )
    }

    /// Scan every tier and delete archives older than its threshold as of `now`.
    pub async fn enforce(&self, now: SystemTime) -> RetentionReport {
        let mut report = RetentionReport::default();
        for target in &self.targets {
            self.enforce_tier(target, now, &mut report).await;
        }

        tracing::info!(
            deleted = report.deleted.len(),
            failures = report.failures.len(),
            "Retention applied"
        );
        report
    }

    async fn enforce_tier(&self, target: &RetentionTarget, now: SystemTime, report: &mut RetentionReport) {
        let mut entries = match tokio::fs::read_dir(&target.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(tier = %target.tier, dir = %target.dir.display(), "Tier directory absent, nothing to prune");
                return;
            }
            Err(e) => {
                let err = delete_error(&target.dir, e);
                tracing::warn!(tier = %target.tier, error = %err, "Cannot scan tier directory");
                report.failures.push(err.to_string());
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    let err = delete_error(&target.dir, e);
                    tracing::warn!(tier = %target.tier, error = %err, "Tier scan interrupted");
                    report.failures.push(err.to_string());
                    break;
                }
            };

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if ArchiveName::parse(file_name).is_none() {
                continue;
            }

            let path = entry.path();
            match expire(&path, target.max_age_days, now).await {
                Ok(Some(age)) => {
                    tracing::info!(tier = %target.tier, archive = %file_name, age_days = age, "Pruned expired archive");
                    report.deleted.push(path);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(tier = %target.tier, archive = %file_name, error = %err, "Failed to prune archive");
                    report.failures.push(err.to_string());
                }
            }
        }
    }
}

/// Delete `path` if it is older than `max_age_days`; returns its age when deleted.
async fn expire(path: &Path, max_age_days: u32, now: SystemTime) -> Result<Option<u64>, Error> {
    let modified = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map_err(|e| delete_error(path, e))?;

    let age = age_in_days(modified, now);
    if age <= u64::from(max_age_days) {
        return Ok(None);
    }

    tokio::fs::remove_file(path)
        .await
        .map_err(|e| delete_error(path, e))?;
    Ok(Some(age))
}

fn delete_error(path: &Path, e: std::io::Error) -> Error {
    Error::RetentionDelete {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
