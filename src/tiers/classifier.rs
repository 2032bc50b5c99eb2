//! Date-based tier classification
//!
//! An archive always lands in the daily tier. Archives dated on a Wednesday
//! are also copied to the weekly tier, archives dated on the 1st to the
//! monthly tier. Copies are advisory redundancy: a failed copy is logged
//! and reported, never fatal.

use super::{RetentionTier, TierLayout};
use crate::archive::ArchiveName;
use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Tiers an archive dated `date` belongs to, landing tier first.
pub fn qualifying_tiers(date: NaiveDate) -> Vec<RetentionTier> {
    let mut tiers = vec![RetentionTier::Daily];
    if date.weekday() == Weekday::Wed {
        tiers.push(RetentionTier::Weekly);
    }
    if date.day() == 1 {
        tiers.push(RetentionTier::Monthly);
    }
    tiers
}

/// Hidden name a tier copy is staged under before the rename into place
pub fn partial_copy_name(file_name: &str) -> String {
    format!(".{}.partial", file_name)
}

/// Whether `file_name` is a tier copy that never finished staging
pub fn is_partial_copy(file_name: &str) -> bool {
    file_name.len() > ".partial".len() + 1 && file_name.starts_with('.') && file_name.ends_with(".partial")
}

/// Outcome of classifying one archive
#[derive(Debug, Default, Clone, Serialize)]
pub struct Classification {
    /// Tiers the archive now occupies (daily included)
    pub tiers: Vec<RetentionTier>,
    /// Copies that could not be staged
    pub copy_failures: Vec<String>,
}

/// Stages weekly/monthly copies of archives already in the daily tier
pub struct Classifier {
    layout: TierLayout,
}

impl Classifier {
    /// Classifier over the given layout
    pub fn new(layout: TierLayout) -> Self {
        Self { layout }
    }

    /// Classify the archive at `daily_path` and copy it into every extra
    /// tier it qualifies for.
    pub async fn classify(&self, daily_path: &Path) -> Result<Classification> {
        let file_name = daily_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::ClassificationCopy {
                tier: "weekly/monthly".to_string(),
                reason: format!("{} has no file name", daily_path.display()),
            })?;
        let name = ArchiveName::parse(file_name).ok_or_else(|| Error::ClassificationCopy {
            tier: "weekly/monthly".to_string(),
            reason: format!("'{}' does not follow the archive naming pattern", file_name),
        })?;

        let mut classification = Classification {
            tiers: vec![RetentionTier::Daily],
            copy_failures: Vec::new(),
        };

        for tier in qualifying_tiers(name.date()) {
            if tier == RetentionTier::Daily {
                continue;
            }
            match self.stage_copy(daily_path, file_name, tier).await {
                Ok(path) => {
                    tracing::info!(archive = %file_name, tier = %tier, path = %path.display(), "Staged tier copy");
                    classification.tiers.push(tier);
                }
                Err(e) => {
                    tracing::warn!(archive = %file_name, tier = %tier, error = %e, "Failed to stage tier copy");
                    classification.copy_failures.push(e.to_string());
                }
            }
        }

        Ok(classification)
    }

    /// Copy under a hidden temporary name, then rename into place.
    async fn stage_copy(&self, source: &Path, file_name: &str, tier: RetentionTier) -> Result<PathBuf> {
        let copy_err = |e: std::io::Error| Error::ClassificationCopy {
            tier: tier.to_string(),
            reason: e.to_string(),
        };

        let dir = self.layout.dir(tier);
        tokio::fs::create_dir_all(&dir).await.map_err(copy_err)?;

        let partial = dir.join(partial_copy_name(file_name));
        let target = dir.join(file_name);

        if let Err(e) = tokio::fs::copy(source, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(copy_err(e));
        }
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(copy_err(e));
        }
        Ok(target)
    }

    /// Remove copies left half-written by an interrupted run.
    ///
    /// Returns the removed paths. Failures are logged and skipped.
    pub async fn sweep_partials(&self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for tier in RetentionTier::ALL {
            let dir = self.layout.dir(tier);
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                if !entry.file_name().to_str().is_some_and(is_partial_copy) {
                    continue;
                }
                let path = entry.path();
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        tracing::info!(tier = %tier, path = %path.display(), "Removed unfinished tier copy");
                        removed.push(path);
                    }
                    Err(e) => {
                        tracing::warn!(tier = %tier, path = %path.display(), error = %e, "Failed to remove unfinished tier copy");
                    }
                }
            }
        }
        removed
    }
}
