//! Retention tiers and their on-disk layout
//!
//! ```text
//! {root}/
//! ├── daily/      # landing tier, every archive
//! ├── weekly/     # copies of archives dated on a Wednesday
//! ├── monthly/    # copies of archives dated on the 1st
//! └── .incoming/  # finished bundles waiting to be promoted
//! ```

mod classifier;

pub use classifier::{qualifying_tiers, Classification, Classifier};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Retention category with its own directory and max-age policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTier {
    /// Landing tier; every archive
    Daily,
    /// Archives dated on a Wednesday
    Weekly,
    /// Archives dated on the first of the month
    Monthly,
}

impl RetentionTier {
    /// All tiers, landing tier first
    pub const ALL: [RetentionTier; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Directory name under the backup root
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Directory layout derived from the backup root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLayout {
    root: PathBuf,
}

impl TierLayout {
    /// Layout rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Backup root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a tier
    pub fn dir(&self, tier: RetentionTier) -> PathBuf {
        self.root.join(tier.dir_name())
    }

    /// Where finished bundles wait before promotion into the daily tier
    pub fn incoming_dir(&self) -> PathBuf {
        self.root.join(".incoming")
    }

    /// Create every directory of the layout
    pub async fn ensure(&self) -> std::io::Result<()> {
        for tier in RetentionTier::ALL {
            tokio::fs::create_dir_all(self.dir(tier)).await?;
        }
        tokio::fs::create_dir_all(self.incoming_dir()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tier_dirs() {
        let layout = TierLayout::new("/backups");
        assert_eq!(layout.dir(RetentionTier::Daily), PathBuf::from("/backups/daily"));
        assert_eq!(layout.dir(RetentionTier::Weekly), PathBuf::from("/backups/weekly"));
        assert_eq!(layout.dir(RetentionTier::Monthly), PathBuf::from("/backups/monthly"));
        assert_eq!(layout.incoming_dir(), PathBuf::from("/backups/.incoming"));
    }

    #[test]
    fn test_tier_display_and_serde() {
        assert_eq!(RetentionTier::Weekly.to_string(), "weekly");
        let json = serde_json::to_string(&RetentionTier::Monthly).unwrap();
        assert_eq!(json, "\"monthly\"");
    }

    #[tokio::test]
    async fn test_ensure_creates_layout() {
        let dir = TempDir::new().unwrap();
        let layout = TierLayout::new(dir.path().join("pg"));
        layout.ensure().await.unwrap();

        for tier in RetentionTier::ALL {
            assert!(layout.dir(tier).is_dir());
        }
        assert!(layout.incoming_dir().is_dir());

        // Idempotent
        layout.ensure().await.unwrap();
    }
}
