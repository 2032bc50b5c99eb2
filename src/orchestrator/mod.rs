//! Backup run orchestration
//!
//! ```text
//! Init ─▶ CheckingPrerequisites ─┬─▶ PerSchemaLoop ─┬─▶ ApplyingRetention ─▶ Done
//!                                │                  │
//!                                └─▶ Aborted        └─▶ Cancelled
//! ```
//!
//! Per schema: build into `{root}/.incoming`, promote into `daily` with a
//! rename, stage weekly/monthly copies, then transfer (best effort). A
//! schema's failure is recorded and the loop moves on; only a missing
//! prerequisite or an unusable backup root aborts the run.

mod result;

pub use result::{
    RunResult, RunState, SchemaOutcome, SchemaStatus, EXIT_ABORTED, EXIT_CANCELLED,
    EXIT_PARTIAL_FAILURE, EXIT_SUCCESS,
};

use crate::archive::{Archive, ArtifactBuilder};
use crate::config::BackupJob;
use crate::error::{Error, Result};
use crate::retention::{RetentionManager, RetentionReport};
use crate::services::{missing_tools, Services};
use crate::tiers::{Classification, Classifier, RetentionTier};
use crate::transport::Transporter;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Returns the subset of tools that cannot be found
pub type ToolProbe = fn(&[String]) -> Vec<String>;

/// Drives one backup run over an immutable job
pub struct Orchestrator {
    job: Arc<BackupJob>,
    services: Services,
    builder: ArtifactBuilder,
    classifier: Classifier,
    transporter: Transporter,
    retention: RetentionManager,
    probe: ToolProbe,
}

impl Orchestrator {
    pub fn new(job: Arc<BackupJob>, services: Services) -> Self {
        let layout = job.layout.clone();
        Self {
            builder: ArtifactBuilder::new(services.clone(), layout.root(), layout.incoming_dir()),
            classifier: Classifier::new(layout),
            transporter: Transporter::new(services.remote.clone()),
            retention: RetentionManager::from_triples(job.retention_targets()),
            probe: missing_tools,
            job,
            services,
        }
    }

    /// Replace the `PATH` lookup used by the prerequisite check
    pub fn with_probe(mut self, probe: ToolProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Executables the configured services need
    pub fn required_tools(&self) -> Vec<String> {
        self.services.required_tools()
    }

    /// Fail if any executable the configured services need is missing.
    pub fn check_prerequisites(&self) -> Result<()> {
        let required = self.required_tools();
        let missing = (self.probe)(&required);
        if !missing.is_empty() {
            return Err(Error::PrerequisiteMissing { tools: missing });
        }
        tracing::debug!(tools = %required.join(","), "All prerequisites present");
        Ok(())
    }

    /// One retention pass over every tier, as of the service clock.
    pub async fn apply_retention(&self) -> RetentionReport {
        self.retention.enforce(self.services.clock.now_system()).await
    }

    /// Execute the full lifecycle. Cancelling `cancel` drops in-flight
    /// builds and transfers, marks unstarted schemas cancelled and skips
    /// retention.
    pub async fn run(&self, cancel: CancellationToken) -> RunResult {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_inner(run_id, cancel).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, cancel: CancellationToken) -> RunResult {
        let mut result = RunResult::new(run_id, self.services.clock.now_local());
        tracing::info!(
            schemas = self.job.schemas.len(),
            parallelism = self.job.parallelism,
            root = %self.job.layout.root().display(),
            "Backup run started"
        );

        transition(&mut result, RunState::CheckingPrerequisites);
        if let Err(e) = self.prepare().await {
            tracing::error!(error = %e, "Aborting backup run");
            result.fatal = Some(e.to_string());
            transition(&mut result, RunState::Aborted);
            return result;
        }

        transition(&mut result, RunState::PerSchemaLoop);
        result.schemas = stream::iter(&self.job.schemas)
            .map(|schema| self.process_schema(schema, &cancel))
            .buffered(self.job.parallelism.max(1))
            .collect()
            .await;

        if cancel.is_cancelled() {
            self.discard_unfinished().await;
            tracing::warn!("Run cancelled, retention skipped");
            transition(&mut result, RunState::Cancelled);
            return result;
        }

        transition(&mut result, RunState::ApplyingRetention);
        let report = self.apply_retention().await;
        result.pruned = report.deleted;
        result.retention_failures = report.failures;

        transition(&mut result, RunState::Done);
        result
    }

    async fn prepare(&self) -> Result<()> {
        self.check_prerequisites()?;
        let layout = &self.job.layout;
        layout.ensure().await.map_err(|e| {
            Error::Config(format!(
                "cannot prepare backup root {}: {}",
                layout.root().display(),
                e
            ))
        })?;
        self.discard_unfinished().await;
        Ok(())
    }

    async fn process_schema(&self, schema: &str, cancel: &CancellationToken) -> SchemaOutcome {
        if cancel.is_cancelled() {
            return SchemaOutcome::cancelled(schema);
        }

        let span = tracing::info_span!("schema", schema = %schema);
        self.backup_schema(schema, cancel).instrument(span).await
    }

    /// Build and promote under cancellation. Once the archive sits in the
    /// daily tier the schema counts as backed up: tier copies always finish
    /// and only the remote transfer is abandoned on cancel.
    async fn backup_schema(&self, schema: &str, cancel: &CancellationToken) -> SchemaOutcome {
        tracing::info!("Backing up schema");

        let built = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("Cancelled, in-flight build discarded");
                return SchemaOutcome::cancelled(schema);
            }
            built = self.builder.build(schema) => built,
        };

        let archive = match built {
            Ok(archive) => archive,
            Err(e) => {
                tracing::error!(error = %e, "Schema backup failed");
                return SchemaOutcome::failed(schema, &e);
            }
        };

        let daily = match self.promote(&archive).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(error = %e, "Schema backup failed");
                return SchemaOutcome::failed(schema, &e);
            }
        };

        let classification = match self.classifier.classify(&daily).await {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!(error = %e, "Tier classification failed");
                Classification {
                    tiers: vec![RetentionTier::Daily],
                    copy_failures: vec![e.to_string()],
                }
            }
        };

        let transfer = self.transporter.transfer_unless_cancelled(&daily, cancel).await;

        SchemaOutcome {
            schema: schema.to_string(),
            status: SchemaStatus::Succeeded {
                archive: daily,
                checksum: archive.checksum,
                tiers: classification.tiers,
                copy_failures: classification.copy_failures,
                transfer,
            },
        }
    }

    /// Move a finished bundle into the daily tier.
    async fn promote(&self, archive: &Archive) -> Result<PathBuf> {
        let target = self
            .job
            .layout
            .dir(RetentionTier::Daily)
            .join(archive.file_name());

        if let Err(e) = tokio::fs::rename(&archive.path, &target).await {
            let _ = tokio::fs::remove_file(&archive.path).await;
            return Err(Error::Packaging {
                schema: archive.schema.clone(),
                reason: format!("promote into daily tier: {}", e),
            });
        }
        tracing::debug!(archive = %target.display(), "Promoted into daily tier");
        Ok(target)
    }

    /// Remove bundles never promoted and tier copies never renamed into
    /// place, whether left by this run's cancellation or an earlier crash.
    async fn discard_unfinished(&self) {
        let incoming = self.job.layout.incoming_dir();
        if let Ok(mut entries) = tokio::fs::read_dir(&incoming).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to discard unpromoted archive");
                }
            }
        }
        self.classifier.sweep_partials().await;
    }
}

fn transition(result: &mut RunResult, next: RunState) {
    debug_assert!(
        !result.status.is_terminal(),
        "no transition out of {}",
        result.status
    );
    tracing::debug!(from = %result.status, to = %next, "State transition");
    result.status = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupConfig;
    use crate::error::ErrorKind;
    use crate::testing::{fake_services, RecordingRemote, ScriptedDump};
    use crate::transport::TransferStatus;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn all_present(_: &[String]) -> Vec<String> {
        Vec::new()
    }

    fn none_present(tools: &[String]) -> Vec<String> {
        tools.to_vec()
    }

    fn job(root: &Path, schemas: &[&str], parallelism: usize) -> Arc<BackupJob> {
        let mut config = BackupConfig::default();
        config.backup.root = root.to_path_buf();
        config.backup.schemas = schemas.iter().map(|s| s.to_string()).collect();
        config.backup.parallelism = parallelism;
        Arc::new(config.into_job().unwrap())
    }

    fn orchestrator_for(job: Arc<BackupJob>, services: Services) -> Orchestrator {
        Orchestrator::new(job, services).with_probe(all_present)
    }

    fn files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn assert_no_scratch(root: &Path) {
        assert!(files(root).iter().all(|n| !n.starts_with(".scratch-")));
        assert!(files(&root.join(".incoming")).is_empty());
    }

    fn seed_expired(root: &Path, clock_now: std::time::SystemTime) -> PathBuf {
        let daily = root.join("daily");
        std::fs::create_dir_all(&daily).unwrap();
        let path = daily.join("legacy_20240401_020000.tar");
        let file = std::fs::File::create(&path).unwrap();
        file.set_modified(clock_now - Duration::from_secs(30 * 86_400)).unwrap();
        path
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wednesday_first_lands_in_every_tier() {
        let root = TempDir::new().unwrap();
        let orchestrator = orchestrator_for(job(root.path(), &["orders"], 1), fake_services());

        let result = orchestrator.run(CancellationToken::new()).await;

        assert_eq!(result.status, RunState::Done);
        assert_eq!(result.exit_code(), EXIT_SUCCESS);
        for tier in RetentionTier::ALL {
            assert_eq!(
                files(&root.path().join(tier.dir_name())),
                vec!["orders_20240501_020000.tar"],
                "tier {}",
                tier
            );
        }
        match &result.outcome("orders").unwrap().status {
            SchemaStatus::Succeeded { tiers, transfer, .. } => {
                assert_eq!(
                    tiers,
                    &vec![RetentionTier::Daily, RetentionTier::Weekly, RetentionTier::Monthly]
                );
                assert_eq!(transfer, &TransferStatus::Disabled);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(result.transferred().count(), 0);
        assert!(result.pruned.is_empty());
        assert_no_scratch(root.path());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreachable_database_still_applies_retention() {
        let root = TempDir::new().unwrap();
        let mut services = fake_services();
        services.dump = Arc::new(ScriptedDump::new().failing("orders"));
        let expired = seed_expired(root.path(), services.clock.now_system());
        let orchestrator = orchestrator_for(job(root.path(), &["orders"], 1), services);

        let result = orchestrator.run(CancellationToken::new()).await;

        assert_eq!(result.status, RunState::Done);
        assert_eq!(result.exit_code(), EXIT_PARTIAL_FAILURE);
        match &result.outcome("orders").unwrap().status {
            SchemaStatus::Failed { kind, reason } => {
                assert_eq!(*kind, ErrorKind::DumpError);
                assert!(reason.contains("orders"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        for tier in RetentionTier::ALL {
            let dir = root.path().join(tier.dir_name());
            assert!(files(&dir).iter().all(|n| !n.starts_with("orders_")));
        }
        assert_eq!(result.pruned, vec![expired.clone()]);
        assert!(!expired.exists());
        assert_no_scratch(root.path());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_is_isolated_and_order_preserved() {
        let root = TempDir::new().unwrap();
        let dump = Arc::new(ScriptedDump::new());
        let mut services = fake_services();
        services.dump = dump.clone();
        let orchestrator = orchestrator_for(job(root.path(), &["alpha", "broken", "gamma"], 1), services);

        let result = orchestrator.run(CancellationToken::new()).await;

        let order: Vec<&str> = result.schemas.iter().map(|o| o.schema.as_str()).collect();
        assert_eq!(order, vec!["alpha", "broken", "gamma"]);
        assert_eq!(dump.calls(), vec!["alpha", "broken", "gamma"]);
        assert!(result.schemas[0].is_success());
        assert!(!result.schemas[1].is_success());
        assert!(result.schemas[2].is_success());
        assert_eq!(
            files(&root.path().join("daily")),
            vec!["alpha_20240501_020000.tar", "gamma_20240501_020000.tar"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_workers_keep_configuration_order() {
        let root = TempDir::new().unwrap();
        let schemas = ["alpha", "beta", "broken", "delta", "epsilon"];
        let orchestrator = orchestrator_for(job(root.path(), &schemas, 3), fake_services());

        let result = orchestrator.run(CancellationToken::new()).await;

        let order: Vec<&str> = result.schemas.iter().map(|o| o.schema.as_str()).collect();
        assert_eq!(order, schemas.to_vec());
        assert_eq!(result.succeeded().count(), 4);
        assert_eq!(result.failed().count(), 1);
        assert_eq!(files(&root.path().join("daily")).len(), 4);
        assert_no_scratch(root.path());
    }

    #[tokio::test]
    async fn test_missing_prerequisite_aborts_before_any_schema() {
        let root = TempDir::new().unwrap();
        let dump = Arc::new(ScriptedDump::new());
        let mut services = fake_services();
        services.dump = dump.clone();
        let orchestrator =
            Orchestrator::new(job(root.path(), &["orders"], 1), services).with_probe(none_present);

        let result = orchestrator.run(CancellationToken::new()).await;

        assert_eq!(result.status, RunState::Aborted);
        assert_eq!(result.exit_code(), EXIT_ABORTED);
        assert!(result.fatal.as_deref().unwrap().contains("pg_dump"));
        assert!(result.schemas.is_empty());
        assert!(dump.calls().is_empty());
        assert!(matches!(
            orchestrator.check_prerequisites(),
            Err(Error::PrerequisiteMissing { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transfer_is_best_effort() {
        let root = TempDir::new().unwrap();
        let remote = Arc::new(RecordingRemote::new());
        let mut services = fake_services();
        services.remote = Some(remote.clone());
        let orchestrator = orchestrator_for(job(root.path(), &["orders", "billing"], 1), services);

        let result = orchestrator.run(CancellationToken::new()).await;
        assert_eq!(result.transferred().count(), 2);
        assert_eq!(
            remote.uploads(),
            vec![
                root.path().join("daily/orders_20240501_020000.tar"),
                root.path().join("daily/billing_20240501_020000.tar"),
            ]
        );

        let root = TempDir::new().unwrap();
        let mut services = fake_services();
        services.remote = Some(Arc::new(RecordingRemote::rejecting()));
        let orchestrator = orchestrator_for(job(root.path(), &["orders"], 1), services);

        let result = orchestrator.run(CancellationToken::new()).await;
        assert_eq!(result.exit_code(), EXIT_SUCCESS);
        assert_eq!(result.transferred().count(), 0);
        assert!(root.path().join("daily/orders_20240501_020000.tar").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_skips_retention_and_leaves_no_partial_archive() {
        let root = TempDir::new().unwrap();
        let dump = Arc::new(ScriptedDump::new().hanging("stuck"));
        let mut services = fake_services();
        services.dump = dump.clone();
        let expired = seed_expired(root.path(), services.clock.now_system());
        let orchestrator = orchestrator_for(job(root.path(), &["orders", "stuck", "billing"], 1), services);

        let cancel = CancellationToken::new();
        let watcher = {
            let dump = dump.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while !dump.calls().iter().any(|s| s == "stuck") {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            })
        };

        let result = orchestrator.run(cancel).await;
        watcher.await.unwrap();

        assert_eq!(result.status, RunState::Cancelled);
        assert_eq!(result.exit_code(), EXIT_CANCELLED);
        assert!(result.schemas[0].is_success());
        assert!(matches!(result.schemas[1].status, SchemaStatus::Cancelled));
        assert!(matches!(result.schemas[2].status, SchemaStatus::Cancelled));
        assert_eq!(dump.calls(), vec!["orders", "stuck"]);

        assert!(expired.exists());
        assert!(result.pruned.is_empty());
        assert_eq!(
            files(&root.path().join("daily")),
            vec!["legacy_20240401_020000.tar", "orders_20240501_020000.tar"]
        );
        assert_no_scratch(root.path());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_during_transfer_keeps_promoted_archive_as_success() {
        let root = TempDir::new().unwrap();
        let remote = Arc::new(RecordingRemote::hanging());
        let mut services = fake_services();
        services.remote = Some(remote.clone());
        let orchestrator = orchestrator_for(job(root.path(), &["orders", "billing"], 1), services);

        let cancel = CancellationToken::new();
        let watcher = {
            let remote = remote.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while remote.uploads().is_empty() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            })
        };

        let result = orchestrator.run(cancel).await;
        watcher.await.unwrap();

        assert_eq!(result.status, RunState::Cancelled);
        assert_eq!(result.exit_code(), EXIT_CANCELLED);
        match &result.outcome("orders").unwrap().status {
            SchemaStatus::Succeeded {
                archive,
                tiers,
                transfer,
                ..
            } => {
                assert_eq!(archive, &root.path().join("daily/orders_20240501_020000.tar"));
                assert_eq!(tiers.len(), 3);
                assert_eq!(transfer, &TransferStatus::Cancelled);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(
            result.outcome("billing").unwrap().status,
            SchemaStatus::Cancelled
        ));
        assert_eq!(result.succeeded().count(), 1);
        for tier in RetentionTier::ALL {
            assert_eq!(
                files(&root.path().join(tier.dir_name())),
                vec!["orders_20240501_020000.tar"],
                "tier {}",
                tier
            );
        }
        assert_no_scratch(root.path());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_leftovers_of_an_interrupted_run_are_cleared() {
        let root = TempDir::new().unwrap();
        let layout = crate::tiers::TierLayout::new(root.path());
        layout.ensure().await.unwrap();
        let stale_copy = root.path().join("monthly/.orders_20240401_020000.tar.partial");
        let stale_bundle = root.path().join(".incoming/orders_20240430_020000.tar");
        std::fs::write(&stale_copy, b"half a copy").unwrap();
        std::fs::write(&stale_bundle, b"never promoted").unwrap();
        let orchestrator = orchestrator_for(job(root.path(), &["orders"], 1), fake_services());

        let result = orchestrator.run(CancellationToken::new()).await;

        assert_eq!(result.status, RunState::Done);
        assert!(!stale_copy.exists());
        assert!(!stale_bundle.exists());
        assert_eq!(
            files(&root.path().join("monthly")),
            vec!["orders_20240501_020000.tar"]
        );
        assert_eq!(
            files(&root.path().join("daily")),
            vec!["orders_20240501_020000.tar"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let root = TempDir::new().unwrap();
        let dump = Arc::new(ScriptedDump::new());
        let mut services = fake_services();
        services.dump = dump.clone();
        let orchestrator = orchestrator_for(job(root.path(), &["orders", "billing"], 1), services);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orchestrator.run(cancel).await;

        assert_eq!(result.status, RunState::Cancelled);
        assert!(result.schemas.iter().all(|o| matches!(o.status, SchemaStatus::Cancelled)));
        assert!(dump.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_root_aborts() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"").unwrap();
        let orchestrator = orchestrator_for(job(&blocker, &["orders"], 1), fake_services());

        let result = orchestrator.run(CancellationToken::new()).await;
        assert_eq!(result.status, RunState::Aborted);
        assert!(result.fatal.unwrap().contains("backup root"));
    }
}
