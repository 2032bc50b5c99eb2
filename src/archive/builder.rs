//! Per-schema archive construction
//!
//! ```text
//! scratch/ (private, removed on every exit path)
//! ├── {base}.sql.{ext}          ← dump ══pipe══ compressor
//! ├── {base}.sql.{ext}.sha256   ← checksum of the compressed payload
//! └── {base}.tar                ← container, renamed into the output dir
//! ```

use super::{pack, Archive, ArchiveName};
use crate::error::{Error, Result};
use crate::services::Services;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Capacity of the in-memory pipe between dump and compressor
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Builds one archive per call, each inside its own scratch workspace.
pub struct ArtifactBuilder {
    services: Services,
    scratch_root: PathBuf,
    output_dir: PathBuf,
}

impl ArtifactBuilder {
    /// Builder creating scratch workspaces under `scratch_root` and leaving
    /// finished containers in `output_dir`.
    ///
    /// Keep both on the same filesystem so the final move is a rename.
    pub fn new(services: Services, scratch_root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            services,
            scratch_root: scratch_root.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Dump, compress, checksum and package one schema.
    pub async fn build(&self, schema: &str) -> Result<Archive> {
        let name = ArchiveName::new(schema, self.services.clock.now_local());
        let dump_err = |reason: String| Error::Dump {
            schema: schema.to_string(),
            reason,
        };
        let packaging_err = |reason: String| Error::Packaging {
            schema: schema.to_string(),
            reason,
        };

        let scratch = tempfile::Builder::new()
            .prefix(&format!(".scratch-{}-", schema))
            .tempdir_in(&self.scratch_root)
            .map_err(|e| dump_err(format!("cannot create scratch workspace: {}", e)))?;
        tracing::debug!(scratch = %scratch.path().display(), "Allocated scratch workspace");

        let payload_name = name.payload_name(self.services.compressor.extension());
        let payload_path = scratch.path().join(&payload_name);
        let payload_size = self
            .dump_and_compress(schema, &payload_path)
            .await
            .map_err(dump_err)?;
        tracing::debug!(payload = %payload_name, bytes = payload_size, "Dump compressed");

        let checksummer = &self.services.checksummer;
        let checksum = checksummer
            .digest_file(&payload_path)
            .await
            .map_err(|e| packaging_err(format!("checksum: {}", e)))?;
        let checksum_name = format!("{}.{}", payload_name, checksummer.algorithm());
        let checksum_path = scratch.path().join(&checksum_name);
        tokio::fs::write(&checksum_path, format!("{}  {}\n", checksum, payload_name))
            .await
            .map_err(|e| packaging_err(format!("write checksum file: {}", e)))?;

        let file_name = name.file_name();
        let bundle_path = scratch.path().join(&file_name);
        {
            let bundle_path = bundle_path.clone();
            let members = vec![(payload_path, payload_name.clone()), (checksum_path, checksum_name)];
            tokio::task::spawn_blocking(move || pack(&bundle_path, &members))
                .await
                .map_err(|e| packaging_err(format!("packing worker panicked: {}", e)))?
                .map_err(|e| packaging_err(format!("pack: {}", e)))?;
        }

        let final_path = self.output_dir.join(&file_name);
        publish(&bundle_path, &final_path)
            .await
            .map_err(|e| packaging_err(format!("move to {}: {}", self.output_dir.display(), e)))?;

        release(scratch);

        tracing::info!(archive = %file_name, bytes = payload_size, checksum = %checksum, "Archive built");
        Ok(Archive {
            schema: schema.to_string(),
            created_at: name.timestamp(),
            base_name: name.base(),
            path: final_path,
            payload_name,
            payload_size,
            checksum,
            checksum_algorithm: checksummer.algorithm().to_string(),
        })
    }

    /// Run the dump and the compressor concurrently over a bounded pipe.
    ///
    /// Both sides always run to completion: a failing producer closes the
    /// pipe, a failing consumer breaks it.
    async fn dump_and_compress(&self, schema: &str, payload_path: &Path) -> std::result::Result<u64, String> {
        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (dumped, compressed) = tokio::join!(
            self.services.dump.dump(schema, Box::new(writer)),
            self.services.compressor.compress(Box::new(reader), payload_path),
        );

        match (dumped, compressed) {
            (Ok(()), Ok(size)) => Ok(size),
            (Err(dump), Ok(_)) => Err(dump.to_string()),
            (Ok(()), Err(compress)) => Err(compress.to_string()),
            (Err(dump), Err(compress)) => Err(format!("{}; {}", dump, compress)),
        }
    }
}

async fn publish(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(from, to).await
}

fn release(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        tracing::warn!(scratch = %path.display(), error = %e, "Failed to remove scratch workspace");
    }
}
