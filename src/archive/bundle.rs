//! Tar container packing and integrity verification

use crate::error::{Error, Result};
use crate::services::Checksummer;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Write an uncompressed tar container at `dest` holding each
/// `(source file, name in container)` pair, in order.
pub fn pack(dest: &Path, members: &[(PathBuf, String)]) -> std::io::Result<()> {
    let file = File::create(dest)?;
    let mut builder = tar::Builder::new(BufWriter::new(file));
    builder.mode(tar::HeaderMode::Deterministic);

    for (source, name) in members {
        builder.append_path_with_name(source, name)?;
    }

    let mut writer = builder.into_inner()?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())?
        .sync_all()
}

/// Result of a successful integrity check
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedArchive {
    /// Container file name
    pub archive: String,
    /// Payload file name inside the container
    pub payload: String,
    /// Payload size in bytes
    pub payload_size: u64,
    /// Checksum that matched
    pub checksum: String,
}

/// Unpack the container at `path`, recompute the payload checksum and
/// compare it with the stored one.
pub async fn verify(path: &Path, checksummer: &dyn Checksummer) -> Result<VerifiedArchive> {
    let archive = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let fail = |reason: String| Error::Verification {
        archive: archive.clone(),
        reason,
    };

    let scratch = tempfile::Builder::new().prefix(".pgbackup-verify-").tempdir()?;
    let suffix = format!(".{}", checksummer.algorithm());

    let (payload, checksum_text) = {
        let source = path.to_path_buf();
        let target = scratch.path().to_path_buf();
        let suffix = suffix.clone();
        tokio::task::spawn_blocking(move || unpack(&source, &target, &suffix))
            .await
            .map_err(|e| fail(format!("unpack worker panicked: {}", e)))?
            .map_err(|e| fail(e.to_string()))?
    };

    let payload = payload.ok_or_else(|| fail("no payload in container".to_string()))?;
    let checksum_text =
        checksum_text.ok_or_else(|| fail(format!("no {} file in container", suffix)))?;

    let mut fields = checksum_text.split_whitespace();
    let expected = fields
        .next()
        .ok_or_else(|| fail("empty checksum file".to_string()))?
        .to_lowercase();
    if let Some(listed) = fields.next() {
        let listed = listed.trim_start_matches('*');
        if listed != payload {
            return Err(fail(format!(
                "checksum file names '{}' but payload is '{}'",
                listed, payload
            )));
        }
    }

    let payload_path = scratch.path().join(&payload);
    let actual = checksummer.digest_file(&payload_path).await?;
    if actual != expected {
        return Err(fail(format!(
            "checksum mismatch: expected {}, got {}",
            expected, actual
        )));
    }

    let payload_size = tokio::fs::metadata(&payload_path).await?.len();
    Ok(VerifiedArchive {
        archive,
        payload,
        payload_size,
        checksum: actual,
    })
}

/// Extract the payload into `target` and return its name together with the
/// checksum file contents.
fn unpack(
    source: &Path,
    target: &Path,
    checksum_suffix: &str,
) -> std::io::Result<(Option<String>, Option<String>)> {
    let mut container = tar::Archive::new(File::open(source)?);
    let mut payload = None;
    let mut checksum = None;

    for entry in container.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if name.contains('/') || name.starts_with('.') {
            continue;
        }
        if name.ends_with(checksum_suffix) {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            checksum = Some(text);
        } else {
            entry.unpack(target.join(&name))?;
            payload = Some(name);
        }
    }

    Ok((payload, checksum))
}
