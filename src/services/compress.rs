//! Payload compressors

use super::{ByteSource, Compressor};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::io::SyncIoBridge;

/// Highest regular (non-ultra) zstd level
pub const ZSTD_MAX_LEVEL: i32 = 19;

/// Parallel gzip via the external `pigz` binary at level 9.
pub struct PigzCompressor {
    threads: u32,
    program: PathBuf,
}

impl PigzCompressor {
    /// Compressor using `pigz` from `PATH`
    pub fn new(threads: u32) -> Self {
        Self {
            threads: threads.max(1),
            program: PathBuf::from("pigz"),
        }
    }

    /// Use a specific `pigz` binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Compressor for PigzCompressor {
    async fn compress(&self, mut source: ByteSource, dest: &Path) -> Result<u64> {
        let output = tokio::fs::File::create(dest).await?.into_std().await;

        let mut child = Command::new(&self.program)
            .arg("-9")
            .arg("-p")
            .arg(self.threads.to_string())
            .arg("-c")
            .stdin(Stdio::piped())
            .stdout(Stdio::from(output))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool("pigz", format!("spawn failed: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::tool("pigz", "stdin not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool("pigz", "stderr not captured"))?;

        let feed = async {
            let fed = tokio::io::copy(&mut source, &mut stdin).await;
            // Closing stdin is how pigz learns the stream ended.
            drop(stdin);
            fed
        };
        let diagnostics = async {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        };
        let (fed, diagnostics) = tokio::join!(feed, diagnostics);

        if let Err(e) = fed {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(Error::tool("pigz", format!("input stream broken: {}", e)));
        }

        let status = child.wait().await.map_err(|e| Error::tool("pigz", e))?;
        if !status.success() {
            return Err(Error::tool(
                "pigz",
                format!("exited with {}: {}", status, diagnostics.trim()),
            ));
        }

        Ok(tokio::fs::metadata(dest).await?.len())
    }

    fn extension(&self) -> &str {
        "gz"
    }

    fn required_tools(&self) -> Vec<String> {
        vec![self.program.to_string_lossy().into_owned()]
    }
}

/// In-process multithreaded zstd. Needs no external binary.
pub struct ZstdCompressor {
    threads: u32,
    level: i32,
}

impl ZstdCompressor {
    /// Maximum-level zstd with `threads` workers
    pub fn new(threads: u32) -> Self {
        Self {
            threads: threads.max(1),
            level: ZSTD_MAX_LEVEL,
        }
    }

    /// Override the compression level
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

#[async_trait]
impl Compressor for ZstdCompressor {
    async fn compress(&self, source: ByteSource, dest: &Path) -> Result<u64> {
        let mut reader = SyncIoBridge::new(source);
        // Created up front so the worker never touches the directory itself.
        let file = tokio::fs::File::create(dest).await?.into_std().await;
        let level = self.level;
        let threads = self.threads;

        let written = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
            let mut encoder = zstd::stream::write::Encoder::new(file, level)?;
            if threads > 1 {
                encoder.multithread(threads)?;
            }
            std::io::copy(&mut reader, &mut encoder)?;
            let file = encoder.finish()?;
            file.sync_all()?;
            Ok(file.metadata()?.len())
        })
        .await
        .map_err(|e| Error::tool("zstd", format!("worker panicked: {}", e)))?
        .map_err(|e| Error::tool("zstd", e))?;

        Ok(written)
    }

    fn extension(&self) -> &str {
        "zst"
    }

    fn required_tools(&self) -> Vec<String> {
        Vec::new()
    }
}
