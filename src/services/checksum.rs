//! SHA-256 payload checksums

use super::Checksummer;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

/// Streams a file through SHA-256 on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Checksummer;

impl Sha256Checksummer {
    /// Hex digest of an in-memory buffer
    pub fn digest_bytes(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }
}

#[async_trait]
impl Checksummer for Sha256Checksummer {
    async fn digest_file(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut file = std::fs::File::open(&path)?;
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        })
        .await
        .map_err(|e| Error::tool("sha256", format!("worker panicked: {}", e)))?
        .map_err(Error::from)
    }

    fn algorithm(&self) -> &str {
        "sha256"
    }
}
