//! External collaborators behind narrow, injectable interfaces
//!
//! The backup lifecycle only ever talks to the database, the compressor, the
//! checksum algorithm, the remote store and the clock through these traits.
//! Production implementations shell out to `pg_dump`, `pigz` and `scp`;
//! tests substitute fakes so no real binaries are needed.
//!
//! ## Streaming
//!
//! ```text
//! DumpSource ──▶ ByteSink ══ duplex(64 KiB) ══ ByteSource ──▶ Compressor ──▶ payload file
//! ```
//!
//! Both halves run concurrently; the bounded pipe is the only buffer, so a
//! slow compressor stalls the dump and vice versa.

mod checksum;
mod clock;
mod compress;
mod dump;
mod probe;
mod remote;

pub use checksum::Sha256Checksummer;
pub use clock::{Clock, FixedClock, SystemClock};
pub use compress::{PigzCompressor, ZstdCompressor};
pub use dump::PgDump;
pub use probe::{find_executable, missing_tools};
pub use remote::ScpRemote;

use crate::config::{BackupJob, Codec};
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Owned readable byte stream
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Owned writable byte stream
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Produces the plain-SQL dump of one schema.
#[async_trait]
pub trait DumpSource: Send + Sync {
    /// Write the dump of `schema` into `sink`, then shut the sink down.
    ///
    /// Dropping the sink early (on error) signals end-of-stream to the reader.
    async fn dump(&self, schema: &str, sink: ByteSink) -> Result<()>;

    /// Executables this source needs on `PATH`
    fn required_tools(&self) -> Vec<String>;
}

/// Compresses a byte stream into a file.
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Consume `source` until end-of-stream and write the compressed bytes
    /// to `dest`. Returns the compressed size.
    async fn compress(&self, source: ByteSource, dest: &Path) -> Result<u64>;

    /// File extension of the compressed payload (without the dot)
    fn extension(&self) -> &str;

    /// Executables this compressor needs on `PATH`
    fn required_tools(&self) -> Vec<String>;
}

/// Computes the integrity checksum of a file.
#[async_trait]
pub trait Checksummer: Send + Sync {
    /// Lowercase hex digest of the file's contents
    async fn digest_file(&self, path: &Path) -> Result<String>;

    /// Algorithm name, also the checksum file extension
    fn algorithm(&self) -> &str;

    /// Executables this checksummer needs on `PATH`
    fn required_tools(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Copies finished archives to a remote location.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Copy the file at `local` to the remote target directory
    async fn upload(&self, local: &Path) -> Result<()>;

    /// Human-readable target, e.g. `backup@vault:/srv/pg`
    fn describe(&self) -> String;

    /// Executables this store needs on `PATH`
    fn required_tools(&self) -> Vec<String>;
}

/// The full set of collaborators for one run
#[derive(Clone)]
pub struct Services {
    /// Dump producer
    pub dump: Arc<dyn DumpSource>,
    /// Payload compressor
    pub compressor: Arc<dyn Compressor>,
    /// Payload checksum
    pub checksummer: Arc<dyn Checksummer>,
    /// Remote store, present only when transfer is enabled
    pub remote: Option<Arc<dyn RemoteStore>>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Production services for a job
    pub fn for_job(job: &BackupJob) -> Self {
        let compressor: Arc<dyn Compressor> = match job.compression.codec {
            Codec::Pigz => Arc::new(PigzCompressor::new(job.compression.threads)),
            Codec::Zstd => Arc::new(ZstdCompressor::new(job.compression.threads)),
        };
        let remote: Option<Arc<dyn RemoteStore>> = if job.remote.enabled {
            Some(Arc::new(ScpRemote::new(job.remote.clone())))
        } else {
            None
        };

        Self {
            dump: Arc::new(PgDump::new(job.database.clone())),
            compressor,
            checksummer: Arc::new(Sha256Checksummer),
            remote,
            clock: Arc::new(SystemClock),
        }
    }

    /// Every executable the configured services need, deduplicated,
    /// in pipeline order.
    pub fn required_tools(&self) -> Vec<String> {
        let mut tools = Vec::new();
        let remote_tools = self
            .remote
            .as_ref()
            .map(|r| r.required_tools())
            .unwrap_or_default();
        for tool in self
            .dump
            .required_tools()
            .into_iter()
            .chain(self.compressor.required_tools())
            .chain(self.checksummer.required_tools())
            .chain(remote_tools)
        {
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }
        tools
    }
}
