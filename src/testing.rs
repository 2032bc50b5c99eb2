//! Fake services shared by unit tests

use crate::error::{Error, Result};
use crate::services::{
    ByteSink, ByteSource, Compressor, DumpSource, FixedClock, RemoteStore, Services,
    Sha256Checksummer, ZstdCompressor,
};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Schema the default [`ScriptedDump`] fails on
pub const FAILING_SCHEMA: &str = "broken";

pub const SAMPLE_SQL: &str = "CREATE TABLE items (id integer PRIMARY KEY, label text);\n\
INSERT INTO items VALUES (1, 'widget');\n\
INSERT INTO items VALUES (2, 'gadget');\n";

/// 2024-05-01 02:00:00, a Wednesday and the first of the month
pub fn run_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(2, 0, 0)
        .unwrap()
}

/// Dump source with canned output per schema
#[derive(Default)]
pub struct ScriptedDump {
    bodies: HashMap<String, String>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDump {
    /// Fails on [`FAILING_SCHEMA`], dumps [`ScriptedDump::dump_for`] otherwise
    pub fn new() -> Self {
        Self::default().failing(FAILING_SCHEMA)
    }

    pub fn dump_for(schema: &str) -> Vec<u8> {
        format!("SET search_path = {};\n{}", schema, SAMPLE_SQL).into_bytes()
    }

    pub fn with_body(mut self, schema: &str, body: String) -> Self {
        self.bodies.insert(schema.to_string(), body);
        self
    }

    pub fn failing(mut self, schema: &str) -> Self {
        self.failing.insert(schema.to_string());
        self
    }

    /// Writes part of the dump, then never finishes
    pub fn hanging(mut self, schema: &str) -> Self {
        self.hanging.insert(schema.to_string());
        self
    }

    /// Schemas dumped so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DumpSource for ScriptedDump {
    async fn dump(&self, schema: &str, mut sink: ByteSink) -> Result<()> {
        self.calls.lock().unwrap().push(schema.to_string());

        if self.failing.contains(schema) {
            sink.write_all(b"SET search_path").await?;
            return Err(Error::tool(
                "pg_dump",
                "connection to server on socket failed: No such file or directory",
            ));
        }
        if self.hanging.contains(schema) {
            sink.write_all(b"SET search_path").await?;
            std::future::pending::<()>().await;
        }

        let body = match self.bodies.get(schema) {
            Some(body) => body.clone().into_bytes(),
            None => Self::dump_for(schema),
        };
        sink.write_all(&body).await?;
        sink.shutdown().await?;
        Ok(())
    }

    fn required_tools(&self) -> Vec<String> {
        vec!["pg_dump".to_string()]
    }
}

/// Reason reported by [`FailingCompressor`]
pub const COMPRESS_FAILURE: &str = "No space left on device";

/// Compressor that drains its input, leaves a truncated payload and fails
pub struct FailingCompressor;

#[async_trait]
impl Compressor for FailingCompressor {
    async fn compress(&self, mut source: ByteSource, dest: &Path) -> Result<u64> {
        let mut input = Vec::new();
        source.read_to_end(&mut input).await?;
        tokio::fs::write(dest, &input[..input.len() / 2]).await?;
        Err(Error::tool("zstd", COMPRESS_FAILURE))
    }

    fn extension(&self) -> &str {
        "zst"
    }

    fn required_tools(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Remote store that records uploads instead of copying
#[derive(Default)]
pub struct RecordingRemote {
    reject: bool,
    hang: bool,
    uploads: Mutex<Vec<PathBuf>>,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote that refuses every upload
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    /// Remote that records the upload, then never answers
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for RecordingRemote {
    async fn upload(&self, local: &Path) -> Result<()> {
        if self.reject {
            return Err(Error::tool("scp", "Permission denied (publickey,password)"));
        }
        self.uploads.lock().unwrap().push(local.to_path_buf());
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "backup@vault:/srv/pg".to_string()
    }

    fn required_tools(&self) -> Vec<String> {
        vec!["scp".to_string()]
    }
}

/// Scripted dump, fast zstd, sha256, no remote, clock frozen at [`run_time`]
pub fn fake_services() -> Services {
    Services {
        dump: Arc::new(ScriptedDump::new()),
        compressor: Arc::new(ZstdCompressor::new(1).with_level(1)),
        checksummer: Arc::new(Sha256Checksummer),
        remote: None,
        clock: Arc::new(FixedClock::at(run_time())),
    }
}
