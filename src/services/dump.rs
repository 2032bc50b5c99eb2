//! `pg_dump` backed dump source

use super::{ByteSink, DumpSource};
use crate::config::{DatabaseConfig, DB_PASSWORD_ENV};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Runs `pg_dump` in plain SQL format for one schema at a time.
pub struct PgDump {
    database: DatabaseConfig,
    program: PathBuf,
}

impl PgDump {
    /// Dump source using `pg_dump` from `PATH`
    pub fn new(database: DatabaseConfig) -> Self {
        Self {
            database,
            program: PathBuf::from("pg_dump"),
        }
    }

    /// Use a specific `pg_dump` binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, schema: &str) -> Command {
        let db = &self.database;
        let mut cmd = Command::new(&self.program);
        cmd.arg("--host")
            .arg(&db.host)
            .arg("--port")
            .arg(db.port.to_string())
            .arg("--username")
            .arg(&db.user)
            .arg("--dbname")
            .arg(&db.name)
            .arg("--schema")
            .arg(schema)
            .arg("--format=plain")
            .arg("--no-password");
        if !db.password.is_empty() {
            cmd.env(DB_PASSWORD_ENV, db.password.expose());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl DumpSource for PgDump {
    async fn dump(&self, schema: &str, mut sink: ByteSink) -> Result<()> {
        let mut child = self
            .command(schema)
            .spawn()
            .map_err(|e| Error::tool("pg_dump", format!("spawn failed: {}", e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool("pg_dump", "stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool("pg_dump", "stderr not captured"))?;

        let forward = async {
            let copied = tokio::io::copy(&mut stdout, &mut sink).await?;
            sink.shutdown().await?;
            Ok::<u64, std::io::Error>(copied)
        };
        let diagnostics = async {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        };
        let (forwarded, diagnostics) = tokio::join!(forward, diagnostics);

        if let Err(e) = forwarded {
            // The reader went away; stop pg_dump rather than let it block on a full pipe.
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(Error::tool("pg_dump", format!("output stream broken: {}", e)));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::tool("pg_dump", e))?;
        if !status.success() {
            return Err(Error::tool(
                "pg_dump",
                format!("exited with {}: {}", status, diagnostics.trim()),
            ));
        }

        tracing::debug!(schema = %schema, "pg_dump finished");
        Ok(())
    }

    fn required_tools(&self) -> Vec<String> {
        vec![self.program.to_string_lossy().into_owned()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn database() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 6432,
            user: "backup".to_string(),
            password: Secret::new("s3cret"),
            name: "shop".to_string(),
        }
    }

    #[test]
    fn test_command_arguments() {
        let dump = PgDump::new(database());
        let cmd = dump.command("orders");
        let std_cmd = cmd.as_std();

        let args: Vec<String> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--host", "db.internal", "--port", "6432", "--username", "backup", "--dbname",
                "shop", "--schema", "orders", "--format=plain", "--no-password",
            ]
        );

        let password = std_cmd
            .get_envs()
            .find(|(k, _)| *k == DB_PASSWORD_ENV)
            .and_then(|(_, v)| v);
        assert_eq!(password.map(|v| v.to_string_lossy().into_owned()), Some("s3cret".to_string()));
    }

    #[test]
    fn test_empty_password_leaves_environment_alone() {
        let mut db = database();
        db.password = Secret::default();
        let dump = PgDump::new(db);
        let cmd = dump.command("orders");

        assert!(cmd.as_std().get_envs().all(|(k, _)| k != DB_PASSWORD_ENV));
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_error() {
        let dump = PgDump::new(database()).with_program("/nonexistent/pg_dump");
        let (writer, _reader) = tokio::io::duplex(1024);
        let err = dump.dump("orders", Box::new(writer)).await.unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
    }
}
