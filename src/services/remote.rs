//! `scp` backed remote store

use super::RemoteStore;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Secure copy to `user@host:directory`.
///
/// With a password configured the copy runs under `sshpass -e`, which reads
/// the password from `SSHPASS`; otherwise `scp` runs in batch mode and relies
/// on key authentication.
pub struct ScpRemote {
    config: RemoteConfig,
}

impl ScpRemote {
    /// Remote store for the given settings
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    fn uses_password(&self) -> bool {
        !self.config.password.is_empty()
    }

    fn target(&self) -> String {
        let dir = self.config.directory.trim_end_matches('/');
        format!("{}@{}:{}/", self.config.user, self.config.host, dir)
    }

    fn command(&self, local: &Path) -> Command {
        let mut cmd = if self.uses_password() {
            let mut cmd = Command::new("sshpass");
            cmd.arg("-e")
                .arg("scp")
                .env("SSHPASS", self.config.password.expose());
            cmd
        } else {
            let mut cmd = Command::new("scp");
            cmd.arg("-o").arg("BatchMode=yes");
            cmd
        };

        cmd.arg("-P")
            .arg(self.config.port.to_string())
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(local)
            .arg(self.target())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteStore for ScpRemote {
    async fn upload(&self, local: &Path) -> Result<()> {
        let output = self
            .command(local)
            .output()
            .await
            .map_err(|e| Error::tool("scp", format!("spawn failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::tool(
                "scp",
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{}@{}:{}",
            self.config.user,
            self.config.host,
            self.config.directory.trim_end_matches('/')
        )
    }

    fn required_tools(&self) -> Vec<String> {
        if self.uses_password() {
            vec!["sshpass".to_string(), "scp".to_string()]
        } else {
            vec!["scp".to_string()]
        }
    }
}
