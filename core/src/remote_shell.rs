//! Component C: `upload_artifacts` and `request_skip_stage`, grounded in the
//! original implementation's SSH-based artifact uploader.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use owo_colors::OwoColorize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::error::RemoteShellError;
use crate::object_store::ObjectStore;

const ARTIFACT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(180 * 60);
const KNOWN_ARTIFACT_PATHS: &[(&str, &str)] = &[
    ("/workspace/research_pipeline.log", "run_log"),
    ("/workspace/AE-Scientist/research_pipeline/workspaces", "workspace_archive"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipStageOutcome {
    Success,
    NotFound,
    Conflict,
}

#[async_trait]
pub trait RemoteShellAdapter: Send + Sync {
    async fn upload_artifacts(
        &self,
        host: &str,
        port: u16,
        run_id: &str,
        trigger: &str,
    ) -> Result<(), RemoteShellError>;

    async fn request_skip_stage(
        &self,
        host: &str,
        port: u16,
        reason: &str,
    ) -> Result<SkipStageOutcome, RemoteShellError>;
}

/// Writes an SSH private key to a `0600` temp file for the duration of one
/// command and removes it on drop, mirroring `write_temp_key_file` /
/// `Path.unlink(missing_ok=True)` in the system this was ported from.
struct TempKeyFile {
    path: std::path::PathBuf,
}

impl TempKeyFile {
    fn write(key_material: &str) -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("runforge-ssh-key-{}", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path)?;
        file.write_all(key_material.as_bytes())?;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        Ok(Self { path })
    }
}

impl Drop for TempKeyFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct SshRemoteShellAdapter {
    ssh_key_material: String,
    object_store: Arc<dyn ObjectStore>,
}

impl SshRemoteShellAdapter {
    pub fn new(ssh_key_material: impl Into<String>, object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            ssh_key_material: ssh_key_material.into(),
            object_store,
        }
    }
}

#[async_trait]
impl RemoteShellAdapter for SshRemoteShellAdapter {
    async fn upload_artifacts(
        &self,
        host: &str,
        port: u16,
        run_id: &str,
        trigger: &str,
    ) -> Result<(), RemoteShellError> {
        if host.is_empty() {
            println!(
                "{} run={run_id} trigger={trigger}",
                "⏭️  Skipping artifact upload: missing host/port".yellow()
            );
            return Ok(());
        }
        println!(
            "{} run={run_id} trigger={trigger} host={host} port={port}",
            "📦 Starting pod artifact upload".cyan()
        );

        let key_file = TempKeyFile::write(&self.ssh_key_material)?;

        for (remote_path, artifact_type) in KNOWN_ARTIFACT_PATHS {
            let bytes = match self.fetch_path(host, port, &key_file.path, remote_path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    eprintln!(
                        "{} path={remote_path} {err}",
                        "⚠️  Failed to fetch pod artifact:".yellow()
                    );
                    continue;
                }
            };
            if bytes.is_empty() {
                continue;
            }
            let filename = remote_path.rsplit('/').next().unwrap_or(remote_path);
            let key = format!("{run_id}/{artifact_type}/{filename}");
            if let Err(err) = self.object_store.put(&key, bytes, "application/octet-stream").await {
                eprintln!("{} key={key} {err}", "⚠️  Failed to upload artifact:".yellow());
            }
        }
        Ok(())
    }

    async fn request_skip_stage(
        &self,
        host: &str,
        port: u16,
        reason: &str,
    ) -> Result<SkipStageOutcome, RemoteShellError> {
        let addr = format!("{host}:{port}");
        let mut stream = match tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            _ => {
                return Err(RemoteShellError::ConnectionFailed {
                    host: host.to_string(),
                    port,
                })
            }
        };
        let frame = json!({ "command": "skip_stage", "reason": reason }).to_string();
        stream.write_all(frame.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        let mut buf = String::new();
        stream.read_to_string(&mut buf).await?;
        match buf.trim() {
            "ok" => Ok(SkipStageOutcome::Success),
            "notfound" => Ok(SkipStageOutcome::NotFound),
            "conflict" => Ok(SkipStageOutcome::Conflict),
            other => Err(RemoteShellError::CommandFailed {
                exit_code: None,
                stderr: format!("unexpected skip-stage response: {other}"),
            }),
        }
    }
}

impl SshRemoteShellAdapter {
    async fn fetch_path(
        &self,
        host: &str,
        port: u16,
        key_path: &std::path::Path,
        remote_path: &str,
    ) -> Result<Vec<u8>, RemoteShellError> {
        let output = tokio::time::timeout(
            ARTIFACT_UPLOAD_TIMEOUT,
            Command::new("ssh")
                .args([
                    "-i",
                    key_path.to_str().unwrap_or_default(),
                    "-o",
                    "StrictHostKeyChecking=no",
                    "-o",
                    "UserKnownHostsFile=/dev/null",
                    "-o",
                    "ServerAliveInterval=30",
                    "-p",
                    &port.to_string(),
                    &format!("root@{host}"),
                    "cat",
                    remote_path,
                ])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| RemoteShellError::CommandFailed {
            exit_code: None,
            stderr: "ssh command timed out".to_string(),
        })??;

        if !output.status.success() {
            return Err(RemoteShellError::CommandFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(output.stdout)
    }
}
