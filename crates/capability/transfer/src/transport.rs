//! 拉取与上传协作者。

use crate::TransferError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// 远端文件拉取抽象。
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<(), TransferError>;
}

/// 本地文件上传抽象（尽力而为）。
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, local_path: &Path) -> Result<(), TransferError>;
}

/// 基于 `scp` 的拉取实现。配置了口令时经 `sshpass -e` 传入（口令不出现在命令行）。
#[derive(Clone)]
pub struct ScpFetcher {
    host: String,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for ScpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScpFetcher")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ScpFetcher {
    pub fn new(host: impl Into<String>, username: Option<String>, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            username,
            password,
        }
    }

    /// `[user@]host:path`
    pub fn remote_target(&self, remote_path: &str) -> String {
        match &self.username {
            Some(username) => format!("{}@{}:{}", username, self.host, remote_path),
            None => format!("{}:{}", self.host, remote_path),
        }
    }

    /// 程序名与参数。
    pub fn command_line(&self, remote_path: &str, local_path: &Path) -> (String, Vec<String>) {
        let mut args = Vec::new();
        let program = if self.password.is_some() {
            args.extend(["-e".to_string(), "scp".to_string()]);
            "sshpass"
        } else {
            "scp"
        };
        args.extend([
            "-q".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ]);
        if self.password.is_none() {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        args.push(self.remote_target(remote_path));
        args.push(local_path.display().to_string());
        (program.to_string(), args)
    }
}

#[async_trait]
impl Fetcher for ScpFetcher {
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<(), TransferError> {
        let (program, args) = self.command_line(remote_path, local_path);
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &self.password {
            cmd.env("SSHPASS", password);
        }

        debug!(target: "bridge.transfer", program = %program, remote = %self.remote_target(remote_path), "fetch_started");
        let output = cmd
            .output()
            .await
            .map_err(|e| TransferError::Fetch(format!("failed to spawn {}: {}", program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransferError::Fetch(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// 将文件复制到上传暂存目录，由外部同步进程接管。
#[derive(Debug, Clone)]
pub struct StagingUploader {
    upload_dir: PathBuf,
}

impl StagingUploader {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }
}

#[async_trait]
impl Uploader for StagingUploader {
    async fn upload(&self, local_path: &Path) -> Result<(), TransferError> {
        let file_name = local_path.file_name().ok_or_else(|| {
            TransferError::Path(format!("no file name in {}", local_path.display()))
        })?;
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| TransferError::Upload(format!("{}: {}", self.upload_dir.display(), e)))?;
        let target = self.upload_dir.join(file_name);
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| {
                TransferError::Upload(format!(
                    "{} -> {}: {}",
                    local_path.display(),
                    target.display(),
                    e
                ))
            })?;
        debug!(target: "bridge.transfer", path = %target.display(), "file_staged");
        Ok(())
    }
}
