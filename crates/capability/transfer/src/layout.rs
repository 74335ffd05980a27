//! 文件引用 → 远端/本地路径推导。

use crate::TransferError;
use domain::CompletionEvent;
use std::path::PathBuf;

/// 归档类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// 原始数据归档（`.ghg`）
    RawArchive,
    /// 处理结果归档（`.zip`）
    Results,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::RawArchive => "ghg",
            Self::Results => "zip",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawArchive => "raw_archive",
            Self::Results => "results",
        }
    }
}

/// 单个待同步文件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub remote_path: String,
    pub local_path: PathBuf,
}

/// 一次运行完成对应的文件集合。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub reference: String,
    /// `{local_data_dir}/{YYYY}/{MM}`
    pub local_dir: PathBuf,
    pub artifacts: Vec<Artifact>,
}

/// 远端与本地目录布局。
#[derive(Debug, Clone)]
pub struct TransferLayout {
    pub remote_raw_dir: String,
    pub remote_results_dir: String,
    pub local_data_dir: PathBuf,
}

impl TransferLayout {
    pub fn new(
        remote_raw_dir: impl Into<String>,
        remote_results_dir: impl Into<String>,
        local_data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_raw_dir: remote_raw_dir.into(),
            remote_results_dir: remote_results_dir.into(),
            local_data_dir: local_data_dir.into(),
        }
    }

    /// 推导 `.ghg` 与 `.zip` 的路径对。
    ///
    /// 引用必须以 `YYYY-MM-` 开头，且不能包含路径分隔符。
    pub fn artifacts(&self, event: &CompletionEvent) -> Result<ArtifactSet, TransferError> {
        let reference = event.last_file_reference.as_str();
        if reference.contains(['/', '\\']) || reference.contains("..") {
            return Err(TransferError::Path(format!(
                "file reference must be a bare name: {}",
                reference
            )));
        }
        let (year, month) = event.year_month().ok_or_else(|| {
            TransferError::Path(format!("file reference has no YYYY-MM- prefix: {}", reference))
        })?;

        let local_dir = self.local_data_dir.join(year).join(month);
        let artifacts = [
            (ArtifactKind::RawArchive, self.remote_raw_dir.as_str()),
            (ArtifactKind::Results, self.remote_results_dir.as_str()),
        ]
        .into_iter()
        .map(|(kind, remote_base)| {
            let file_name = format!("{}.{}", reference, kind.extension());
            Artifact {
                kind,
                remote_path: remote_path(remote_base, year, month, &file_name),
                local_path: local_dir.join(&file_name),
            }
        })
        .collect();

        Ok(ArtifactSet {
            reference: reference.to_string(),
            local_dir,
            artifacts,
        })
    }
}

/// 远端路径固定使用 `/` 分隔。
fn remote_path(base: &str, year: &str, month: &str, file_name: &str) -> String {
    format!("{}/{}/{}/{}", base.trim_end_matches('/'), year, month, file_name)
}
