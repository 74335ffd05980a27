//! 运行完成触发的文件同步流程。

use crate::layout::{Artifact, ArtifactKind, TransferLayout};
use crate::transport::{Fetcher, Uploader};
use crate::TransferError;
use bridge_telemetry::{record_completion_triggered, record_transfer_failed, record_transfer_succeeded};
use domain::CompletionEvent;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, info, warn};

/// 单个文件的同步结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactOutcome {
    pub kind: ArtifactKind,
    pub local_path: PathBuf,
    pub error: Option<String>,
}

impl ArtifactOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// 一次流程的结果。`error` 表示流程未进入逐文件阶段的原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReport {
    pub reference: String,
    pub outcomes: Vec<ArtifactOutcome>,
    pub error: Option<String>,
}

/// 文件同步流程。每个完成事件独立派生一个任务，不按文件引用去重。
#[derive(Clone)]
pub struct CompletionWorkflow {
    layout: Arc<TransferLayout>,
    settle_delay: Duration,
    fetcher: Arc<dyn Fetcher>,
    uploader: Arc<dyn Uploader>,
    tracker: TaskTracker,
}

impl CompletionWorkflow {
    pub fn new(
        layout: TransferLayout,
        settle_delay: Duration,
        fetcher: Arc<dyn Fetcher>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        Self {
            layout: Arc::new(layout),
            settle_delay,
            fetcher,
            uploader,
            tracker: TaskTracker::new(),
        }
    }

    /// 派生后台流程并立即返回；调用方无需等待句柄。
    pub fn trigger(&self, event: CompletionEvent) -> JoinHandle<WorkflowReport> {
        record_completion_triggered();
        info!(
            target: "bridge.transfer",
            reference = %event.last_file_reference,
            settle_delay_ms = self.settle_delay.as_millis() as u64,
            "completion_triggered"
        );
        let workflow = self.clone();
        self.tracker
            .spawn(async move { workflow.run(event).await }.in_current_span())
    }

    /// 流程主体：等待落盘 → 推导路径 → 建本地目录 → 逐个拉取并上传。
    pub async fn run(&self, event: CompletionEvent) -> WorkflowReport {
        tokio::time::sleep(self.settle_delay).await;

        let reference = event.last_file_reference.clone();
        let set = match self.layout.artifacts(&event) {
            Ok(set) => set,
            Err(e) => {
                record_transfer_failed();
                warn!(target: "bridge.transfer", reference = %reference, error = %e, "artifact_paths_invalid");
                return WorkflowReport {
                    reference,
                    outcomes: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&set.local_dir).await {
            let e = TransferError::from(e);
            warn!(
                target: "bridge.transfer",
                dir = %set.local_dir.display(),
                error = %e,
                "local_dir_create_failed"
            );
            let outcomes = set
                .artifacts
                .into_iter()
                .map(|artifact| {
                    record_transfer_failed();
                    ArtifactOutcome {
                        kind: artifact.kind,
                        local_path: artifact.local_path,
                        error: Some(e.to_string()),
                    }
                })
                .collect();
            return WorkflowReport {
                reference,
                outcomes,
                error: None,
            };
        }

        let mut outcomes = Vec::with_capacity(set.artifacts.len());
        for artifact in set.artifacts {
            let error = match self.transfer(&artifact).await {
                Ok(()) => {
                    record_transfer_succeeded();
                    info!(
                        target: "bridge.transfer",
                        kind = artifact.kind.as_str(),
                        path = %artifact.local_path.display(),
                        "artifact_transferred"
                    );
                    None
                }
                Err(e) => {
                    record_transfer_failed();
                    warn!(
                        target: "bridge.transfer",
                        kind = artifact.kind.as_str(),
                        remote = %artifact.remote_path,
                        error = %e,
                        "artifact_transfer_failed"
                    );
                    Some(e.to_string())
                }
            };
            outcomes.push(ArtifactOutcome {
                kind: artifact.kind,
                local_path: artifact.local_path,
                error,
            });
        }

        WorkflowReport {
            reference,
            outcomes,
            error: None,
        }
    }

    async fn transfer(&self, artifact: &Artifact) -> Result<(), TransferError> {
        self.fetcher
            .fetch(&artifact.remote_path, &artifact.local_path)
            .await?;
        self.uploader.upload(&artifact.local_path).await
    }

    /// 仍在运行的流程数。
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 停止接收并在宽限期内等待在途流程。全部完成返回 `true`。
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!(target: "bridge.transfer", "completion_workflows_drained");
                true
            }
            Err(_) => {
                warn!(
                    target: "bridge.transfer",
                    in_flight = self.tracker.len(),
                    grace_ms = grace.as_millis() as u64,
                    "completion_workflows_abandoned"
                );
                false
            }
        }
    }
}
