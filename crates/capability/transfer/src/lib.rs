//! # 文件同步能力模块
//!
//! 设备报告运行完成后，按文件引用推导远端/本地路径，异步拉取 `.ghg` 原始归档与
//! `.zip` 结果归档并逐个上传。两个文件互不影响，失败只记录日志，不重试。
//!
//! ```text
//! CompletionEvent ──► CompletionWorkflow::trigger (TaskTracker)
//!                         │  settle delay
//!                         ├── TransferLayout::artifacts (YYYY/MM)
//!                         └── per artifact: Fetcher::fetch ──► Uploader::upload
//! ```

mod layout;
mod transport;
mod workflow;

pub use layout::{Artifact, ArtifactKind, ArtifactSet, TransferLayout};
pub use transport::{Fetcher, ScpFetcher, StagingUploader, Uploader};
pub use workflow::{ArtifactOutcome, CompletionWorkflow, WorkflowReport};

/// 文件同步错误。
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("invalid path: {0}")]
    Path(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
