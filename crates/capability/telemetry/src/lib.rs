//! 追踪初始化、会话 ID 与进程内计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub decode_errors: u64,
    pub records_published: u64,
    pub empty_records: u64,
    pub fields_published: u64,
    pub fields_skipped: u64,
    pub heartbeats_sent: u64,
    pub heartbeat_failures: u64,
    pub completions_triggered: u64,
    pub transfers_succeeded: u64,
    pub transfers_failed: u64,
}

/// 进程内计数器。
pub struct TelemetryMetrics {
    frames_received: AtomicU64,
    decode_errors: AtomicU64,
    records_published: AtomicU64,
    empty_records: AtomicU64,
    fields_published: AtomicU64,
    fields_skipped: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeat_failures: AtomicU64,
    completions_triggered: AtomicU64,
    transfers_succeeded: AtomicU64,
    transfers_failed: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            records_published: AtomicU64::new(0),
            empty_records: AtomicU64::new(0),
            fields_published: AtomicU64::new(0),
            fields_skipped: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            heartbeat_failures: AtomicU64::new(0),
            completions_triggered: AtomicU64::new(0),
            transfers_succeeded: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            empty_records: self.empty_records.load(Ordering::Relaxed),
            fields_published: self.fields_published.load(Ordering::Relaxed),
            fields_skipped: self.fields_skipped.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            completions_triggered: self.completions_triggered.load(Ordering::Relaxed),
            transfers_succeeded: self.transfers_succeeded.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。日志写标准错误，标准输出只留给测量值。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// 生成新的 session_id。
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录收到的帧。
pub fn record_frame_received() {
    metrics().frames_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录帧解码失败。
pub fn record_decode_error() {
    metrics().decode_errors.fetch_add(1, Ordering::Relaxed);
}

/// 记录一条记录已发布，以及其中实际发布的字段数。
pub fn record_record_published(fields: u64) {
    let metrics = metrics();
    metrics.records_published.fetch_add(1, Ordering::Relaxed);
    metrics.fields_published.fetch_add(fields, Ordering::Relaxed);
}

/// 记录空记录（无匹配字段）。
pub fn record_empty_record() {
    metrics().empty_records.fetch_add(1, Ordering::Relaxed);
}

/// 记录被跳过的字段（未映射或缺少元数据）。
pub fn record_field_skipped() {
    metrics().fields_skipped.fetch_add(1, Ordering::Relaxed);
}

/// 记录心跳写入成功。
pub fn record_heartbeat_sent() {
    metrics().heartbeats_sent.fetch_add(1, Ordering::Relaxed);
}

/// 记录心跳写入失败。
pub fn record_heartbeat_failure() {
    metrics().heartbeat_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录运行完成事件。
pub fn record_completion_triggered() {
    metrics().completions_triggered.fetch_add(1, Ordering::Relaxed);
}

/// 记录单个文件同步成功。
pub fn record_transfer_succeeded() {
    metrics().transfers_succeeded.fetch_add(1, Ordering::Relaxed);
}

/// 记录单个文件同步失败。
pub fn record_transfer_failed() {
    metrics().transfers_failed.fetch_add(1, Ordering::Relaxed);
}
