//! 心跳任务
//!
//! 与读循环并行运行，按固定间隔向设备写入保活字节。写入失败只记录日志，
//! 任务持续运行直到收到停止信号；不检查设备应答。

use crate::error::ProtocolError;
use crate::session::FrameWriter;
use bridge_telemetry::{record_heartbeat_failure, record_heartbeat_sent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// 心跳配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// 写入间隔（毫秒）
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// 保活字节
    #[serde(default = "default_payload")]
    pub payload: String,
}

fn default_interval() -> u64 {
    300_000
}

fn default_payload() -> String {
    "\r\n".to_string()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            payload: default_payload(),
        }
    }
}

impl HeartbeatConfig {
    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::ConfigParse(e.to_string()))
    }
}

/// 运行中的心跳任务句柄
pub struct HeartbeatHandle {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl HeartbeatHandle {
    /// 发出停止信号并等待任务退出。返回后不会再有心跳写入。
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(target: "bridge.protocol", error = %e, "heartbeat_join_failed");
        }
    }
}

/// 启动心跳任务。首次写入发生在启动后一个间隔。
pub fn spawn_heartbeat(writer: Arc<dyn FrameWriter>, config: HeartbeatConfig) -> HeartbeatHandle {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let period = Duration::from_millis(config.interval_ms.max(1));
    let payload = config.payload.into_bytes();

    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            target: "bridge.protocol",
            interval_ms = period.as_millis() as u64,
            "heartbeat_started"
        );

        loop {
            tokio::select! {
                biased;
                () = task_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // 停止信号可中断阻塞中的写入
            let result = tokio::select! {
                biased;
                () = task_token.cancelled() => break,
                result = writer.write_frame(&payload) => result,
            };
            match result {
                Ok(()) => {
                    record_heartbeat_sent();
                    debug!(target: "bridge.protocol", "heartbeat_sent");
                }
                Err(e) => {
                    record_heartbeat_failure();
                    warn!(target: "bridge.protocol", error = %e, "heartbeat_write_failed");
                }
            }
        }

        info!(target: "bridge.protocol", "heartbeat_stopped");
    }
    .in_current_span());

    HeartbeatHandle { handle, token }
}
