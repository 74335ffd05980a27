//! 组件装配
//!
//! 把 `BridgeConfig` 转换为各能力模块的配置，并组装出会话主循环：
//! 设备配置档 → 解码器、发布器；可选心跳；可选文件同步流程。

use crate::session_loop::SessionLoop;
use bridge_config::{BridgeConfig, CompletionConfig};
use bridge_protocol::{FrameDecoder, HeartbeatConfig, ProtocolError, SessionConfig};
use bridge_publish::{MeasurementSink, RecordPublisher};
use bridge_transfer::{CompletionWorkflow, ScpFetcher, StagingUploader, TransferLayout};
use domain::{ChannelTableError, DeviceProfile};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 启动阶段错误。
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("unknown device profile: {0}")]
    UnknownProfile(String),
    #[error("invalid channel table: {0}")]
    ChannelTable(#[from] ChannelTableError),
    #[error("invalid decoder configuration: {0}")]
    Decoder(#[from] ProtocolError),
}

/// 选择并校验设备配置档；启用文件同步时应用完成标记覆盖。
pub fn device_profile(config: &BridgeConfig) -> Result<DeviceProfile, StartupError> {
    let mut profile = DeviceProfile::by_name(&config.profile)
        .ok_or_else(|| StartupError::UnknownProfile(config.profile.clone()))?;
    if let Some(marker) = config.completion.as_ref().and_then(|c| c.marker.clone()) {
        profile = profile.with_completion_marker(marker);
    }
    profile.validate()?;
    Ok(profile)
}

pub fn session_config(config: &BridgeConfig) -> SessionConfig {
    let (username, password) = match &config.credentials {
        Some(credentials) => (
            Some(credentials.username.clone()),
            Some(credentials.password.clone()),
        ),
        None => (None, None),
    };
    SessionConfig {
        host: config.device_host.clone(),
        port: config.device_port,
        username,
        password,
        auth_mode: config.auth_mode,
        read_timeout_ms: config.read_timeout_seconds.saturating_mul(1000),
        connect_timeout_ms: 5000,
    }
}

/// 间隔为 0 时不启动心跳。
pub fn heartbeat_config(config: &BridgeConfig) -> Option<HeartbeatConfig> {
    if config.heartbeat_interval_seconds == 0 {
        return None;
    }
    Some(HeartbeatConfig {
        interval_ms: config.heartbeat_interval_seconds.saturating_mul(1000),
        payload: config.heartbeat_payload.clone(),
    })
}

pub fn completion_workflow(completion: &CompletionConfig) -> CompletionWorkflow {
    let layout = TransferLayout::new(
        completion.remote_raw_dir.clone(),
        completion.remote_results_dir.clone(),
        completion.local_data_dir.clone(),
    );
    let fetcher = ScpFetcher::new(
        completion.transfer_host.clone(),
        completion.transfer_username.clone(),
        completion.transfer_password.clone(),
    );
    CompletionWorkflow::new(
        layout,
        Duration::from_secs(completion.settle_delay_seconds),
        Arc::new(fetcher),
        Arc::new(StagingUploader::new(completion.upload_dir.clone())),
    )
}

/// 组装会话主循环。
pub fn build_session_loop(
    config: &BridgeConfig,
    sink: Arc<dyn MeasurementSink>,
) -> Result<SessionLoop, StartupError> {
    let profile = device_profile(config)?;
    let decoder = FrameDecoder::new(&profile.dialect)?;
    let publisher = RecordPublisher::new(
        sink,
        profile.mapping.clone(),
        profile.metadata.clone(),
        config.sensor.clone(),
    );
    let completion = config.completion.as_ref().map(completion_workflow);
    info!(
        target: "bridge.session",
        profile = %profile.name,
        channels = profile.mapping.len(),
        heartbeat = config.heartbeat_interval_seconds > 0,
        completion = completion.is_some(),
        "components_assembled"
    );

    Ok(SessionLoop::new(
        session_config(config),
        heartbeat_config(config),
        decoder,
        publisher,
        completion,
    ))
}
