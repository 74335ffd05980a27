//! 仪器桥接进程入口：连接单台设备，解码数据帧并按通道发布测量值。

mod assembly;
mod session_loop;

use bridge_config::BridgeConfig;
use bridge_publish::{JsonLineSink, MeasurementSink};
use bridge_telemetry::init_tracing;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = BridgeConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();
    info!(
        target: "bridge.session",
        device = %config.device_addr(),
        profile = %config.profile,
        sensor = %config.sensor,
        "bridge_starting"
    );

    // 测量值按行输出到标准输出
    let sink: Arc<dyn MeasurementSink> = Arc::new(JsonLineSink::stdout());
    let session_loop = assembly::build_session_loop(&config, sink)?;

    // Ctrl-C 走同一条终止路径
    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => interrupt.cancel(),
            Err(e) => warn!(target: "bridge.session", error = %e, "signal_listener_failed"),
        }
    });

    let outcome = session_loop.run(shutdown).await;
    session_loop
        .drain(Duration::from_secs(config.shutdown_grace_seconds))
        .await;

    info!(target: "bridge.session", outcome = ?outcome, "bridge_stopped");
    Ok(outcome.exit_code())
}
