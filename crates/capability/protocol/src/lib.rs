//! # 协议会话能力模块
//!
//! 面向单台测量设备的 ASCII 行协议会话：
//! - **Session**：TCP 连接、可选认证握手、有截止时间的单帧读取
//! - **FrameDecoder**：分隔方言 / 模式方言解码为 Record，识别运行完成标记
//! - **Heartbeat**：与读循环并行的保活写入任务，可取消、可等待退出
//!
//! ## 架构设计
//!
//! ```text
//! SessionConfig (host + port + 凭据 + 握手方式)
//!       │
//!       ▼
//! Session::open ──► authenticate (Confirm / Banner)
//!       │
//!       ├── read_frame ──► FrameDecoder ──► Decoded::Record / Decoded::Completion
//!       │
//!       └── writer() ──► spawn_heartbeat (定时写保活字节)
//! ```
//!
//! ## 配置格式
//!
//! ```json
//! { "host": "10.31.81.12", "port": 7200, "username": "data", "password": "...",
//!   "auth_mode": "confirm", "read_timeout_ms": 300000 }
//! ```
//!
//! ```json
//! // heartbeat
//! { "interval_ms": 300000, "payload": "\r\n" }
//! ```

mod decoder;
mod error;
mod heartbeat;
mod session;
mod types;

pub use decoder::{Decoded, FrameDecoder};
pub use error::ProtocolError;
pub use heartbeat::{HeartbeatConfig, HeartbeatHandle, spawn_heartbeat};
pub use session::{FrameWriter, Session, SessionConfig, SessionWriter, connect};
pub use types::*;
