//! 协议相关类型定义

/// 单次接收的最大字节数
pub const FRAME_BUFFER_SIZE: usize = 4096;

/// 认证成功标记（大小写不敏感）
pub const AUTH_SUCCESS_MARKER: &str = "authentication successful";

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Streaming,
    Terminating,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Streaming => "streaming",
            Self::Terminating => "terminating",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
