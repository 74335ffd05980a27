//! 协议错误类型定义

/// 协议会话错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接或握手阶段的套接字错误、连接被对端关闭
    #[error("connect error: {0}")]
    Connect(String),

    /// 认证未通过
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// 单次读取超过截止时间
    #[error("timeout: {0}")]
    Timeout(String),

    /// 帧解码错误（非致命）
    #[error("decode error: {0}")]
    Decode(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),
}

impl ProtocolError {
    /// 是否终止会话。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Authentication(_) | Self::Timeout(_) | Self::Io(_)
        )
    }
}
