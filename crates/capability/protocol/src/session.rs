//! 设备会话实现
//!
//! 主动连接设备，可选完成认证握手，并提供有截止时间的单帧读取。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let config = SessionConfig::from_json(r#"{"host": "10.31.81.12", "port": 7200}"#)?;
//! let mut session = Session::new(connect(&config).await?, &config);
//! session.authenticate(&config).await?;
//! let frame = session.read_frame().await?;
//! ```

use crate::error::ProtocolError;
use crate::types::{AUTH_SUCCESS_MARKER, FRAME_BUFFER_SIZE};
use async_trait::async_trait;
use domain::AuthMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 会话配置
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 设备主机地址
    pub host: String,
    /// 设备端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 用户名（与口令同时配置才会握手）
    #[serde(default)]
    pub username: Option<String>,
    /// 口令
    #[serde(default)]
    pub password: Option<String>,
    /// 握手方式
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    /// 单次读取截止时间（毫秒）
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_port() -> u16 {
    7200
}

fn default_auth_mode() -> AuthMode {
    AuthMode::Confirm
}

fn default_read_timeout() -> u64 {
    300_000
}

fn default_connect_timeout() -> u64 {
    5000
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("auth_mode", &self.auth_mode)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl SessionConfig {
    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::ConfigParse(e.to_string()))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// 实际生效的握手方式：未配置完整凭据时不握手。
    pub fn effective_auth_mode(&self) -> AuthMode {
        match (&self.username, &self.password) {
            (Some(_), Some(_)) => self.auth_mode,
            _ => AuthMode::None,
        }
    }
}

/// 帧写入端（握手与心跳共用）。
#[async_trait]
pub trait FrameWriter: Send + Sync {
    async fn write_frame(&self, bytes: &[u8]) -> Result<(), ProtocolError>;
}

/// 套接字写半部。锁只在单次写入期间持有。
pub struct SessionWriter<T> {
    inner: Arc<Mutex<WriteHalf<T>>>,
}

impl<T> Clone for SessionWriter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SessionWriter<T>
where
    T: AsyncWrite + Send,
{
    async fn shutdown(&self) -> std::io::Result<()> {
        let mut writer = self.inner.lock().await;
        writer.shutdown().await
    }
}

#[async_trait]
impl<T> FrameWriter for SessionWriter<T>
where
    T: AsyncWrite + Send + 'static,
{
    async fn write_frame(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let mut writer = self.inner.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// 单设备会话：读半部由会话独占，写半部可共享给心跳任务。
pub struct Session<T> {
    reader: ReadHalf<T>,
    writer: SessionWriter<T>,
    authenticated: bool,
    read_timeout: Duration,
    buf: Vec<u8>,
}

/// 建立到设备的 TCP 连接（不含握手）。
pub async fn connect(config: &SessionConfig) -> Result<TcpStream, ProtocolError> {
    let addr = config.addr();
    info!(target: "bridge.protocol", addr = %addr, "device_connecting");

    let stream = match tokio::time::timeout(
        Duration::from_millis(config.connect_timeout_ms),
        TcpStream::connect(&addr),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ProtocolError::Connect(format!("{}: {}", addr, e))),
        Err(_) => {
            return Err(ProtocolError::Connect(format!(
                "{}: connect timed out after {}ms",
                addr, config.connect_timeout_ms
            )));
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(target: "bridge.protocol", error = %e, "set_nodelay_failed");
    }
    info!(target: "bridge.protocol", addr = %addr, "device_connected");
    Ok(stream)
}

impl Session<TcpStream> {
    /// 建立 TCP 连接并按配置完成握手。
    pub async fn open(config: &SessionConfig) -> Result<Self, ProtocolError> {
        let stream = connect(config).await?;
        Self::establish(stream, config).await
    }
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// 在已建立的流上初始化会话，尚未握手。
    pub fn new(stream: T, config: &SessionConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer: SessionWriter {
                inner: Arc::new(Mutex::new(writer)),
            },
            authenticated: false,
            read_timeout: config.read_timeout(),
            buf: vec![0u8; FRAME_BUFFER_SIZE],
        }
    }

    /// 在已建立的流上初始化会话并握手。
    pub async fn establish(stream: T, config: &SessionConfig) -> Result<Self, ProtocolError> {
        let mut session = Self::new(stream, config);
        session.authenticate(config).await?;
        Ok(session)
    }

    /// 认证握手。
    ///
    /// - `Confirm`：发用户名 → 读响应 → 发口令 → 读响应，响应须含认证成功标记
    /// - `Banner`：读提示 → 发用户名 → 读提示 → 发口令，不校验结果
    ///
    /// 未配置完整凭据时直接返回。
    pub async fn authenticate(&mut self, config: &SessionConfig) -> Result<(), ProtocolError> {
        let (mode, username, password) = match (
            config.effective_auth_mode(),
            &config.username,
            &config.password,
        ) {
            (AuthMode::None, _, _) => return Ok(()),
            (mode, Some(username), Some(password)) => (mode, username.as_str(), password.as_str()),
            _ => return Ok(()),
        };

        info!(target: "bridge.protocol", mode = ?mode, "authentication_started");
        match mode {
            AuthMode::None => return Ok(()),
            AuthMode::Confirm => {
                self.send_line(username).await?;
                let _ = self.read_handshake_response().await?;
                self.send_line(password).await?;
                let response = self.read_handshake_response().await?;
                if !response.to_ascii_lowercase().contains(AUTH_SUCCESS_MARKER) {
                    warn!(
                        target: "bridge.protocol",
                        response = %response.trim(),
                        "authentication_rejected"
                    );
                    return Err(ProtocolError::Authentication(response.trim().to_string()));
                }
            }
            AuthMode::Banner => {
                let banner = self.read_handshake_response().await?;
                debug!(target: "bridge.protocol", banner = %banner.trim(), "username_prompt");
                self.send_line(username).await?;
                let banner = self.read_handshake_response().await?;
                debug!(target: "bridge.protocol", banner = %banner.trim(), "password_prompt");
                self.send_line(password).await?;
            }
        }
        self.authenticated = true;
        info!(target: "bridge.protocol", "authentication_succeeded");
        Ok(())
    }

    async fn send_line(&self, line: &str) -> Result<(), ProtocolError> {
        self.writer
            .write_frame(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| ProtocolError::Connect(format!("handshake write failed: {}", e)))
    }

    /// 握手阶段的读取：任何失败都视为连接错误。
    async fn read_handshake_response(&mut self) -> Result<String, ProtocolError> {
        match self.read_frame().await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(ProtocolError::Timeout(detail)) => Err(ProtocolError::Connect(format!(
                "handshake response timed out: {}",
                detail
            ))),
            Err(e) => Err(e),
        }
    }

    /// 按会话配置的截止时间读取一帧。
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let deadline = self.read_timeout;
        self.read_frame_within(deadline).await
    }

    /// 单次有界接收：截止时间对每次读取独立生效。
    pub async fn read_frame_within(&mut self, deadline: Duration) -> Result<Vec<u8>, ProtocolError> {
        match tokio::time::timeout(deadline, self.reader.read(&mut self.buf)).await {
            Ok(Ok(0)) => Err(ProtocolError::Connect(
                "connection closed by device".to_string(),
            )),
            Ok(Ok(n)) => Ok(self.buf[..n].to_vec()),
            Ok(Err(e)) => Err(ProtocolError::Connect(e.to_string())),
            Err(_) => Err(ProtocolError::Timeout(format!(
                "no frame within {}ms",
                deadline.as_millis()
            ))),
        }
    }

    /// 共享给心跳任务的写入端。
    pub fn writer(&self) -> Arc<dyn FrameWriter> {
        Arc::new(self.writer.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 关闭套接字写方向并释放会话。调用前须先停止心跳。
    pub async fn close(self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(target: "bridge.protocol", error = %e, "socket_shutdown_failed");
        }
        info!(target: "bridge.protocol", "connection_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "host": "10.31.81.12",
            "port": 7200,
            "username": "data",
            "password": "secret",
            "auth_mode": "banner",
            "read_timeout_ms": 60000
        }"#;
        let config = SessionConfig::from_json(json).unwrap();
        assert_eq!(config.addr(), "10.31.81.12:7200");
        assert_eq!(config.auth_mode, AuthMode::Banner);
        assert_eq!(config.read_timeout(), Duration::from_secs(60));
        assert_eq!(config.effective_auth_mode(), AuthMode::Banner);
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_defaults_without_credentials() {
        let config = SessionConfig::from_json(r#"{"host": "localhost"}"#).unwrap();
        assert_eq!(config.port, 7200);
        assert_eq!(config.read_timeout_ms, 300_000);
        assert_eq!(config.auth_mode, AuthMode::Confirm);
        assert_eq!(config.effective_auth_mode(), AuthMode::None);
    }

    #[test]
    fn test_invalid_json() {
        let err = SessionConfig::from_json("{").unwrap_err();
        assert!(matches!(err, ProtocolError::ConfigParse(_)));
    }
}
