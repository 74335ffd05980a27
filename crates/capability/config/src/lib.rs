//! 桥接进程运行配置加载。

use domain::{AuthMode, DeviceProfile};
use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 设备登录凭据。
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 完成标记触发的文件同步配置。
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub marker: Option<String>,
    pub transfer_host: String,
    pub transfer_username: Option<String>,
    pub transfer_password: Option<String>,
    pub remote_raw_dir: String,
    pub remote_results_dir: String,
    pub local_data_dir: String,
    pub upload_dir: String,
    pub settle_delay_seconds: u64,
}

/// 桥接进程运行配置。
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device_host: String,
    pub device_port: u16,
    pub credentials: Option<Credentials>,
    pub auth_mode: AuthMode,
    pub sensor: String,
    pub profile: String,
    pub read_timeout_seconds: u64,
    /// 0 表示关闭心跳
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_payload: String,
    pub completion: Option<CompletionConfig>,
    pub shutdown_grace_seconds: u64,
}

impl BridgeConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置（测试可注入）。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let reader = Reader { lookup };

        let device_host = reader.required("BRIDGE_DEVICE_HOST")?;
        let device_port = reader.u16_with_default("BRIDGE_DEVICE_PORT", 7200)?;
        let sensor = reader.required("BRIDGE_SENSOR")?;
        let profile = reader
            .optional("BRIDGE_PROFILE")
            .unwrap_or_else(|| "metek".to_string());
        let profile_default_auth = DeviceProfile::by_name(&profile)
            .map(|profile| profile.auth_mode)
            .ok_or_else(|| ConfigError::Invalid("BRIDGE_PROFILE".to_string(), profile.clone()))?;

        let credentials = match (
            reader.optional("BRIDGE_USERNAME"),
            reader.optional("BRIDGE_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };
        let auth_mode = match reader.optional("BRIDGE_AUTH_MODE") {
            Some(value) => value
                .parse::<AuthMode>()
                .map_err(|_| ConfigError::Invalid("BRIDGE_AUTH_MODE".to_string(), value))?,
            None => profile_default_auth,
        };
        let auth_mode = if credentials.is_some() {
            auth_mode
        } else {
            AuthMode::None
        };

        let read_timeout_seconds = reader.u64_with_default("BRIDGE_READ_TIMEOUT_SECONDS", 300)?;
        if read_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "BRIDGE_READ_TIMEOUT_SECONDS".to_string(),
                "0".to_string(),
            ));
        }
        let heartbeat_interval_seconds =
            reader.u64_with_default("BRIDGE_HEARTBEAT_INTERVAL_SECONDS", 300)?;
        let heartbeat_payload = reader
            .optional("BRIDGE_HEARTBEAT_PAYLOAD")
            .map(|value| unescape(&value))
            .unwrap_or_else(|| "\r\n".to_string());
        let shutdown_grace_seconds =
            reader.u64_with_default("BRIDGE_SHUTDOWN_GRACE_SECONDS", 30)?;

        let completion = if reader.bool_with_default("BRIDGE_COMPLETION_ENABLED", false) {
            Some(CompletionConfig {
                marker: reader.optional("BRIDGE_COMPLETION_MARKER"),
                transfer_host: reader
                    .optional("BRIDGE_TRANSFER_HOST")
                    .unwrap_or_else(|| device_host.clone()),
                transfer_username: reader.optional("BRIDGE_TRANSFER_USERNAME"),
                transfer_password: reader.optional("BRIDGE_TRANSFER_PASSWORD"),
                remote_raw_dir: reader
                    .optional("BRIDGE_REMOTE_RAW_DIR")
                    .unwrap_or_else(|| "/home/licor/data/raw".to_string()),
                remote_results_dir: reader
                    .optional("BRIDGE_REMOTE_RESULTS_DIR")
                    .unwrap_or_else(|| "/home/licor/data/results".to_string()),
                local_data_dir: reader
                    .optional("BRIDGE_LOCAL_DATA_DIR")
                    .unwrap_or_else(|| "./data".to_string()),
                upload_dir: reader
                    .optional("BRIDGE_UPLOAD_DIR")
                    .unwrap_or_else(|| "./upload".to_string()),
                settle_delay_seconds: reader
                    .u64_with_default("BRIDGE_SETTLE_DELAY_SECONDS", 10)?,
            })
        } else {
            None
        };

        Ok(Self {
            device_host,
            device_port,
            credentials,
            auth_mode,
            sensor,
            profile,
            read_timeout_seconds,
            heartbeat_interval_seconds,
            heartbeat_payload,
            completion,
            shutdown_grace_seconds,
        })
    }

    /// 设备地址（host:port）。
    pub fn device_addr(&self) -> String {
        format!("{}:{}", self.device_host, self.device_port)
    }
}

struct Reader<F> {
    lookup: F,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn optional(&self, key: &str) -> Option<String> {
        match (self.lookup)(key) {
            Some(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    fn u16_with_default(&self, key: &str, default: u16) -> Result<u16, ConfigError> {
        let value = match self.optional(key) {
            Some(value) => value,
            None => return Ok(default),
        };
        value
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid(key.to_string(), value))
    }

    fn u64_with_default(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        let value = match self.optional(key) {
            Some(value) => value,
            None => return Ok(default),
        };
        value
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid(key.to_string(), value))
    }

    fn bool_with_default(&self, key: &str, default: bool) -> bool {
        match self.optional(key) {
            Some(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
            None => default,
        }
    }
}

/// 处理 `\r`、`\n`、`\t`、`\\` 转义。
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
