//! 内置设备配置档。
//!
//! 每种设备只在数据上不同：解码方言、通道映射、元数据与认证方式。

use crate::channel::{ChannelMapping, ChannelMetadata, ChannelTableError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 默认字段值模式：括号内的非括号文本。
pub const DEFAULT_VALUE_PATTERN: &str = r"[^()]+";

/// 认证握手方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// 不认证
    None,
    /// 发送用户名/口令，校验 "authentication successful"
    Confirm,
    /// 每个凭据前设备先输出提示行，不校验结果
    Banner,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "confirm" => Ok(Self::Confirm),
            "banner" => Ok(Self::Banner),
            other => Err(format!("unknown auth mode: {}", other)),
        }
    }
}

/// 模式方言的单个字段：`(KEY value)`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternField {
    pub key: String,
    pub value_pattern: String,
}

impl PatternField {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_pattern: DEFAULT_VALUE_PATTERN.to_string(),
        }
    }

    pub fn with_value_pattern(key: impl Into<String>, value_pattern: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_pattern: value_pattern.into(),
        }
    }
}

/// 运行完成标记规则。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRule {
    /// 帧中出现即视为运行完成的子串
    pub marker: String,
    /// 携带文件引用的字段键
    pub reference_key: String,
}

/// 帧解码方言。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    /// 分号分隔、按位置取值
    Delimited {
        delimiter: char,
        /// 跳过的前导字段数
        skip: usize,
        /// 按位置对应的原始键
        fields: Vec<String>,
    },
    /// 按 `(KEY value)` 模式逐键提取
    Pattern {
        fields: Vec<PatternField>,
        completion: Option<CompletionRule>,
    },
}

/// 设备配置档。
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: String,
    pub dialect: Dialect,
    pub mapping: ChannelMapping,
    pub metadata: ChannelMetadata,
    pub auth_mode: AuthMode,
}

impl DeviceProfile {
    /// 按名称查找内置配置档。
    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "metek" => Some(Self::metek()),
            "licor" => Some(Self::licor()),
            _ => None,
        }
    }

    pub fn names() -> &'static [&'static str] {
        &["metek", "licor"]
    }

    /// 校验映射与元数据一致。
    pub fn validate(&self) -> Result<(), ChannelTableError> {
        self.metadata.validate(&self.mapping)
    }

    /// METEK 超声风速仪：分号分隔，取第 1..5 位。
    pub fn metek() -> Self {
        let mapping = ChannelMapping::from_static(&[
            ("x", "sensor.x"),
            ("y", "sensor.y"),
            ("z", "sensor.z"),
            ("T", "sensor.temperature"),
            ("vel", "sensor.velocity"),
            ("dir", "sensor.direction"),
            ("vels", "sensor.velocity_std"),
        ]);
        let metadata = ChannelMetadata::new()
            .with("sensor.x", "units", "X-component")
            .with("sensor.y", "units", "Y-component")
            .with("sensor.z", "units", "Z-component")
            .with("sensor.temperature", "°C", "Temperature")
            .with("sensor.velocity", "m/s", "Velocity")
            .with("sensor.direction", "degrees", "Direction")
            .with(
                "sensor.velocity_std",
                "m/s",
                "Standard deviation of velocity",
            );
        Self {
            name: "metek".to_string(),
            dialect: Dialect::Delimited {
                delimiter: ';',
                skip: 1,
                fields: ["x", "y", "z", "T"].map(String::from).to_vec(),
            },
            mapping,
            metadata,
            auth_mode: AuthMode::Confirm,
        }
    }

    /// LI-COR 气体分析仪（SmartFlux）：`(KEY value)` 文本，带运行完成标记。
    pub fn licor() -> Self {
        let mapping = ChannelMapping::from_static(&[
            ("CO2", "gas.co2"),
            ("H2O", "gas.h2o"),
            ("Temperature", "gas.temperature"),
            ("Pressure", "gas.pressure"),
            ("DiagVal", "gas.diagnostic"),
            ("Date", "gas.date"),
            ("Time", "gas.time"),
            ("U", "sonic.u"),
            ("V", "sonic.v"),
            ("W", "sonic.w"),
            ("TS", "sonic.temperature"),
        ]);
        let metadata = ChannelMetadata::new()
            .with("gas.co2", "mmol/m^3", "CO2 molar density")
            .with("gas.h2o", "mmol/m^3", "H2O molar density")
            .with("gas.temperature", "°C", "Analyzer cell temperature")
            .with("gas.pressure", "kPa", "Ambient pressure")
            .with("gas.diagnostic", "", "Analyzer diagnostic value")
            .with("gas.date", "", "Device date")
            .with("gas.time", "", "Device time")
            .with("sonic.u", "m/s", "U wind component")
            .with("sonic.v", "m/s", "V wind component")
            .with("sonic.w", "m/s", "W wind component")
            .with("sonic.temperature", "°C", "Sonic temperature");
        let fields = [
            "Seconds",
            "Nanoseconds",
            "Date",
            "Time",
            "CO2",
            "H2O",
            "Temperature",
            "Pressure",
            "DiagVal",
            "U",
            "V",
            "W",
            "TS",
        ]
        .into_iter()
        .map(PatternField::new)
        .collect();
        Self {
            name: "licor".to_string(),
            dialect: Dialect::Pattern {
                fields,
                completion: Some(CompletionRule {
                    marker: "SmartFlux: complete".to_string(),
                    reference_key: "LastFile".to_string(),
                }),
            },
            mapping,
            metadata,
            auth_mode: AuthMode::Banner,
        }
    }

    /// 覆盖运行完成标记（仅模式方言有效）。
    pub fn with_completion_marker(mut self, marker: impl Into<String>) -> Self {
        if let Dialect::Pattern {
            completion: Some(rule),
            ..
        } = &mut self.dialect
        {
            rule.marker = marker.into();
        }
        self
    }
}
