//! 通道映射表：原始协议键 → 规范通道名，以及每个通道的单位与描述。

use std::collections::HashMap;

/// 通道表配置错误（启动时校验）。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelTableError {
    #[error("duplicate raw key: {0}")]
    DuplicateKey(String),
    #[error("missing metadata for channel: {0}")]
    MissingMetadata(String),
}

/// 有序的原始键 → 通道名映射，构造后不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    entries: Vec<(String, String)>,
}

impl ChannelMapping {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Result<Self, ChannelTableError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut collected: Vec<(String, String)> = Vec::new();
        for (raw_key, name) in entries {
            let raw_key = raw_key.into();
            if collected.iter().any(|(existing, _)| *existing == raw_key) {
                return Err(ChannelTableError::DuplicateKey(raw_key));
            }
            collected.push((raw_key, name.into()));
        }
        Ok(Self { entries: collected })
    }

    /// 内置静态表（键唯一性由测试保证）。
    pub(crate) fn from_static(entries: &[(&str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(key, name)| (key.to_string(), name.to_string()))
                .collect(),
        }
    }

    pub fn canonical_name(&self, raw_key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == raw_key)
            .map(|(_, name)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, name)| (key.as_str(), name.as_str()))
    }

    pub fn raw_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 单个通道的单位与描述。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub unit: String,
    pub description: String,
}

/// 通道名 → 单位/描述。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMetadata {
    entries: HashMap<String, ChannelInfo>,
}

impl ChannelMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            name.into(),
            ChannelInfo {
                unit: unit.into(),
                description: description.into(),
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&ChannelInfo> {
        self.entries.get(name)
    }

    /// 校验映射中每个通道都有元数据。
    pub fn validate(&self, mapping: &ChannelMapping) -> Result<(), ChannelTableError> {
        for (_, name) in mapping.iter() {
            if !self.entries.contains_key(name) {
                return Err(ChannelTableError::MissingMetadata(name.to_string()));
            }
        }
        Ok(())
    }
}
