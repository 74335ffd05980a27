use serde::Serialize;
use std::collections::BTreeMap;

/// 字段值：数值优先，解析失败时保留原文。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// 尝试按浮点数解析，失败则保留原始文本。
    ///
    /// `nan` / `inf` 之类非有限值保留原文，JSON 无法表示它们。
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Self::Number(value),
            _ => Self::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{}", value),
            Self::Text(value) => write!(f, "{}", value),
        }
    }
}

/// 单帧解码结果：原始键 → 字段值。
///
/// 只包含本帧实际匹配到的键；缺失的键不会以零值出现。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }
}

/// 运行完成事件：携带设备报告的最后文件引用（如 `2024-06-15T120000`）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub last_file_reference: String,
}

impl CompletionEvent {
    pub fn new(last_file_reference: impl Into<String>) -> Self {
        Self {
            last_file_reference: last_file_reference.into(),
        }
    }

    /// 从 `YYYY-MM-...` 日期前缀提取 (年, 月)。
    pub fn year_month(&self) -> Option<(&str, &str)> {
        let reference = self.last_file_reference.as_str();
        let year = reference.get(0..4)?;
        let month = reference.get(5..7)?;
        let separators_ok =
            reference.get(4..5) == Some("-") && reference.get(7..8) == Some("-");
        let digits_ok = year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit());
        if !separators_ok || !digits_ok {
            return None;
        }
        Some((year, month))
    }
}

/// 待发布的测量值。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub name: String,
    pub value: FieldValue,
    pub meta: BTreeMap<String, String>,
    pub timestamp_ns: i64,
}

impl Measurement {
    /// 状态类测量（`status` / `exit.status`），无元数据。
    pub fn status(name: impl Into<String>, value: impl Into<String>, timestamp_ns: i64) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Text(value.into()),
            meta: BTreeMap::new(),
            timestamp_ns,
        }
    }
}
