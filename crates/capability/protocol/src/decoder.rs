//! 帧解码
//!
//! 两种方言由配置选择，调用方只看到 [`FrameDecoder::decode`]：
//! - 分隔方言：`;` 分隔，跳过前导字段后按位置对应原始键
//! - 模式方言：逐键匹配 `(KEY value)`，可识别运行完成标记

use crate::error::ProtocolError;
use domain::{CompletionEvent, CompletionRule, Dialect, FieldValue, PatternField, Record};
use regex::Regex;
use tracing::{debug, warn};

/// 单帧解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// 数据记录
    Record(Record),
    /// 运行完成事件（替代数据记录）
    Completion(CompletionEvent),
}

struct CompiledField {
    key: String,
    pattern: Regex,
}

struct CompiledCompletion {
    marker: String,
    reference: Regex,
}

enum DecoderKind {
    Delimited {
        delimiter: char,
        skip: usize,
        fields: Vec<String>,
    },
    Pattern {
        fields: Vec<CompiledField>,
        completion: Option<CompiledCompletion>,
    },
}

/// 按方言配置编译好的解码器
pub struct FrameDecoder {
    kind: DecoderKind,
}

impl FrameDecoder {
    /// 编译方言配置；字段模式非法时返回配置错误。
    pub fn new(dialect: &Dialect) -> Result<Self, ProtocolError> {
        let kind = match dialect {
            Dialect::Delimited {
                delimiter,
                skip,
                fields,
            } => DecoderKind::Delimited {
                delimiter: *delimiter,
                skip: *skip,
                fields: fields.clone(),
            },
            Dialect::Pattern { fields, completion } => DecoderKind::Pattern {
                fields: fields
                    .iter()
                    .map(compile_field)
                    .collect::<Result<Vec<_>, _>>()?,
                completion: completion.as_ref().map(compile_completion).transpose()?,
            },
        };
        Ok(Self { kind })
    }

    /// 解码一帧。非 UTF-8 数据返回 [`ProtocolError::Decode`]。
    pub fn decode(&self, frame: &[u8]) -> Result<Decoded, ProtocolError> {
        let text = std::str::from_utf8(frame)
            .map_err(|e| ProtocolError::Decode(format!("frame is not utf-8: {}", e)))?;
        match &self.kind {
            DecoderKind::Delimited {
                delimiter,
                skip,
                fields,
            } => Ok(Decoded::Record(decode_delimited(
                text, *delimiter, *skip, fields,
            ))),
            DecoderKind::Pattern { fields, completion } => {
                if let Some(completion) = completion {
                    if text.contains(&completion.marker) {
                        return completion_event(text, completion).map(Decoded::Completion);
                    }
                }
                Ok(Decoded::Record(decode_pattern(text, fields)))
            }
        }
    }
}

fn compile_field(field: &PatternField) -> Result<CompiledField, ProtocolError> {
    Ok(CompiledField {
        key: field.key.clone(),
        pattern: token_pattern(&field.key, &field.value_pattern)?,
    })
}

fn compile_completion(rule: &CompletionRule) -> Result<CompiledCompletion, ProtocolError> {
    Ok(CompiledCompletion {
        marker: rule.marker.clone(),
        reference: token_pattern(&rule.reference_key, domain::profile::DEFAULT_VALUE_PATTERN)?,
    })
}

/// `(KEY value)`：键后至少一个空白，值取捕获组 1。
fn token_pattern(key: &str, value_pattern: &str) -> Result<Regex, ProtocolError> {
    let source = format!(r"\({}\s+({})\)", regex::escape(key), value_pattern);
    Regex::new(&source)
        .map_err(|e| ProtocolError::ConfigParse(format!("pattern for {}: {}", key, e)))
}

fn decode_delimited(text: &str, delimiter: char, skip: usize, fields: &[String]) -> Record {
    let values: Vec<&str> = text
        .trim_end()
        .split(delimiter)
        .skip(skip)
        .take(fields.len())
        .collect();
    if values.len() < fields.len() {
        warn!(
            target: "bridge.protocol",
            expected = fields.len(),
            received = values.len(),
            frame = %text.trim_end(),
            "short_frame"
        );
    }

    let mut record = Record::new();
    for (key, raw) in fields.iter().zip(values) {
        record.insert(key.as_str(), FieldValue::parse(raw));
    }
    record
}

fn decode_pattern(text: &str, fields: &[CompiledField]) -> Record {
    let mut record = Record::new();
    for field in fields {
        if let Some(captures) = field.pattern.captures(text) {
            if let Some(raw) = captures.get(1) {
                record.insert(field.key.as_str(), FieldValue::parse(raw.as_str()));
            }
        }
    }
    debug!(target: "bridge.protocol", matched = record.len(), "pattern_frame_decoded");
    record
}

fn completion_event(
    text: &str,
    completion: &CompiledCompletion,
) -> Result<CompletionEvent, ProtocolError> {
    let reference = completion
        .reference
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ProtocolError::Decode("completion marker without file reference".to_string())
        })?;
    Ok(CompletionEvent::new(reference))
}
