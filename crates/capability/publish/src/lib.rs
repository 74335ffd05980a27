//! 记录发布：原始键经通道映射转为带元数据、时间戳的测量值，交给发布端。

use async_trait::async_trait;
use bridge_telemetry::{record_empty_record, record_field_skipped, record_record_published};
use domain::{ChannelMapping, ChannelMetadata, FieldValue, Measurement, Record};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 携带设备时间戳（秒）的原始键。
pub const SECONDS_KEY: &str = "Seconds";
/// 常规状态测量名。
pub const STATUS_CHANNEL: &str = "status";
/// 退出状态测量名。
pub const EXIT_STATUS_CHANNEL: &str = "exit.status";
/// 空记录时发布的状态值。
pub const NO_DATA_STATUS: &str = "no_data";

/// 发布错误。
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("sink error: {0}")]
    Sink(String),
    #[error("metadata missing for channel: {0}")]
    MetadataMissing(String),
}

/// 测量值发布端抽象。
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    async fn publish(&self, measurement: Measurement) -> Result<(), PublishError>;
}

/// 空发布端（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl MeasurementSink for NoopSink {
    async fn publish(&self, measurement: Measurement) -> Result<(), PublishError> {
        debug!(target: "bridge.publish", name = %measurement.name, "noop_publish");
        Ok(())
    }
}

/// 按行输出 JSON 的发布端，每个测量值一行。
pub struct JsonLineSink<W> {
    out: Mutex<W>,
}

impl JsonLineSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> JsonLineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> MeasurementSink for JsonLineSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, measurement: Measurement) -> Result<(), PublishError> {
        let mut line =
            serde_json::to_vec(&measurement).map_err(|e| PublishError::Sink(e.to_string()))?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| PublishError::Sink(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| PublishError::Sink(e.to_string()))
    }
}

/// 时间源（纳秒）。
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> i64;
}

/// 系统墙钟。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        let duration = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
    }
}

/// 单条记录的发布结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub skipped: usize,
}

/// 记录发布器。
#[derive(Clone)]
pub struct RecordPublisher {
    sink: Arc<dyn MeasurementSink>,
    mapping: ChannelMapping,
    metadata: ChannelMetadata,
    sensor: String,
    clock: Arc<dyn Clock>,
}

impl RecordPublisher {
    pub fn new(
        sink: Arc<dyn MeasurementSink>,
        mapping: ChannelMapping,
        metadata: ChannelMetadata,
        sensor: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            mapping,
            metadata,
            sensor: sensor.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 记录时间戳：`Seconds` 数值换算为纳秒，否则取当前时间。
    pub fn timestamp_ns(&self, record: &Record) -> i64 {
        match record.get(SECONDS_KEY).and_then(FieldValue::as_f64) {
            Some(seconds) if seconds.is_finite() => (seconds * 1e9).round() as i64,
            _ => self.clock.now_ns(),
        }
    }

    /// 按通道映射顺序发布记录中存在的字段。
    ///
    /// 缺少元数据的字段记日志后跳过；空记录发布一次 `status = no_data`。
    pub async fn publish(&self, record: &Record) -> Result<PublishSummary, PublishError> {
        if record.is_empty() {
            record_empty_record();
            debug!(target: "bridge.publish", "empty_record");
            self.publish_status(STATUS_CHANNEL, NO_DATA_STATUS).await?;
            return Ok(PublishSummary::default());
        }

        let timestamp_ns = self.timestamp_ns(record);
        let mut summary = PublishSummary::default();

        for raw_key in record.keys() {
            if self.mapping.canonical_name(raw_key).is_none() {
                record_field_skipped();
                summary.skipped += 1;
            }
        }

        for (raw_key, canonical) in self.mapping.iter() {
            let Some(value) = record.get(raw_key) else {
                continue;
            };
            let measurement = match self.measurement(canonical, value, timestamp_ns) {
                Ok(measurement) => measurement,
                Err(e) => {
                    record_field_skipped();
                    summary.skipped += 1;
                    warn!(target: "bridge.publish", raw_key, error = %e, "field_skipped");
                    continue;
                }
            };
            self.sink.publish(measurement).await?;
            summary.published += 1;
        }

        record_record_published(summary.published as u64);
        debug!(
            target: "bridge.publish",
            published = summary.published,
            skipped = summary.skipped,
            timestamp_ns,
            "record_published"
        );
        Ok(summary)
    }

    /// 发布状态字符串（`status` / `exit.status`），时间戳取当前时间。
    pub async fn publish_status(&self, name: &str, value: &str) -> Result<(), PublishError> {
        let measurement = Measurement::status(name, value, self.clock.now_ns());
        self.sink.publish(measurement).await
    }

    /// 发布终止状态。
    pub async fn publish_exit_status(&self, value: &str) -> Result<(), PublishError> {
        self.publish_status(EXIT_STATUS_CHANNEL, value).await
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    fn measurement(
        &self,
        canonical: &str,
        value: &FieldValue,
        timestamp_ns: i64,
    ) -> Result<Measurement, PublishError> {
        let info = self
            .metadata
            .get(canonical)
            .ok_or_else(|| PublishError::MetadataMissing(canonical.to_string()))?;
        let meta = BTreeMap::from([
            ("units".to_string(), info.unit.clone()),
            ("description".to_string(), info.description.clone()),
            ("name".to_string(), canonical.to_string()),
            ("sensor".to_string(), self.sensor.clone()),
        ]);
        Ok(Measurement {
            name: canonical.to_string(),
            value: value.clone(),
            meta,
            timestamp_ns,
        })
    }
}
