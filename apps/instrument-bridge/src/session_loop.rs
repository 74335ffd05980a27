//! 会话主循环
//!
//! 状态机：`Connecting → Authenticating（如配置） → Streaming → Terminating`。
//! 读超时、连接/认证失败与中断信号都进入 Terminating：先停心跳，再关套接字，
//! 最后发布终止状态。不重连。

use bridge_protocol::{
    Decoded, FrameDecoder, HeartbeatConfig, ProtocolError, Session, SessionConfig, SessionState,
    connect, spawn_heartbeat,
};
use bridge_publish::RecordPublisher;
use bridge_telemetry::{metrics, new_session_id, record_decode_error, record_frame_received};
use bridge_transfer::CompletionWorkflow;
use domain::{AuthMode, Record};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

/// 读超时的终止状态。
pub const EXIT_STATUS_TIMEOUT: &str = "Unknown_Timeout";
/// 连接或认证失败的终止状态。
pub const EXIT_STATUS_CONNECTION: &str = "Connection_Error";

/// 会话结束原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// 单次读取超过截止时间
    Timeout,
    /// 连接、握手失败或连接被设备关闭
    ConnectionError,
    /// 收到中断信号
    Interrupted,
}

impl SessionOutcome {
    /// 发布到 `exit.status` 的值；中断不发布。
    pub fn exit_status(&self) -> Option<&'static str> {
        match self {
            Self::Timeout => Some(EXIT_STATUS_TIMEOUT),
            Self::ConnectionError => Some(EXIT_STATUS_CONNECTION),
            Self::Interrupted => None,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Interrupted => ExitCode::SUCCESS,
            Self::Timeout | Self::ConnectionError => ExitCode::FAILURE,
        }
    }

    fn from_error(error: &ProtocolError) -> Self {
        match error {
            ProtocolError::Timeout(_) => Self::Timeout,
            _ => Self::ConnectionError,
        }
    }
}

/// 单设备会话主循环。
pub struct SessionLoop {
    session_config: SessionConfig,
    heartbeat: Option<HeartbeatConfig>,
    decoder: FrameDecoder,
    publisher: RecordPublisher,
    completion: Option<CompletionWorkflow>,
}

impl SessionLoop {
    pub fn new(
        session_config: SessionConfig,
        heartbeat: Option<HeartbeatConfig>,
        decoder: FrameDecoder,
        publisher: RecordPublisher,
        completion: Option<CompletionWorkflow>,
    ) -> Self {
        Self {
            session_config,
            heartbeat,
            decoder,
            publisher,
            completion,
        }
    }

    /// 运行一个完整会话，直到超时、连接失败或 `shutdown` 被取消。
    pub async fn run(&self, shutdown: CancellationToken) -> SessionOutcome {
        let span = info_span!(
            "session",
            session_id = %new_session_id(),
            device = %self.session_config.addr()
        );
        async {
            let outcome = self.drive(&shutdown).await;
            if let Some(status) = outcome.exit_status() {
                if let Err(e) = self.publisher.publish_exit_status(status).await {
                    warn!(target: "bridge.session", status, error = %e, "exit_status_publish_failed");
                }
            }
            let snapshot = metrics().snapshot();
            info!(
                target: "bridge.session",
                outcome = ?outcome,
                frames_received = snapshot.frames_received,
                records_published = snapshot.records_published,
                decode_errors = snapshot.decode_errors,
                "session_ended"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    /// 在宽限期内等待在途文件同步流程。
    pub async fn drain(&self, grace: Duration) {
        if let Some(workflow) = &self.completion {
            workflow.shutdown(grace).await;
        }
    }

    async fn drive(&self, shutdown: &CancellationToken) -> SessionOutcome {
        enter(SessionState::Connecting);
        let stream = tokio::select! {
            biased;
            () = shutdown.cancelled() => return interrupted(),
            result = connect(&self.session_config) => result,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!(target: "bridge.session", error = %e, "connect_failed");
                enter(SessionState::Terminating);
                return SessionOutcome::ConnectionError;
            }
        };
        self.serve(Session::new(stream, &self.session_config), shutdown)
            .await
    }

    async fn serve<T>(&self, mut session: Session<T>, shutdown: &CancellationToken) -> SessionOutcome
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if self.session_config.effective_auth_mode() != AuthMode::None {
            enter(SessionState::Authenticating);
            let result = tokio::select! {
                biased;
                () = shutdown.cancelled() => Err(None),
                result = session.authenticate(&self.session_config) => result.map_err(Some),
            };
            if let Err(e) = result {
                enter(SessionState::Terminating);
                session.close().await;
                return match e {
                    Some(e) => {
                        error!(target: "bridge.session", error = %e, "authentication_failed");
                        SessionOutcome::ConnectionError
                    }
                    None => interrupted(),
                };
            }
        }

        enter(SessionState::Streaming);
        let heartbeat = self
            .heartbeat
            .clone()
            .map(|config| spawn_heartbeat(session.writer(), config));

        let outcome = loop {
            let frame = tokio::select! {
                biased;
                () = shutdown.cancelled() => break interrupted(),
                frame = session.read_frame() => frame,
            };
            match frame {
                Ok(frame) => self.handle_frame(&frame).await,
                Err(e) => {
                    error!(target: "bridge.session", error = %e, "read_failed");
                    break SessionOutcome::from_error(&e);
                }
            }
        };

        enter(SessionState::Terminating);
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        session.close().await;
        outcome
    }

    /// 解码失败记日志后按空记录处理，循环继续。
    async fn handle_frame(&self, frame: &[u8]) {
        record_frame_received();
        let decoded = match self.decoder.decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                record_decode_error();
                warn!(target: "bridge.session", error = %e, bytes = frame.len(), "frame_decode_failed");
                Decoded::Record(Record::new())
            }
        };

        match decoded {
            Decoded::Record(record) => {
                if let Err(e) = self.publisher.publish(&record).await {
                    warn!(target: "bridge.session", error = %e, "publish_failed");
                }
            }
            Decoded::Completion(event) => match &self.completion {
                Some(workflow) => {
                    let _ = workflow.trigger(event);
                }
                None => {
                    info!(
                        target: "bridge.session",
                        reference = %event.last_file_reference,
                        "completion_ignored"
                    );
                }
            },
        }
    }
}

fn enter(state: SessionState) {
    info!(target: "bridge.session", state = %state, "session_state");
}

fn interrupted() -> SessionOutcome {
    info!(target: "bridge.session", "interrupted");
    enter(SessionState::Terminating);
    SessionOutcome::Interrupted
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_publish::{MeasurementSink, PublishError};
    use bridge_transfer::{Fetcher, TransferError, TransferLayout, Uploader};
    use domain::{DeviceProfile, FieldValue, Measurement};
    use std::future::Future;
    use std::path::Path;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<Measurement>>,
    }

    impl RecordingSink {
        async fn names(&self) -> Vec<String> {
            self.published
                .lock()
                .await
                .iter()
                .map(|m| m.name.clone())
                .collect()
        }

        async fn last(&self) -> Option<Measurement> {
            self.published.lock().await.last().cloned()
        }
    }

    #[async_trait]
    impl MeasurementSink for RecordingSink {
        async fn publish(&self, measurement: Measurement) -> Result<(), PublishError> {
            self.published.lock().await.push(measurement);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFetcher {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for RecordingFetcher {
        async fn fetch(&self, remote_path: &str, _local_path: &Path) -> Result<(), TransferError> {
            self.calls.lock().await.push(remote_path.to_string());
            Ok(())
        }
    }

    struct NullUploader;

    #[async_trait]
    impl Uploader for NullUploader {
        async fn upload(&self, _local_path: &Path) -> Result<(), TransferError> {
            Ok(())
        }
    }

    async fn fake_device<F, Fut, R>(script: F) -> (u16, JoinHandle<R>)
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            script(stream).await
        });
        (port, handle)
    }

    async fn read_until_closed(stream: &mut TcpStream) {
        let mut buf = [0u8; 256];
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    }

    fn session_config(port: u16, read_timeout_ms: u64) -> SessionConfig {
        SessionConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            auth_mode: AuthMode::None,
            read_timeout_ms,
            connect_timeout_ms: 1000,
        }
    }

    fn session_loop(
        profile: DeviceProfile,
        config: SessionConfig,
        sink: Arc<RecordingSink>,
        heartbeat: Option<HeartbeatConfig>,
        completion: Option<CompletionWorkflow>,
    ) -> SessionLoop {
        let decoder = FrameDecoder::new(&profile.dialect).expect("decoder");
        let publisher = RecordPublisher::new(sink, profile.mapping, profile.metadata, "usa-1");
        SessionLoop::new(config, heartbeat, decoder, publisher, completion)
    }

    #[test]
    fn outcome_maps_to_exit_status() {
        assert_eq!(SessionOutcome::Timeout.exit_status(), Some("Unknown_Timeout"));
        assert_eq!(
            SessionOutcome::ConnectionError.exit_status(),
            Some("Connection_Error")
        );
        assert_eq!(SessionOutcome::Interrupted.exit_status(), None);
    }

    #[tokio::test]
    async fn read_timeout_publishes_unknown_timeout() {
        let (port, device) = fake_device(|mut stream| async move {
            stream.write_all(b"x;1;2;3;4\r\n").await.expect("write");
            read_until_closed(&mut stream).await;
        })
        .await;
        let sink = Arc::new(RecordingSink::default());
        let session_loop = session_loop(
            DeviceProfile::metek(),
            session_config(port, 300),
            sink.clone(),
            None,
            None,
        );

        let outcome = session_loop.run(CancellationToken::new()).await;
        assert_eq!(outcome, SessionOutcome::Timeout);
        assert_eq!(
            sink.names().await,
            vec![
                "sensor.x",
                "sensor.y",
                "sensor.z",
                "sensor.temperature",
                "exit.status"
            ]
        );
        let last = sink.last().await.expect("exit status");
        assert_eq!(last.value, FieldValue::Text("Unknown_Timeout".to_string()));
        device.await.expect("device");
    }

    #[tokio::test]
    async fn refused_connection_publishes_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let sink = Arc::new(RecordingSink::default());
        let session_loop = session_loop(
            DeviceProfile::metek(),
            session_config(port, 300),
            sink.clone(),
            None,
            None,
        );

        let outcome = session_loop.run(CancellationToken::new()).await;
        assert_eq!(outcome, SessionOutcome::ConnectionError);
        assert_eq!(sink.names().await, vec!["exit.status"]);
        let last = sink.last().await.expect("exit status");
        assert_eq!(last.value, FieldValue::Text("Connection_Error".to_string()));
    }

    #[tokio::test]
    async fn rejected_authentication_ends_session() {
        let (port, device) = fake_device(|stream| async move {
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            stream.read_line(&mut line).await.expect("username");
            stream.get_mut().write_all(b"User ok\r\n").await.expect("write");
            line.clear();
            stream.read_line(&mut line).await.expect("password");
            stream
                .get_mut()
                .write_all(b"Authentication failed\r\n")
                .await
                .expect("write");
            read_until_closed(stream.get_mut()).await;
        })
        .await;

        let mut config = session_config(port, 1000);
        config.username = Some("data".to_string());
        config.password = Some("wrong".to_string());
        config.auth_mode = AuthMode::Confirm;
        let sink = Arc::new(RecordingSink::default());
        let session_loop = session_loop(DeviceProfile::metek(), config, sink.clone(), None, None);

        let outcome = session_loop.run(CancellationToken::new()).await;
        assert_eq!(outcome, SessionOutcome::ConnectionError);
        assert_eq!(sink.names().await, vec!["exit.status"]);
        device.await.expect("device");
    }

    #[tokio::test]
    async fn device_close_is_connection_error() {
        let (port, device) = fake_device(|mut stream| async move {
            stream.write_all(b"x;1;2;3;4\r\n").await.expect("write");
        })
        .await;
        let sink = Arc::new(RecordingSink::default());
        let session_loop = session_loop(
            DeviceProfile::metek(),
            session_config(port, 5000),
            sink.clone(),
            None,
            None,
        );

        let outcome = session_loop.run(CancellationToken::new()).await;
        assert_eq!(outcome, SessionOutcome::ConnectionError);
        let names = sink.names().await;
        assert_eq!(names.len(), 5);
        assert_eq!(names[0], "sensor.x");
        assert_eq!(names[4], "exit.status");
        device.await.expect("device");
    }

    #[tokio::test]
    async fn undecodable_frame_reports_no_data_and_continues() {
        let (port, device) = fake_device(|mut stream| async move {
            stream.write_all(&[0xff, 0xfe, 0xfd]).await.expect("write");
        })
        .await;
        let sink = Arc::new(RecordingSink::default());
        let session_loop = session_loop(
            DeviceProfile::metek(),
            session_config(port, 5000),
            sink.clone(),
            None,
            None,
        );

        let outcome = session_loop.run(CancellationToken::new()).await;
        assert_eq!(outcome, SessionOutcome::ConnectionError);
        assert_eq!(sink.names().await, vec!["status", "exit.status"]);
        device.await.expect("device");
    }

    #[tokio::test]
    async fn interrupt_terminates_without_exit_status() {
        let (port, device) = fake_device(|mut stream| async move {
            stream.write_all(b"x;1;2;3;4\r\n").await.expect("write");
            read_until_closed(&mut stream).await;
        })
        .await;
        let sink = Arc::new(RecordingSink::default());
        let session_loop = session_loop(
            DeviceProfile::metek(),
            session_config(port, 10_000),
            sink.clone(),
            None,
            None,
        );

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let outcome = session_loop.run(shutdown).await;
        assert_eq!(outcome, SessionOutcome::Interrupted);
        assert!(!sink.names().await.contains(&"exit.status".to_string()));
        device.await.expect("device");
    }

    #[tokio::test]
    async fn heartbeat_bytes_reach_device() {
        let (port, device) = fake_device(|mut stream| async move {
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while received.len() < 4 {
                match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
                    Ok(Ok(n)) if n > 0 => received.extend_from_slice(&buf[..n]),
                    _ => break,
                }
            }
            received
        })
        .await;
        let sink = Arc::new(RecordingSink::default());
        let heartbeat = HeartbeatConfig {
            interval_ms: 50,
            payload: "\r\n".to_string(),
        };
        let session_loop = session_loop(
            DeviceProfile::metek(),
            session_config(port, 5000),
            sink.clone(),
            Some(heartbeat),
            None,
        );

        let outcome = session_loop.run(CancellationToken::new()).await;
        assert_eq!(outcome, SessionOutcome::ConnectionError);
        let received = device.await.expect("device");
        assert_eq!(&received[..4], b"\r\n\r\n");
    }

    #[tokio::test]
    async fn completion_frame_triggers_workflow() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(RecordingFetcher::default());
        let workflow = CompletionWorkflow::new(
            TransferLayout::new("/raw", "/results", dir.path().join("data")),
            Duration::ZERO,
            fetcher.clone(),
            Arc::new(NullUploader),
        );

        let (port, device) = fake_device(|mut stream| async move {
            stream
                .write_all(b"(SmartFlux: complete)(LastFile 2024-06-15T120000)")
                .await
                .expect("write");
        })
        .await;
        let sink = Arc::new(RecordingSink::default());
        let session_loop = session_loop(
            DeviceProfile::licor(),
            session_config(port, 5000),
            sink.clone(),
            None,
            Some(workflow),
        );

        let outcome = session_loop.run(CancellationToken::new()).await;
        assert_eq!(outcome, SessionOutcome::ConnectionError);
        session_loop.drain(Duration::from_secs(5)).await;

        assert_eq!(
            fetcher.calls.lock().await.clone(),
            vec![
                "/raw/2024/06/2024-06-15T120000.ghg".to_string(),
                "/results/2024/06/2024-06-15T120000.zip".to_string(),
            ]
        );
        assert_eq!(sink.names().await, vec!["exit.status"]);
        assert!(dir.path().join("data/2024/06").is_dir());
        device.await.expect("device");
    }
}
