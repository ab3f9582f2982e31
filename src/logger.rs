//! 结构化的连接指标与日志汇。
//!
//! 每条记录都会更新计数器，并以带结构化字段的 `tracing` 事件输出；最近的记录保存在
//! 有界缓冲区中，诊断视图无需日志收集器即可展示。
//!
//! Structured connection metrics and log sink.
//!
//! Every record updates a counter and is mirrored as a `tracing` event with
//! structured fields; the most recent records are kept in a bounded buffer so a
//! diagnostics view can show them without a log collector.

use crate::{
    buffer::EventBuffer,
    classify::{ClassifiedError, ErrorKind},
    manager::ConnectionState,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

const RECENT_ENTRIES: usize = 200;

/// Severity of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// 一条已记录的日志。
///
/// A recorded log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// 连接计数器的快照。
///
/// A snapshot of the connection counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionMetrics {
    pub connect_attempts: u64,
    pub connect_successes: u64,
    pub connect_failures: u64,
    pub disconnects: u64,
    pub reconnect_attempts: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub handler_panics: u64,
    pub heartbeat_timeouts: u64,
    pub errors_by_kind: HashMap<ErrorKind, u64>,
    pub last_latency: Option<Duration>,
    pub average_latency: Option<Duration>,
}

#[derive(Debug)]
struct LoggerState {
    metrics: ConnectionMetrics,
    latency_samples: u64,
    latency_total: Duration,
    recent: EventBuffer<LogEntry>,
}

/// 指标汇的共享句柄。克隆出的句柄记录到同一个汇中。
///
/// Shared handle to the metrics sink. Clones record into the same sink.
#[derive(Debug, Clone)]
pub struct ConnectionLogger {
    state: Arc<Mutex<LoggerState>>,
}

impl Default for ConnectionLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionLogger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoggerState {
                metrics: ConnectionMetrics::default(),
                latency_samples: 0,
                latency_total: Duration::ZERO,
                recent: EventBuffer::new(RECENT_ENTRIES),
            })),
        }
    }

    fn push(&self, level: LogLevel, message: String) {
        self.state.lock().recent.add(LogEntry { level, message });
    }

    pub fn connect_attempt(&self, attempt: u32) {
        self.state.lock().metrics.connect_attempts += 1;
        debug!(attempt, "Opening transport");
        self.push(LogLevel::Debug, format!("connect attempt {attempt}"));
    }

    pub fn connected(&self, transport: &str) {
        self.state.lock().metrics.connect_successes += 1;
        info!(transport, "Connection established");
        self.push(LogLevel::Info, format!("connected via {transport}"));
    }

    pub fn connect_failed(&self, error: &ClassifiedError) {
        {
            let mut state = self.state.lock();
            state.metrics.connect_failures += 1;
            *state.metrics.errors_by_kind.entry(error.kind).or_insert(0) += 1;
        }
        warn!(kind = %error.kind, recoverable = error.recoverable, message = %error.message, "Connection attempt failed");
        self.push(
            LogLevel::Warn,
            format!("connect failed ({}): {}", error.kind, error.message),
        );
    }

    pub fn error(&self, error: &ClassifiedError) {
        *self
            .state
            .lock()
            .metrics
            .errors_by_kind
            .entry(error.kind)
            .or_insert(0) += 1;
        error!(kind = %error.kind, recoverable = error.recoverable, message = %error.message, "Connection error");
        self.push(
            LogLevel::Error,
            format!("{} error: {}", error.kind, error.message),
        );
    }

    pub fn disconnected(&self, reason: &str, manual: bool) {
        self.state.lock().metrics.disconnects += 1;
        info!(reason, manual, "Disconnected");
        self.push(LogLevel::Info, format!("disconnected: {reason}"));
    }

    pub fn reconnect_scheduled(&self, attempt: u32, delay: Duration) {
        self.state.lock().metrics.reconnect_attempts += 1;
        info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.push(
            LogLevel::Info,
            format!("reconnect #{attempt} in {}ms", delay.as_millis()),
        );
    }

    pub fn reconnect_exhausted(&self, attempts: u32) {
        warn!(attempts, "Reconnection attempts exhausted");
        self.push(
            LogLevel::Warn,
            format!("gave up after {attempts} reconnect attempts"),
        );
    }

    pub fn state_changed(&self, from: ConnectionState, to: ConnectionState) {
        debug!(%from, %to, "Connection state changed");
    }

    pub fn message_received(&self, event: &str) {
        self.state.lock().metrics.messages_received += 1;
        tracing::trace!(event, "Inbound message");
    }

    pub fn message_sent(&self, event: &str) {
        self.state.lock().metrics.messages_sent += 1;
        tracing::trace!(event, "Outbound message");
    }

    /// 因连接未打开而丢弃了一条出站消息。
    /// An outbound message was dropped because the connection was not open.
    pub fn message_dropped(&self, event: &str, state: ConnectionState) {
        self.state.lock().metrics.messages_dropped += 1;
        warn!(event, %state, "Dropping outbound message, not connected");
        self.push(
            LogLevel::Warn,
            format!("dropped `{event}` while {state}"),
        );
    }

    pub fn handler_panicked(&self, event: &str, message: &str) {
        {
            let mut state = self.state.lock();
            state.metrics.handler_panics += 1;
            *state
                .metrics
                .errors_by_kind
                .entry(ErrorKind::Handler)
                .or_insert(0) += 1;
        }
        error!(event, message, "Event handler panicked");
        self.push(
            LogLevel::Error,
            format!("handler for `{event}` panicked: {message}"),
        );
    }

    pub fn heartbeat_latency(&self, latency: Duration) {
        let mut state = self.state.lock();
        state.latency_samples += 1;
        state.latency_total += latency;
        state.metrics.last_latency = Some(latency);
        let samples = u32::try_from(state.latency_samples).unwrap_or(u32::MAX);
        state.metrics.average_latency = Some(state.latency_total / samples);
        tracing::trace!(latency_ms = latency.as_millis() as u64, "Heartbeat pong");
    }

    pub fn heartbeat_timeout(&self, waited: Duration) {
        self.state.lock().metrics.heartbeat_timeouts += 1;
        warn!(waited_ms = waited.as_millis() as u64, "Heartbeat timed out, closing transport");
        self.push(LogLevel::Warn, "heartbeat timed out".to_string());
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.state.lock().metrics.clone()
    }

    /// 最近的记录，最旧的在前。
    /// The most recent entries, oldest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        self.state.lock().recent.payloads()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.metrics = ConnectionMetrics::default();
        state.latency_samples = 0;
        state.latency_total = Duration::ZERO;
        state.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_signals;

    #[test]
    fn test_counters_and_error_kinds() {
        let logger = ConnectionLogger::new();
        logger.connect_attempt(1);
        logger.connect_failed(&classify_signals(None, Some("ECONNREFUSED"), "refused"));
        logger.connect_attempt(2);
        logger.connected("websocket");
        logger.handler_panicked("alert", "boom");

        let metrics = logger.metrics();
        assert_eq!(metrics.connect_attempts, 2);
        assert_eq!(metrics.connect_failures, 1);
        assert_eq!(metrics.connect_successes, 1);
        assert_eq!(metrics.errors_by_kind.get(&ErrorKind::Network), Some(&1));
        assert_eq!(metrics.errors_by_kind.get(&ErrorKind::Handler), Some(&1));
    }

    #[test]
    fn test_latency_average() {
        let logger = ConnectionLogger::new();
        logger.heartbeat_latency(Duration::from_millis(10));
        logger.heartbeat_latency(Duration::from_millis(30));
        let metrics = logger.metrics();
        assert_eq!(metrics.last_latency, Some(Duration::from_millis(30)));
        assert_eq!(metrics.average_latency, Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_recent_entries_are_bounded() {
        let logger = ConnectionLogger::new();
        for i in 0..(RECENT_ENTRIES as u32 + 50) {
            logger.connect_attempt(i);
        }
        let recent = logger.recent();
        assert_eq!(recent.len(), RECENT_ENTRIES);
        assert_eq!(recent[0].message, "connect attempt 50");

        logger.reset();
        assert!(logger.recent().is_empty());
        assert_eq!(logger.metrics(), ConnectionMetrics::default());
    }
}
