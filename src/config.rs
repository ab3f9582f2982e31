//! 定义了连接子系统的可配置参数。
//! Defines configurable parameters for the connection subsystem.

use crate::event::EventKind;
use crate::transport::TransportMode;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// 任何周期性定时器或截止时间允许的最短时长。
/// Shortest period or deadline any timer is allowed to use.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(10);

/// Raises `period` to [`MIN_TIMER_PERIOD`], logging when it had to.
pub(crate) fn clamp_period(name: &str, period: Duration) -> Duration {
    if period < MIN_TIMER_PERIOD {
        warn!(
            setting = name,
            requested_ms = period.as_millis() as u64,
            "Timer period too short, using minimum"
        );
        MIN_TIMER_PERIOD
    } else {
        period
    }
}

/// A structure containing all configurable parameters.
///
/// 包含所有可配置参数的结构体。
#[derive(Debug, Clone)]
pub struct Config {
    /// The server endpoint handed to the transport.
    /// 交给传输层的服务器端点。
    pub endpoint: String,

    /// Handshake and transport-related parameters.
    /// 握手与传输相关参数。
    pub connection: ConnectionConfig,

    /// Reconnection policy.
    /// 重连策略。
    pub reconnect: ReconnectConfig,

    /// Heartbeat liveness detection.
    /// 心跳存活检测。
    pub heartbeat: HeartbeatConfig,

    /// Listener registry bounds.
    /// 监听器注册表的上限。
    pub listeners: ListenerConfig,

    /// Credential polling and user-facing error policy.
    /// 凭据轮询与面向用户的错误策略。
    pub provider: ProviderConfig,
}

/// Handshake and transport-related parameters.
///
/// 握手与传输相关参数。
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long a handshake may take before it counts as a timeout failure.
    /// 握手在被视为超时失败之前允许的最长时间。
    pub connect_timeout: Duration,
    /// Transport modes in order of preference. The transport falls back along this list.
    /// 按优先级排列的传输模式。传输层按此列表依次回退。
    pub transports: Vec<TransportMode>,
    /// Re-send `room:join` for every tracked room after a reconnect.
    /// 重连后为每个已跟踪的房间重新发送 `room:join`。
    pub rejoin_rooms_on_reconnect: bool,
}

/// Reconnection policy.
///
/// 重连策略。
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether dropped or failed connections are retried automatically.
    /// 断开或失败的连接是否自动重试。
    pub enabled: bool,
    /// Automatic attempts allowed before giving up until a manual reconnect.
    /// 放弃之前允许的自动尝试次数，之后只能手动重连。
    pub max_attempts: u32,
    /// Escalating base delays; the last entry repeats.
    /// 逐级递增的基础延迟；最后一项会重复使用。
    pub delays: Vec<Duration>,
    /// Upper bound applied to the base delay before jitter.
    /// 在加入抖动之前应用于基础延迟的上限。
    pub max_delay: Duration,
    /// Exclusive upper bound of the random jitter added to every delay.
    /// 每次延迟附加的随机抖动的（不含）上限。
    pub max_jitter: Duration,
}

/// Heartbeat liveness detection.
///
/// 心跳存活检测。
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between two `ping` messages.
    pub interval: Duration,
    /// Time allowed for a `pong` after the oldest unanswered `ping`.
    pub timeout: Duration,
}

/// Listener registry bounds.
///
/// 监听器注册表的上限。
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Default maximum number of handlers per event.
    /// 每个事件的默认最大处理器数量。
    pub max_per_event: usize,
    /// Per-event overrides of `max_per_event`.
    /// 针对单个事件对 `max_per_event` 的覆盖。
    pub per_event_caps: HashMap<EventKind, usize>,
    /// Reference total used by the health check.
    /// 健康检查使用的总数参考值。
    pub max_total: usize,
    /// Registrations older than this are removed by the sweep.
    /// 超过该时长的注册会被清扫移除。
    pub max_age: Duration,
    /// How often the sweep runs.
    /// 清扫运行的间隔。
    pub sweep_interval: Duration,
}

/// Credential polling and user-facing error policy.
///
/// 凭据轮询与面向用户的错误策略。
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// How often the credential store is polled.
    /// 轮询凭据存储的间隔。
    pub poll_interval: Duration,
    /// Delay between an authentication failure and the redirect to login,
    /// so the error is visible first.
    /// 认证失败与跳转登录之间的延迟，使错误先被展示。
    pub reauth_redirect_delay: Duration,
    /// Consecutive transient errors needed before a toast is raised.
    /// 触发提示前所需的连续瞬时错误次数。
    pub transient_error_threshold: u32,
    /// Surface critical alerts through the notifier as soon as they arrive.
    /// 关键告警到达时立即通过通知器展示。
    pub surface_critical_alerts: bool,
}

impl Config {
    /// Creates a configuration for `endpoint` with default parameters.
    ///
    /// 使用默认参数为 `endpoint` 创建配置。
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat = HeartbeatConfig { interval, timeout };
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.reconnect.max_attempts = max_attempts;
        self
    }

    pub fn with_reconnect_enabled(mut self, enabled: bool) -> Self {
        self.reconnect.enabled = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connection.connect_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.provider.poll_interval = interval;
        self
    }

    /// 将所有驱动定时器的时长提升到至少 [`MIN_TIMER_PERIOD`]。零周期会让
    /// `tokio::time::interval` panic，零心跳间隔会让ping空转。
    ///
    /// Raises every duration that drives a timer to at least [`MIN_TIMER_PERIOD`].
    /// A zero period panics `tokio::time::interval` and a zero heartbeat interval
    /// spins the ping loop.
    pub fn sanitized(mut self) -> Self {
        self.connection.connect_timeout =
            clamp_period("connection.connect_timeout", self.connection.connect_timeout);
        self.heartbeat.interval = clamp_period("heartbeat.interval", self.heartbeat.interval);
        self.heartbeat.timeout = clamp_period("heartbeat.timeout", self.heartbeat.timeout);
        self.listeners.sweep_interval =
            clamp_period("listeners.sweep_interval", self.listeners.sweep_interval);
        self.provider.poll_interval =
            clamp_period("provider.poll_interval", self.provider.poll_interval);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:3001".to_string(),
            connection: ConnectionConfig::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            listeners: ListenerConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            transports: vec![TransportMode::WebSocket, TransportMode::Polling],
            rejoin_rooms_on_reconnect: true,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            delays: [1, 2, 5, 10, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_per_event: 50,
            per_event_caps: HashMap::new(),
            max_total: 500,
            max_age: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            reauth_redirect_delay: Duration::from_millis(1500),
            transient_error_threshold: 3,
            surface_critical_alerts: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_raises_zero_periods() {
        let mut config = Config::default().with_heartbeat(Duration::ZERO, Duration::ZERO);
        config.listeners.sweep_interval = Duration::ZERO;
        config.provider.poll_interval = Duration::ZERO;
        config.connection.connect_timeout = Duration::ZERO;

        let config = config.sanitized();
        assert_eq!(config.heartbeat.interval, MIN_TIMER_PERIOD);
        assert_eq!(config.heartbeat.timeout, MIN_TIMER_PERIOD);
        assert_eq!(config.listeners.sweep_interval, MIN_TIMER_PERIOD);
        assert_eq!(config.provider.poll_interval, MIN_TIMER_PERIOD);
        assert_eq!(config.connection.connect_timeout, MIN_TIMER_PERIOD);
    }

    #[test]
    fn test_sanitized_keeps_defaults() {
        let config = Config::default().sanitized();
        assert_eq!(config.heartbeat.interval, Duration::from_secs(25));
        assert_eq!(config.listeners.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.provider.poll_interval, Duration::from_secs(5));
    }
}
