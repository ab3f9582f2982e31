//! 心跳簿记：何时发送ping、何时放弃、最近测得的延迟。
//!
//! Heartbeat bookkeeping: when to ping, when to give up, last measured latency.

use crate::config::HeartbeatConfig;
use tokio::time::{Duration, Instant};

/// 自构造以来的单调毫秒数，用作线上时间戳。
///
/// Monotonic milliseconds since construction, used for wire timestamps.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    origin: Instant,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// 每个连接一个心跳周期，重连时重置。
///
/// One heartbeat cycle per connection, reset on reconnect.
#[derive(Debug)]
pub(crate) struct HeartbeatCycle {
    config: HeartbeatConfig,
    pub(crate) next_ping: Option<Instant>,
    pub(crate) timeout_deadline: Option<Instant>,
    pub(crate) last_ping_sent_at: Option<Instant>,
    pub(crate) last_latency: Option<Duration>,
}

impl HeartbeatCycle {
    pub(crate) fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            next_ping: None,
            timeout_deadline: None,
            last_ping_sent_at: None,
            last_latency: None,
        }
    }

    /// Starts a fresh cycle for a new connection.
    pub(crate) fn start(&mut self, now: Instant) {
        self.stop();
        self.last_latency = None;
        self.next_ping = Some(now + self.config.interval);
    }

    /// 解除两个定时器。
    /// Disarms both timers.
    pub(crate) fn stop(&mut self) {
        self.next_ping = None;
        self.timeout_deadline = None;
        self.last_ping_sent_at = None;
    }

    /// 记录一次ping并激活超时；若更早的ping仍未得到应答，则保留更早的截止时间。
    ///
    /// Records a ping and arms the timeout unless an earlier ping is still unanswered,
    /// in which case the earlier deadline stands.
    pub(crate) fn on_ping_sent(&mut self, now: Instant) {
        self.last_ping_sent_at = Some(now);
        self.next_ping = Some(now + self.config.interval);
        if self.timeout_deadline.is_none() {
            self.timeout_deadline = Some(now + self.config.timeout);
        }
    }

    /// 记录一个回显 `sent_millis` 的pong；返回测得的延迟。
    ///
    /// Records a pong echoing `sent_millis`; returns the measured latency.
    pub(crate) fn on_pong(&mut self, sent_millis: u64, clock: &Clock) -> Duration {
        self.timeout_deadline = None;
        let latency = Duration::from_millis(clock.now_millis().saturating_sub(sent_millis));
        self.last_latency = Some(latency);
        latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle() -> HeartbeatCycle {
        HeartbeatCycle::new(HeartbeatConfig {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_oldest_deadline() {
        let mut hb = cycle();
        let t0 = Instant::now();
        hb.start(t0);
        assert_eq!(hb.next_ping, Some(t0 + Duration::from_secs(25)));
        assert!(hb.timeout_deadline.is_none());

        let first = t0 + Duration::from_secs(25);
        hb.on_ping_sent(first);
        hb.on_ping_sent(first + Duration::from_secs(25));
        assert_eq!(hb.timeout_deadline, Some(first + Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_disarms_timeout_and_measures_latency() {
        let clock = Clock::new();
        let mut hb = cycle();
        hb.start(Instant::now());
        let sent = clock.now_millis();
        hb.on_ping_sent(Instant::now());
        tokio::time::sleep(Duration::from_millis(42)).await;

        let latency = hb.on_pong(sent, &clock);
        assert_eq!(latency, Duration::from_millis(42));
        assert!(hb.timeout_deadline.is_none());
        assert_eq!(hb.last_latency, Some(latency));
    }

    #[test]
    fn test_stop_disarms_everything() {
        let mut hb = cycle();
        hb.start(Instant::now());
        hb.on_ping_sent(Instant::now());
        assert!(hb.next_ping.is_some() && hb.timeout_deadline.is_some());
        hb.stop();
        assert!(hb.next_ping.is_none() && hb.timeout_deadline.is_none());
    }
}
