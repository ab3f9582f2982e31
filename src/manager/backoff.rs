//! 重连延迟：逐级递增的表，加上限，再加随机抖动。
//!
//! Reconnect delays: an escalating table, capped, plus random jitter.

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

const FALLBACK_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// 第 `attempt` 次（从1开始）尝试在加入抖动前的延迟。
    ///
    /// Delay before jitter for the 1-based `attempt`.
    pub(crate) fn base_delay(&self, attempt: u32) -> Duration {
        let delays = &self.config.delays;
        let index = (attempt.saturating_sub(1) as usize).min(delays.len().saturating_sub(1));
        delays
            .get(index)
            .copied()
            .unwrap_or(FALLBACK_DELAY)
            .min(self.config.max_delay)
    }

    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::rng())
    }

    /// `base_delay(attempt)` plus jitter drawn uniformly from `[0, max_jitter)`.
    pub(crate) fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = self.config.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.random_range(0..jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }
}
