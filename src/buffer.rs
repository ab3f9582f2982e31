//! 有界、按年龄淘汰的事件历史。
//!
//! Bounded, age-evicting event history.

use crate::config::clamp_period;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};
use tokio::{
    task::JoinHandle,
    time::{Duration, Instant},
};
use tracing::trace;

/// 一条缓冲的事件。
///
/// One buffered event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBufferEntry<T> {
    pub timestamp: Instant,
    pub payload: T,
}

/// 最多保存 `max_size` 条记录、按插入顺序排列的环形缓冲区。
///
/// An insertion-ordered ring of at most `max_size` entries.
#[derive(Debug, Clone)]
pub struct EventBuffer<T> {
    entries: VecDeque<EventBufferEntry<T>>,
    max_size: usize,
}

impl<T> EventBuffer<T> {
    /// 创建一个空缓冲区。`max_size` 为零时按一处理。
    ///
    /// Creates an empty buffer. A `max_size` of zero is treated as one.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// 追加一条带当前时间戳的载荷，溢出时淘汰最旧的记录。返回被淘汰的载荷。
    ///
    /// Appends a payload stamped with the current time, evicting the oldest entry
    /// on overflow. Returns the evicted payload.
    pub fn add(&mut self, payload: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.max_size {
            self.entries.pop_front().map(|entry| entry.payload)
        } else {
            None
        };
        self.entries.push_back(EventBufferEntry {
            timestamp: Instant::now(),
            payload,
        });
        evicted
    }

    /// 时间戳位于当前时间 `window` 之内的记录，最旧的在前。
    ///
    /// Entries whose timestamp lies within `window` of now, oldest first.
    pub fn get_recent(&self, window: Duration) -> impl Iterator<Item = &EventBufferEntry<T>> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(move |entry| now.duration_since(entry.timestamp) <= window)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventBufferEntry<T>> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&EventBufferEntry<T>> {
        self.entries.back()
    }

    /// 移除早于 `max_age` 的记录。返回移除的数量。
    ///
    /// Removes entries older than `max_age`. Returns how many were removed.
    pub fn remove_older_than(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        // Entries are time-ordered, so expired ones form a prefix.
        while self
            .entries
            .front()
            .is_some_and(|entry| now.duration_since(entry.timestamp) > max_age)
        {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> EventBuffer<T> {
    /// Payloads of [`get_recent`](Self::get_recent), cloned.
    pub fn recent_payloads(&self, window: Duration) -> Vec<T> {
        self.get_recent(window)
            .map(|entry| entry.payload.clone())
            .collect()
    }

    pub fn payloads(&self) -> Vec<T> {
        self.entries.iter().map(|entry| entry.payload.clone()).collect()
    }
}

/// 线程安全的 [`EventBuffer`]，带可选的后台年龄清扫。
///
/// 缓冲区被丢弃时清扫任务随之停止。
///
/// A thread-safe [`EventBuffer`] with an optional background age sweep.
///
/// The sweep task stops when the buffer is dropped.
#[derive(Debug)]
pub struct SharedEventBuffer<T> {
    inner: Arc<Mutex<EventBuffer<T>>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> SharedEventBuffer<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBuffer::new(max_size))),
            sweeper: None,
        }
    }

    /// 创建一个每隔 `cleanup_interval` 丢弃早于 `max_age` 的记录的缓冲区。
    /// 必须在tokio运行时内调用。
    ///
    /// Creates a buffer that drops entries older than `max_age` every `cleanup_interval`.
    /// Must be called from within a tokio runtime.
    pub fn with_cleanup(max_size: usize, cleanup_interval: Duration, max_age: Duration) -> Self {
        Self::with_cleanup_hook(max_size, cleanup_interval, max_age, |_| {})
    }

    /// 与 [`with_cleanup`](Self::with_cleanup) 相同；每次清扫移除了记录后，会在持锁状态下
    /// 以剩余内容调用 `on_swept`。
    ///
    /// Like [`with_cleanup`](Self::with_cleanup); `on_swept` runs with the remaining
    /// contents, under the lock, after every sweep that removed something.
    pub fn with_cleanup_hook(
        max_size: usize,
        cleanup_interval: Duration,
        max_age: Duration,
        on_swept: impl Fn(&EventBuffer<T>) + Send + 'static,
    ) -> Self {
        let cleanup_interval = clamp_period("buffer cleanup interval", cleanup_interval);
        let inner = Arc::new(Mutex::new(EventBuffer::new(max_size)));
        let weak: Weak<Mutex<EventBuffer<T>>> = Arc::downgrade(&inner);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(buffer) = weak.upgrade() else {
                    break;
                };
                let mut buffer = buffer.lock();
                let removed = buffer.remove_older_than(max_age);
                if removed > 0 {
                    trace!(removed, "Swept expired buffer entries");
                    on_swept(&buffer);
                }
            }
        });
        Self {
            inner,
            sweeper: Some(sweeper),
        }
    }

    pub fn add(&self, payload: T) -> Option<T> {
        self.inner.lock().add(payload)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Runs `f` with exclusive access to the underlying buffer.
    pub fn with<R>(&self, f: impl FnOnce(&mut EventBuffer<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<T: Clone + Send + 'static> SharedEventBuffer<T> {
    pub fn recent(&self, window: Duration) -> Vec<T> {
        self.inner.lock().recent_payloads(window)
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().payloads()
    }
}

impl<T> Drop for SharedEventBuffer<T> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_evicts_oldest_first() {
        let mut buffer = EventBuffer::new(3);
        assert_eq!(buffer.add(1), None);
        assert_eq!(buffer.add(2), None);
        assert_eq!(buffer.add(3), None);
        assert_eq!(buffer.add(4), Some(1));
        assert_eq!(buffer.add(5), Some(2));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.payloads(), vec![3, 4, 5]);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let mut buffer = EventBuffer::new(10);
        for i in 0..1000 {
            buffer.add(i);
            assert!(buffer.len() <= buffer.max_size());
        }
        assert_eq!(buffer.latest().map(|e| e.payload), Some(999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_recent_filters_by_timestamp() {
        let mut buffer = EventBuffer::new(10);
        buffer.add("old");
        tokio::time::sleep(Duration::from_secs(5)).await;
        buffer.add("new");

        assert_eq!(buffer.recent_payloads(Duration::from_secs(1)), vec!["new"]);
        assert_eq!(
            buffer.recent_payloads(Duration::from_secs(10)),
            vec!["old", "new"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_older_than() {
        let mut buffer = EventBuffer::new(10);
        buffer.add(1);
        buffer.add(2);
        tokio::time::sleep(Duration::from_secs(3)).await;
        buffer.add(3);

        assert_eq!(buffer.remove_older_than(Duration::from_secs(2)), 2);
        assert_eq!(buffer.payloads(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep() {
        let buffer = SharedEventBuffer::with_cleanup(
            10,
            Duration::from_secs(1),
            Duration::from_millis(1500),
        );
        buffer.add("a");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        buffer.add("b");
        assert_eq!(buffer.len(), 2);

        // At t=2s the sweep sees "a" at 2s old and "b" at 0.9s old.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(buffer.snapshot(), vec!["b"]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cleanup_interval_is_clamped() {
        let buffer = SharedEventBuffer::with_cleanup(4, Duration::ZERO, Duration::from_millis(50));
        buffer.add(1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(buffer.is_empty());
    }
}
