use parking_lot::Mutex;
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};

struct ThrottleState<T> {
    /// End of the current window, if one is open.
    window_until: Option<Instant>,
    trailing: Option<T>,
    timer: Option<JoinHandle<()>>,
}

struct ThrottleInner<T> {
    f: Box<dyn Fn(T) + Send + Sync>,
    limit: Duration,
    state: Mutex<ThrottleState<T>>,
}

/// 节流后的函数。克隆共享同一个时间窗口。
///
/// A throttled function. Clones share one window.
pub struct Throttled<T> {
    inner: Arc<ThrottleInner<T>>,
}

impl<T> Clone for Throttled<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Throttled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttled")
            .field("limit", &self.inner.limit)
            .finish()
    }
}

/// 返回一个包装器：第一次调用立即执行 `f`，之后每个 `limit` 最多执行一次。窗口内的
/// 调用不会丢失：最新的一次会在窗口关闭时执行，并开启下一个窗口。
///
/// Returns a wrapper that calls `f` immediately on the first call, then at most
/// once per `limit`. Calls made inside a window are not lost: the latest one fires
/// when the window closes, opening the next window.
pub fn throttle<T, F>(f: F, limit: Duration) -> Throttled<T>
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    Throttled {
        inner: Arc::new(ThrottleInner {
            f: Box::new(f),
            limit,
            state: Mutex::new(ThrottleState {
                window_until: None,
                trailing: None,
                timer: None,
            }),
        }),
    }
}

impl<T: Send + 'static> Throttled<T> {
    pub fn call(&self, value: T) {
        let now = Instant::now();
        let mut state = self.inner.state.lock();

        let window_open = state.window_until.is_some_and(|until| now < until);
        if !window_open && state.timer.is_none() {
            state.window_until = Some(now + self.inner.limit);
            drop(state);
            (self.inner.f)(value);
            return;
        }

        state.trailing = Some(value);
        if state.timer.is_none() {
            let until = state.window_until.unwrap_or(now + self.inner.limit);
            let weak = Arc::downgrade(&self.inner);
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep_until(until).await;
                fire_trailing(&weak);
            }));
        }
    }

    /// True while a trailing call is waiting for the window to close.
    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().trailing.is_some()
    }
}

fn fire_trailing<T>(weak: &Weak<ThrottleInner<T>>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let value = {
        let mut state = inner.state.lock();
        state.timer = None;
        let value = state.trailing.take();
        if value.is_some() {
            state.window_until = Some(Instant::now() + inner.limit);
        }
        value
    };
    if let Some(value) = value {
        (inner.f)(value);
    }
}

impl<T> Drop for ThrottleInner<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}
