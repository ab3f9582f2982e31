use parking_lot::Mutex;
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::task::JoinHandle;

/// One display frame at 60 Hz.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

struct FrameState<T> {
    pending: Option<T>,
    scheduled: Option<JoinHandle<()>>,
}

struct FrameInner<T> {
    f: Box<dyn Fn(T) + Send + Sync>,
    frame: Duration,
    state: Mutex<FrameState<T>>,
}

/// 按帧节流的函数。克隆共享同一帧。
///
/// A frame-throttled function. Clones share one frame.
pub struct FrameThrottled<T> {
    inner: Arc<FrameInner<T>>,
}

impl<T> Clone for FrameThrottled<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for FrameThrottled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameThrottled")
            .field("frame", &self.inner.frame)
            .finish()
    }
}

/// 将一个 [`FRAME_INTERVAL`] 内的所有调用合并为帧结束时以最新值对 `f` 的一次调用。
///
/// Coalesces every call made within one [`FRAME_INTERVAL`] into a single call of
/// `f` with the latest value, at the end of the frame.
pub fn throttle_frame<T, F>(f: F) -> FrameThrottled<T>
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    throttle_frame_with(f, FRAME_INTERVAL)
}

/// [`throttle_frame`] with a custom frame length.
pub fn throttle_frame_with<T, F>(f: F, frame: Duration) -> FrameThrottled<T>
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    FrameThrottled {
        inner: Arc::new(FrameInner {
            f: Box::new(f),
            frame,
            state: Mutex::new(FrameState {
                pending: None,
                scheduled: None,
            }),
        }),
    }
}

impl<T: Send + 'static> FrameThrottled<T> {
    pub fn call(&self, value: T) {
        let mut state = self.inner.state.lock();
        state.pending = Some(value);
        if state.scheduled.is_none() {
            let weak = Arc::downgrade(&self.inner);
            let frame = self.inner.frame;
            state.scheduled = Some(tokio::spawn(async move {
                tokio::time::sleep(frame).await;
                fire_frame(&weak);
            }));
        }
    }
}

fn fire_frame<T>(weak: &Weak<FrameInner<T>>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let value = {
        let mut state = inner.state.lock();
        state.scheduled = None;
        state.pending.take()
    };
    if let Some(value) = value {
        (inner.f)(value);
    }
}

impl<T> Drop for FrameInner<T> {
    fn drop(&mut self) {
        if let Some(scheduled) = self.state.get_mut().scheduled.take() {
            scheduled.abort();
        }
    }
}
