use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};

/// 防抖后的函数。丢弃它会取消任何挂起的调用。
///
/// A debounced function. Dropping it discards any pending invocation.
#[derive(Debug)]
pub struct Debounced<T> {
    tx: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

/// 返回一个包装器：当 `delay` 时间内没有新值到达时，用最新值调用 `f`。每次调用都会
/// 重新设置唯一的定时器。
///
/// Returns a wrapper that calls `f` with the latest value once no new value has
/// arrived for `delay`. Every call re-arms the single timer.
pub fn debounce<T, F>(f: F, delay: Duration) -> Debounced<T>
where
    T: Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<T>();
    let task = tokio::spawn(async move {
        loop {
            let Some(mut latest) = rx.recv().await else {
                return;
            };
            loop {
                tokio::select! {
                    next = rx.recv() => match next {
                        Some(value) => latest = value,
                        None => return,
                    },
                    _ = tokio::time::sleep(delay) => {
                        f(latest);
                        break;
                    }
                }
            }
        }
    });
    Debounced { tx, task }
}

impl<T> Debounced<T> {
    pub fn call(&self, value: T) {
        // The task only stops when we are dropped.
        let _ = self.tx.send(value);
    }
}

impl<T> Drop for Debounced<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
