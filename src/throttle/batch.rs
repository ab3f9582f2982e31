use parking_lot::Mutex;
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::trace;

struct BatchState<T> {
    items: Vec<T>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every flush so a timer from an earlier batch never flushes a later one.
    generation: u64,
}

struct BatchInner<T> {
    processor: Box<dyn Fn(Vec<T>) + Send + Sync>,
    batch_size: usize,
    max_wait: Duration,
    state: Mutex<BatchState<T>>,
}

/// 将条目分组，当等待的条目达到 `batch_size` 或距第一个未刷新条目已过 `max_wait`
/// 时（以先到者为准）交给处理器。克隆共享同一批次。
///
/// Groups items and hands them to a processor when `batch_size` items are
/// waiting or `max_wait` has elapsed since the first unflushed item, whichever
/// comes first. Clones share one batch.
pub struct BatchProcessor<T> {
    inner: Arc<BatchInner<T>>,
}

impl<T> Clone for BatchProcessor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for BatchProcessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("batch_size", &self.inner.batch_size)
            .field("max_wait", &self.inner.max_wait)
            .finish()
    }
}

impl<T: Send + 'static> BatchProcessor<T> {
    /// A `batch_size` of zero is treated as one.
    pub fn new<F>(processor: F, batch_size: usize, max_wait: Duration) -> Self
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(BatchInner {
                processor: Box::new(processor),
                batch_size: batch_size.max(1),
                max_wait,
                state: Mutex::new(BatchState {
                    items: Vec::new(),
                    timer: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn add(&self, item: T) {
        let mut state = self.inner.state.lock();
        state.items.push(item);

        if state.items.len() >= self.inner.batch_size {
            let batch = take_batch(&mut state);
            drop(state);
            trace!(size = batch.len(), "Flushing full batch");
            (self.inner.processor)(batch);
            return;
        }

        if state.timer.is_none() {
            let generation = state.generation;
            let weak = Arc::downgrade(&self.inner);
            let max_wait = self.inner.max_wait;
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(max_wait).await;
                flush_expired(&weak, generation);
            }));
        }
    }

    /// 立即将所有等待中的条目交给处理器。
    ///
    /// Hands whatever is waiting to the processor now.
    pub fn flush(&self) {
        let batch = take_batch(&mut self.inner.state.lock());
        if !batch.is_empty() {
            (self.inner.processor)(batch);
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().items.len()
    }
}

fn take_batch<T>(state: &mut BatchState<T>) -> Vec<T> {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
    state.generation += 1;
    std::mem::take(&mut state.items)
}

fn flush_expired<T>(weak: &Weak<BatchInner<T>>, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let batch = {
        let mut state = inner.state.lock();
        if state.generation != generation {
            return;
        }
        // The timer is the running task; detach it before taking the batch.
        state.timer = None;
        take_batch(&mut state)
    };
    if !batch.is_empty() {
        trace!(size = batch.len(), "Flushing batch after max wait");
        (inner.processor)(batch);
    }
}

impl<T> Drop for BatchInner<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}
