use crate::{
    event::Event, listener::OwnerId, manager::ConnectionManager, subscription::Subscription,
    throttle::BatchProcessor,
};
use std::{fmt, time::Duration};

/// 按数量或最长等待时间将 `E` 载荷分批交给 `processor`。钩子被丢弃时刷新仍挂起的条目。
///
/// Hands `E` payloads to `processor` in batches, by size or by maximum wait.
/// Whatever is still pending is flushed when the hook is dropped.
pub struct Batched<E: Event> {
    subscription: Option<Subscription>,
    batch: BatchProcessor<E::Payload>,
}

impl<E: Event> fmt::Debug for Batched<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batched")
            .field("event", &E::KIND)
            .field("pending", &self.batch.pending())
            .finish()
    }
}

impl<E: Event> Batched<E> {
    pub fn new(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        batch_size: usize,
        max_wait: Duration,
        processor: impl Fn(Vec<E::Payload>) + Send + Sync + 'static,
    ) -> Self {
        let batch = BatchProcessor::new(processor, batch_size, max_wait);
        let sink = batch.clone();
        let subscription = manager.on::<E>(owner, move |payload| sink.add(payload.clone()));
        Self {
            subscription: Some(subscription),
            batch,
        }
    }

    pub fn pending(&self) -> usize {
        self.batch.pending()
    }

    pub fn flush(&self) {
        self.batch.flush();
    }
}

impl<E: Event> Drop for Batched<E> {
    fn drop(&mut self) {
        // Stop intake before the final flush.
        drop(self.subscription.take());
        self.batch.flush();
    }
}
