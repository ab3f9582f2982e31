use crate::{
    event::Event, listener::OwnerId, manager::ConnectionManager, subscription::Subscription,
    throttle::BatchProcessor,
};
use std::{fmt, time::Duration};
use tokio::sync::watch;

/// Default collection window for [`Aggregated`].
pub const AGGREGATE_WINDOW: Duration = Duration::from_millis(100);

/// 在短窗口内收集 `E` 载荷，每个窗口归约一次。
///
/// Collects `E` payloads for a short window and reduces each window once.
pub struct Aggregated<E: Event, R> {
    rx: watch::Receiver<Option<R>>,
    _subscription: Subscription,
    _batch: BatchProcessor<E::Payload>,
}

impl<E: Event, R> fmt::Debug for Aggregated<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregated")
            .field("event", &E::KIND)
            .finish()
    }
}

impl<E, R> Aggregated<E, R>
where
    E: Event,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        reduce: impl Fn(&[E::Payload]) -> R + Send + Sync + 'static,
    ) -> Self {
        Self::with_window(manager, owner, AGGREGATE_WINDOW, reduce)
    }

    pub fn with_window(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        window: Duration,
        reduce: impl Fn(&[E::Payload]) -> R + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        // Only the window closes a batch.
        let batch = BatchProcessor::new(
            move |items: Vec<E::Payload>| {
                tx.send_replace(Some(reduce(items.as_slice())));
            },
            usize::MAX,
            window,
        );
        let sink = batch.clone();
        let subscription = manager.on::<E>(owner, move |payload| sink.add(payload.clone()));
        Self {
            rx,
            _subscription: subscription,
            _batch: batch,
        }
    }

    /// The result of the most recently closed window.
    pub fn get(&self) -> Option<R> {
        self.rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<R>> {
        self.rx.clone()
    }
}
