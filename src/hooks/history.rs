use crate::{
    buffer::SharedEventBuffer, event::Event, listener::OwnerId, manager::ConnectionManager,
    subscription::Subscription, throttle::throttle_frame,
};
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::watch;

/// `E` 载荷的有界历史。
///
/// 每个事件都会立即追加到缓冲区；发布的快照每个显示帧最多刷新一次，年龄清扫丢弃记录时
/// 也会刷新。
///
/// A bounded history of `E` payloads.
///
/// Every event is appended to the buffer immediately; the published snapshot is
/// refreshed at most once per display frame, and again whenever the age sweep
/// drops entries.
pub struct EventHistory<E: Event> {
    buffer: Arc<SharedEventBuffer<E::Payload>>,
    rx: watch::Receiver<Vec<E::Payload>>,
    _subscription: Subscription,
}

impl<E: Event> fmt::Debug for EventHistory<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHistory")
            .field("event", &E::KIND)
            .field("len", &self.buffer.len())
            .finish()
    }
}

impl<E: Event> EventHistory<E> {
    pub fn new(manager: &ConnectionManager, owner: impl Into<OwnerId>, max_size: usize) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        Self::with_buffer(manager, owner, SharedEventBuffer::new(max_size), Arc::new(tx), rx)
    }

    /// 与 [`new`](Self::new) 相同，另外会丢弃早于 `max_age` 的记录。
    ///
    /// Like [`new`](Self::new), additionally dropping entries older than `max_age`.
    pub fn with_max_age(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        max_size: usize,
        max_age: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        let tx = Arc::new(tx);
        let swept = tx.clone();
        let buffer = SharedEventBuffer::with_cleanup_hook(max_size, max_age, max_age, move |b| {
            swept.send_replace(b.payloads());
        });
        Self::with_buffer(manager, owner, buffer, tx, rx)
    }

    fn with_buffer(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        buffer: SharedEventBuffer<E::Payload>,
        tx: Arc<watch::Sender<Vec<E::Payload>>>,
        rx: watch::Receiver<Vec<E::Payload>>,
    ) -> Self {
        let buffer = Arc::new(buffer);

        let weak = Arc::downgrade(&buffer);
        let publish = throttle_frame(move |()| {
            if let Some(buffer) = weak.upgrade() {
                tx.send_replace(buffer.snapshot());
            }
        });
        let sink = buffer.clone();
        let subscription = manager.on::<E>(owner, move |payload| {
            sink.add(payload.clone());
            publish.call(());
        });

        Self {
            buffer,
            rx,
            _subscription: subscription,
        }
    }

    /// The last published snapshot, oldest first.
    pub fn events(&self) -> Vec<E::Payload> {
        self.rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<E::Payload>> {
        self.rx.clone()
    }

    /// 直接从缓冲区读取的 `window` 内收到的载荷。
    ///
    /// Payloads received within `window`, read straight from the buffer.
    pub fn recent(&self, window: Duration) -> Vec<E::Payload> {
        self.buffer.recent(window)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&self) {
        self.buffer.clear();
    }
}
