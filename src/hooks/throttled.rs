use crate::{
    event::Event, listener::OwnerId, manager::ConnectionManager, subscription::Subscription,
    throttle::throttle_frame,
};
use std::fmt;
use tokio::sync::watch;

/// `E` 的最新载荷，每个显示帧最多更新一次。
///
/// The latest payload of `E`, updated at most once per display frame.
pub struct ThrottledValue<E: Event> {
    rx: watch::Receiver<Option<E::Payload>>,
    _subscription: Subscription,
}

impl<E: Event> fmt::Debug for ThrottledValue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledValue")
            .field("event", &E::KIND)
            .finish()
    }
}

impl<E: Event> ThrottledValue<E> {
    pub fn new(manager: &ConnectionManager, owner: impl Into<OwnerId>) -> Self {
        let (tx, rx) = watch::channel(None);
        let publish = throttle_frame(move |payload: E::Payload| {
            tx.send_replace(Some(payload));
        });
        let subscription = manager.on::<E>(owner, move |payload| publish.call(payload.clone()));
        Self {
            rx,
            _subscription: subscription,
        }
    }

    pub fn get(&self) -> Option<E::Payload> {
        self.rx.borrow().clone()
    }

    /// A receiver notified once per published frame.
    pub fn watch(&self) -> watch::Receiver<Option<E::Payload>> {
        self.rx.clone()
    }
}
