use crate::{
    event::Event,
    listener::{ListenerId, OwnerId},
    manager::ConnectionManager,
    subscription::Subscription,
};
use parking_lot::RwLock;
use std::{fmt, marker::PhantomData, sync::Arc};

type PayloadHandler<E> = Arc<dyn Fn(&<E as Event>::Payload) + Send + Sync>;

/// 可在不重新注册的情况下替换回调的处理器订阅，因此注册保持其标识及其在分发顺序中
/// 的位置。
///
/// A handler subscription whose callback can be swapped without re-registering,
/// so the registration keeps its identity and its place in dispatch order.
pub struct Subscriber<E: Event> {
    handler: Arc<RwLock<PayloadHandler<E>>>,
    subscription: Subscription,
    _event: PhantomData<E>,
}

impl<E: Event> fmt::Debug for Subscriber<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("event", &E::KIND)
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl<E: Event> Subscriber<E> {
    pub fn new(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        handler: impl Fn(&E::Payload) + Send + Sync + 'static,
    ) -> Self {
        let initial: PayloadHandler<E> = Arc::new(handler);
        let handler = Arc::new(RwLock::new(initial));
        let current = handler.clone();
        let subscription = manager.on::<E>(owner, move |payload| {
            let handler = current.read().clone();
            handler(payload);
        });
        Self {
            handler,
            subscription,
            _event: PhantomData,
        }
    }

    /// 为后续事件安装新的回调。
    ///
    /// Installs a new callback for subsequent events.
    pub fn replace_handler(&self, handler: impl Fn(&E::Payload) + Send + Sync + 'static) {
        let handler: PayloadHandler<E> = Arc::new(handler);
        *self.handler.write() = handler;
    }

    pub fn listener_id(&self) -> Option<ListenerId> {
        self.subscription.listener_id()
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}
