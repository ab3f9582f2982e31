use crate::{
    event::Event, listener::OwnerId, manager::ConnectionManager, subscription::Subscription,
};
use parking_lot::Mutex;
use std::{fmt, marker::PhantomData, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::trace;

type Slot = Arc<Mutex<Option<Subscription>>>;

/// 仅当 `enabled` 为 `true` 时保持处理器处于注册状态。投递时同样检查该标志，
/// 一旦读到 `false` 就不再调用处理器。
///
/// Keeps a handler registered only while `enabled` reads `true`. Delivery also
/// checks the flag, so nothing reaches the handler once it reads `false`.
pub struct Conditional<E: Event> {
    slot: Slot,
    watcher: JoinHandle<()>,
    _event: PhantomData<E>,
}

impl<E: Event> fmt::Debug for Conditional<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditional")
            .field("event", &E::KIND)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<E: Event> Conditional<E> {
    pub fn new(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        mut enabled: watch::Receiver<bool>,
        handler: impl Fn(&E::Payload) + Send + Sync + 'static,
    ) -> Self {
        let handler = Arc::new(handler);
        let owner = owner.into();
        let slot: Slot = Arc::new(Mutex::new(None));

        let apply = {
            let manager = manager.clone();
            let slot = slot.clone();
            let gate = enabled.clone();
            move |on: bool| {
                let mut current = slot.lock();
                match (on, current.is_some()) {
                    (true, false) => {
                        let handler = handler.clone();
                        let gate = gate.clone();
                        *current = Some(manager.on::<E>(owner.clone(), move |payload| {
                            if *gate.borrow() {
                                handler(payload);
                            }
                        }));
                        trace!(event = %E::KIND, "Conditional subscription enabled");
                    }
                    (false, true) => {
                        *current = None;
                        trace!(event = %E::KIND, "Conditional subscription disabled");
                    }
                    _ => {}
                }
            }
        };

        apply(*enabled.borrow_and_update());
        let watcher = tokio::spawn(async move {
            while enabled.changed().await.is_ok() {
                apply(*enabled.borrow_and_update());
            }
            // The condition source is gone.
            apply(false);
        });

        Self {
            slot,
            watcher,
            _event: PhantomData,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<E: Event> Drop for Conditional<E> {
    fn drop(&mut self) {
        self.watcher.abort();
        self.slot.lock().take();
    }
}
