//! 恰好释放一次的作用域注册。
//!
//! Scoped registrations that release themselves exactly once.

use crate::listener::{ListenerId, ListenerLease};
use std::fmt;

type Disposer = Box<dyn FnOnce() + Send + Sync>;

/// 在调用 [`unsubscribe`](Self::unsubscribe) 或值被丢弃时（以先发生者为准）释放的注册。
///
/// A registration that is released when [`unsubscribe`](Self::unsubscribe) is called
/// or when the value is dropped, whichever happens first.
#[must_use = "dropping a Subscription releases the registration immediately"]
pub struct Subscription {
    id: Option<ListenerId>,
    _lease: Option<ListenerLease>,
    disposer: Option<Disposer>,
}

impl Subscription {
    pub(crate) fn new(disposer: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id: None,
            _lease: None,
            disposer: Some(Box::new(disposer)),
        }
    }

    /// Holds `lease` so the registration survives the age sweep while this value lives.
    pub(crate) fn for_listener(
        id: ListenerId,
        lease: ListenerLease,
        disposer: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: Some(id),
            _lease: Some(lease),
            disposer: Some(Box::new(disposer)),
        }
    }

    /// The listener registration behind this subscription, if any.
    pub fn listener_id(&self) -> Option<ListenerId> {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.disposer.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// 放弃释放器而不运行它，同时释放租约。此后注册一直存在，直到通过注册表（按事件、
    /// 按所有者或按年龄清扫）移除。
    ///
    /// Gives up the disposer without running it and releases the lease. The
    /// registration then lives until it is removed through the registry (by event, by
    /// owner, or by the age sweep).
    pub fn detach(mut self) {
        self.disposer = None;
        self._lease = None;
    }

    fn release(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn counted() -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_unsubscribe_runs_once() {
        let (count, sub) = counted();
        assert!(sub.is_active());
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_runs_once() {
        let (count, sub) = counted();
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_skips_disposer() {
        let (count, sub) = counted();
        sub.detach();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
