use crate::{
    config::clamp_period, event::Event, listener::OwnerId, manager::ConnectionManager,
    subscription::Subscription,
};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};

/// How often [`LatestValue`] re-evaluates staleness on its own.
pub const STALE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// 一个值及其最后更新时间。两者总是在同一次更新中写入。
///
/// A value together with when it was last updated. Both are always written in
/// the same update.
#[derive(Debug, Clone, PartialEq)]
pub struct Latest<T> {
    pub value: Option<T>,
    pub last_updated: Option<Instant>,
    /// True once `last_updated` is older than the staleness threshold.
    /// A value that never arrived is not stale.
    pub is_stale: bool,
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_updated: None,
            is_stale: false,
        }
    }
}

/// `E` 的最新载荷；若 `stale_after` 内没有更新，即使不再有事件到来，也会被标记为过期。
///
/// The latest `E` payload, flagged stale when no update arrived for `stale_after`,
/// even if no further events come in.
pub struct LatestValue<E: Event> {
    rx: watch::Receiver<Latest<E::Payload>>,
    poller: JoinHandle<()>,
    _subscription: Subscription,
}

impl<E: Event> fmt::Debug for LatestValue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatestValue")
            .field("event", &E::KIND)
            .field("is_stale", &self.rx.borrow().is_stale)
            .finish()
    }
}

fn is_stale(last_updated: Option<Instant>, stale_after: Duration) -> bool {
    last_updated.is_some_and(|at| at.elapsed() > stale_after)
}

impl<E: Event> LatestValue<E> {
    pub fn new(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        stale_after: Duration,
    ) -> Self {
        Self::with_poll_interval(manager, owner, stale_after, STALE_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        manager: &ConnectionManager,
        owner: impl Into<OwnerId>,
        stale_after: Duration,
        poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(Latest::default());
        let tx = Arc::new(tx);

        let writer = tx.clone();
        let subscription = manager.on::<E>(owner, move |payload| {
            writer.send_modify(|latest| {
                latest.value = Some(payload.clone());
                latest.last_updated = Some(Instant::now());
                latest.is_stale = false;
            });
        });

        let weak = Arc::downgrade(&tx);
        drop(tx);
        let poll_interval = clamp_period("stale poll interval", poll_interval);
        let poller = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(tx) = weak.upgrade() else {
                    break;
                };
                tx.send_if_modified(|latest| {
                    let stale = is_stale(latest.last_updated, stale_after);
                    let changed = stale != latest.is_stale;
                    latest.is_stale = stale;
                    changed
                });
            }
        });

        Self {
            rx,
            poller,
            _subscription: subscription,
        }
    }

    pub fn get(&self) -> Latest<E::Payload> {
        self.rx.borrow().clone()
    }

    pub fn value(&self) -> Option<E::Payload> {
        self.rx.borrow().value.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.rx.borrow().is_stale
    }

    pub fn watch(&self) -> watch::Receiver<Latest<E::Payload>> {
        self.rx.clone()
    }
}

impl<E: Event> Drop for LatestValue<E> {
    fn drop(&mut self) {
        self.poller.abort();
    }
}
