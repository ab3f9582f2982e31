//! 内存有界的事件处理器注册表。
//!
//! 每个处理器代表一个所有者注册到一个 [`EventKind`] 上。注册表通过淘汰最旧的注册来
//! 强制每个事件的上限，清扫存活超过 `max_age` 的被遗弃注册，并且在所有者销毁时一次性
//! 移除该所有者持有的全部注册。没有存活 [`ListenerLease`] 的注册即为被遗弃。
//!
//! Memory-bounded registry of event handlers.
//!
//! Every handler is registered for one [`EventKind`] on behalf of an owner. The
//! registry enforces a per-event cap by evicting the oldest registration, sweeps
//! abandoned registrations that outlive `max_age`, and can drop everything an owner
//! holds in one pass when that owner is torn down. A registration is abandoned once
//! no [`ListenerLease`] for it is alive.

use crate::{
    config::ListenerConfig,
    event::{EventKind, InboundEvent},
};
use dashmap::DashMap;
use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// A type-erased inbound handler.
pub type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// 标识一次注册。在注册表生命周期内唯一。
///
/// Identifies one registration. Unique for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// 注册所属的组件。
///
/// The component a registration belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(Arc<str>);

impl OwnerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 持有期间使对应注册免于年龄清扫。丢弃租约不会移除注册，只会让它可以被清扫。
///
/// Keeps its registration out of the age sweep while held. Dropping the lease does
/// not remove the registration; it only makes it sweepable.
#[derive(Debug)]
pub struct ListenerLease {
    _held: Arc<()>,
}

/// 为某个事件注册的一个处理器。
///
/// One handler registered for one event.
#[derive(Clone)]
pub struct ListenerRegistration {
    pub id: ListenerId,
    pub event: EventKind,
    pub owner: OwnerId,
    pub registered_at: Instant,
    handler: Handler,
    lease: Option<Weak<()>>,
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("owner", &self.owner)
            .field("registered_at", &self.registered_at)
            .field("leased", &self.is_leased())
            .finish()
    }
}

impl ListenerRegistration {
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// True while a [`ListenerLease`] for this registration is alive.
    pub fn is_leased(&self) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| lease.strong_count() > 0)
    }
}

/// [`ListenerMemoryManager::health`] 的结果。仅作报告，不会淘汰任何注册。
///
/// The result of [`ListenerMemoryManager::health`]. Reporting only; nothing is evicted.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerHealth {
    pub healthy: bool,
    pub total: usize,
    pub oldest_age: Option<Duration>,
    /// 数量超过其上限两倍的事件。
    /// Events whose count exceeds twice their cap.
    pub crowded_events: Vec<(EventKind, usize)>,
    pub warnings: Vec<String>,
}

/// 按（事件，所有者）跟踪处理器注册。
///
/// Tracks handler registrations per (event, owner).
pub struct ListenerMemoryManager {
    listeners: DashMap<EventKind, VecDeque<ListenerRegistration>>,
    caps: DashMap<EventKind, usize>,
    next_id: AtomicU64,
    config: ListenerConfig,
}

impl fmt::Debug for ListenerMemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerMemoryManager")
            .field("total", &self.total_listeners())
            .field("config", &self.config)
            .finish()
    }
}

impl ListenerMemoryManager {
    pub fn new(config: ListenerConfig) -> Self {
        let caps = config
            .per_event_caps
            .iter()
            .map(|(event, cap)| (*event, *cap))
            .collect();
        Self {
            listeners: DashMap::new(),
            caps,
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// The cap currently applied to `event`.
    pub fn cap_for(&self, event: EventKind) -> usize {
        self.caps
            .get(&event)
            .map(|cap| *cap)
            .unwrap_or(self.config.max_per_event)
    }

    /// 修改 `event` 的上限。已有注册保持不变，直到该事件下一次注册时才会淘汰。
    ///
    /// Changes the cap for `event`. Existing registrations are left alone until the
    /// next registration for that event.
    pub fn set_event_cap(&self, event: EventKind, cap: usize) {
        self.caps.insert(event, cap);
    }

    /// 追加一个注册。如果该事件的注册数超过上限，则先淘汰该事件最旧的注册。
    /// 注册不带租约，存活超过 `max_age` 后会被清扫。
    ///
    /// Appends a registration. If the event now holds more than its cap, the oldest
    /// registrations for that event are evicted first. The registration carries no
    /// lease and is swept once it outlives `max_age`.
    pub fn register_listener(
        &self,
        event: EventKind,
        owner: OwnerId,
        handler: Handler,
    ) -> ListenerId {
        self.insert(event, owner, handler, None)
    }

    /// 与 [`register_listener`](Self::register_listener) 相同，但只要返回的租约仍被
    /// 持有，年龄清扫就不会移除该注册。
    ///
    /// Like [`register_listener`](Self::register_listener), but the age sweep leaves
    /// the registration alone for as long as the returned lease is held.
    pub fn register_leased(
        &self,
        event: EventKind,
        owner: OwnerId,
        handler: Handler,
    ) -> (ListenerId, ListenerLease) {
        let lease = Arc::new(());
        let id = self.insert(event, owner, handler, Some(Arc::downgrade(&lease)));
        (id, ListenerLease { _held: lease })
    }

    fn insert(
        &self,
        event: EventKind,
        owner: OwnerId,
        handler: Handler,
        lease: Option<Weak<()>>,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cap = self.cap_for(event).max(1);

        let mut registrations = self.listeners.entry(event).or_default();
        registrations.push_back(ListenerRegistration {
            id,
            event,
            owner: owner.clone(),
            registered_at: Instant::now(),
            handler,
            lease,
        });

        while registrations.len() > cap {
            if let Some(evicted) = registrations.pop_front() {
                warn!(
                    %event,
                    cap,
                    evicted_owner = %evicted.owner,
                    evicted_id = evicted.id.0,
                    "Listener cap exceeded, evicting oldest registration"
                );
            }
        }

        debug!(%event, %owner, id = id.0, count = registrations.len(), "Listener registered");
        id
    }

    /// 移除一个注册；当 `id` 为 `None` 时移除 `event` 的全部注册。返回移除的数量。
    ///
    /// Removes one registration, or every registration for `event` when `id` is `None`.
    /// Returns how many were removed.
    pub fn unregister_listener(&self, event: EventKind, id: Option<ListenerId>) -> usize {
        let removed = match id {
            None => self
                .listeners
                .remove(&event)
                .map(|(_, registrations)| registrations.len())
                .unwrap_or(0),
            Some(id) => {
                let removed = match self.listeners.get_mut(&event) {
                    Some(mut registrations) => {
                        let before = registrations.len();
                        registrations.retain(|r| r.id != id);
                        before - registrations.len()
                    }
                    None => 0,
                };
                self.listeners.remove_if(&event, |_, r| r.is_empty());
                removed
            }
        };
        if removed > 0 {
            debug!(%event, removed, "Listeners unregistered");
        }
        removed
    }

    /// 一次性移除 `owner` 在所有事件上持有的全部注册。
    ///
    /// Removes every registration held by `owner`, across all events, in one pass.
    pub fn unregister_owner(&self, owner: &OwnerId) -> usize {
        let mut removed = 0;
        self.listeners.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|r| r.owner != *owner);
            removed += before - registrations.len();
            !registrations.is_empty()
        });
        if removed > 0 {
            debug!(%owner, removed, "Owner listeners unregistered");
        }
        removed
    }

    /// 移除早于 `max_age` 且没有存活租约的注册，与上限无关。
    ///
    /// Removes unleased registrations older than `max_age`, regardless of caps.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let max_age = self.config.max_age;
        let mut removed = 0;
        self.listeners.retain(|event, registrations| {
            let before = registrations.len();
            registrations
                .retain(|r| r.is_leased() || now.duration_since(r.registered_at) <= max_age);
            let swept = before - registrations.len();
            if swept > 0 {
                debug!(%event, swept, "Swept expired listeners");
            }
            removed += swept;
            !registrations.is_empty()
        });
        removed
    }

    /// 按注册顺序返回 `event` 的处理器。
    ///
    /// 快照在任何处理器运行之前获取，因此处理器在分发期间可以自由注册或注销。
    ///
    /// Handlers for `event` in registration order.
    ///
    /// The snapshot is taken before any handler runs, so handlers may register or
    /// unregister freely while being dispatched.
    pub fn handlers_for(&self, event: EventKind) -> Vec<(ListenerId, OwnerId, Handler)> {
        self.listeners
            .get(&event)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|r| (r.id, r.owner.clone(), r.handler.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn registrations(&self, event: EventKind) -> Vec<ListenerRegistration> {
        self.listeners
            .get(&event)
            .map(|registrations| registrations.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, event: EventKind, id: ListenerId) -> bool {
        self.listeners
            .get(&event)
            .is_some_and(|registrations| registrations.iter().any(|r| r.id == id))
    }

    pub fn listener_count(&self, event: EventKind) -> usize {
        self.listeners.get(&event).map(|r| r.len()).unwrap_or(0)
    }

    pub fn owner_count(&self, owner: &OwnerId) -> usize {
        self.listeners
            .iter()
            .map(|entry| entry.value().iter().filter(|r| r.owner == *owner).count())
            .sum()
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }

    /// 报告总数、单事件数量或最旧无租约注册的年龄是否超过配置限制的两倍。
    ///
    /// Reports whether totals, per-event counts or the oldest unleased registration
    /// exceed twice their configured limits.
    pub fn health(&self) -> ListenerHealth {
        let now = Instant::now();
        let mut total = 0;
        let mut oldest: Option<Instant> = None;
        let mut crowded_events = Vec::new();

        for entry in self.listeners.iter() {
            let count = entry.value().len();
            total += count;
            if count > self.cap_for(*entry.key()).saturating_mul(2) {
                crowded_events.push((*entry.key(), count));
            }
            if let Some(first) = entry
                .value()
                .iter()
                .filter(|r| !r.is_leased())
                .map(|r| r.registered_at)
                .min()
            {
                oldest = Some(oldest.map_or(first, |o| o.min(first)));
            }
        }
        crowded_events.sort();

        let oldest_age = oldest.map(|o| now.duration_since(o));
        let mut warnings = Vec::new();
        if total > self.config.max_total.saturating_mul(2) {
            warnings.push(format!("{total} listeners registered"));
        }
        for (event, count) in &crowded_events {
            warnings.push(format!("{count} listeners on `{event}`"));
        }
        if let Some(age) = oldest_age
            && age > self.config.max_age.saturating_mul(2)
        {
            warnings.push(format!("oldest listener is {}s old", age.as_secs()));
        }

        ListenerHealth {
            healthy: warnings.is_empty(),
            total,
            oldest_age,
            crowded_events,
            warnings,
        }
    }
}
