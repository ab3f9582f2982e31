//! The process-wide realtime connection.
//!
//! A [`ConnectionManager`] is a cheap, cloneable handle to a single actor task that
//! owns the transport session, the state machine, and all timers: the connect
//! timeout, the reconnect timer and the heartbeat pair. Handles talk to the actor
//! over a command channel; state is published back through a `watch` channel so it
//! can be read synchronously.
//!
//! 进程级的实时连接。
//!
//! [`ConnectionManager`] 是一个轻量、可克隆的句柄，指向唯一一个actor任务。该任务拥有
//! 传输会话、状态机以及所有定时器：连接超时、重连定时器和心跳定时器对。句柄通过命令
//! 通道与actor通信；状态通过 `watch` 通道发布回来，因此可以同步读取。

mod actor;
mod backoff;
mod command;
mod heartbeat;
mod state;

pub use state::ConnectionState;

use crate::{
    auth::AuthToken,
    classify::ClassifiedError,
    config::Config,
    error::{Error, Result},
    event::{Event, EventKind, HardwareCommand, InboundEvent, OutboundCommand},
    listener::{Handler, ListenerId, ListenerMemoryManager, OwnerId},
    logger::ConnectionLogger,
    subscription::Subscription,
    transport::{Transport, TransportMode},
};
use actor::ConnectionActor;
use command::ManagerCommand;
use dashmap::DashMap;
use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, watch};

/// What consumers can observe about the connection at one instant.
///
/// 使用方在某一时刻能观察到的连接信息。
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub last_error: Option<ClassifiedError>,
    /// Automatic reconnect attempts made since the last successful connect.
    /// 自上次成功连接以来的自动重连尝试次数。
    pub reconnect_attempt: u32,
    /// Round trip of the last answered heartbeat on the current session.
    /// 当前会话上最近一次得到应答的心跳往返时间。
    pub latency: Option<Duration>,
    pub transport: Option<TransportMode>,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
            reconnect_attempt: 0,
            latency: None,
            transport: None,
        }
    }
}

impl ConnectionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Which timers are armed inside the actor.
///
/// actor内部哪些定时器处于激活状态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmedTimers {
    pub connect_timeout: bool,
    pub reconnect: bool,
    pub heartbeat_interval: bool,
    pub heartbeat_timeout: bool,
}

impl ArmedTimers {
    pub fn any(&self) -> bool {
        self.connect_timeout || self.reconnect || self.heartbeat_interval || self.heartbeat_timeout
    }
}

/// Rooms requested by the application and rooms the server confirmed.
///
/// 应用请求的房间与服务器确认的房间。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomMembership {
    pub requested: BTreeSet<String>,
    pub joined: BTreeSet<String>,
}

pub(crate) type StateCallback = Arc<dyn Fn(&ConnectionSnapshot) + Send + Sync>;

/// Keyed state callbacks. The `u64` distinguishes successive registrations under
/// the same key so a stale disposer cannot remove its replacement.
pub(crate) type StateCallbacks = DashMap<String, (u64, StateCallback)>;

struct Shared {
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
    snapshot_rx: watch::Receiver<ConnectionSnapshot>,
    listeners: Arc<ListenerMemoryManager>,
    state_callbacks: Arc<StateCallbacks>,
    next_callback: AtomicU64,
    logger: ConnectionLogger,
    config: Config,
}

/// Handle to the connection actor. Clones share the same connection.
///
/// 连接actor的句柄。克隆出的句柄共享同一个连接。
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("snapshot", &*self.shared.snapshot_rx.borrow())
            .finish()
    }
}

impl ConnectionManager {
    /// Spawns the connection actor. Must be called from within a tokio runtime.
    /// The actor stops once every handle has been dropped.
    ///
    /// 启动连接actor。必须在tokio运行时内调用。所有句柄被丢弃后actor停止。
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self::with_logger(config, transport, ConnectionLogger::new())
    }

    pub fn with_logger(
        config: Config,
        transport: Arc<dyn Transport>,
        logger: ConnectionLogger,
    ) -> Self {
        let config = config.sanitized();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::default());
        let listeners = Arc::new(ListenerMemoryManager::new(config.listeners.clone()));
        let state_callbacks = Arc::new(StateCallbacks::new());

        let actor = ConnectionActor::new(
            config.clone(),
            transport,
            command_rx,
            snapshot_tx,
            listeners.clone(),
            state_callbacks.clone(),
            logger.clone(),
        );
        tokio::spawn(actor.run());

        Self {
            shared: Arc::new(Shared {
                command_tx,
                snapshot_rx,
                listeners,
                state_callbacks,
                next_callback: AtomicU64::new(1),
                logger,
                config,
            }),
        }
    }

    fn send(&self, command: ManagerCommand) -> Result<()> {
        self.shared
            .command_tx
            .send(command)
            .map_err(|_| Error::ChannelClosed)
    }

    /// Connects with `token` and resolves once the connection is open.
    ///
    /// Fails immediately on an authentication error, with
    /// [`Error::ReconnectExhausted`] once automatic retries give up, and with
    /// [`Error::Disconnected`] if [`disconnect`](Self::disconnect) is called first.
    /// Calling it while connected is a no-op.
    ///
    /// 使用 `token` 连接，连接打开后返回。
    ///
    /// 认证错误时立即失败；自动重试放弃后返回 [`Error::ReconnectExhausted`]；若先调用了
    /// [`disconnect`](Self::disconnect) 则返回 [`Error::Disconnected`]。已连接时调用为空操作。
    pub async fn connect(&self, token: impl Into<AuthToken>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Connect {
            token: token.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Closes the connection and disarms every timer. Idempotent.
    ///
    /// 关闭连接并解除所有定时器。幂等。
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .send(ManagerCommand::Disconnect { reply: Some(reply) })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Requests a disconnect without waiting for it. Usable from `Drop`.
    ///
    /// 请求断开连接但不等待。可在 `Drop` 中使用。
    pub fn request_disconnect(&self) {
        let _ = self.send(ManagerCommand::Disconnect { reply: None });
    }

    /// Resets the attempt counter and connects again with the last token.
    ///
    /// 重置尝试计数器并使用最后的令牌重新连接。
    pub async fn reconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Reconnect { reply })?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Replaces the credential. An open session is re-established with the new token.
    ///
    /// 替换凭据。已打开的会话会使用新令牌重新建立。
    pub fn update_token(&self, token: impl Into<AuthToken>) -> Result<()> {
        self.send(ManagerCommand::UpdateToken {
            token: token.into(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.snapshot_rx.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.snapshot_rx.borrow().clone()
    }

    /// A receiver that observes every published snapshot.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.snapshot_rx.clone()
    }

    /// Waits until `state` is reached.
    ///
    /// 等待直到到达 `state`。
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        let mut rx = self.watch_state();
        rx.wait_for(|snapshot| snapshot.state == state)
            .await
            .map(|_| ())
            .map_err(|_| Error::ChannelClosed)
    }

    /// Registers `callback` under `id`; it runs on every published snapshot.
    /// Registering again under the same `id` replaces the previous callback.
    ///
    /// 以 `id` 注册 `callback`，每次发布快照时运行。以相同 `id` 再次注册会替换之前的回调。
    pub fn subscribe_to_state(
        &self,
        id: impl Into<String>,
        callback: impl Fn(&ConnectionSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let id = id.into();
        let generation = self.shared.next_callback.fetch_add(1, Ordering::Relaxed);
        let callback: StateCallback = Arc::new(callback);
        self.shared
            .state_callbacks
            .insert(id.clone(), (generation, callback));

        let callbacks = Arc::downgrade(&self.shared.state_callbacks);
        Subscription::new(move || {
            if let Some(callbacks) = callbacks.upgrade() {
                callbacks.remove_if(&id, |_, (current, _)| *current == generation);
            }
        })
    }

    /// Registers a typed handler for `E` on behalf of `owner`.
    ///
    /// 代表 `owner` 为 `E` 注册一个带类型的处理器。
    pub fn on<E: Event>(
        &self,
        owner: impl Into<OwnerId>,
        handler: impl Fn(&E::Payload) + Send + Sync + 'static,
    ) -> Subscription {
        let erased: Handler = Arc::new(move |event: &InboundEvent| {
            if let Some(payload) = E::payload(event) {
                handler(payload);
            }
        });
        self.on_raw(E::KIND, owner.into(), erased)
    }

    /// Registers an untyped handler for `event`. The age sweep leaves it alone while
    /// the returned [`Subscription`] is held.
    pub fn on_raw(&self, event: EventKind, owner: OwnerId, handler: Handler) -> Subscription {
        let (id, lease) = self.shared.listeners.register_leased(event, owner, handler);
        let listeners = Arc::downgrade(&self.shared.listeners);
        Subscription::for_listener(id, lease, move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.unregister_listener(event, Some(id));
            }
        })
    }

    /// Removes one handler, or all handlers for `event` when `id` is `None`.
    pub fn off(&self, event: EventKind, id: Option<ListenerId>) -> usize {
        self.shared.listeners.unregister_listener(event, id)
    }

    /// Removes every handler registered by `owner`.
    pub fn remove_owner(&self, owner: &OwnerId) -> usize {
        self.shared.listeners.unregister_owner(owner)
    }

    /// Sends a command if connected. Otherwise the command is dropped, logged, and
    /// [`Error::NotConnected`] is returned. Nothing is queued.
    ///
    /// 若已连接则发送命令。否则丢弃该命令、记录日志并返回 [`Error::NotConnected`]。
    /// 不做任何排队。
    pub fn emit(&self, command: OutboundCommand) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            self.shared
                .logger
                .message_dropped(command.event_name(), state);
            return Err(Error::NotConnected);
        }
        self.send(ManagerCommand::Emit { command })
    }

    pub fn send_hardware_command(&self, command: HardwareCommand) -> Result<()> {
        self.emit(OutboundCommand::Hardware(command))
    }

    /// Tracks `room`; it is joined now if connected and after every reconnect.
    ///
    /// 跟踪 `room`；若已连接则立即加入，并在每次重连后重新加入。
    pub fn join_room(&self, room: impl Into<String>) -> Result<()> {
        self.send(ManagerCommand::JoinRoom { room: room.into() })
    }

    pub fn leave_room(&self, room: impl Into<String>) -> Result<()> {
        self.send(ManagerCommand::LeaveRoom { room: room.into() })
    }

    pub async fn rooms(&self) -> Result<RoomMembership> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Rooms { reply })?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Reports which actor timers are currently armed.
    ///
    /// 报告actor当前激活了哪些定时器。
    pub async fn timers(&self) -> Result<ArmedTimers> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Timers { reply })?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    pub fn listeners(&self) -> &Arc<ListenerMemoryManager> {
        &self.shared.listeners
    }

    pub fn logger(&self) -> &ConnectionLogger {
        &self.shared.logger
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests;
