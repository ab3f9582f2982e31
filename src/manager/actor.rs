//! The connection actor: sole owner of the session, the state machine and all timers.
//!
//! 连接actor：会话、状态机与所有定时器的唯一所有者。

use super::{
    ArmedTimers, ConnectionSnapshot, ConnectionState, RoomMembership, StateCallback,
    StateCallbacks,
    backoff::ReconnectPolicy,
    command::ManagerCommand,
    heartbeat::{Clock, HeartbeatCycle},
};
use crate::{
    auth::AuthToken,
    classify::{ClassifiedError, classify, classify_signals},
    config::Config,
    error::{Error, Result},
    event::{HeartbeatPayload, InboundEvent, OutboundCommand, PONG_EVENT, WireMessage},
    listener::ListenerMemoryManager,
    logger::ConnectionLogger,
    transport::{HandshakeRequest, Transport, TransportEvent, TransportSession},
};
use std::{
    any::Any,
    collections::BTreeSet,
    future::pending,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval, sleep_until},
};
use tracing::{debug, error, info, warn};

type OpenResult = (u64, Result<TransportSession>);

pub(crate) struct ConnectionActor {
    config: Config,
    transport: Arc<dyn Transport>,
    command_rx: mpsc::UnboundedReceiver<ManagerCommand>,
    snapshot_tx: watch::Sender<ConnectionSnapshot>,
    listeners: Arc<ListenerMemoryManager>,
    state_callbacks: Arc<StateCallbacks>,
    logger: ConnectionLogger,

    machine: super::state::StateMachine,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatCycle,
    clock: Clock,

    token: Option<AuthToken>,
    session: Option<TransportSession>,
    /// Automatic reconnect attempts since the last successful connect.
    attempt: u32,
    last_error: Option<ClassifiedError>,
    waiters: Vec<oneshot::Sender<Result<()>>>,

    /// Bumped on every handshake so late results from cancelled ones are ignored.
    /// 每次握手时递增，以忽略已取消握手的迟到结果。
    generation: u64,
    pending_open: Option<JoinHandle<()>>,
    open_tx: mpsc::UnboundedSender<OpenResult>,
    open_rx: mpsc::UnboundedReceiver<OpenResult>,

    connect_deadline: Option<Instant>,
    reconnect_deadline: Option<Instant>,

    rooms: BTreeSet<String>,
    joined_rooms: BTreeSet<String>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_transport_event(session: &mut Option<TransportSession>) -> TransportEvent {
    match session {
        Some(session) => session
            .inbound
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed {
                reason: "transport closed".to_string(),
            }),
        None => pending().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ConnectionActor {
    pub(crate) fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        command_rx: mpsc::UnboundedReceiver<ManagerCommand>,
        snapshot_tx: watch::Sender<ConnectionSnapshot>,
        listeners: Arc<ListenerMemoryManager>,
        state_callbacks: Arc<StateCallbacks>,
        logger: ConnectionLogger,
    ) -> Self {
        let (open_tx, open_rx) = mpsc::unbounded_channel();
        Self {
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            heartbeat: HeartbeatCycle::new(config.heartbeat.clone()),
            config,
            transport,
            command_rx,
            snapshot_tx,
            listeners,
            state_callbacks,
            logger,
            machine: super::state::StateMachine::new(),
            clock: Clock::new(),
            token: None,
            session: None,
            attempt: 0,
            last_error: None,
            waiters: Vec::new(),
            generation: 0,
            pending_open: None,
            open_tx,
            open_rx,
            connect_deadline: None,
            reconnect_deadline: None,
            rooms: BTreeSet::new(),
            joined_rooms: BTreeSet::new(),
        }
    }

    /// Runs until every handle is dropped.
    ///
    /// 运行直到所有句柄被丢弃。
    pub(crate) async fn run(mut self) {
        let mut sweep = interval(self.config.listeners.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        sweep.tick().await;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some((generation, result)) = self.open_rx.recv() => {
                    self.handle_open_result(generation, result);
                }
                event = next_transport_event(&mut self.session) => {
                    self.handle_transport_event(event);
                }
                _ = sleep_until_opt(self.connect_deadline) => self.handle_connect_timeout(),
                _ = sleep_until_opt(self.reconnect_deadline) => self.handle_reconnect_timer(),
                _ = sleep_until_opt(self.heartbeat.next_ping) => self.send_ping(),
                _ = sleep_until_opt(self.heartbeat.timeout_deadline) => self.handle_heartbeat_timeout(),
                _ = sweep.tick() => {
                    self.listeners.sweep_expired();
                }
            }
        }

        debug!("All connection handles dropped, shutting down actor");
        self.shutdown("connection manager dropped");
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Connect { token, reply } => self.handle_connect(token, reply),
            ManagerCommand::Disconnect { reply } => {
                self.shutdown("client disconnect");
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            ManagerCommand::Reconnect { reply } => self.handle_manual_reconnect(reply),
            ManagerCommand::UpdateToken { token } => self.handle_update_token(token),
            ManagerCommand::Emit { command } => self.send_command(&command),
            ManagerCommand::JoinRoom { room } => {
                if self.rooms.insert(room.clone()) || !self.joined_rooms.contains(&room) {
                    self.send_if_connected(&OutboundCommand::JoinRoom { room });
                }
            }
            ManagerCommand::LeaveRoom { room } => {
                self.rooms.remove(&room);
                self.joined_rooms.remove(&room);
                self.send_if_connected(&OutboundCommand::LeaveRoom { room });
            }
            ManagerCommand::Timers { reply } => {
                let _ = reply.send(self.armed_timers());
            }
            ManagerCommand::Rooms { reply } => {
                let _ = reply.send(RoomMembership {
                    requested: self.rooms.clone(),
                    joined: self.joined_rooms.clone(),
                });
            }
        }
    }

    fn handle_connect(&mut self, token: AuthToken, reply: oneshot::Sender<Result<()>>) {
        match self.machine.current() {
            ConnectionState::Connected => {
                warn!("connect() called while already connected, ignoring");
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                debug!("connect() joined an attempt already in progress");
                self.token = Some(token);
                self.waiters.push(reply);
            }
            ConnectionState::Disconnected => {
                self.token = Some(token);
                self.attempt = 0;
                self.last_error = None;
                self.waiters.push(reply);
                self.begin_connect();
            }
        }
    }

    fn handle_manual_reconnect(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.token.is_none() {
            let _ = reply.send(Err(Error::NoCredential));
            return;
        }
        match self.machine.current() {
            ConnectionState::Connected => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting => self.waiters.push(reply),
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                info!("Manual reconnect requested");
                self.reconnect_deadline = None;
                self.attempt = 0;
                self.waiters.push(reply);
                self.begin_connect();
            }
        }
    }

    fn handle_update_token(&mut self, token: AuthToken) {
        self.token = Some(token);
        match self.machine.current() {
            ConnectionState::Connected => {
                info!("Credential rotated, re-establishing session");
                self.teardown_session();
                self.transition(ConnectionState::Reconnecting);
                self.begin_connect();
            }
            // The handshake in flight still carries the old token.
            ConnectionState::Connecting => {
                info!("Credential rotated mid-handshake, restarting it");
                self.begin_connect();
            }
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {}
        }
    }

    /// Starts a handshake with the current token and arms the connect timeout. A
    /// handshake still in flight is aborted and its result discarded.
    ///
    /// 使用当前令牌开始握手并激活连接超时。仍在进行中的握手会被中止，其结果作废。
    fn begin_connect(&mut self) {
        let Some(token) = self.token.clone() else {
            self.fail_terminal(Error::NoCredential);
            return;
        };

        if self.machine.current() != ConnectionState::Connecting {
            self.transition(ConnectionState::Connecting);
        }
        self.logger.connect_attempt(self.attempt + 1);

        self.generation += 1;
        let generation = self.generation;
        let request = HandshakeRequest {
            endpoint: self.config.endpoint.clone(),
            token,
            transports: self.config.connection.transports.clone(),
        };
        let transport = self.transport.clone();
        let open_tx = self.open_tx.clone();
        if let Some(previous) = self.pending_open.replace(tokio::spawn(async move {
            let result = transport.open(request).await;
            let _ = open_tx.send((generation, result));
        })) {
            previous.abort();
        }
        self.connect_deadline = Some(Instant::now() + self.config.connection.connect_timeout);
    }

    fn handle_open_result(&mut self, generation: u64, result: Result<TransportSession>) {
        if generation != self.generation || self.machine.current() != ConnectionState::Connecting
        {
            debug!(generation, "Discarding stale handshake result");
            return;
        }
        self.pending_open = None;
        self.connect_deadline = None;
        match result {
            Ok(session) => self.on_connected(session),
            Err(error) => self.on_connect_failure(error),
        }
    }

    fn on_connected(&mut self, session: TransportSession) {
        let mode = session.mode;
        self.session = Some(session);
        self.attempt = 0;
        self.last_error = None;
        self.joined_rooms.clear();
        self.heartbeat.start(Instant::now());
        self.logger.connected(mode.as_str());
        self.transition(ConnectionState::Connected);

        if self.config.connection.rejoin_rooms_on_reconnect {
            let rooms: Vec<String> = self.rooms.iter().cloned().collect();
            for room in rooms {
                self.send_command(&OutboundCommand::JoinRoom { room });
            }
        }

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_connect_failure(&mut self, error: Error) {
        let classified = classify(&error);
        self.logger.connect_failed(&classified);
        let is_auth = classified.is_auth();
        self.last_error = Some(classified);
        if is_auth {
            self.handle_auth_loss(error);
        } else {
            self.schedule_reconnect(error);
        }
    }

    fn handle_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if self.machine.current() != ConnectionState::Connecting {
            return;
        }
        // Results of the abandoned handshake must not be applied.
        self.generation += 1;
        if let Some(pending_open) = self.pending_open.take() {
            pending_open.abort();
        }
        self.on_connect_failure(Error::ConnectTimeout);
    }

    /// Schedules the next automatic attempt, or gives up.
    ///
    /// 安排下一次自动尝试，或者放弃。
    fn schedule_reconnect(&mut self, cause: Error) {
        if !self.policy.enabled() {
            debug!("Automatic reconnect disabled");
            self.fail_terminal(cause);
            return;
        }

        self.attempt += 1;
        let max_attempts = self.policy.max_attempts();
        if self.attempt > max_attempts {
            self.attempt = max_attempts;
            self.logger.reconnect_exhausted(max_attempts);
            self.fail_terminal(Error::ReconnectExhausted {
                attempts: max_attempts,
            });
            return;
        }

        let delay = self.policy.delay(self.attempt);
        self.reconnect_deadline = Some(Instant::now() + delay);
        self.logger.reconnect_scheduled(self.attempt, delay);
        self.transition(ConnectionState::Reconnecting);
    }

    fn handle_reconnect_timer(&mut self) {
        self.reconnect_deadline = None;
        if self.machine.current() == ConnectionState::Reconnecting {
            self.begin_connect();
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::Error(error) => {
                let classified = classify(&error);
                self.logger.error(&classified);
                let is_auth = classified.is_auth();
                self.last_error = Some(classified);
                if is_auth {
                    self.handle_auth_loss(error);
                } else {
                    self.publish();
                }
            }
            TransportEvent::Closed { reason } => self.on_dropped(&reason),
        }
    }

    fn handle_message(&mut self, message: WireMessage) {
        self.logger.message_received(&message.event);

        if message.event == PONG_EVENT {
            match serde_json::from_value::<HeartbeatPayload>(message.payload) {
                Ok(pong) => {
                    let latency = self.heartbeat.on_pong(pong.timestamp, &self.clock);
                    self.logger.heartbeat_latency(latency);
                    self.publish();
                }
                Err(err) => warn!(error = %err, "Malformed pong"),
            }
            return;
        }

        let event = match InboundEvent::decode(&message) {
            Ok(event) => event,
            Err(err) => {
                warn!(event = %message.event, error = %err, "Dropping undecodable inbound event");
                return;
            }
        };

        let server_error = match &event {
            InboundEvent::RoomJoined(payload) => {
                self.joined_rooms.insert(payload.room.clone());
                None
            }
            InboundEvent::ServerError(payload) => Some(classify_signals(
                payload.status,
                payload.code.as_deref(),
                &payload.message,
            )),
            _ => None,
        };

        self.dispatch(&event);

        if let Some(classified) = server_error {
            self.logger.error(&classified);
            let is_auth = classified.is_auth();
            let message = classified.message.clone();
            self.last_error = Some(classified);
            if is_auth {
                self.handle_auth_loss(Error::Authentication(message));
            } else {
                self.publish();
            }
        }
    }

    /// Runs every handler for `event` in registration order. A panicking handler is
    /// logged and does not prevent the rest from running.
    ///
    /// 按注册顺序运行 `event` 的所有处理器。发生panic的处理器会被记录，且不影响其余
    /// 处理器运行。
    fn dispatch(&self, event: &InboundEvent) {
        let kind = event.kind();
        for (id, owner, handler) in self.listeners.handlers_for(kind) {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let message = panic_message(panic.as_ref());
                debug!(?id, %owner, "Handler panicked during dispatch");
                self.logger.handler_panicked(kind.as_str(), &message);
            }
        }
    }

    fn send_ping(&mut self) {
        let now = Instant::now();
        let timestamp = self.clock.now_millis();
        self.heartbeat.on_ping_sent(now);
        self.send_command(&OutboundCommand::Ping { timestamp });
    }

    fn handle_heartbeat_timeout(&mut self) {
        self.heartbeat.timeout_deadline = None;
        let waited = self
            .heartbeat
            .last_ping_sent_at
            .map(|sent| Instant::now().saturating_duration_since(sent))
            .unwrap_or(self.config.heartbeat.timeout);
        self.logger.heartbeat_timeout(waited);
        self.on_dropped("ping timeout");
    }

    /// The session ended without the client asking for it.
    ///
    /// 会话在客户端未请求的情况下结束。
    fn on_dropped(&mut self, reason: &str) {
        if self.machine.current() != ConnectionState::Connected {
            return;
        }
        self.teardown_session();
        self.logger.disconnected(reason, false);
        let cause = Error::transport(format!("connection lost: {reason}"));
        self.last_error = Some(classify(&cause));
        self.schedule_reconnect(cause);
    }

    /// Authentication failed: the token is dropped and nothing is retried.
    ///
    /// 认证失败：丢弃令牌且不进行任何重试。
    fn handle_auth_loss(&mut self, error: Error) {
        warn!(error = %error, "Authentication rejected, not retrying");
        self.teardown_session();
        self.token = None;
        let error = match error {
            Error::Authentication(_) => error,
            other => Error::Authentication(other.to_string()),
        };
        self.fail_terminal(error);
    }

    /// Moves to `Disconnected` with every timer disarmed and rejects pending waiters.
    fn fail_terminal(&mut self, error: Error) {
        self.disarm_all();
        self.teardown_session();
        if self.machine.current() != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected);
        } else {
            self.publish();
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Client-initiated teardown. Idempotent.
    ///
    /// 客户端发起的拆除。幂等。
    fn shutdown(&mut self, reason: &str) {
        self.disarm_all();
        let was_connected = self.session.is_some();
        self.teardown_session();
        self.attempt = 0;
        if self.machine.current() != ConnectionState::Disconnected {
            if was_connected {
                self.logger.disconnected(reason, true);
            }
            self.transition(ConnectionState::Disconnected);
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(Error::Disconnected));
        }
    }

    fn disarm_all(&mut self) {
        self.generation += 1;
        if let Some(pending_open) = self.pending_open.take() {
            pending_open.abort();
        }
        self.connect_deadline = None;
        self.reconnect_deadline = None;
        self.heartbeat.stop();
    }

    fn teardown_session(&mut self) {
        self.heartbeat.stop();
        self.joined_rooms.clear();
        // Dropping the session closes both directions.
        self.session = None;
    }

    fn send_if_connected(&mut self, command: &OutboundCommand) {
        if self.session.is_some() {
            self.send_command(command);
        }
    }

    fn send_command(&mut self, command: &OutboundCommand) {
        let Some(session) = &self.session else {
            self.logger
                .message_dropped(command.event_name(), self.machine.current());
            return;
        };
        let sent = command.encode().and_then(|message| session.send(message));
        match sent {
            Ok(()) => self.logger.message_sent(command.event_name()),
            Err(err) => error!(event = command.event_name(), error = %err, "Failed to send"),
        }
    }

    fn armed_timers(&self) -> ArmedTimers {
        ArmedTimers {
            connect_timeout: self.connect_deadline.is_some(),
            reconnect: self.reconnect_deadline.is_some(),
            heartbeat_interval: self.heartbeat.next_ping.is_some(),
            heartbeat_timeout: self.heartbeat.timeout_deadline.is_some(),
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        match self.machine.transition_to(to) {
            Ok(from) => self.logger.state_changed(from, to),
            Err(invalid) => error!(from = %invalid.from, to = %invalid.to, "Refusing state transition"),
        }
        self.publish();
    }

    /// Publishes the current snapshot and runs the state callbacks if it changed.
    ///
    /// 发布当前快照；若有变化则运行状态回调。
    fn publish(&self) {
        let snapshot = ConnectionSnapshot {
            state: self.machine.current(),
            last_error: self.last_error.clone(),
            reconnect_attempt: self.attempt,
            latency: self.heartbeat.last_latency,
            transport: self.session.as_ref().map(|session| session.mode),
        };
        let changed = self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });
        if !changed {
            return;
        }

        let callbacks: Vec<(String, StateCallback)> = self
            .state_callbacks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().1.clone()))
            .collect();
        for (id, callback) in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&snapshot))) {
                let message = panic_message(panic.as_ref());
                self.logger
                    .handler_panicked(&format!("state:{id}"), &message);
            }
        }
    }
}
