//! An in-process transport with a scriptable server side.
//!
//! 具有可编排服务端的进程内传输。

use super::{HandshakeRequest, Transport, TransportEvent, TransportMode, TransportSession};
use crate::{
    auth::AuthToken,
    error::{Error, Result},
    event::{PING_EVENT, PONG_EVENT, WireMessage},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::trace;

/// How the server answers one handshake.
///
/// 服务端如何应答一次握手。
#[derive(Debug, Clone)]
pub enum HandshakeOutcome {
    Accept,
    /// Accept after a delay.
    AcceptAfter(Duration),
    Reject(Error),
    /// Never answer; the client's connect timeout has to fire.
    /// 永不应答；客户端的连接超时必须触发。
    Hang,
}

/// A handshake observed by the server.
#[derive(Debug, Clone)]
pub struct HandshakeRecord {
    pub endpoint: String,
    pub token: AuthToken,
}

struct Shared {
    script: Mutex<VecDeque<HandshakeOutcome>>,
    default_outcome: Mutex<HandshakeOutcome>,
    websocket_available: Mutex<bool>,
    auto_pong: Mutex<bool>,
    handshakes: Mutex<Vec<HandshakeRecord>>,
    links_tx: mpsc::UnboundedSender<ServerLink>,
}

/// Client half of the in-process transport.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("handshakes", &self.shared.handshakes.lock().len())
            .finish()
    }
}

/// Server half of the in-process transport.
///
/// 进程内传输的服务端一半。
pub struct ServerHandle {
    shared: Arc<Shared>,
    links_rx: mpsc::UnboundedReceiver<ServerLink>,
}

/// One accepted session, seen from the server.
///
/// 从服务端看到的一个已接受会话。
pub struct ServerLink {
    pub token: AuthToken,
    pub mode: TransportMode,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<WireMessage>,
}

impl MemoryTransport {
    /// Creates a connected transport/server pair.
    ///
    /// 创建一对相互连接的传输与服务端。
    pub fn pair() -> (Self, ServerHandle) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            script: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(HandshakeOutcome::Accept),
            websocket_available: Mutex::new(true),
            auto_pong: Mutex::new(true),
            handshakes: Mutex::new(Vec::new()),
            links_tx,
        });
        (
            Self {
                shared: shared.clone(),
            },
            ServerHandle { shared, links_rx },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, request: HandshakeRequest) -> Result<TransportSession> {
        let outcome = {
            let next = self.shared.script.lock().pop_front();
            next.unwrap_or_else(|| self.shared.default_outcome.lock().clone())
        };
        self.shared.handshakes.lock().push(HandshakeRecord {
            endpoint: request.endpoint.clone(),
            token: request.token.clone(),
        });

        match outcome {
            HandshakeOutcome::Accept => {}
            HandshakeOutcome::AcceptAfter(delay) => tokio::time::sleep(delay).await,
            HandshakeOutcome::Reject(err) => return Err(err),
            HandshakeOutcome::Hang => return std::future::pending().await,
        }

        let websocket_available = *self.shared.websocket_available.lock();
        let mode = request
            .transports
            .iter()
            .copied()
            .find(|mode| *mode == TransportMode::Polling || websocket_available)
            .ok_or_else(|| Error::transport_code("websocket upgrade failed", "ECONNREFUSED"))?;

        let (outbound, mut client_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (server_tx, from_client) = mpsc::unbounded_channel();

        // Relay client traffic to the server link, answering pings on the way.
        let auto_pong = *self.shared.auto_pong.lock();
        let pong_tx = to_client.clone();
        tokio::spawn(async move {
            while let Some(message) = client_rx.recv().await {
                if auto_pong && message.event == PING_EVENT {
                    let pong = WireMessage::new(PONG_EVENT, message.payload.clone());
                    let _ = pong_tx.send(TransportEvent::Message(pong));
                }
                if server_tx.send(message).is_err() {
                    trace!("server link dropped, discarding client message");
                }
            }
        });

        let link = ServerLink {
            token: request.token,
            mode,
            to_client,
            from_client,
        };
        // The handle may have been dropped; the session still works.
        let _ = self.shared.links_tx.send(link);

        Ok(TransportSession {
            mode,
            outbound,
            inbound,
        })
    }
}

impl ServerHandle {
    /// Queues the outcome of the next handshake. Scripted outcomes run in order
    /// before the default applies again.
    ///
    /// 排入下一次握手的结果。编排的结果按顺序执行，之后恢复默认结果。
    pub fn script(&self, outcome: HandshakeOutcome) {
        self.shared.script.lock().push_back(outcome);
    }

    pub fn set_default_outcome(&self, outcome: HandshakeOutcome) {
        *self.shared.default_outcome.lock() = outcome;
    }

    /// When false, websocket upgrades fail and only polling can be negotiated.
    pub fn set_websocket_available(&self, available: bool) {
        *self.shared.websocket_available.lock() = available;
    }

    /// Whether sessions opened from now on answer `ping` automatically.
    pub fn set_auto_pong(&self, enabled: bool) {
        *self.shared.auto_pong.lock() = enabled;
    }

    pub fn handshakes(&self) -> Vec<HandshakeRecord> {
        self.shared.handshakes.lock().clone()
    }

    pub fn handshake_count(&self) -> usize {
        self.shared.handshakes.lock().len()
    }

    /// Waits for the next accepted session.
    ///
    /// 等待下一个被接受的会话。
    pub async fn next_link(&mut self) -> Result<ServerLink> {
        self.links_rx.recv().await.ok_or(Error::ChannelClosed)
    }
}

impl ServerLink {
    /// Pushes an event to the client.
    pub fn send<P: Serialize>(&self, event: &str, payload: &P) -> Result<()> {
        self.send_raw(WireMessage::encode(event, payload)?)
    }

    pub fn send_raw(&self, message: WireMessage) -> Result<()> {
        self.to_client
            .send(TransportEvent::Message(message))
            .map_err(|_| Error::NotConnected)
    }

    /// Reports an error on the session, as the transport would.
    pub fn send_error(&self, error: Error) -> Result<()> {
        self.to_client
            .send(TransportEvent::Error(error))
            .map_err(|_| Error::NotConnected)
    }

    /// Drops the session from the server side.
    ///
    /// 从服务端断开会话。
    pub fn close(self, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }

    /// The next message sent by the client, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.from_client.recv().await
    }

    /// The next message with the given event name, skipping others.
    pub async fn recv_event(&mut self, event: &str) -> Option<WireMessage> {
        while let Some(message) = self.from_client.recv().await {
            if message.event == event {
                return Some(message);
            }
        }
        None
    }

    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.from_client.try_recv().ok()
    }

    /// True once the client side has gone away.
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
