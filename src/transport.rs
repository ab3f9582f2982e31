//! Transport layer abstraction for the realtime connection.
//!
//! Wire framing, the websocket upgrade and the polling fallback all belong to the
//! transport implementation. The connection manager only sees a handshake that
//! succeeds or fails, a stream of named messages, and a way to send them.
//!
//! 实时连接的传输层抽象。
//!
//! 线上分帧、websocket升级以及轮询回退都属于传输实现。连接管理器只看到一次成功或
//! 失败的握手、一串具名消息，以及发送消息的方式。

pub mod memory;

use crate::{
    auth::AuthToken,
    error::{Error, Result},
    event::WireMessage,
};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::mpsc;

pub use memory::{HandshakeOutcome, HandshakeRecord, MemoryTransport, ServerHandle, ServerLink};

/// The negotiated carrier of a session.
///
/// 会话协商出的承载方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    WebSocket,
    Polling,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::WebSocket => "websocket",
            TransportMode::Polling => "polling",
        }
    }
}

/// Everything the transport needs to open a session.
///
/// 传输层打开会话所需的全部信息。
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub endpoint: String,
    /// Carried in the handshake auth payload.
    /// 放在握手的认证载荷中。
    pub token: AuthToken,
    /// Modes to try, in order.
    /// 依次尝试的模式。
    pub transports: Vec<TransportMode>,
}

/// Something that happened on an open session.
///
/// 已打开会话上发生的事情。
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(WireMessage),
    Error(Error),
    /// The session ended without the client asking for it.
    /// 会话在客户端未请求的情况下结束。
    Closed { reason: String },
}

/// An open session. Dropping it closes the session.
///
/// 一个已打开的会话。丢弃它即关闭会话。
#[derive(Debug)]
pub struct TransportSession {
    pub mode: TransportMode,
    pub outbound: mpsc::UnboundedSender<WireMessage>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportSession {
    /// Queues a message for sending.
    /// 将消息排入发送队列。
    pub fn send(&self, message: WireMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::transport("transport session is closed"))
    }
}

/// Transport interface for the realtime connection.
///
/// 实时连接的传输接口。
#[async_trait]
pub trait Transport: Send + Sync + Debug + 'static {
    /// Performs the handshake and returns the open session.
    ///
    /// Authentication rejections must be reported as [`Error::Authentication`] or as a
    /// transport error with status 401/403.
    ///
    /// 执行握手并返回已打开的会话。
    ///
    /// 认证拒绝必须以 [`Error::Authentication`] 或状态码为401/403的传输错误报告。
    async fn open(&self, request: HandshakeRequest) -> Result<TransportSession>;
}
