//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the realtime connection library.
/// 实时连接库的主要错误类型。
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The underlying transport reported a failure (refused, unreachable, dropped...).
    /// 底层传输报告了故障（拒绝、不可达、断开等）。
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// HTTP-like status attached by the server, if any.
        status: Option<u16>,
        /// OS/library error code such as `ECONNREFUSED`, if any.
        code: Option<String>,
    },

    /// The server rejected the bearer token.
    /// 服务器拒绝了访问令牌。
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The handshake did not complete within `connect_timeout`.
    /// 握手未在 `connect_timeout` 内完成。
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// The operation requires an established connection.
    /// 操作需要已建立的连接。
    #[error("not connected")]
    NotConnected,

    /// A pending `connect` was cancelled by `disconnect`.
    /// 挂起的 `connect` 被 `disconnect` 取消。
    #[error("connection was closed by the client")]
    Disconnected,

    /// Automatic reconnection gave up.
    /// 自动重连已放弃。
    #[error("reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// No credential is available to authenticate with.
    /// 没有可用于认证的凭据。
    #[error("no credential available")]
    NoCredential,

    /// A payload could not be encoded or decoded.
    /// 载荷无法编码或解码。
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The server sent an event name this client does not know.
    /// 服务器发送了此客户端未知的事件名。
    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    /// A user-supplied handler panicked during dispatch.
    /// 用户提供的处理器在分发期间发生panic。
    #[error("handler for `{event}` panicked: {message}")]
    HandlerPanicked { event: String, message: String },

    /// An internal channel between the handle and the actor was closed.
    /// 句柄与actor之间的内部通道已关闭。
    #[error("internal channel is broken")]
    ChannelClosed,
}

impl Error {
    /// Convenience constructor for transport errors carrying only a message.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    /// Transport error carrying a status code (e.g. a 401 on the handshake).
    pub fn transport_status(message: impl Into<String>, status: u16) -> Self {
        Error::Transport {
            message: message.into(),
            status: Some(status),
            code: None,
        }
    }

    /// Transport error carrying an OS/library error code.
    pub fn transport_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            status: None,
            code: Some(code.into()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;
