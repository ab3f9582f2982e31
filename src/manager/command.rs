//! Commands sent from [`ConnectionManager`](super::ConnectionManager) handles to the actor.
//!
//! 从 [`ConnectionManager`](super::ConnectionManager) 句柄发往actor的命令。

use super::{ArmedTimers, RoomMembership};
use crate::{auth::AuthToken, error::Result, event::OutboundCommand};
use tokio::sync::oneshot;

#[derive(Debug)]
pub(crate) enum ManagerCommand {
    /// Connect with `token`. The reply resolves once connected or once the attempt
    /// (including its retries) is abandoned.
    /// 使用 `token` 连接。连接成功或本次尝试（含重试）被放弃时回复。
    Connect {
        token: AuthToken,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Tear everything down. `reply` is `None` when issued from a destructor.
    /// 拆除一切。从析构函数发出时 `reply` 为 `None`。
    Disconnect { reply: Option<oneshot::Sender<()>> },
    /// Reset the attempt counter and connect again with the last token.
    Reconnect { reply: oneshot::Sender<Result<()>> },
    /// Replace the credential; an open session is re-established with it.
    UpdateToken { token: AuthToken },
    Emit { command: OutboundCommand },
    JoinRoom { room: String },
    LeaveRoom { room: String },
    Timers { reply: oneshot::Sender<ArmedTimers> },
    Rooms { reply: oneshot::Sender<RoomMembership> },
}
